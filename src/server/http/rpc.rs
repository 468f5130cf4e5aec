// src/server/http/rpc.rs

//! The dashboard's XSRF-guarded JSON-RPC surface.
//!
//! The first request without a token is answered 409 together with a
//! freshly minted token and session cookie; every later call must present
//! both. Methods are few and read-mostly: logs, config, stats, statuses,
//! plus the runtime log-level switch.

use crate::core::journal::{CompletionStatus, JournalSnapshot, Stats};
use crate::core::session::SESSION_COOKIE_NAME;
use crate::server::context::AppState;
use crate::server::http::document::cookie_value;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

const XSRF_HEADER: &str = "X-XSRF-Token";

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

fn mint_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `GET /r` is not a thing.
pub async fn handle_rpc_get() -> Response {
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

/// `POST /r`.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let session = cookie_value(&headers, SESSION_COOKIE_NAME)
        .and_then(|value| state.sessions.get(&value));
    let presented_token = headers
        .get(XSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let authorized = match (&session, &presented_token) {
        (Some(session), Some(token)) => {
            session.lock().xsrf_token.as_deref() == Some(token.as_str())
        }
        _ => false,
    };
    if !authorized {
        // Mint a token bound to a (possibly fresh) session and ask the
        // client to retry.
        let (session_id, session, created) = state.sessions.get_or_create(
            cookie_value(&headers, SESSION_COOKIE_NAME).as_deref(),
        );
        let token = mint_token();
        session.lock().xsrf_token = Some(token.clone());

        let mut response = StatusCode::CONFLICT.into_response();
        if let Ok(value) = token.parse() {
            response.headers_mut().insert(XSRF_HEADER, value);
        }
        if created {
            if let Ok(value) =
                format!("{SESSION_COOKIE_NAME}={session_id}; Path=/; HttpOnly").parse()
            {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
        }
        return response;
    }

    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return rpc_reply(Value::Null, None, Some(format!("malformed request: {e}")));
        }
    };

    let result = match request.method.as_str() {
        "getLog" => Some(get_log(&state, &request.params)),
        "getConfig" => Some(json!(state.config.effective_values())),
        "getStats" => Some(stats_to_json(&state.journal.get_snapshot())),
        "getStatuses" => Some(get_statuses(&state)),
        "setLogLevel" => set_log_level(&state, &request.params),
        _ => None,
    };

    match result {
        Some(result) => rpc_reply(request.id, Some(result), None),
        None => rpc_reply(
            request.id,
            None,
            Some(format!("unknown method '{}'", request.method)),
        ),
    }
}

fn rpc_reply(id: Value, result: Option<Value>, error: Option<String>) -> Response {
    let body = json!({
        "id": id,
        "result": result,
        "error": error,
    });
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn get_log(state: &Arc<AppState>, params: &Value) -> Value {
    let count = params
        .get("count")
        .and_then(Value::as_u64)
        .unwrap_or(200)
        .min(1000) as usize;
    json!(state.log_buffer.tail(count))
}

fn set_log_level(state: &Arc<AppState>, params: &Value) -> Option<Value> {
    let level = params.get("level").and_then(Value::as_str)?;
    let filter = EnvFilter::try_new(level).ok()?;
    match state.log_reload.reload(filter) {
        Ok(()) => {
            info!("Log level changed to '{level}' via the dashboard.");
            Some(json!("ok"))
        }
        Err(_) => None,
    }
}

fn stats_ring_to_json(stats: &Stats) -> Value {
    json!({
        "snapshotDurationMillis": stats.snapshot_duration_millis,
        "currentIndex": stats.current_index,
        "periodEnd": stats.pending_stat_period_end,
        "buckets": stats
            .snapshots
            .iter()
            .map(|s| json!({
                "count": s.count,
                "durationSumMillis": s.duration_sum_millis,
                "maxDurationMillis": s.max_duration_millis,
                "throughputBytes": s.throughput_bytes,
            }))
            .collect::<Vec<_>>(),
    })
}

fn completion_to_json(status: Option<CompletionStatus>) -> Value {
    match status {
        None => json!("IDLE"),
        Some(CompletionStatus::Success) => json!("SUCCESS"),
        Some(CompletionStatus::Failure) => json!("FAILURE"),
        Some(CompletionStatus::Interruption) => json!("INTERRUPTION"),
    }
}

fn stats_to_json(snapshot: &JournalSnapshot) -> Value {
    json!({
        "numUniqueDocIdsPushed": snapshot.num_unique_doc_ids_pushed,
        "numTotalDocIdsPushed": snapshot.num_total_doc_ids_pushed,
        "numTotalGroupsPushed": snapshot.num_total_groups_pushed,
        "numGsaRetrievedDocuments": snapshot.num_gsa_retrieved_documents,
        "numNonGsaRequests": snapshot.num_non_gsa_requests,
        "whenStartedMillis": snapshot.when_started_millis,
        "currentTimeMillis": snapshot.current_time_millis,
        "lastFullPushStatus": completion_to_json(snapshot.last_full_push_status),
        "lastIncrementalPushStatus": completion_to_json(snapshot.last_incremental_push_status),
        "lastGroupPushStatus": completion_to_json(snapshot.last_group_push_status),
        "minuteStats": stats_ring_to_json(&snapshot.minute_stats),
        "hourStats": stats_ring_to_json(&snapshot.hour_stats),
        "dayStats": stats_ring_to_json(&snapshot.day_stats),
    })
}

/// Health codes shown per status source on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusCodeLevel {
    Unavailable,
    Inactive,
    Normal,
    Warning,
    Error,
}

impl StatusCodeLevel {
    fn as_str(self) -> &'static str {
        match self {
            StatusCodeLevel::Unavailable => "UNAVAILABLE",
            StatusCodeLevel::Inactive => "INACTIVE",
            StatusCodeLevel::Normal => "NORMAL",
            StatusCodeLevel::Warning => "WARNING",
            StatusCodeLevel::Error => "ERROR",
        }
    }
}

fn get_statuses(state: &Arc<AppState>) -> Value {
    let snapshot = state.journal.get_snapshot();

    let error_rate = state
        .journal
        .get_retriever_error_rate(crate::core::journal::DEFAULT_ERROR_RATE_WINDOW);
    let (rate_level, rate_message) = if snapshot.num_gsa_retrieved_documents == 0 {
        (StatusCodeLevel::Inactive, "no requests observed".to_string())
    } else if error_rate >= 0.5 {
        (
            StatusCodeLevel::Error,
            format!("error rate {:.0}%", error_rate * 100.0),
        )
    } else if error_rate >= 0.1 {
        (
            StatusCodeLevel::Warning,
            format!("error rate {:.0}%", error_rate * 100.0),
        )
    } else {
        (StatusCodeLevel::Normal, String::new())
    };

    let (crawl_level, crawl_message) = if snapshot.num_gsa_retrieved_documents == 0 {
        (
            StatusCodeLevel::Inactive,
            "the indexer has not crawled yet".to_string(),
        )
    } else if state.journal.has_gsa_crawled_within_last_day() {
        (StatusCodeLevel::Normal, String::new())
    } else {
        (
            StatusCodeLevel::Warning,
            "no crawl activity in the last day".to_string(),
        )
    };

    let (push_level, push_message) = match snapshot.last_full_push_status {
        None => (StatusCodeLevel::Inactive, "no push finished yet".to_string()),
        Some(CompletionStatus::Success) => (StatusCodeLevel::Normal, String::new()),
        Some(CompletionStatus::Interruption) => {
            (StatusCodeLevel::Warning, "last push interrupted".to_string())
        }
        Some(CompletionStatus::Failure) => {
            (StatusCodeLevel::Error, "last push failed".to_string())
        }
    };

    json!([
        {
            "source": "Retriever error rate",
            "code": rate_level.as_str(),
            "message": rate_message,
        },
        {
            "source": "Crawl recency",
            "code": crawl_level.as_str(),
            "message": crawl_message,
        },
        {
            "source": "Feed pushing",
            "code": push_level.as_str(),
            "message": push_message,
        },
    ])
}
