// src/server/http/authn.rs

//! The user-facing SAML endpoints: starting an authentication attempt and
//! consuming the returned artifact.

use crate::core::errors::FeedgateError;
use crate::core::session::SESSION_COOKIE_NAME;
use crate::server::context::AppState;
use crate::server::http::document::cookie_value;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use tracing::warn;

/// Splits a query string into decoded (key, value) pairs. Each parameter is
/// split on its own `=`; the query is only ever split on `&`.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|param| {
            let (k, v) = param.split_once('=').unwrap_or((param, ""));
            (
                percent_decode_str(k).decode_utf8_lossy().into_owned(),
                percent_decode_str(v).decode_utf8_lossy().into_owned(),
            )
        })
        .collect()
}

pub fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    parse_query(query?)
        .into_iter()
        .find_map(|(k, v)| (k == name).then_some(v))
}

fn session_cookie(id: &str) -> String {
    format!("{SESSION_COOKIE_NAME}={id}; Path=/; HttpOnly")
}

/// `GET /saml-authn`: redirect the user agent to the IdP.
pub async fn handle_authn(
    State(state): State<Arc<AppState>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let (session_id, session, created) =
        state
            .sessions
            .get_or_create(cookie_value(&headers, SESSION_COOKIE_NAME).as_deref());
    let original_uri =
        query_param(uri.query(), "returnPath").unwrap_or_else(|| "/".to_string());

    let redirect = match state.saml.start_attempt(&session, &original_uri) {
        Ok(url) => url,
        Err(e) => {
            warn!("Failed to start authentication: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut response = axum::response::Redirect::temporary(redirect.as_str()).into_response();
    if created {
        if let Ok(value) = session_cookie(&session_id).parse() {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

/// `GET /saml-assertion-consumer?SAMLart=…`: resolve the artifact over the
/// back channel and finish the attempt.
pub async fn handle_assertion_consumer(
    State(state): State<Arc<AppState>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let Some(artifact) = query_param(uri.query(), "SAMLart") else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(session) = cookie_value(&headers, SESSION_COOKIE_NAME)
        .and_then(|value| state.sessions.get(&value))
    else {
        // No session means no attempt to finish.
        return StatusCode::FORBIDDEN.into_response();
    };

    match state.saml.consume_artifact(&session, &artifact).await {
        Ok(original_uri) => {
            axum::response::Redirect::to(&original_uri).into_response()
        }
        Err(FeedgateError::InvalidState(_)) => StatusCode::CONFLICT.into_response(),
        Err(e) => {
            warn!("Artifact consumption failed: {e}");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}
