// src/server/http/authz.rs

//! The batch policy-decision-point endpoint the indexer consults for
//! late-binding authorization.

use crate::core::acl::AuthzStatus;
use crate::core::docid::DocId;
use crate::core::saml::authz::{
    AuthzDecision, SamlDecision, build_authz_response_envelope, parse_authz_queries,
    parse_resource,
};
use crate::server::context::AppState;
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// `POST /saml-authz` with a SOAP envelope of `AuthzDecisionQuery`s.
pub async fn handle_batch_authz(
    State(state): State<Arc<AppState>>,
    method: Method,
    body: String,
) -> Response {
    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let batch = match parse_authz_queries(&body) {
        Ok(batch) => batch,
        Err(e) => {
            debug!("Rejecting authorization batch: {e}");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    // Resources outside this adaptor's content endpoint cannot be decided
    // here; everything else is resolved to a document id and asked in one
    // batch.
    let mut doc_ids: Vec<DocId> = Vec::new();
    let mut resolved: Vec<Option<DocId>> = Vec::with_capacity(batch.queries.len());
    for query in &batch.queries {
        let doc_id = parse_resource(&query.resource)
            .filter(|url| state.codec.is_local(url))
            .and_then(|url| state.codec.decode_url(&url).ok());
        if let Some(doc_id) = &doc_id {
            doc_ids.push(doc_id.clone());
        }
        resolved.push(doc_id);
    }

    let statuses: BTreeMap<DocId, AuthzStatus> = match state.adaptor.authz_authority() {
        Some(authority) if !doc_ids.is_empty() => {
            match authority.is_user_authorized(&batch.identity, &doc_ids).await {
                Ok(statuses) => statuses,
                Err(e) => {
                    // A failing authority denies everything rather than
                    // leaking indexed content.
                    warn!("Authorization authority failed: {e}");
                    BTreeMap::new()
                }
            }
        }
        _ => {
            if state.settings.mark_all_docs_public {
                doc_ids
                    .iter()
                    .map(|id| (id.clone(), AuthzStatus::Permit))
                    .collect()
            } else {
                BTreeMap::new()
            }
        }
    };

    let decisions: Vec<AuthzDecision> = batch
        .queries
        .iter()
        .zip(resolved.iter())
        .map(|(query, doc_id)| {
            let decision = match doc_id {
                None => SamlDecision::Indeterminate,
                Some(doc_id) => statuses
                    .get(doc_id)
                    .copied()
                    .map(SamlDecision::from)
                    .unwrap_or(SamlDecision::Deny),
            };
            AuthzDecision {
                query_id: query.id.clone(),
                resource: query.resource.clone(),
                decision,
            }
        })
        .collect();

    let envelope = build_authz_response_envelope(
        &decisions,
        &batch.subject,
        state.codec.base_uri().as_str(),
        state.time.now(),
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        envelope,
    )
        .into_response()
}
