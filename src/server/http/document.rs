// src/server/http/document.rs

//! The content endpoint: decode, authenticate, authorize, dispatch to the
//! adaptor under a watchdog, and shape the response.

use crate::core::acl::{Acl, AuthnIdentity, AuthzStatus};
use crate::core::adaptor::{DocRequest, Response as AdaptorResponse};
use crate::core::docid::DocId;
use crate::core::errors::FeedgateError;
use crate::core::metadata::Metadata;
use crate::core::metrics;
use crate::core::session::{AuthnState, SESSION_COOKIE_NAME};
use crate::core::transform::TransformParams;
use crate::server::context::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Facade state: the linear progression every exchange follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FacadeState {
    Setup,
    NotModified,
    NoContent,
    Content,
}

/// Collects everything the adaptor produces for one document. Metadata
/// setters are legal only before the first content byte; the terminal
/// `respond_*` calls are mutually exclusive with content.
pub struct DocResponseFacade {
    state: FacadeState,
    content: Vec<u8>,
    content_type: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    metadata: Metadata,
    acl: Option<Acl>,
    named_resources: Vec<(String, Acl)>,
    secure: bool,
    anchors: Vec<(Url, Option<String>)>,
    no_index: bool,
    no_follow: bool,
    no_archive: bool,
    display_url: Option<Url>,
    crawl_once: bool,
    lock: bool,
    /// Swaps the watchdog to the content deadline on the first byte.
    content_phase: Option<ContentPhaseSwap>,
}

struct ContentPhaseSwap {
    watchdog: Arc<crate::core::watchdog::Watchdog>,
    worker_id: u64,
    token: CancellationToken,
    content_timeout: std::time::Duration,
}

impl DocResponseFacade {
    fn new(content_phase: Option<ContentPhaseSwap>) -> Self {
        Self {
            state: FacadeState::Setup,
            content: Vec::new(),
            content_type: None,
            last_modified: None,
            metadata: Metadata::new(),
            acl: None,
            named_resources: Vec::new(),
            secure: false,
            anchors: Vec::new(),
            no_index: false,
            no_follow: false,
            no_archive: false,
            display_url: None,
            crawl_once: false,
            lock: false,
            content_phase,
        }
    }

    fn ensure_setup(&self, what: &str) -> Result<(), FeedgateError> {
        if self.state != FacadeState::Setup {
            return Err(FeedgateError::IllegalResponseState(format!(
                "{what} after the response was started"
            )));
        }
        Ok(())
    }
}

impl AdaptorResponse for DocResponseFacade {
    fn respond_not_modified(&mut self) -> Result<(), FeedgateError> {
        self.ensure_setup("respondNotModified")?;
        self.state = FacadeState::NotModified;
        Ok(())
    }

    fn respond_no_content(&mut self) -> Result<(), FeedgateError> {
        self.ensure_setup("respondNoContent")?;
        self.state = FacadeState::NoContent;
        Ok(())
    }

    fn write_content(&mut self, buf: &[u8]) -> Result<(), FeedgateError> {
        match self.state {
            FacadeState::Setup => {
                // First byte of output seals the headers and rebases the
                // watchdog onto the content deadline.
                self.state = FacadeState::Content;
                if let Some(swap) = &self.content_phase {
                    swap.watchdog
                        .restart(swap.worker_id, &swap.token, swap.content_timeout)?;
                }
            }
            FacadeState::Content => {}
            _ => {
                return Err(FeedgateError::IllegalResponseState(
                    "content after a terminal response".to_string(),
                ));
            }
        }
        self.content.extend_from_slice(buf);
        Ok(())
    }

    fn set_content_type(&mut self, content_type: &str) -> Result<(), FeedgateError> {
        self.ensure_setup("setContentType")?;
        self.content_type = Some(content_type.to_string());
        Ok(())
    }

    fn set_last_modified(&mut self, when: DateTime<Utc>) -> Result<(), FeedgateError> {
        self.ensure_setup("setLastModified")?;
        self.last_modified = Some(when);
        Ok(())
    }

    fn add_metadata(&mut self, key: &str, value: &str) -> Result<(), FeedgateError> {
        self.ensure_setup("addMetadata")?;
        self.metadata.add(key, value);
        Ok(())
    }

    fn set_acl(&mut self, acl: Acl) -> Result<(), FeedgateError> {
        self.ensure_setup("setAcl")?;
        self.acl = Some(acl);
        Ok(())
    }

    fn put_named_resource(&mut self, fragment: &str, acl: Acl) -> Result<(), FeedgateError> {
        self.ensure_setup("putNamedResource")?;
        self.named_resources.push((fragment.to_string(), acl));
        Ok(())
    }

    fn set_secure(&mut self, secure: bool) -> Result<(), FeedgateError> {
        self.ensure_setup("setSecure")?;
        self.secure = secure;
        Ok(())
    }

    fn add_anchor(&mut self, uri: Url, text: Option<&str>) -> Result<(), FeedgateError> {
        self.ensure_setup("addAnchor")?;
        self.anchors.push((uri, text.map(str::to_string)));
        Ok(())
    }

    fn set_no_index(&mut self, no_index: bool) -> Result<(), FeedgateError> {
        self.ensure_setup("setNoIndex")?;
        self.no_index = no_index;
        Ok(())
    }

    fn set_no_follow(&mut self, no_follow: bool) -> Result<(), FeedgateError> {
        self.ensure_setup("setNoFollow")?;
        self.no_follow = no_follow;
        Ok(())
    }

    fn set_no_archive(&mut self, no_archive: bool) -> Result<(), FeedgateError> {
        self.ensure_setup("setNoArchive")?;
        self.no_archive = no_archive;
        Ok(())
    }

    fn set_display_url(&mut self, url: Url) -> Result<(), FeedgateError> {
        self.ensure_setup("setDisplayUrl")?;
        self.display_url = Some(url);
        Ok(())
    }

    fn set_crawl_once(&mut self, crawl_once: bool) -> Result<(), FeedgateError> {
        self.ensure_setup("setCrawlOnce")?;
        self.crawl_once = crawl_once;
        Ok(())
    }

    fn set_lock(&mut self, lock: bool) -> Result<(), FeedgateError> {
        self.ensure_setup("setLock")?;
        self.lock = lock;
        Ok(())
    }
}

/// Client classification by user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// The indexer's crawler.
    Crawler,
    /// The indexer's security manager probing authorization.
    SecurityManager,
    /// Anything else, typically a person behind a browser.
    Other,
}

pub fn classify_client(headers: &HeaderMap) -> ClientKind {
    let ua = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if ua.starts_with("gsa-crawler") {
        ClientKind::Crawler
    } else if ua.contains("SecMgr") {
        ClientKind::SecurityManager
    } else {
        ClientKind::Other
    }
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    // Each cookie pair is split on its own '='; never on the whole header.
    raw.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

/// GET/HEAD on the content prefix.
pub async fn handle_document(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    serve_document(state, addr, method, uri, headers, false).await
}

/// GET/HEAD on the heartbeat prefix: same pipeline, content dropped.
pub async fn handle_heartbeat(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    serve_document(state, addr, method, uri, headers, true).await
}

pub async fn serve_document(
    state: Arc<AppState>,
    addr: SocketAddr,
    method: Method,
    uri: axum::http::Uri,
    headers: HeaderMap,
    heartbeat: bool,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let client = classify_client(&headers);
    let started = Instant::now();

    let response = serve_inner(&state, addr, &method, &uri, &headers, client, heartbeat).await;

    let success = response.status().is_success()
        || response.status() == StatusCode::NOT_MODIFIED;
    if client == ClientKind::Crawler {
        let bytes = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        state
            .journal
            .record_gsa_content_request(started.elapsed(), bytes, success);
        metrics::GSA_CONTENT_REQUESTS_TOTAL.inc();
    } else {
        state.journal.record_non_gsa_request();
        metrics::NON_GSA_REQUESTS_TOTAL.inc();
    }
    metrics::CONTENT_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
    response
}

async fn serve_inner(
    state: &Arc<AppState>,
    addr: SocketAddr,
    method: &Method,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
    client: ClientKind,
    heartbeat: bool,
) -> Response {
    // 1. Decode the document id from the raw path; axum's decoded path
    //    params would double-decode it.
    let prefix = if heartbeat {
        "/heartbeat/"
    } else {
        state.settings.doc_id_path.as_str()
    };
    let Some(encoded) = uri.path().strip_prefix(prefix) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let doc_id = match state.codec.decode(encoded) {
        Ok(doc_id) if !doc_id.unique_id().is_empty() => doc_id,
        _ => return StatusCode::NOT_FOUND.into_response(),
    };

    // 2. Authenticate.
    let full_access = state.settings.full_access_hosts.contains(&addr.ip());
    let mut identity: Option<AuthnIdentity> = None;
    if !full_access {
        let session = cookie_value(headers, SESSION_COOKIE_NAME)
            .and_then(|value| state.sessions.get(&value));
        identity = session.and_then(|s| {
            let mut guard = s.lock();
            let now = state.time.now_millis();
            if let Some(AuthnState::Authenticated { expires_millis, .. }) = &guard.authn_state {
                if *expires_millis <= now {
                    guard.authn_state = Some(AuthnState::Expired);
                }
            }
            guard.authenticated_identity(now).cloned()
        });

        if state.settings.mark_all_docs_public {
            // The security manager only ever probes protected content;
            // reaching a public-mode adaptor means misconfiguration.
            if client == ClientKind::SecurityManager {
                return StatusCode::FORBIDDEN.into_response();
            }
        } else if identity.is_none() {
            if client != ClientKind::Other {
                return StatusCode::FORBIDDEN.into_response();
            }
            let return_path = utf8_percent_encode(
                &uri.to_string(),
                NON_ALPHANUMERIC,
            )
            .to_string();
            return axum::response::Redirect::temporary(&format!(
                "/saml-authn?returnPath={return_path}"
            ))
            .into_response();
        }
    }

    // 3. Authorize.
    if !full_access && !state.settings.mark_all_docs_public {
        if let (Some(identity), Some(authority)) =
            (identity.as_ref(), state.adaptor.authz_authority())
        {
            let ids = [doc_id.clone()];
            match authority.is_user_authorized(identity, &ids).await {
                Ok(decisions) => match decisions.get(&doc_id) {
                    Some(AuthzStatus::Permit) => {}
                    Some(AuthzStatus::Deny) => return StatusCode::FORBIDDEN.into_response(),
                    _ => return StatusCode::NOT_FOUND.into_response(),
                },
                Err(e) => {
                    warn!("Authorization of {doc_id} failed: {e}");
                    return StatusCode::FORBIDDEN.into_response();
                }
            }
        }
    }

    // 4. Dispatch under the watchdog.
    let worker_id = state.allocate_worker_id();
    let token = CancellationToken::new();
    if state
        .shutdown_waiter
        .processing_starting(worker_id, &token)
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    metrics::ACTIVE_EXCHANGES.inc();

    let response =
        dispatch(state, &doc_id, method, headers, client, heartbeat, worker_id, &token).await;

    state.shutdown_waiter.processing_completed(worker_id);
    metrics::ACTIVE_EXCHANGES.dec();
    response
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    state: &Arc<AppState>,
    doc_id: &DocId,
    method: &Method,
    headers: &HeaderMap,
    client: ClientKind,
    heartbeat: bool,
    worker_id: u64,
    token: &CancellationToken,
) -> Response {
    let mut request = DocRequest::new(doc_id.clone());
    request.can_respond_with_no_content = client == ClientKind::Crawler;
    request.last_access_time = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let mut facade = DocResponseFacade::new(Some(ContentPhaseSwap {
        watchdog: state.watchdog.clone(),
        worker_id,
        token: token.clone(),
        content_timeout: state.settings.content_timeout,
    }));

    if let Err(e) = state
        .watchdog
        .start(worker_id, token, state.settings.header_timeout)
    {
        warn!("Watchdog refused registration: {e}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let outcome = tokio::select! {
        result = state.adaptor.get_doc_content(&request, &mut facade) => result,
        _ = token.cancelled() => Err(FeedgateError::Interrupted),
    };
    let _ = state.watchdog.complete(worker_id);

    match outcome {
        Ok(()) => {}
        Err(FeedgateError::Interrupted) => {
            // Deadline violated or shutdown: the in-flight output is
            // abandoned.
            metrics::WATCHDOG_TRIPS_TOTAL.inc();
            debug!("Adaptor call for {doc_id} was interrupted.");
            return StatusCode::FORBIDDEN.into_response();
        }
        Err(FeedgateError::Unavailable(reason)) => {
            debug!("Document {doc_id} unavailable: {reason}");
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            warn!("Adaptor failed for {doc_id}: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    // Queue discovered ACL fragments for the next push without blocking the
    // exchange.
    for (fragment, acl) in &facade.named_resources {
        let mut fragment_id = doc_id.unique_id().to_string();
        fragment_id.push('#');
        fragment_id.push_str(fragment);
        state.async_sender.async_push_item(
            crate::core::async_sender::PushItem::NamedResource(
                DocId::new(fragment_id),
                acl.clone(),
            ),
        );
    }

    shape_response(state, doc_id, method, headers, client, heartbeat, facade)
}

fn shape_response(
    state: &Arc<AppState>,
    doc_id: &DocId,
    method: &Method,
    headers: &HeaderMap,
    client: ClientKind,
    heartbeat: bool,
    mut facade: DocResponseFacade,
) -> Response {
    let indexer_request = client != ClientKind::Other;

    match facade.state {
        FacadeState::NotModified => {
            return StatusCode::NOT_MODIFIED.into_response();
        }
        FacadeState::NoContent => {
            // The crawler understands an empty-but-indexable answer; other
            // clients are told their copy is still fresh.
            return if client == ClientKind::Crawler {
                StatusCode::NO_CONTENT.into_response()
            } else {
                StatusCode::NOT_MODIFIED.into_response()
            };
        }
        FacadeState::Setup | FacadeState::Content => {}
    }

    // 5. Transform pipelines: metadata first, then content.
    let mut params = TransformParams::new();
    params.insert("DocId".to_string(), doc_id.unique_id().to_string());
    if let Some(ct) = &facade.content_type {
        params.insert("Content-Type".to_string(), ct.clone());
    }
    if !state.metadata_transform.is_empty() {
        let mut metadata = facade.metadata.clone();
        match state
            .metadata_transform
            .apply(Vec::new(), &mut metadata, &params)
        {
            Ok(_) => facade.metadata = metadata,
            Err(e) => {
                warn!("Metadata transform failed for {doc_id}: {e}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }
    let content = if state.transform.is_empty() {
        std::mem::take(&mut facade.content)
    } else {
        let mut metadata = facade.metadata.clone();
        match state
            .transform
            .apply(std::mem::take(&mut facade.content), &mut metadata, &params)
        {
            Ok(content) => {
                facade.metadata = metadata;
                content
            }
            Err(e) => {
                warn!("Transform pipeline failed for {doc_id}: {e}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    };

    // 6. Headers, side channels first.
    let mut builder = axum::http::Response::builder().status(StatusCode::OK);
    let headers_out = builder.headers_mut().expect("fresh builder");

    let content_type = facade
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    headers_out.insert(
        header::CONTENT_TYPE,
        content_type.parse().unwrap_or_else(|_| {
            header::HeaderValue::from_static("application/octet-stream")
        }),
    );
    if let Some(when) = facade.last_modified {
        if let Ok(value) = when
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
            .parse()
        {
            headers_out.insert(header::LAST_MODIFIED, value);
        }
    }

    let mut robots = Vec::new();
    if facade.no_index {
        robots.push("noindex");
    }
    if facade.no_follow {
        robots.push("nofollow");
    }
    if facade.no_archive {
        robots.push("noarchive");
    }
    if !robots.is_empty() {
        if let Ok(value) = robots.join(",").parse() {
            headers_out.insert("X-Robots-Tag", value);
        }
    }

    if indexer_request {
        if !facade.metadata.is_empty() {
            if let Ok(value) = encode_external_metadata(&facade.metadata).parse() {
                headers_out.insert("X-Gsa-External-Metadata", value);
            }
        }
        if !facade.anchors.is_empty() {
            if let Ok(value) = encode_external_anchors(&facade.anchors).parse() {
                headers_out.insert("X-Gsa-External-Anchor", value);
            }
        }
        if let Ok(value) = (if facade.secure { "secure" } else { "public" }).parse() {
            headers_out.insert("X-Gsa-Serve-Security", value);
        }
        let doc_controls_supported = state.settings.send_doc_controls
            && state.settings.gsa_version >= crate::core::feed::GsaVersion::new(7, 0, 0, 0);
        if doc_controls_supported {
            if let Some(value) = encode_doc_controls(&facade)
                .and_then(|v| v.parse().ok())
            {
                headers_out.insert("X-Gsa-Doc-Controls", value);
            }
        }
        if let Some(display_url) = &facade.display_url {
            if let Ok(value) = display_url.as_str().parse() {
                headers_out.insert("X-Gsa-Display-Url", value);
            }
        }
    }

    // 7. Body, compressed when the client asked for it.
    let body_bytes = if heartbeat || method == Method::HEAD {
        headers_out.insert(header::CONTENT_LENGTH, content.len().into());
        Vec::new()
    } else if accepts_gzip(headers) && !content.is_empty() {
        match gzip(&content) {
            Ok(compressed) => {
                headers_out.insert(
                    header::CONTENT_ENCODING,
                    header::HeaderValue::from_static("gzip"),
                );
                headers_out.insert(header::CONTENT_LENGTH, compressed.len().into());
                compressed
            }
            Err(e) => {
                warn!("Compression failed for {doc_id}: {e}");
                headers_out.insert(header::CONTENT_LENGTH, content.len().into());
                content
            }
        }
    } else {
        headers_out.insert(header::CONTENT_LENGTH, content.len().into());
        content
    };

    builder
        .body(Body::from(body_bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|enc| enc.trim().starts_with("gzip")))
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// `k=v` pairs, each side percent-encoded, comma-joined.
fn encode_external_metadata(metadata: &Metadata) -> String {
    metadata
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, NON_ALPHANUMERIC),
                utf8_percent_encode(v, NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// `text,uri` entries, each side percent-encoded, comma-joined; anchors
/// without text keep an empty text slot.
fn encode_external_anchors(anchors: &[(Url, Option<String>)]) -> String {
    anchors
        .iter()
        .map(|(uri, text)| {
            format!(
                "{},{}",
                utf8_percent_encode(text.as_deref().unwrap_or(""), NON_ALPHANUMERIC),
                utf8_percent_encode(uri.as_str(), NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Semicolon-joined directives; the ACL travels as percent-encoded JSON.
fn encode_doc_controls(facade: &DocResponseFacade) -> Option<String> {
    let mut directives = Vec::new();
    if let Some(acl) = &facade.acl {
        let json = acl_to_json(acl);
        directives.push(format!(
            "acl={}",
            utf8_percent_encode(&json.to_string(), NON_ALPHANUMERIC)
        ));
    }
    if facade.crawl_once {
        directives.push("crawl_once=true".to_string());
    }
    if facade.lock {
        directives.push("lock=true".to_string());
    }
    if directives.is_empty() {
        None
    } else {
        Some(directives.join(";"))
    }
}

pub fn acl_to_json(acl: &Acl) -> serde_json::Value {
    let principals = |set: &std::collections::BTreeSet<crate::core::acl::Principal>| {
        set.iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name(),
                    "namespace": p.namespace(),
                })
            })
            .collect::<Vec<_>>()
    };
    let mut value = serde_json::json!({
        "permit_users": principals(acl.permit_users()),
        "deny_users": principals(acl.deny_users()),
        "permit_groups": principals(acl.permit_groups()),
        "deny_groups": principals(acl.deny_groups()),
        "inheritance_type": acl.inheritance_type().to_string(),
        "case_sensitive":
            acl.case_sensitivity() == crate::core::acl::CaseSensitivity::Sensitive,
    });
    if let Some(inherit) = acl.inherit_from() {
        value["inherit_from"] =
            serde_json::Value::String(inherit.doc_id.unique_id().to_string());
        if let Some(fragment) = &inherit.fragment {
            value["inherit_fragment"] = serde_json::Value::String(fragment.clone());
        }
    }
    value
}
