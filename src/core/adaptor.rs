// src/core/adaptor.rs

//! The contracts between the framework and user-supplied adaptor code.
//!
//! An adaptor is assembled a-la-carte from capability traits instead of a
//! deep inheritance tree: every adaptor can list and serve documents; the
//! optional capabilities (late-binding authorization, incremental polling)
//! are discovered through accessor methods rather than downcasts.

use crate::core::acl::{Acl, AuthnIdentity, AuthzStatus, Principal};
use crate::core::docid::DocId;
use crate::core::errors::FeedgateError;
use crate::core::record::Record;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use url::Url;

/// One group definition: the group principal and its direct members.
pub type GroupDefinitions = BTreeMap<Principal, Vec<Principal>>;

/// A content request as the adaptor sees it.
#[derive(Debug, Clone)]
pub struct DocRequest {
    pub doc_id: DocId,
    /// Parsed `If-Modified-Since`, when the client sent one.
    pub last_access_time: Option<DateTime<Utc>>,
    /// Whether the caller accepts a contentless 204 answer.
    pub can_respond_with_no_content: bool,
}

impl DocRequest {
    pub fn new(doc_id: DocId) -> Self {
        Self {
            doc_id,
            last_access_time: None,
            can_respond_with_no_content: false,
        }
    }

    /// True when the document changed since the client last saw it; a
    /// missing header means the client has nothing cached.
    pub fn has_changed_since(&self, last_modified: DateTime<Utc>) -> bool {
        match self.last_access_time {
            Some(seen) => last_modified > seen,
            None => true,
        }
    }
}

/// The response facade handed to `get_doc_content`.
///
/// The facade is linear: metadata setters are only legal before the first
/// content byte, the terminal `respond_*` methods are mutually exclusive
/// with writing content, and violations surface as
/// [`FeedgateError::IllegalResponseState`].
pub trait Response: Send {
    /// Terminal: the document has not changed since `last_access_time`.
    fn respond_not_modified(&mut self) -> Result<(), FeedgateError>;

    /// Terminal: the document exists but has no content to index.
    fn respond_no_content(&mut self) -> Result<(), FeedgateError>;

    /// Appends content bytes. The first call seals the headers.
    fn write_content(&mut self, buf: &[u8]) -> Result<(), FeedgateError>;

    fn set_content_type(&mut self, content_type: &str) -> Result<(), FeedgateError>;
    fn set_last_modified(&mut self, when: DateTime<Utc>) -> Result<(), FeedgateError>;
    fn add_metadata(&mut self, key: &str, value: &str) -> Result<(), FeedgateError>;
    fn set_acl(&mut self, acl: Acl) -> Result<(), FeedgateError>;
    /// Attaches a named ACL fragment resource to this document.
    fn put_named_resource(&mut self, fragment: &str, acl: Acl) -> Result<(), FeedgateError>;
    fn set_secure(&mut self, secure: bool) -> Result<(), FeedgateError>;
    fn add_anchor(&mut self, uri: Url, text: Option<&str>) -> Result<(), FeedgateError>;
    fn set_no_index(&mut self, no_index: bool) -> Result<(), FeedgateError>;
    fn set_no_follow(&mut self, no_follow: bool) -> Result<(), FeedgateError>;
    fn set_no_archive(&mut self, no_archive: bool) -> Result<(), FeedgateError>;
    fn set_display_url(&mut self, url: Url) -> Result<(), FeedgateError>;
    fn set_crawl_once(&mut self, crawl_once: bool) -> Result<(), FeedgateError>;
    fn set_lock(&mut self, lock: bool) -> Result<(), FeedgateError>;
}

/// Receives document ids from the adaptor during a push. Implemented by the
/// push pipeline; handed to `get_doc_ids` so the adaptor can stream ids
/// instead of materializing them.
#[async_trait]
pub trait DocIdPusher: Send + Sync {
    /// Pushes plain ids. Returns the first id that could not be sent, or
    /// `None` on success; callers resume from the returned id.
    async fn push_doc_ids(&self, doc_ids: Vec<DocId>) -> Result<Option<DocId>, FeedgateError>;

    /// Pushes full records. Same resume-marker contract.
    async fn push_records(&self, records: Vec<Record>) -> Result<Option<Record>, FeedgateError>;

    /// Pushes ACL-only named resources.
    async fn push_named_resources(
        &self,
        resources: BTreeMap<DocId, Acl>,
    ) -> Result<Option<DocId>, FeedgateError>;

    /// Pushes group definitions, optionally replacing all previously fed
    /// groups.
    async fn push_group_definitions(
        &self,
        groups: GroupDefinitions,
        case_sensitive: bool,
        replace_all: bool,
    ) -> Result<Option<Principal>, FeedgateError>;
}

/// Late-binding authorization capability.
#[async_trait]
pub trait AuthzAuthority: Send + Sync {
    async fn is_user_authorized(
        &self,
        identity: &AuthnIdentity,
        doc_ids: &[DocId],
    ) -> Result<BTreeMap<DocId, AuthzStatus>, FeedgateError>;
}

/// Incremental listing capability, polled on a fixed period.
#[async_trait]
pub trait PollingIncrementalLister: Send + Sync {
    async fn get_modified_doc_ids(&self, pusher: &dyn DocIdPusher)
    -> Result<(), FeedgateError>;
}

/// A user-supplied content source.
#[async_trait]
pub trait Adaptor: Send + Sync {
    /// One-time initialization before the server starts accepting traffic.
    /// A [`FeedgateError::StartupTransient`] return is retried by the
    /// daemon; [`FeedgateError::StartupFatal`] aborts the process.
    async fn init(&self, config: &crate::config::Config) -> Result<(), FeedgateError> {
        let _ = config;
        Ok(())
    }

    /// Enumerates every document id, streaming them through `pusher`.
    async fn get_doc_ids(&self, pusher: &dyn DocIdPusher) -> Result<(), FeedgateError>;

    /// Produces the content and metadata of one document.
    async fn get_doc_content(
        &self,
        request: &DocRequest,
        response: &mut dyn Response,
    ) -> Result<(), FeedgateError>;

    /// Optional late-binding authorization capability.
    fn authz_authority(&self) -> Option<&dyn AuthzAuthority> {
        None
    }

    /// Optional incremental listing capability.
    fn incremental_lister(&self) -> Option<&dyn PollingIncrementalLister> {
        None
    }

    /// Cleanup on orderly shutdown.
    async fn destroy(&self) {}
}

/// Decides whether a failed operation is retried.
#[async_trait]
pub trait ExceptionHandler: Send + Sync {
    /// Called after attempt number `attempt` (1-based) failed with `err`.
    /// Returning `true` asks the caller to retry; the handler may sleep
    /// first. Returning `false` gives up.
    async fn handle_exception(&self, err: &FeedgateError, attempt: usize) -> bool;
}

/// Retries with linearly growing sleeps, capped at a fixed attempt count.
pub struct ExponentialBackoffExceptionHandler {
    max_attempts: usize,
}

impl ExponentialBackoffExceptionHandler {
    pub fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }
}

impl Default for ExponentialBackoffExceptionHandler {
    fn default() -> Self {
        Self::new(12)
    }
}

#[async_trait]
impl ExceptionHandler for ExponentialBackoffExceptionHandler {
    async fn handle_exception(&self, err: &FeedgateError, attempt: usize) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        // Interruption is never retried; it means shutdown is underway.
        if matches!(err, FeedgateError::Interrupted | FeedgateError::ShutDown) {
            return false;
        }
        let sleep_secs = (attempt as u64).min(30) * 5;
        tracing::warn!(
            "Attempt {attempt} failed ({err}); retrying in {sleep_secs}s."
        );
        tokio::time::sleep(std::time::Duration::from_secs(sleep_secs)).await;
        true
    }
}

/// Gives up immediately. Used by tests and one-shot pushes.
pub struct NeverRetryExceptionHandler;

#[async_trait]
impl ExceptionHandler for NeverRetryExceptionHandler {
    async fn handle_exception(&self, _err: &FeedgateError, _attempt: usize) -> bool {
        false
    }
}
