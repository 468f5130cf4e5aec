// src/core/feed/docid_sender.rs

//! Orchestration of pushes: batching, retry, archiving, and journal
//! bookkeeping.
//!
//! The sender implements [`DocIdPusher`], so it is handed directly to
//! `Adaptor::get_doc_ids` as the streaming target, and [`ItemPusher`], so
//! the async queue worker can forward drained batches to it.

use crate::core::acl::{Acl, Principal};
use crate::core::adaptor::{
    Adaptor, DocIdPusher, ExceptionHandler, ExponentialBackoffExceptionHandler, GroupDefinitions,
};
use crate::core::async_sender::{ItemPusher, PushItem};
use crate::core::docid::DocId;
use crate::core::errors::FeedgateError;
use crate::core::feed::GsaVersion;
use crate::core::feed::xml::{FeedItem, GsaFeedFileMaker};
use crate::core::journal::Journal;
use crate::core::record::{Record, RecordBuilder};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Indexer versions from here on accept a full-replace xmlgroups feed.
const GROUP_REPLACE_MIN_VERSION: GsaVersion = GsaVersion::new(7, 4, 0, 0);

/// Destination abstraction over [`super::sender::GsaFeedFileSender`] so the
/// push pipeline is testable without a live indexer.
#[async_trait]
pub trait FeedSink: Send + Sync {
    async fn send_metadata_and_url(&self, datasource: &str, xml: &str)
    -> Result<(), FeedgateError>;
    async fn send_groups(
        &self,
        source: &str,
        xml: &str,
        incremental: bool,
    ) -> Result<(), FeedgateError>;
}

#[async_trait]
impl FeedSink for super::sender::GsaFeedFileSender {
    async fn send_metadata_and_url(
        &self,
        datasource: &str,
        xml: &str,
    ) -> Result<(), FeedgateError> {
        super::sender::GsaFeedFileSender::send_metadata_and_url(self, datasource, xml).await
    }

    async fn send_groups(
        &self,
        source: &str,
        xml: &str,
        incremental: bool,
    ) -> Result<(), FeedgateError> {
        super::sender::GsaFeedFileSender::send_groups(self, source, xml, incremental).await
    }
}

/// Coordinates every push to the indexer.
pub struct DocIdSender {
    maker: GsaFeedFileMaker,
    sink: Arc<dyn FeedSink>,
    journal: Arc<Journal>,
    feed_name: String,
    max_urls: usize,
    mark_all_docs_public: bool,
    gsa_version: GsaVersion,
    archive_dir: Option<PathBuf>,
    cancel: CancellationToken,
    default_handler: Arc<dyn ExceptionHandler>,
}

impl DocIdSender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        maker: GsaFeedFileMaker,
        sink: Arc<dyn FeedSink>,
        journal: Arc<Journal>,
        feed_name: String,
        max_urls: usize,
        mark_all_docs_public: bool,
        gsa_version: GsaVersion,
        archive_dir: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            maker,
            sink,
            journal,
            feed_name,
            max_urls: max_urls.max(1),
            mark_all_docs_public,
            gsa_version,
            archive_dir,
            cancel,
            default_handler: Arc::new(ExponentialBackoffExceptionHandler::default()),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs one full push: asks the adaptor to enumerate everything and
    /// streams the result through this sender. The outcome is recorded in
    /// the journal.
    pub async fn push_full_doc_ids_from_adaptor(
        &self,
        adaptor: &dyn Adaptor,
        handler: Option<&dyn ExceptionHandler>,
    ) -> Result<(), FeedgateError> {
        let handler = handler.unwrap_or(&*self.default_handler);
        self.journal.record_full_push_started()?;
        info!("Full push started.");

        let mut attempt = 0;
        loop {
            attempt += 1;
            match adaptor.get_doc_ids(self).await {
                Ok(()) => {
                    self.journal.record_full_push_successful()?;
                    info!("Full push completed successfully.");
                    return Ok(());
                }
                Err(FeedgateError::Interrupted) => {
                    self.journal.record_full_push_interrupted()?;
                    warn!("Full push interrupted.");
                    return Err(FeedgateError::Interrupted);
                }
                Err(e) if self.cancel.is_cancelled() => {
                    self.journal.record_full_push_interrupted()?;
                    warn!("Full push interrupted: {e}");
                    return Err(FeedgateError::Interrupted);
                }
                Err(e) => {
                    if handler.handle_exception(&e, attempt).await {
                        continue;
                    }
                    self.journal.record_full_push_failed()?;
                    error!("Full push failed: {e}");
                    return Err(e);
                }
            }
        }
    }

    /// Runs one incremental push through the adaptor's polling lister.
    pub async fn push_incremental_doc_ids_from_adaptor(
        &self,
        adaptor: &dyn Adaptor,
        handler: Option<&dyn ExceptionHandler>,
    ) -> Result<(), FeedgateError> {
        let Some(lister) = adaptor.incremental_lister() else {
            return Ok(());
        };
        let handler = handler.unwrap_or(&*self.default_handler);
        self.journal.record_incremental_push_started()?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match lister.get_modified_doc_ids(self).await {
                Ok(()) => {
                    self.journal.record_incremental_push_successful()?;
                    return Ok(());
                }
                Err(FeedgateError::Interrupted) => {
                    self.journal.record_incremental_push_interrupted()?;
                    return Err(FeedgateError::Interrupted);
                }
                Err(e) if self.cancel.is_cancelled() => {
                    self.journal.record_incremental_push_interrupted()?;
                    return Err(FeedgateError::Interrupted);
                }
                Err(e) => {
                    if handler.handle_exception(&e, attempt).await {
                        continue;
                    }
                    self.journal.record_incremental_push_failed()?;
                    return Err(e);
                }
            }
        }
    }

    /// Pushes records in batches of `feed.maxUrls`. Returns the first
    /// record that could not be sent, or `None` when everything went out;
    /// the caller resumes from the returned record.
    pub async fn push_records_with_handler(
        &self,
        records: Vec<Record>,
        handler: Option<&dyn ExceptionHandler>,
    ) -> Result<Option<Record>, FeedgateError> {
        let handler = handler.unwrap_or(&*self.default_handler);
        let records = self.strip_acls_if_public(records);

        for chunk in records.chunks(self.max_urls) {
            if self.cancel.is_cancelled() {
                // The interrupt stays observable; the caller gets a resume
                // marker so nothing is silently lost.
                return Ok(Some(chunk[0].clone()));
            }
            let items: Vec<FeedItem> =
                chunk.iter().cloned().map(FeedItem::Record).collect();
            let xml = self
                .maker
                .make_metadata_and_url_xml(&self.feed_name, &items)?;
            self.archive_feed("metadata-and-url", &xml);

            if !self.send_with_retry(&xml, handler).await {
                return Ok(Some(chunk[0].clone()));
            }

            let ids: Vec<DocId> = chunk.iter().map(|r| r.doc_id().clone()).collect();
            self.journal.record_doc_ids_pushed(&ids);
        }
        Ok(None)
    }

    /// Pushes ACL-only named resources. Suppressed entirely in public mode.
    pub async fn push_named_resources_with_handler(
        &self,
        resources: BTreeMap<DocId, Acl>,
        handler: Option<&dyn ExceptionHandler>,
    ) -> Result<Option<DocId>, FeedgateError> {
        if self.mark_all_docs_public {
            return Ok(None);
        }
        let handler = handler.unwrap_or(&*self.default_handler);
        let entries: Vec<(DocId, Acl)> = resources.into_iter().collect();

        for chunk in entries.chunks(self.max_urls) {
            if self.cancel.is_cancelled() {
                return Ok(Some(chunk[0].0.clone()));
            }
            let items: Vec<FeedItem> = chunk
                .iter()
                .map(|(doc_id, acl)| FeedItem::AclOnly {
                    doc_id: doc_id.clone(),
                    fragment: None,
                    acl: acl.clone(),
                })
                .collect();
            let xml = self
                .maker
                .make_metadata_and_url_xml(&self.feed_name, &items)?;
            self.archive_feed("metadata-and-url", &xml);

            if !self.send_with_retry(&xml, handler).await {
                return Ok(Some(chunk[0].0.clone()));
            }
        }
        Ok(None)
    }

    /// Pushes group definitions in chunks of `feed.maxUrls` entries.
    ///
    /// When `replace_all` is requested and the indexer is recent enough, a
    /// single non-incremental feed replaces every previously fed group;
    /// older indexers fall back to incremental chunks.
    pub async fn push_group_definitions_with_handler(
        &self,
        groups: GroupDefinitions,
        case_sensitive: bool,
        replace_all: bool,
        handler: Option<&dyn ExceptionHandler>,
    ) -> Result<Option<Principal>, FeedgateError> {
        if self.mark_all_docs_public {
            return Ok(None);
        }
        let handler = handler.unwrap_or(&*self.default_handler);
        self.journal.record_group_push_started()?;

        let result = self
            .push_groups_inner(groups, case_sensitive, replace_all, handler)
            .await;
        match &result {
            Ok(None) => self.journal.record_group_push_successful()?,
            Ok(Some(_)) => self.journal.record_group_push_failed()?,
            Err(FeedgateError::Interrupted) => self.journal.record_group_push_interrupted()?,
            Err(_) => self.journal.record_group_push_failed()?,
        }
        result
    }

    async fn push_groups_inner(
        &self,
        groups: GroupDefinitions,
        case_sensitive: bool,
        replace_all: bool,
        handler: &dyn ExceptionHandler,
    ) -> Result<Option<Principal>, FeedgateError> {
        let replace_in_one = replace_all && self.gsa_version >= GROUP_REPLACE_MIN_VERSION;

        if replace_in_one {
            let first = groups.keys().next().cloned();
            let xml = self
                .maker
                .make_group_definitions_xml(&groups, case_sensitive)?;
            self.archive_feed("xmlgroups", &xml);
            if !self
                .send_groups_with_retry(&xml, false, handler)
                .await
            {
                return Ok(first);
            }
            self.journal.record_groups_pushed(groups.len() as u64);
            return Ok(None);
        }

        let entries: Vec<(Principal, Vec<Principal>)> = groups.into_iter().collect();
        for chunk in entries.chunks(self.max_urls) {
            if self.cancel.is_cancelled() {
                return Ok(Some(chunk[0].0.clone()));
            }
            let chunk_map: GroupDefinitions = chunk.iter().cloned().collect();
            let xml = self
                .maker
                .make_group_definitions_xml(&chunk_map, case_sensitive)?;
            self.archive_feed("xmlgroups", &xml);
            if !self.send_groups_with_retry(&xml, true, handler).await {
                return Ok(Some(chunk[0].0.clone()));
            }
            self.journal.record_groups_pushed(chunk.len() as u64);
        }
        Ok(None)
    }

    async fn send_with_retry(&self, xml: &str, handler: &dyn ExceptionHandler) -> bool {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .sink
                .send_metadata_and_url(&self.feed_name, xml)
                .await
            {
                Ok(()) => return true,
                Err(e) => {
                    warn!("Feed POST attempt {attempt} failed: {e}");
                    if !handler.handle_exception(&e, attempt).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn send_groups_with_retry(
        &self,
        xml: &str,
        incremental: bool,
        handler: &dyn ExceptionHandler,
    ) -> bool {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .sink
                .send_groups(&self.feed_name, xml, incremental)
                .await
            {
                Ok(()) => return true,
                Err(e) => {
                    warn!("Group feed POST attempt {attempt} failed: {e}");
                    if !handler.handle_exception(&e, attempt).await {
                        return false;
                    }
                }
            }
        }
    }

    fn strip_acls_if_public(&self, records: Vec<Record>) -> Vec<Record> {
        if !self.mark_all_docs_public {
            return records;
        }
        records
            .into_iter()
            .map(|r| {
                if r.acl().is_some() {
                    // Rebuild without the ACL; everything else carries over.
                    let mut builder = RecordBuilder::from_record(&r);
                    builder = builder.clear_acl();
                    builder.build()
                } else {
                    r
                }
            })
            .collect()
    }

    fn archive_feed(&self, feedtype: &str, xml: &str) {
        let Some(dir) = &self.archive_dir else {
            return;
        };
        let filename = format!(
            "{}-{}-{}.xml",
            self.feed_name,
            feedtype,
            Utc::now().format("%Y%m%d%H%M%S%3f")
        );
        let path = dir.join(filename);
        if let Err(e) = std::fs::write(&path, xml) {
            warn!("Failed to archive feed to '{}': {e}", path.display());
        }
    }
}

#[async_trait]
impl DocIdPusher for DocIdSender {
    async fn push_doc_ids(&self, doc_ids: Vec<DocId>) -> Result<Option<DocId>, FeedgateError> {
        let records: Vec<Record> = doc_ids
            .into_iter()
            .map(|id| Record::builder(id).build())
            .collect();
        Ok(self
            .push_records_with_handler(records, None)
            .await?
            .map(|r| r.doc_id().clone()))
    }

    async fn push_records(&self, records: Vec<Record>) -> Result<Option<Record>, FeedgateError> {
        self.push_records_with_handler(records, None).await
    }

    async fn push_named_resources(
        &self,
        resources: BTreeMap<DocId, Acl>,
    ) -> Result<Option<DocId>, FeedgateError> {
        self.push_named_resources_with_handler(resources, None).await
    }

    async fn push_group_definitions(
        &self,
        groups: GroupDefinitions,
        case_sensitive: bool,
        replace_all: bool,
    ) -> Result<Option<Principal>, FeedgateError> {
        self.push_group_definitions_with_handler(groups, case_sensitive, replace_all, None)
            .await
    }
}

#[async_trait]
impl ItemPusher for DocIdSender {
    async fn push_items(&self, items: Vec<PushItem>) -> Result<(), FeedgateError> {
        let mut records = Vec::new();
        let mut resources = BTreeMap::new();
        for item in items {
            match item {
                PushItem::Record(record) => records.push(record),
                PushItem::NamedResource(doc_id, acl) => {
                    resources.insert(doc_id, acl);
                }
            }
        }
        if !records.is_empty() {
            self.push_records_with_handler(records, None).await?;
        }
        if !resources.is_empty() {
            self.push_named_resources_with_handler(resources, None)
                .await?;
        }
        Ok(())
    }
}
