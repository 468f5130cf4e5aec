// src/core/record.rs

//! Push entries: one `Record` per document id sent to the indexer.

use crate::core::acl::Acl;
use crate::core::docid::DocId;
use crate::core::metadata::Metadata;
use chrono::{DateTime, Utc};
use url::Url;

/// A single entry of a push feed. Immutable once built; equality is
/// field-wise.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    doc_id: DocId,
    delete_from_index: bool,
    crawl_immediately: bool,
    crawl_once: bool,
    lock: bool,
    last_modified: Option<DateTime<Utc>>,
    result_link: Option<Url>,
    metadata: Option<Metadata>,
    acl: Option<Acl>,
    acl_fragment: Option<String>,
}

impl Record {
    pub fn builder(doc_id: DocId) -> RecordBuilder {
        RecordBuilder {
            record: Record {
                doc_id,
                delete_from_index: false,
                crawl_immediately: false,
                crawl_once: false,
                lock: false,
                last_modified: None,
                result_link: None,
                metadata: None,
                acl: None,
                acl_fragment: None,
            },
        }
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    pub fn is_to_be_deleted(&self) -> bool {
        self.delete_from_index
    }

    pub fn is_to_be_crawled_immediately(&self) -> bool {
        self.crawl_immediately
    }

    pub fn is_to_be_crawled_once(&self) -> bool {
        self.crawl_once
    }

    pub fn is_to_be_locked(&self) -> bool {
        self.lock
    }

    pub fn last_modified(&self) -> Option<&DateTime<Utc>> {
        self.last_modified.as_ref()
    }

    pub fn result_link(&self) -> Option<&Url> {
        self.result_link.as_ref()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn acl(&self) -> Option<&Acl> {
        self.acl.as_ref()
    }

    pub fn acl_fragment(&self) -> Option<&str> {
        self.acl_fragment.as_deref()
    }
}

/// Builder for [`Record`].
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    /// Starts from an existing record, e.g. to flip the delete bit.
    pub fn from_record(record: &Record) -> Self {
        Self {
            record: record.clone(),
        }
    }

    pub fn delete_from_index(mut self, delete: bool) -> Self {
        self.record.delete_from_index = delete;
        self
    }

    pub fn crawl_immediately(mut self, crawl_immediately: bool) -> Self {
        self.record.crawl_immediately = crawl_immediately;
        self
    }

    pub fn crawl_once(mut self, crawl_once: bool) -> Self {
        self.record.crawl_once = crawl_once;
        self
    }

    pub fn lock(mut self, lock: bool) -> Self {
        self.record.lock = lock;
        self
    }

    pub fn last_modified(mut self, when: DateTime<Utc>) -> Self {
        self.record.last_modified = Some(when);
        self
    }

    pub fn result_link(mut self, link: Url) -> Self {
        self.record.result_link = Some(link);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.record.metadata = Some(metadata);
        self
    }

    pub fn acl(mut self, acl: Acl) -> Self {
        self.record.acl = Some(acl);
        self
    }

    pub fn clear_acl(mut self) -> Self {
        self.record.acl = None;
        self.record.acl_fragment = None;
        self
    }

    /// Attaches a named ACL fragment; the feed URL gains a generated suffix
    /// so the fragment gets its own address in the index.
    pub fn acl_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.record.acl_fragment = Some(fragment.into());
        self
    }

    pub fn build(self) -> Record {
        self.record
    }
}
