// src/core/docid.rs

//! Document identifiers and their URL codec.
//!
//! A `DocId` is an opaque textual identifier in the back-end repository's
//! namespace. The indexer only understands URLs, so ids are mapped onto the
//! content endpoint by prepending a fixed base and percent-encoding, and
//! recovered by the inverse transformation.

use crate::core::errors::FeedgateError;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use url::Url;

/// Characters that must be escaped when a document id is embedded in a URL
/// path. Everything outside the unreserved set plus '/' is encoded so the
/// round trip is exact even for ids containing '?', '#', '%', or spaces.
const DOCID_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'|')
    .add(b'\\');

/// An opaque document identifier. Equality is exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(String);

impl DocId {
    pub fn new(unique_id: impl Into<String>) -> Self {
        DocId(unique_id.into())
    }

    pub fn unique_id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DocId({})", self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        DocId(s.to_string())
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        DocId(s)
    }
}

/// Translates between `DocId`s and the URLs the indexer crawls.
///
/// When `doc_id_is_url` is set the id is already a fully-qualified URL and is
/// passed through unchanged; otherwise the id is percent-encoded and appended
/// to the content endpoint base.
#[derive(Debug, Clone)]
pub struct DocIdCodec {
    base_uri: Url,
    doc_id_is_url: bool,
}

impl DocIdCodec {
    pub fn new(base_uri: Url, doc_id_is_url: bool) -> Self {
        Self {
            base_uri,
            doc_id_is_url,
        }
    }

    /// The content endpoint base every encoded document URL starts with.
    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    /// Encodes a document id into the URL the indexer will crawl.
    pub fn encode(&self, doc_id: &DocId) -> Result<Url, FeedgateError> {
        if self.doc_id_is_url {
            return Url::parse(doc_id.unique_id()).map_err(|e| {
                FeedgateError::InvalidConfiguration(format!(
                    "docId.isUrl is set but '{}' is not a URL: {e}",
                    doc_id.unique_id()
                ))
            });
        }
        let encoded = utf8_percent_encode(doc_id.unique_id(), DOCID_ESCAPE).to_string();
        // "." and ".." path segments would be normalized away by any URL
        // parser, silently renaming the document; their dots are escaped.
        let encoded = encoded
            .split('/')
            .map(|segment| {
                if !segment.is_empty() && segment.chars().all(|c| c == '.') {
                    segment.replace('.', "%2E")
                } else {
                    segment.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("/");
        let joined = format!("{}{}", self.base_uri, encoded);
        Url::parse(&joined)
            .map_err(|e| FeedgateError::Internal(format!("encoded doc id is not a URL: {e}")))
    }

    /// Recovers the document id from a request path below the content prefix.
    /// The path argument excludes the prefix itself.
    pub fn decode(&self, encoded_path: &str) -> Result<DocId, FeedgateError> {
        if self.doc_id_is_url {
            return Ok(DocId::new(encoded_path));
        }
        let decoded = percent_decode_str(encoded_path)
            .decode_utf8()
            .map_err(|e| FeedgateError::MalformedStream(format!("invalid doc id encoding: {e}")))?;
        Ok(DocId::new(decoded.into_owned()))
    }

    /// Recovers the document id from a full URL, verifying that the URL
    /// actually points at this adaptor's content endpoint.
    pub fn decode_url(&self, url: &Url) -> Result<DocId, FeedgateError> {
        if self.doc_id_is_url {
            return Ok(DocId::new(url.as_str()));
        }
        let base = self.base_uri.as_str();
        let full = url.as_str();
        let suffix = full.strip_prefix(base).ok_or_else(|| {
            FeedgateError::MalformedStream(format!(
                "URL '{full}' is not below the content endpoint '{base}'"
            ))
        })?;
        self.decode(suffix)
    }

    /// Whether a URL shares scheme, host, and port with the content endpoint.
    pub fn is_local(&self, url: &Url) -> bool {
        url.scheme() == self.base_uri.scheme()
            && url.host() == self.base_uri.host()
            && url.port_or_known_default() == self.base_uri.port_or_known_default()
    }
}
