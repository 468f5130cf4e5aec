// src/core/command_stream.rs

//! Parser for the text stream a subprocess adaptor writes on stdout.
//!
//! The stream is self-delimiting: a header line fixes the protocol version
//! and the record delimiter, and the body is a sequence of `key=value` or
//! bare-keyword segments. Three readers interpret the body as a lister
//! push, a retriever response, or an authorizer result map. Unknown keys
//! are ignored for forward compatibility.

use crate::core::acl::AuthzStatus;
use crate::core::docid::DocId;
use crate::core::errors::FeedgateError;
use crate::core::metadata::Metadata;
use crate::core::record::{Record, RecordBuilder};
use chrono::DateTime;
use std::collections::BTreeMap;
use url::Url;

const HEADER_PREFIX: &[u8] = b"GSA Adaptor Data Version ";

/// Everything a retriever invocation produced for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrieverResponse {
    pub up_to_date: bool,
    pub not_found: bool,
    pub secure: bool,
    pub no_index: bool,
    pub no_follow: bool,
    pub no_archive: bool,
    pub crawl_once: bool,
    pub lock: bool,
    pub display_url: Option<Url>,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    pub metadata: Metadata,
    pub anchors: Vec<(Url, Option<String>)>,
    pub content: Option<Vec<u8>>,
}

/// Parses one complete subprocess output stream.
pub struct CommandStreamParser<'a> {
    data: &'a [u8],
    pos: usize,
    delimiter: Vec<u8>,
    version: u32,
}

impl<'a> CommandStreamParser<'a> {
    /// Validates the header and positions the parser at the first body
    /// segment.
    pub fn new(data: &'a [u8]) -> Result<Self, FeedgateError> {
        let rest = data.strip_prefix(HEADER_PREFIX).ok_or_else(|| {
            FeedgateError::MalformedStream("missing adaptor data header".to_string())
        })?;

        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| FeedgateError::MalformedStream("truncated header".to_string()))?;
        let version_str = std::str::from_utf8(&rest[..space])
            .map_err(|_| FeedgateError::MalformedStream("non-UTF-8 version".to_string()))?;
        let version: u32 = version_str.parse().map_err(|_| {
            FeedgateError::MalformedStream(format!("invalid version '{version_str}'"))
        })?;
        if version != 1 {
            return Err(FeedgateError::MalformedStream(format!(
                "unsupported version {version}"
            )));
        }

        let after_version = &rest[space + 1..];
        if after_version.first() != Some(&b'[') {
            return Err(FeedgateError::MalformedStream(
                "expected '[' introducing the delimiter".to_string(),
            ));
        }
        let close = after_version
            .iter()
            .position(|&b| b == b']')
            .ok_or_else(|| {
                FeedgateError::MalformedStream("unterminated delimiter".to_string())
            })?;
        let delimiter = after_version[1..close].to_vec();
        if delimiter.is_empty() {
            return Err(FeedgateError::MalformedStream(
                "empty delimiter".to_string(),
            ));
        }
        // The delimiter must be distinguishable from record content: ASCII
        // letters, digits, and the structural characters are forbidden.
        if delimiter.iter().any(|&b| {
            b.is_ascii_alphanumeric() || matches!(b, b':' | b'/' | b'_' | b'-' | b' ' | b'=' | b'+' | b'[' | b']')
        }) {
            return Err(FeedgateError::MalformedStream(
                "delimiter contains reserved characters".to_string(),
            ));
        }

        let header_len = HEADER_PREFIX.len() + space + 1 + close + 1;
        let mut parser = Self {
            data,
            pos: header_len,
            delimiter,
            version,
        };
        // The header is terminated by one occurrence of the delimiter.
        if parser.pos < parser.data.len() {
            if !parser.data[parser.pos..].starts_with(&parser.delimiter) {
                return Err(FeedgateError::MalformedStream(
                    "header not followed by the delimiter".to_string(),
                ));
            }
            parser.pos += parser.delimiter.len();
        }
        Ok(parser)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// The next delimiter-separated segment, or `None` at end of stream.
    fn next_segment(&mut self) -> Option<&'a [u8]> {
        if self.pos > self.data.len() {
            return None;
        }
        if self.pos == self.data.len() {
            self.pos += 1;
            // A trailing delimiter yields one final empty segment, which
            // callers treat as end of stream.
            return None;
        }
        let rest = &self.data[self.pos..];
        match find_subsequence(rest, &self.delimiter) {
            Some(idx) => {
                let segment = &rest[..idx];
                self.pos += idx + self.delimiter.len();
                Some(segment)
            }
            None => {
                let segment = rest;
                self.pos = self.data.len() + 1;
                Some(segment)
            }
        }
    }

    /// Consumes the retriever's `content` marker and the raw byte tail, if
    /// present at the current position. The marker is terminated by a
    /// literal newline, never by the stream delimiter: the document bytes
    /// that follow cannot be guaranteed delimiter-free, and they are not
    /// text.
    fn take_content(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        if let Some(raw) = rest.strip_prefix(b"content\n") {
            self.pos = self.data.len() + 1;
            Some(raw)
        } else if rest == b"content" {
            // A stream may end right at the marker; that is an empty
            // document, not an error.
            self.pos = self.data.len() + 1;
            Some(&[])
        } else {
            None
        }
    }

    /// Reads a lister stream into push records.
    pub fn read_from_lister(&mut self) -> Result<Vec<Record>, FeedgateError> {
        let mut records = Vec::new();
        let mut current: Option<RecordBuilder> = None;

        while let Some(segment) = self.next_segment() {
            if segment.is_empty() {
                continue;
            }
            let line = std::str::from_utf8(segment)?;
            let (key, value) = split_command(line);

            match key {
                "id" => {
                    if let Some(builder) = current.take() {
                        records.push(builder.build());
                    }
                    current = Some(Record::builder(DocId::new(value.unwrap_or_default())));
                }
                "id-list" => {
                    if let Some(builder) = current.take() {
                        records.push(builder.build());
                    }
                    // Bare ids, one per segment, until a blank segment.
                    while let Some(id_segment) = self.next_segment() {
                        if id_segment.is_empty() {
                            break;
                        }
                        let id = std::str::from_utf8(id_segment)?;
                        records.push(Record::builder(DocId::new(id)).build());
                    }
                }
                _ => {
                    let Some(builder) = current.take() else {
                        return Err(FeedgateError::MalformedStream(format!(
                            "'{key}' before the first id"
                        )));
                    };
                    current = Some(apply_lister_command(builder, key, value)?);
                }
            }
        }
        if let Some(builder) = current.take() {
            records.push(builder.build());
        }
        Ok(records)
    }

    /// Reads a retriever stream for one document.
    pub fn read_from_retriever(&mut self) -> Result<RetrieverResponse, FeedgateError> {
        let mut response = RetrieverResponse::default();
        let mut pending_meta_name: Option<String> = None;
        let mut pending_anchor_uri: Option<Url> = None;

        loop {
            // The content tail is claimed before any delimiter splitting or
            // UTF-8 decoding can touch it.
            if let Some(content) = self.take_content() {
                response.content = Some(content.to_vec());
                break;
            }
            let Some(segment) = self.next_segment() else {
                break;
            };
            if segment.is_empty() {
                continue;
            }
            let line = std::str::from_utf8(segment)?;
            let (key, value) = split_command(line);

            match key {
                "id" => {}
                "up-to-date" => response.up_to_date = true,
                "not-found" => response.not_found = true,
                "secure" => response.secure = true,
                "no-index" => response.no_index = true,
                "no-follow" => response.no_follow = true,
                "no-archive" => response.no_archive = true,
                "crawl-once" => response.crawl_once = true,
                "lock" => response.lock = true,
                "display-url" => {
                    let raw = value.unwrap_or_default();
                    response.display_url = Some(Url::parse(raw).map_err(|e| {
                        FeedgateError::MalformedStream(format!("bad display-url '{raw}': {e}"))
                    })?);
                }
                "last-modified" => {
                    response.last_modified = Some(parse_epoch_seconds(value.unwrap_or_default())?);
                }
                "meta-name" => {
                    pending_meta_name = Some(value.unwrap_or_default().to_string());
                }
                "meta-value" => {
                    let name = pending_meta_name.take().ok_or_else(|| {
                        FeedgateError::MalformedStream(
                            "meta-value without preceding meta-name".to_string(),
                        )
                    })?;
                    response.metadata.add(name, value.unwrap_or_default());
                }
                "anchor-uri" => {
                    // A previous anchor without text is flushed as-is.
                    if let Some(uri) = pending_anchor_uri.take() {
                        response.anchors.push((uri, None));
                    }
                    let raw = value.unwrap_or_default();
                    pending_anchor_uri = Some(Url::parse(raw).map_err(|e| {
                        FeedgateError::MalformedStream(format!("bad anchor-uri '{raw}': {e}"))
                    })?);
                }
                "anchor-text" => {
                    let uri = pending_anchor_uri.take().ok_or_else(|| {
                        FeedgateError::MalformedStream(
                            "anchor-text without preceding anchor-uri".to_string(),
                        )
                    })?;
                    response
                        .anchors
                        .push((uri, Some(value.unwrap_or_default().to_string())));
                }
                _ => {}
            }
        }
        if let Some(uri) = pending_anchor_uri.take() {
            response.anchors.push((uri, None));
        }
        Ok(response)
    }

    /// Reads an authorizer stream into a per-document decision map.
    pub fn read_from_authorizer(
        &mut self,
    ) -> Result<BTreeMap<DocId, AuthzStatus>, FeedgateError> {
        let mut decisions = BTreeMap::new();
        let mut current: Option<DocId> = None;

        while let Some(segment) = self.next_segment() {
            if segment.is_empty() {
                continue;
            }
            let line = std::str::from_utf8(segment)?;
            let (key, value) = split_command(line);

            match key {
                "repository-unavailable" => {
                    return Err(FeedgateError::Unavailable(
                        value.unwrap_or("repository reported unavailable").to_string(),
                    ));
                }
                "id" => {
                    current = Some(DocId::new(value.unwrap_or_default()));
                }
                "authz-status" => {
                    let Some(doc_id) = current.clone() else {
                        return Err(FeedgateError::MalformedStream(
                            "authz-status before the first id".to_string(),
                        ));
                    };
                    let status = match value.unwrap_or_default() {
                        "PERMIT" => AuthzStatus::Permit,
                        "DENY" => AuthzStatus::Deny,
                        _ => AuthzStatus::Indeterminate,
                    };
                    decisions.insert(doc_id, status);
                }
                _ => {
                    if current.is_none() {
                        return Err(FeedgateError::MalformedStream(format!(
                            "'{key}' before the first id"
                        )));
                    }
                }
            }
        }
        Ok(decisions)
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Splits `key=value` at the first '='; a bare keyword has no value.
fn split_command(line: &str) -> (&str, Option<&str>) {
    match line.split_once('=') {
        Some((k, v)) => (k, Some(v)),
        None => (line, None),
    }
}

fn apply_lister_command(
    builder: RecordBuilder,
    key: &str,
    value: Option<&str>,
) -> Result<RecordBuilder, FeedgateError> {
    Ok(match key {
        "last-modified" => builder.last_modified(parse_epoch_seconds(value.unwrap_or_default())?),
        "result-link" => {
            let raw = value.unwrap_or_default();
            builder.result_link(Url::parse(raw).map_err(|e| {
                FeedgateError::MalformedStream(format!("bad result-link '{raw}': {e}"))
            })?)
        }
        "crawl-immediately" => builder.crawl_immediately(true),
        "crawl-once" => builder.crawl_once(true),
        "delete" => builder.delete_from_index(true),
        "lock" => builder.lock(true),
        // Unknown keys are ignored for forward compatibility.
        _ => builder,
    })
}

fn parse_epoch_seconds(value: &str) -> Result<chrono::DateTime<chrono::Utc>, FeedgateError> {
    let secs: i64 = value.trim().parse().map_err(|_| {
        FeedgateError::MalformedStream(format!("bad last-modified '{value}'"))
    })?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        FeedgateError::MalformedStream(format!("last-modified '{value}' out of range"))
    })
}
