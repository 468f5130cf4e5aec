// src/core/feed/xml.rs

//! Construction of the two feed XML dialects the indexer ingests.
//!
//! `metadata-and-url` feeds carry crawlable records and standalone ACLs;
//! `xmlgroups` feeds carry group membership definitions. Record attributes
//! are emitted in lexicographic order so feeds are byte-stable, and all text
//! and attribute values are XML-escaped by the writer.

use crate::core::acl::{Acl, CaseSensitivity, DomainFormat, Principal};
use crate::core::adaptor::GroupDefinitions;
use crate::core::docid::{DocId, DocIdCodec};
use crate::core::errors::FeedgateError;
use crate::core::record::Record;
use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

const GSAFEED_DOCTYPE: &str =
    r#"gsafeed PUBLIC "-//Google//DTD GSA Feeds//EN" "gsafeed.dtd""#;

/// One entry of a metadata-and-url feed.
#[derive(Debug, Clone)]
pub enum FeedItem {
    Record(Record),
    /// A standalone ACL, optionally addressing a fragment of the document.
    AclOnly {
        doc_id: DocId,
        fragment: Option<String>,
        acl: Acl,
    },
}

/// Builds feed documents for one datasource.
#[derive(Debug, Clone)]
pub struct GsaFeedFileMaker {
    codec: DocIdCodec,
    domain_format: DomainFormat,
    crawl_immediately_enabled: bool,
    /// Pre-6.14 indexers require authmethod=httpsso on every record.
    legacy_authmethod_workaround: bool,
}

impl GsaFeedFileMaker {
    pub fn new(codec: DocIdCodec, domain_format: DomainFormat) -> Self {
        Self {
            codec,
            domain_format,
            crawl_immediately_enabled: true,
            legacy_authmethod_workaround: false,
        }
    }

    pub fn crawl_immediately_enabled(mut self, enabled: bool) -> Self {
        self.crawl_immediately_enabled = enabled;
        self
    }

    pub fn legacy_authmethod_workaround(mut self, enabled: bool) -> Self {
        self.legacy_authmethod_workaround = enabled;
        self
    }

    /// Produces a complete metadata-and-url feed document.
    pub fn make_metadata_and_url_xml(
        &self,
        datasource: &str,
        items: &[FeedItem],
    ) -> Result<String, FeedgateError> {
        validate_datasource(datasource)?;
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))?;
        writer.write_event(Event::DocType(BytesText::from_escaped(GSAFEED_DOCTYPE)))?;
        writer.write_event(Event::Start(BytesStart::new("gsafeed")))?;

        writer.write_event(Event::Start(BytesStart::new("header")))?;
        write_text_element(&mut writer, "datasource", datasource)?;
        write_text_element(&mut writer, "feedtype", "metadata-and-url")?;
        writer.write_event(Event::End(BytesEnd::new("header")))?;

        if items.is_empty() {
            writer.write_event(Event::Empty(BytesStart::new("group")))?;
        } else {
            writer.write_event(Event::Start(BytesStart::new("group")))?;
            for item in items {
                match item {
                    FeedItem::Record(record) => self.write_record(&mut writer, record)?,
                    FeedItem::AclOnly {
                        doc_id,
                        fragment,
                        acl,
                    } => {
                        let url = self.acl_url(doc_id, fragment.as_deref())?;
                        self.write_acl(&mut writer, &url, acl)?;
                    }
                }
            }
            writer.write_event(Event::End(BytesEnd::new("group")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("gsafeed")))?;
        finish(writer)
    }

    /// Produces a complete xmlgroups feed document.
    pub fn make_group_definitions_xml(
        &self,
        groups: &GroupDefinitions,
        case_sensitive: bool,
    ) -> Result<String, FeedgateError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))?;
        writer.write_event(Event::DocType(BytesText::from_escaped("xmlgroups")))?;
        writer.write_event(Event::Start(BytesStart::new("xmlgroups")))?;

        for (group, members) in groups {
            writer.write_event(Event::Start(BytesStart::new("membership")))?;
            self.write_group_principal(&mut writer, group, case_sensitive)?;
            writer.write_event(Event::Start(BytesStart::new("members")))?;
            for member in members {
                self.write_member_principal(&mut writer, member, case_sensitive)?;
            }
            writer.write_event(Event::End(BytesEnd::new("members")))?;
            writer.write_event(Event::End(BytesEnd::new("membership")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("xmlgroups")))?;
        finish(writer)
    }

    fn record_url(&self, record: &Record) -> Result<String, FeedgateError> {
        let mut url = self.codec.encode(record.doc_id())?.to_string();
        if let Some(fragment) = record.acl_fragment() {
            url = attach_fragment(&url, fragment);
        }
        Ok(url)
    }

    fn acl_url(&self, doc_id: &DocId, fragment: Option<&str>) -> Result<String, FeedgateError> {
        let url = self.codec.encode(doc_id)?.to_string();
        Ok(match fragment {
            Some(fragment) => attach_fragment(&url, fragment),
            None => url,
        })
    }

    /// Writes one `<record>`, attributes in lexicographic order.
    fn write_record(
        &self,
        writer: &mut Writer<Cursor<Vec<u8>>>,
        record: &Record,
    ) -> Result<(), FeedgateError> {
        let url = self.record_url(record)?;
        let mut elem = BytesStart::new("record");

        if record.is_to_be_deleted() {
            elem.push_attribute(("action", "delete"));
        }
        if self.legacy_authmethod_workaround {
            elem.push_attribute(("authmethod", "httpsso"));
        }
        if record.is_to_be_crawled_immediately() && self.crawl_immediately_enabled {
            elem.push_attribute(("crawl-immediately", "true"));
        }
        if record.is_to_be_crawled_once() {
            elem.push_attribute(("crawl-once", "true"));
        }
        if let Some(link) = record.result_link() {
            elem.push_attribute(("displayurl", link.as_str()));
        }
        if let Some(when) = record.last_modified() {
            elem.push_attribute(("last-modified", rfc1123(when).as_str()));
        }
        if record.is_to_be_locked() {
            elem.push_attribute(("lock", "true"));
        }
        elem.push_attribute(("mimetype", "text/plain"));
        elem.push_attribute(("url", url.as_str()));

        writer.write_event(Event::Empty(elem))?;

        if let Some(acl) = record.acl() {
            let acl_url = self.acl_url(record.doc_id(), record.acl_fragment())?;
            self.write_acl(writer, &acl_url, acl)?;
        }
        Ok(())
    }

    fn write_acl(
        &self,
        writer: &mut Writer<Cursor<Vec<u8>>>,
        url: &str,
        acl: &Acl,
    ) -> Result<(), FeedgateError> {
        let mut elem = BytesStart::new("acl");
        if let Some(inherit) = acl.inherit_from() {
            let parent = self.acl_url(&inherit.doc_id, inherit.fragment.as_deref())?;
            elem.push_attribute(("inherit-from", parent.as_str()));
        }
        if acl.inheritance_type() != crate::core::acl::InheritanceType::LeafNode {
            elem.push_attribute((
                "inheritance-type",
                acl.inheritance_type().to_string().as_str(),
            ));
        }
        elem.push_attribute(("url", url));
        writer.write_event(Event::Start(elem))?;

        let case = acl.case_sensitivity();
        for p in acl.permit_users() {
            self.write_acl_principal(writer, p, "permit", case)?;
        }
        for p in acl.permit_groups() {
            self.write_acl_principal(writer, p, "permit", case)?;
        }
        for p in acl.deny_users() {
            self.write_acl_principal(writer, p, "deny", case)?;
        }
        for p in acl.deny_groups() {
            self.write_acl_principal(writer, p, "deny", case)?;
        }

        writer.write_event(Event::End(BytesEnd::new("acl")))?;
        Ok(())
    }

    fn write_acl_principal(
        &self,
        writer: &mut Writer<Cursor<Vec<u8>>>,
        principal: &Principal,
        access: &str,
        case: CaseSensitivity,
    ) -> Result<(), FeedgateError> {
        let mut elem = BytesStart::new("principal");
        elem.push_attribute(("access", access));
        if case == CaseSensitivity::Insensitive {
            elem.push_attribute(("case-sensitivity-type", "EVERYTHING_CASE_INSENSITIVE"));
        }
        if principal.namespace() != crate::core::acl::DEFAULT_NAMESPACE {
            elem.push_attribute(("namespace", principal.namespace()));
        }
        elem.push_attribute(("scope", if principal.is_group() { "group" } else { "user" }));
        writer.write_event(Event::Start(elem))?;
        writer.write_event(Event::Text(BytesText::new(
            &principal.format_name(self.domain_format),
        )))?;
        writer.write_event(Event::End(BytesEnd::new("principal")))?;
        Ok(())
    }

    fn write_group_principal(
        &self,
        writer: &mut Writer<Cursor<Vec<u8>>>,
        group: &Principal,
        case_sensitive: bool,
    ) -> Result<(), FeedgateError> {
        let mut elem = BytesStart::new("principal");
        elem.push_attribute((
            "case-sensitivity-type",
            group_case_token(case_sensitive),
        ));
        elem.push_attribute(("namespace", group.namespace()));
        elem.push_attribute(("scope", "GROUP"));
        writer.write_event(Event::Start(elem))?;
        writer.write_event(Event::Text(BytesText::new(
            &group.format_name(self.domain_format),
        )))?;
        writer.write_event(Event::End(BytesEnd::new("principal")))?;
        Ok(())
    }

    fn write_member_principal(
        &self,
        writer: &mut Writer<Cursor<Vec<u8>>>,
        member: &Principal,
        case_sensitive: bool,
    ) -> Result<(), FeedgateError> {
        let mut elem = BytesStart::new("principal");
        elem.push_attribute((
            "case-sensitivity-type",
            group_case_token(case_sensitive),
        ));
        elem.push_attribute(("namespace", member.namespace()));
        elem.push_attribute((
            "scope",
            if member.is_group() { "GROUP" } else { "USER" },
        ));
        writer.write_event(Event::Start(elem))?;
        writer.write_event(Event::Text(BytesText::new(
            &member.format_name(self.domain_format),
        )))?;
        writer.write_event(Event::End(BytesEnd::new("principal")))?;
        Ok(())
    }
}

fn group_case_token(case_sensitive: bool) -> &'static str {
    if case_sensitive {
        "EVERYTHING_CASE_SENSITIVE"
    } else {
        "EVERYTHING_CASE_INSENSITIVE"
    }
}

/// ACL fragments get their own generated address below the document URL.
fn attach_fragment(url: &str, fragment: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}syntheticAclFragment={fragment}")
}

fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> Result<(), FeedgateError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn finish(writer: Writer<Cursor<Vec<u8>>>) -> Result<String, FeedgateError> {
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| FeedgateError::Internal(format!("feed XML is not UTF-8: {e}")))
}

fn rfc1123(when: &DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn validate_datasource(datasource: &str) -> Result<(), FeedgateError> {
    let mut chars = datasource.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid_first && valid_rest {
        Ok(())
    } else {
        Err(FeedgateError::InvalidConfiguration(format!(
            "invalid datasource name '{datasource}'"
        )))
    }
}
