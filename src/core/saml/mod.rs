// src/core/saml/mod.rs

//! SAML 2.0 plumbing: the service-provider messages for user
//! authentication and the policy-decision-point messages for late-binding
//! authorization.
//!
//! Only the profiles the indexer speaks are implemented: the redirect
//! binding towards the IdP, the artifact binding on the back channel, and
//! `AuthzDecisionQuery` batches over SOAP 1.1.

pub mod authz;
pub mod messages;
pub mod service_provider;

use crate::core::errors::FeedgateError;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;

pub const SAML_PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const SAML_ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
pub const NAMEID_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";
pub const ACTION_GHPP_NS: &str = "urn:oasis:names:tc:SAML:1.0:action:ghpp";

/// A parsed XML element, namespace prefixes stripped. SAML messages are
/// small, so building a tree is simpler and sturdier than event matching.
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub name: String,
    pub attrs: HashMap<String, String>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    /// Parses a document into its root element.
    pub fn parse(xml: &str) -> Result<XmlNode, FeedgateError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader
                .read_event()
                .map_err(|e| FeedgateError::Xml(e.to_string()))?
            {
                Event::Start(e) => {
                    let node = XmlNode {
                        name: local_name(e.name().as_ref())?,
                        attrs: read_attrs(&e)?,
                        ..Default::default()
                    };
                    stack.push(node);
                }
                Event::Empty(e) => {
                    let node = XmlNode {
                        name: local_name(e.name().as_ref())?,
                        attrs: read_attrs(&e)?,
                        ..Default::default()
                    };
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack.pop().ok_or_else(|| {
                        FeedgateError::Xml("unbalanced end tag".to_string())
                    })?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(t) => {
                    if let Some(top) = stack.last_mut() {
                        let text = t
                            .unescape()
                            .map_err(|e| FeedgateError::Xml(e.to_string()))?;
                        // Indentation between elements is noise, not content.
                        if !text.trim().is_empty() {
                            top.text.push_str(text.trim());
                        }
                    }
                }
                Event::CData(t) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&t));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        root.ok_or_else(|| FeedgateError::Xml("empty document".to_string()))
    }

    /// First direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All direct children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First descendant with the given local name, depth first.
    pub fn descendant(&self, name: &str) -> Option<&XmlNode> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.descendant(name) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants with the given local name, depth first.
    pub fn descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.descendants(name, out);
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), FeedgateError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None => {
            if root.is_some() {
                return Err(FeedgateError::Xml(
                    "multiple root elements".to_string(),
                ));
            }
            *root = Some(node);
            Ok(())
        }
    }
}

fn local_name(qname: &[u8]) -> Result<String, FeedgateError> {
    let full = std::str::from_utf8(qname)
        .map_err(|_| FeedgateError::Xml("non-UTF-8 element name".to_string()))?;
    Ok(full.rsplit(':').next().unwrap_or(full).to_string())
}

fn read_attrs(
    e: &quick_xml::events::BytesStart<'_>,
) -> Result<HashMap<String, String>, FeedgateError> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| FeedgateError::Xml(e.to_string()))?;
        let key = local_name(attr.key.as_ref())?;
        let value = attr
            .unescape_value()
            .map_err(|e| FeedgateError::Xml(e.to_string()))?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}
