// src/core/saml/authz.rs

//! The policy-decision-point side: parsing batched `AuthzDecisionQuery`
//! envelopes from the indexer and rendering the decision responses.

use crate::core::acl::{AuthnIdentity, AuthzStatus, Principal};
use crate::core::errors::FeedgateError;
use crate::core::saml::XmlNode;
use crate::core::saml::messages::{new_message_id, parse_secmgr_credential, xml_escape};
use chrono::{DateTime, SecondsFormat, Utc};
use url::Url;

/// One query extracted from the SOAP batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthzQuery {
    pub id: String,
    pub resource: String,
    pub subject_name_id: String,
}

/// The full parsed batch: queries plus the shared subject.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthzQueryBatch {
    pub queries: Vec<AuthzQuery>,
    pub subject: String,
    /// Credential attributes carried in the optional security-manager
    /// extension of the first query.
    pub identity: AuthnIdentity,
}

/// Parses a SOAP envelope holding one or more `AuthzDecisionQuery`
/// elements. All queries must share one subject NameID.
pub fn parse_authz_queries(xml: &str) -> Result<AuthzQueryBatch, FeedgateError> {
    let root = XmlNode::parse(xml)?;
    let mut query_nodes = Vec::new();
    root.descendants("AuthzDecisionQuery", &mut query_nodes);
    if query_nodes.is_empty() {
        return Err(FeedgateError::Saml(
            "no AuthzDecisionQuery in request".to_string(),
        ));
    }

    let mut queries = Vec::with_capacity(query_nodes.len());
    let mut subject: Option<String> = None;
    for node in &query_nodes {
        let id = node
            .attr("ID")
            .ok_or_else(|| FeedgateError::Saml("query without ID".to_string()))?
            .to_string();
        let resource = node
            .attr("Resource")
            .ok_or_else(|| FeedgateError::Saml("query without Resource".to_string()))?
            .to_string();
        let name_id = node
            .descendant("NameID")
            .map(|n| n.text.clone())
            .ok_or_else(|| FeedgateError::Saml("query without subject NameID".to_string()))?;

        match &subject {
            None => subject = Some(name_id.clone()),
            Some(existing) if *existing != name_id => {
                return Err(FeedgateError::Saml(format!(
                    "queries carry different subjects ('{existing}' vs '{name_id}')"
                )));
            }
            Some(_) => {}
        }
        queries.push(AuthzQuery {
            id,
            resource,
            subject_name_id: name_id,
        });
    }

    let subject = subject.expect("at least one query parsed");
    let identity = parse_secmgr_credential(&root)
        .unwrap_or_else(|| AuthnIdentity::for_user(Principal::user(subject.clone())));

    Ok(AuthzQueryBatch {
        queries,
        subject,
        identity,
    })
}

/// A decision paired with the query it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthzDecision {
    pub query_id: String,
    pub resource: String,
    pub decision: SamlDecision,
}

/// The three decision tokens of `AuthzDecisionStatement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamlDecision {
    Permit,
    Deny,
    Indeterminate,
}

impl SamlDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            SamlDecision::Permit => "Permit",
            SamlDecision::Deny => "Deny",
            SamlDecision::Indeterminate => "Indeterminate",
        }
    }
}

impl From<AuthzStatus> for SamlDecision {
    /// The PDP never answers Indeterminate for a resolvable resource: an
    /// undecided ACL chain is served as Deny.
    fn from(status: AuthzStatus) -> Self {
        match status {
            AuthzStatus::Permit => SamlDecision::Permit,
            AuthzStatus::Deny | AuthzStatus::Indeterminate => SamlDecision::Deny,
        }
    }
}

/// Renders the SOAP envelope answering a query batch: one `saml2p:Response`
/// per query, each echoing its query id via `InResponseTo`.
pub fn build_authz_response_envelope(
    decisions: &[AuthzDecision],
    subject: &str,
    issuer: &str,
    issue_instant: DateTime<Utc>,
) -> String {
    let instant = issue_instant.to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut body = String::new();
    for decision in decisions {
        body.push_str(&format!(
            concat!(
                r#"<saml2p:Response xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol" "#,
                r#"ID="{id}" InResponseTo="{in_response_to}" IssueInstant="{instant}" Version="2.0">"#,
                r#"<saml2p:Status><saml2p:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></saml2p:Status>"#,
                r#"<saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" "#,
                r#"ID="{assertion_id}" IssueInstant="{instant}" Version="2.0">"#,
                r#"<saml2:Issuer>{issuer}</saml2:Issuer>"#,
                r#"<saml2:Subject><saml2:NameID>{subject}</saml2:NameID></saml2:Subject>"#,
                r#"<saml2:AuthzDecisionStatement Decision="{decision}" Resource="{resource}">"#,
                r#"<saml2:Action Namespace="urn:oasis:names:tc:SAML:1.0:action:ghpp">GET</saml2:Action>"#,
                r#"</saml2:AuthzDecisionStatement>"#,
                r#"</saml2:Assertion>"#,
                r#"</saml2p:Response>"#
            ),
            id = new_message_id(),
            in_response_to = xml_escape(&decision.query_id),
            instant = instant,
            assertion_id = new_message_id(),
            issuer = xml_escape(issuer),
            subject = xml_escape(subject),
            decision = decision.decision.as_str(),
            resource = xml_escape(&decision.resource),
        ));
    }

    format!(
        concat!(
            r#"<soap11:Envelope xmlns:soap11="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<soap11:Body>{body}</soap11:Body>"#,
            r#"</soap11:Envelope>"#
        ),
        body = body,
    )
}

/// Parses a resource URL, tolerating none.
pub fn parse_resource(resource: &str) -> Option<Url> {
    Url::parse(resource).ok()
}
