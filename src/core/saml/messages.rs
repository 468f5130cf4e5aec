// src/core/saml/messages.rs

//! Construction and parsing of the service-provider messages: the
//! `AuthnRequest` carried on the redirect binding and the
//! `ArtifactResolve`/`ArtifactResponse` exchange on the SOAP back channel.

use crate::core::acl::{AuthnIdentity, Principal};
use crate::core::errors::FeedgateError;
use crate::core::saml::{STATUS_SUCCESS, XmlNode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use rsa::Pkcs1v15Sign;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use std::io::Write;
use url::Url;
use uuid::Uuid;

pub const RSA_SHA256_URI: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

/// SAML message ids must not begin with a digit.
pub fn new_message_id() -> String {
    format!("_{}", Uuid::new_v4().simple())
}

fn instant(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds the `AuthnRequest` document for one authentication attempt.
pub fn build_authn_request(
    id: &str,
    issue_instant: DateTime<Utc>,
    entity_id: &str,
    acs_url: &Url,
    destination: &Url,
) -> String {
    format!(
        concat!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
            r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
            r#"ID="{id}" Version="2.0" IssueInstant="{instant}" "#,
            r#"ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Artifact" "#,
            r#"AssertionConsumerServiceURL="{acs}" Destination="{dest}">"#,
            r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
            r#"</samlp:AuthnRequest>"#
        ),
        id = id,
        instant = instant(issue_instant),
        acs = xml_escape(acs_url.as_str()),
        dest = xml_escape(destination.as_str()),
        issuer = xml_escape(entity_id),
    )
}

/// Encodes an `AuthnRequest` onto the redirect binding: raw-deflate,
/// base64, percent-encode, then sign the query with the SP key.
pub fn redirect_binding_url(
    sso_url: &Url,
    authn_request_xml: &str,
    relay_state: Option<&str>,
    signing_key: &RsaPrivateKey,
) -> Result<Url, FeedgateError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(authn_request_xml.as_bytes())?;
    let deflated = encoder
        .finish()
        .map_err(|e| FeedgateError::Internal(format!("deflate failed: {e}")))?;
    let payload = BASE64.encode(deflated);

    let mut query = format!(
        "SAMLRequest={}",
        utf8_percent_encode(&payload, NON_ALPHANUMERIC)
    );
    if let Some(relay) = relay_state {
        query.push_str(&format!(
            "&RelayState={}",
            utf8_percent_encode(relay, NON_ALPHANUMERIC)
        ));
    }
    query.push_str(&format!(
        "&SigAlg={}",
        utf8_percent_encode(RSA_SHA256_URI, NON_ALPHANUMERIC)
    ));

    let digest = Sha256::digest(query.as_bytes());
    let signature = signing_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| FeedgateError::Internal(format!("request signing failed: {e}")))?;
    query.push_str(&format!(
        "&Signature={}",
        utf8_percent_encode(&BASE64.encode(signature), NON_ALPHANUMERIC)
    ));

    let mut redirect = sso_url.clone();
    let merged = match redirect.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
        _ => query,
    };
    redirect.set_query(Some(&merged));
    Ok(redirect)
}

/// Builds the SOAP `ArtifactResolve` envelope for the back channel.
pub fn build_artifact_resolve(
    id: &str,
    issue_instant: DateTime<Utc>,
    entity_id: &str,
    artifact: &str,
) -> String {
    format!(
        concat!(
            r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<SOAP-ENV:Body>"#,
            r#"<samlp:ArtifactResolve xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
            r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
            r#"ID="{id}" Version="2.0" IssueInstant="{instant}">"#,
            r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
            r#"<samlp:Artifact>{artifact}</samlp:Artifact>"#,
            r#"</samlp:ArtifactResolve>"#,
            r#"</SOAP-ENV:Body>"#,
            r#"</SOAP-ENV:Envelope>"#
        ),
        id = id,
        instant = instant(issue_instant),
        issuer = xml_escape(entity_id),
        artifact = xml_escape(artifact),
    )
}

/// What the artifact resolution produced, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedArtifactResponse {
    pub status_success: bool,
    /// `InResponseTo` of the inner `Response`: the original request id.
    pub in_response_to: Option<String>,
    pub issuer: Option<String>,
    pub subject_name_id: Option<String>,
    pub recipient: Option<String>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    /// Identity from the security-manager credential extension, when the
    /// IdP attached one.
    pub verified_identity: Option<AuthnIdentity>,
}

/// Parses the SOAP envelope answering an `ArtifactResolve`.
pub fn parse_artifact_response(xml: &str) -> Result<ParsedArtifactResponse, FeedgateError> {
    let root = XmlNode::parse(xml)?;
    let artifact_response = root
        .descendant("ArtifactResponse")
        .ok_or_else(|| FeedgateError::Saml("missing ArtifactResponse".to_string()))?;

    let mut parsed = ParsedArtifactResponse::default();

    // The outer status covers artifact resolution; the inner Response has
    // its own status. Both must be Success.
    let statuses: &mut Vec<&XmlNode> = &mut Vec::new();
    artifact_response.descendants("StatusCode", statuses);
    parsed.status_success = !statuses.is_empty()
        && statuses
            .iter()
            .all(|s| s.attr("Value") == Some(STATUS_SUCCESS));

    let Some(response) = artifact_response.descendant("Response") else {
        return Ok(parsed);
    };
    parsed.in_response_to = response.attr("InResponseTo").map(str::to_string);
    parsed.issuer = response.child("Issuer").map(|n| n.text.clone());

    let Some(assertion) = response.descendant("Assertion") else {
        return Ok(parsed);
    };
    if parsed.issuer.is_none() {
        parsed.issuer = assertion.child("Issuer").map(|n| n.text.clone());
    }

    if let Some(subject) = assertion.child("Subject") {
        parsed.subject_name_id = subject.child("NameID").map(|n| n.text.clone());
        if let Some(data) = subject.descendant("SubjectConfirmationData") {
            parsed.recipient = data.attr("Recipient").map(str::to_string);
            parsed.not_on_or_after = data
                .attr("NotOnOrAfter")
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    if parsed.not_on_or_after.is_none() {
        parsed.not_on_or_after = assertion
            .descendant("Conditions")
            .and_then(|c| c.attr("NotOnOrAfter"))
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc));
    }

    parsed.verified_identity = parse_secmgr_credential(assertion);
    Ok(parsed)
}

/// The security manager attaches a verified credential as an assertion
/// attribute: a `Credential` element carrying the resolved username and
/// domain plus the user's group memberships.
pub fn parse_secmgr_credential(scope: &XmlNode) -> Option<AuthnIdentity> {
    let mut attributes = Vec::new();
    scope.descendants("Attribute", &mut attributes);
    let attribute = attributes
        .iter()
        .find(|a| a.attr("Name") == Some("SecmgrCredential"))?;
    let credential = attribute.descendant("Credential")?;

    let name = credential.attr("name")?;
    let user_name = match credential.attr("domain") {
        Some(domain) if !domain.is_empty() => format!("{name}@{domain}"),
        _ => name.to_string(),
    };
    let namespace = credential
        .attr("namespace")
        .unwrap_or(crate::core::acl::DEFAULT_NAMESPACE);

    let mut identity =
        AuthnIdentity::for_user(Principal::user_in(user_name, namespace));
    identity.password = credential.attr("password").map(str::to_string);
    let mut groups = Vec::new();
    credential.descendants("Group", &mut groups);
    identity.groups = groups
        .iter()
        .filter_map(|g| {
            let name = g.attr("name")?;
            let namespace = g
                .attr("namespace")
                .unwrap_or(crate::core::acl::DEFAULT_NAMESPACE);
            Some(Principal::group_in(name, namespace))
        })
        .collect();
    Some(identity)
}

pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
