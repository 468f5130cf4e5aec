use chrono::TimeZone;
use feedgate::core::saml::XmlNode;
use feedgate::core::saml::messages::{
    build_artifact_resolve, build_authn_request, new_message_id, parse_artifact_response,
    redirect_binding_url,
};
use rsa::RsaPrivateKey;
use url::Url;

fn instant() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

#[test]
fn test_message_ids_never_start_with_digit() {
    for _ in 0..20 {
        let id = new_message_id();
        assert!(id.starts_with('_'), "{id}");
    }
}

#[test]
fn test_authn_request_shape() {
    let xml = build_authn_request(
        "_req1",
        instant(),
        "http://sp.example/entity",
        &Url::parse("http://sp.example/saml-assertion-consumer").unwrap(),
        &Url::parse("https://idp.example/sso").unwrap(),
    );
    let root = XmlNode::parse(&xml).unwrap();
    assert_eq!(root.name, "AuthnRequest");
    assert_eq!(root.attr("ID"), Some("_req1"));
    assert_eq!(root.attr("Version"), Some("2.0"));
    assert_eq!(
        root.attr("AssertionConsumerServiceURL"),
        Some("http://sp.example/saml-assertion-consumer")
    );
    assert_eq!(root.attr("Destination"), Some("https://idp.example/sso"));
    assert_eq!(
        root.child("Issuer").map(|n| n.text.as_str()),
        Some("http://sp.example/entity")
    );
}

#[test]
fn test_redirect_binding_url_carries_signed_request() {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 512).unwrap();
    let request = build_authn_request(
        "_req1",
        instant(),
        "http://sp.example/entity",
        &Url::parse("http://sp.example/saml-assertion-consumer").unwrap(),
        &Url::parse("https://idp.example/sso").unwrap(),
    );
    let redirect = redirect_binding_url(
        &Url::parse("https://idp.example/sso").unwrap(),
        &request,
        Some("/doc/42"),
        &key,
    )
    .unwrap();

    let query = redirect.query().unwrap();
    let params: Vec<&str> = query.split('&').map(|p| p.split('=').next().unwrap()).collect();
    assert_eq!(params, vec!["SAMLRequest", "RelayState", "SigAlg", "Signature"]);
    assert_eq!(redirect.host_str(), Some("idp.example"));
}

fn artifact_response(
    in_response_to: &str,
    issuer: &str,
    not_on_or_after: &str,
    recipient: &str,
) -> String {
    format!(
        concat!(
            r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<SOAP-ENV:Body>"#,
            r#"<samlp:ArtifactResponse xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
            r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_ar1" Version="2.0" "#,
            r#"IssueInstant="2024-06-01T12:00:00Z">"#,
            r#"<samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>"#,
            r#"<samlp:Response ID="_resp1" Version="2.0" IssueInstant="2024-06-01T12:00:00Z" "#,
            r#"InResponseTo="{in_response_to}">"#,
            r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
            r#"<samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>"#,
            r#"<saml:Assertion ID="_a1" Version="2.0" IssueInstant="2024-06-01T12:00:00Z">"#,
            r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
            r#"<saml:Subject>"#,
            r#"<saml:NameID>joe</saml:NameID>"#,
            r#"<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">"#,
            r#"<saml:SubjectConfirmationData Recipient="{recipient}" NotOnOrAfter="{not_on_or_after}" InResponseTo="{in_response_to}"/>"#,
            r#"</saml:SubjectConfirmation>"#,
            r#"</saml:Subject>"#,
            r#"</saml:Assertion>"#,
            r#"</samlp:Response>"#,
            r#"</samlp:ArtifactResponse>"#,
            r#"</SOAP-ENV:Body>"#,
            r#"</SOAP-ENV:Envelope>"#
        ),
        in_response_to = in_response_to,
        issuer = issuer,
        not_on_or_after = not_on_or_after,
        recipient = recipient,
    )
}

#[test]
fn test_parse_artifact_response_happy_path() {
    let xml = artifact_response(
        "_req1",
        "https://idp.example/entity",
        "2030-01-01T00:00:00Z",
        "http://sp.example/saml-assertion-consumer",
    );
    let parsed = parse_artifact_response(&xml).unwrap();
    assert!(parsed.status_success);
    assert_eq!(parsed.in_response_to.as_deref(), Some("_req1"));
    assert_eq!(parsed.issuer.as_deref(), Some("https://idp.example/entity"));
    assert_eq!(parsed.subject_name_id.as_deref(), Some("joe"));
    assert_eq!(
        parsed.recipient.as_deref(),
        Some("http://sp.example/saml-assertion-consumer")
    );
    assert_eq!(
        parsed.not_on_or_after.unwrap(),
        chrono::Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    );
}

#[test]
fn test_parse_artifact_response_failure_status() {
    let xml = artifact_response(
        "_req1",
        "https://idp.example/entity",
        "2030-01-01T00:00:00Z",
        "http://sp.example/saml-assertion-consumer",
    )
    .replace(
        "urn:oasis:names:tc:SAML:2.0:status:Success",
        "urn:oasis:names:tc:SAML:2.0:status:Requester",
    );
    let parsed = parse_artifact_response(&xml).unwrap();
    assert!(!parsed.status_success);
}

#[test]
fn test_artifact_resolve_envelope_shape() {
    let xml = build_artifact_resolve("_msg1", instant(), "http://sp.example/entity", "AAQAA0x");
    let root = XmlNode::parse(&xml).unwrap();
    assert_eq!(root.name, "Envelope");
    let resolve = root.descendant("ArtifactResolve").unwrap();
    assert_eq!(resolve.attr("ID"), Some("_msg1"));
    assert_eq!(
        resolve.child("Artifact").map(|n| n.text.as_str()),
        Some("AAQAA0x")
    );
    assert_eq!(
        resolve.child("Issuer").map(|n| n.text.as_str()),
        Some("http://sp.example/entity")
    );
}
