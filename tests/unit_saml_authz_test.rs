use chrono::TimeZone;
use feedgate::core::saml::XmlNode;
use feedgate::core::saml::authz::{
    AuthzDecision, SamlDecision, build_authz_response_envelope, parse_authz_queries,
};

fn batch_request(queries: &[(&str, &str, &str)]) -> String {
    let mut body = String::new();
    for (id, resource, subject) in queries {
        body.push_str(&format!(
            concat!(
                r#"<samlp:AuthzDecisionQuery xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
                r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
                r#"ID="{id}" Version="2.0" IssueInstant="2024-01-01T00:00:00Z" Resource="{resource}">"#,
                r#"<saml:Subject><saml:NameID>{subject}</saml:NameID></saml:Subject>"#,
                r#"<saml:Action Namespace="urn:oasis:names:tc:SAML:1.0:action:ghpp">GET</saml:Action>"#,
                r#"</samlp:AuthzDecisionQuery>"#
            ),
            id = id,
            resource = resource,
            subject = subject,
        ));
    }
    format!(
        concat!(
            r#"<soap11:Envelope xmlns:soap11="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<soap11:Body>{body}</soap11:Body></soap11:Envelope>"#
        ),
        body = body,
    )
}

#[test]
fn test_parse_batch_of_two_queries() {
    let xml = batch_request(&[
        ("q1", "http://localhost/doc/1234", "joe"),
        ("q2", "http://localhost/doc/1235", "joe"),
    ]);
    let batch = parse_authz_queries(&xml).unwrap();
    assert_eq!(batch.subject, "joe");
    assert_eq!(batch.queries.len(), 2);
    assert_eq!(batch.queries[0].id, "q1");
    assert_eq!(batch.queries[0].resource, "http://localhost/doc/1234");
    assert_eq!(batch.queries[1].id, "q2");
}

#[test]
fn test_mismatched_subjects_rejected() {
    let xml = batch_request(&[
        ("q1", "http://localhost/doc/1", "joe"),
        ("q2", "http://localhost/doc/2", "jane"),
    ]);
    assert!(parse_authz_queries(&xml).is_err());
}

#[test]
fn test_empty_batch_rejected() {
    let xml = batch_request(&[]);
    assert!(parse_authz_queries(&xml).is_err());
}

#[test]
fn test_response_envelope_echoes_query_ids() {
    // One Permit and one Deny, echoing the originating query ids.
    let decisions = vec![
        AuthzDecision {
            query_id: "q1".to_string(),
            resource: "http://localhost/doc/1234".to_string(),
            decision: SamlDecision::Permit,
        },
        AuthzDecision {
            query_id: "q2".to_string(),
            resource: "http://localhost/doc/1235".to_string(),
            decision: SamlDecision::Deny,
        },
    ];
    let envelope = build_authz_response_envelope(
        &decisions,
        "joe",
        "http://localhost/doc/",
        chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    );

    let root = XmlNode::parse(&envelope).unwrap();
    let mut responses = Vec::new();
    root.descendants("Response", &mut responses);
    assert_eq!(responses.len(), 2);

    let by_id: Vec<(&str, &str)> = responses
        .iter()
        .map(|r| {
            let statement = r.descendant("AuthzDecisionStatement").unwrap();
            (
                r.attr("InResponseTo").unwrap(),
                statement.attr("Decision").unwrap(),
            )
        })
        .collect();
    assert_eq!(by_id, vec![("q1", "Permit"), ("q2", "Deny")]);

    let statement = responses[0].descendant("AuthzDecisionStatement").unwrap();
    assert_eq!(
        statement.attr("Resource").unwrap(),
        "http://localhost/doc/1234"
    );
    let subject = responses[0].descendant("NameID").unwrap();
    assert_eq!(subject.text, "joe");
}

#[test]
fn test_authz_status_mapping_to_decision() {
    use feedgate::core::acl::AuthzStatus;
    assert_eq!(SamlDecision::from(AuthzStatus::Permit), SamlDecision::Permit);
    assert_eq!(SamlDecision::from(AuthzStatus::Deny), SamlDecision::Deny);
    // An undecided chain is served as Deny, never Indeterminate.
    assert_eq!(
        SamlDecision::from(AuthzStatus::Indeterminate),
        SamlDecision::Deny
    );
}

#[test]
fn test_secmgr_credential_extension_is_parsed() {
    let xml = concat!(
        r#"<soap11:Envelope xmlns:soap11="http://schemas.xmlsoap.org/soap/envelope/">"#,
        r#"<soap11:Body>"#,
        r#"<samlp:AuthzDecisionQuery xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
        r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
        r#"ID="q1" Version="2.0" IssueInstant="2024-01-01T00:00:00Z" Resource="http://localhost/doc/1">"#,
        r#"<saml:Subject><saml:NameID>joe</saml:NameID></saml:Subject>"#,
        r#"<saml:Attribute Name="SecmgrCredential">"#,
        r#"<saml:AttributeValue>"#,
        r#"<Credential name="joe" domain="corp" namespace="Default" password="hunter2">"#,
        r#"<Group name="eng" namespace="Default"/>"#,
        r#"<Group name="all" namespace="Default"/>"#,
        r#"</Credential>"#,
        r#"</saml:AttributeValue>"#,
        r#"</saml:Attribute>"#,
        r#"</samlp:AuthzDecisionQuery>"#,
        r#"</soap11:Body></soap11:Envelope>"#
    );
    let batch = parse_authz_queries(xml).unwrap();
    let user = batch.identity.user.as_ref().unwrap();
    assert_eq!(user.name(), "joe@corp");
    assert_eq!(batch.identity.groups.len(), 2);
    assert_eq!(batch.identity.password.as_deref(), Some("hunter2"));
}
