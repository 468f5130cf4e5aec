use chrono::TimeZone;
use feedgate::core::acl::{
    Acl, CaseSensitivity, DomainFormat, InheritanceType, Principal,
};
use feedgate::core::adaptor::GroupDefinitions;
use feedgate::core::docid::{DocId, DocIdCodec};
use feedgate::core::feed::xml::{FeedItem, GsaFeedFileMaker};
use feedgate::core::record::Record;
use url::Url;

fn maker() -> GsaFeedFileMaker {
    let codec = DocIdCodec::new(
        Url::parse("http://localhost:5678/doc/").unwrap(),
        false,
    );
    GsaFeedFileMaker::new(codec, DomainFormat::Dns)
}

#[test]
fn test_empty_feed_skeleton() {
    let xml = maker().make_metadata_and_url_xml("t3sT", &[]).unwrap();
    assert!(xml.contains("<datasource>t3sT</datasource>"), "{xml}");
    assert!(xml.contains("<feedtype>metadata-and-url</feedtype>"), "{xml}");
    assert!(xml.contains("<group/>"), "{xml}");
    assert!(xml.contains(r#"standalone="no""#), "{xml}");
    assert!(xml.contains("<!DOCTYPE gsafeed"), "{xml}");
}

#[test]
fn test_record_attributes_in_lexicographic_order() {
    let record = Record::builder(DocId::new("x"))
        .delete_from_index(true)
        .crawl_immediately(true)
        .crawl_once(true)
        .lock(true)
        .last_modified(chrono::Utc.with_ymd_and_hms(2009, 2, 13, 23, 31, 30).unwrap())
        .result_link(Url::parse("http://example.com/shown").unwrap())
        .build();
    let xml = maker()
        .make_metadata_and_url_xml("feedname", &[FeedItem::Record(record)])
        .unwrap();

    let expected = concat!(
        r#"<record action="delete" crawl-immediately="true" crawl-once="true" "#,
        r#"displayurl="http://example.com/shown" "#,
        r#"last-modified="Fri, 13 Feb 2009 23:31:30 GMT" lock="true" "#,
        r#"mimetype="text/plain" url="http://localhost:5678/doc/x"/>"#
    );
    assert!(xml.contains(expected), "{xml}");
}

#[test]
fn test_plain_record_has_mimetype_and_url_only() {
    let record = Record::builder(DocId::new("simple")).build();
    let xml = maker()
        .make_metadata_and_url_xml("feedname", &[FeedItem::Record(record)])
        .unwrap();
    assert!(
        xml.contains(r#"<record mimetype="text/plain" url="http://localhost:5678/doc/simple"/>"#),
        "{xml}"
    );
}

#[test]
fn test_doc_id_is_percent_encoded_in_url() {
    let record = Record::builder(DocId::new("a b?c")).build();
    let xml = maker()
        .make_metadata_and_url_xml("feedname", &[FeedItem::Record(record)])
        .unwrap();
    assert!(xml.contains("url=\"http://localhost:5678/doc/a%20b%3Fc\""), "{xml}");
}

#[test]
fn test_xml_escaping_of_values() {
    let record = Record::builder(DocId::new("x"))
        .result_link(Url::parse("http://example.com/?a=1&b=2").unwrap())
        .build();
    let xml = maker()
        .make_metadata_and_url_xml("feedname", &[FeedItem::Record(record)])
        .unwrap();
    assert!(xml.contains("a=1&amp;b=2"), "{xml}");
    assert!(!xml.contains("a=1&b=2\""), "{xml}");
}

#[test]
fn test_acl_record_with_principals() {
    let acl = Acl::builder()
        .permit_user(Principal::user("alice"))
        .permit_group(Principal::group("wheel"))
        .deny_user(Principal::user("mallory"))
        .case_sensitivity(CaseSensitivity::Insensitive)
        .inheritance_type(InheritanceType::ParentOverrides)
        .inherit_from(DocId::new("parent"))
        .build();
    let xml = maker()
        .make_metadata_and_url_xml(
            "feedname",
            &[FeedItem::AclOnly {
                doc_id: DocId::new("child"),
                fragment: None,
                acl,
            }],
        )
        .unwrap();

    assert!(
        xml.contains(r#"inherit-from="http://localhost:5678/doc/parent""#),
        "{xml}"
    );
    assert!(xml.contains(r#"inheritance-type="parent-overrides""#), "{xml}");
    assert!(
        xml.contains(
            r#"<principal access="permit" case-sensitivity-type="EVERYTHING_CASE_INSENSITIVE" scope="user">alice</principal>"#
        ),
        "{xml}"
    );
    assert!(
        xml.contains(
            r#"<principal access="permit" case-sensitivity-type="EVERYTHING_CASE_INSENSITIVE" scope="group">wheel</principal>"#
        ),
        "{xml}"
    );
    assert!(
        xml.contains(
            r#"<principal access="deny" case-sensitivity-type="EVERYTHING_CASE_INSENSITIVE" scope="user">mallory</principal>"#
        ),
        "{xml}"
    );
}

#[test]
fn test_acl_fragment_gets_generated_url_suffix() {
    let xml = maker()
        .make_metadata_and_url_xml(
            "feedname",
            &[FeedItem::AclOnly {
                doc_id: DocId::new("doc"),
                fragment: Some("part1".to_string()),
                acl: Acl::builder().permit_user(Principal::user("u")).build(),
            }],
        )
        .unwrap();
    assert!(
        xml.contains("http://localhost:5678/doc/doc?syntheticAclFragment=part1"),
        "{xml}"
    );
}

#[test]
fn test_netbios_domain_format() {
    let codec = DocIdCodec::new(Url::parse("http://localhost:5678/doc/").unwrap(), false);
    let maker = GsaFeedFileMaker::new(codec, DomainFormat::Netbios);
    let acl = Acl::builder()
        .permit_user(Principal::user("fred@corp.example"))
        .build();
    let xml = maker
        .make_metadata_and_url_xml(
            "feedname",
            &[FeedItem::AclOnly {
                doc_id: DocId::new("doc"),
                fragment: None,
                acl,
            }],
        )
        .unwrap();
    assert!(xml.contains(r">corp.example\fred<"), "{xml}");
}

#[test]
fn test_invalid_datasource_rejected() {
    assert!(maker().make_metadata_and_url_xml("3bad", &[]).is_err());
    assert!(maker().make_metadata_and_url_xml("has space", &[]).is_err());
    assert!(maker().make_metadata_and_url_xml("t3sT", &[]).is_ok());
}

#[test]
fn test_group_definitions_feed() {
    let mut groups = GroupDefinitions::new();
    groups.insert(
        Principal::group("eng"),
        vec![Principal::user("alice"), Principal::group("sub-team")],
    );
    let xml = maker().make_group_definitions_xml(&groups, true).unwrap();

    assert!(xml.contains("<xmlgroups>"), "{xml}");
    assert!(xml.contains("<membership>"), "{xml}");
    assert!(
        xml.contains(
            r#"<principal case-sensitivity-type="EVERYTHING_CASE_SENSITIVE" namespace="Default" scope="GROUP">eng</principal>"#
        ),
        "{xml}"
    );
    assert!(
        xml.contains(
            r#"<principal case-sensitivity-type="EVERYTHING_CASE_SENSITIVE" namespace="Default" scope="USER">alice</principal>"#
        ),
        "{xml}"
    );
    assert!(
        xml.contains(
            r#"<principal case-sensitivity-type="EVERYTHING_CASE_SENSITIVE" namespace="Default" scope="GROUP">sub-team</principal>"#
        ),
        "{xml}"
    );
}

#[test]
fn test_group_feed_case_insensitive_token() {
    let mut groups = GroupDefinitions::new();
    groups.insert(Principal::group("eng"), vec![Principal::user("alice")]);
    let xml = maker().make_group_definitions_xml(&groups, false).unwrap();
    assert!(xml.contains("EVERYTHING_CASE_INSENSITIVE"), "{xml}");
    assert!(!xml.contains("EVERYTHING_CASE_SENSITIVE\""), "{xml}");
}
