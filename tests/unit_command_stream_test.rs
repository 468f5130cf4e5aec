use feedgate::core::FeedgateError;
use feedgate::core::acl::AuthzStatus;
use feedgate::core::command_stream::CommandStreamParser;
use feedgate::core::docid::DocId;

#[test]
fn test_lister_mixed_ids_and_id_list() {
    let input = b"GSA Adaptor Data Version 1 [\n]\nid=123\nid=456\nid-list\n10\n20\n30\n\nid=789\n";
    let records = CommandStreamParser::new(input)
        .unwrap()
        .read_from_lister()
        .unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.doc_id().unique_id()).collect();
    assert_eq!(ids, vec!["123", "456", "10", "20", "30", "789"]);
}

#[test]
fn test_lister_record_attributes() {
    let input = b"GSA Adaptor Data Version 1 [\n]\nid=a\nlast-modified=1000\ncrawl-immediately\ncrawl-once\ndelete\nlock\nresult-link=http://example.com/a\n";
    let records = CommandStreamParser::new(input)
        .unwrap()
        .read_from_lister()
        .unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.is_to_be_deleted());
    assert!(record.is_to_be_crawled_immediately());
    assert!(record.is_to_be_crawled_once());
    assert!(record.is_to_be_locked());
    assert_eq!(record.last_modified().unwrap().timestamp(), 1000);
    assert_eq!(
        record.result_link().unwrap().as_str(),
        "http://example.com/a"
    );
}

#[test]
fn test_lister_stray_line_before_first_id_is_malformed() {
    let input = b"GSA Adaptor Data Version 1 [\n]\ndelete\nid=1\n";
    let err = CommandStreamParser::new(input)
        .unwrap()
        .read_from_lister()
        .unwrap_err();
    assert!(matches!(err, FeedgateError::MalformedStream(_)));
}

#[test]
fn test_lister_unknown_keys_are_ignored() {
    let input = b"GSA Adaptor Data Version 1 [\n]\nid=1\nfuture-extension=whatever\n";
    let records = CommandStreamParser::new(input)
        .unwrap()
        .read_from_lister()
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[test]
fn test_multibyte_delimiter() {
    // A UTF-8 snowman separates records.
    let input = "GSA Adaptor Data Version 1 [\u{2603}]\u{2603}id=1\u{2603}id=2".as_bytes();
    let records = CommandStreamParser::new(input)
        .unwrap()
        .read_from_lister()
        .unwrap();
    assert_eq!(records.len(), 2);
}

#[test]
fn test_nul_delimiter() {
    let input = b"GSA Adaptor Data Version 1 [\x00]\x00id=1\x00id=2";
    let records = CommandStreamParser::new(input)
        .unwrap()
        .read_from_lister()
        .unwrap();
    assert_eq!(records.len(), 2);
}

#[test]
fn test_invalid_header_rejected() {
    let err = CommandStreamParser::new(b"Bogus Header [\n]\n").unwrap_err();
    assert!(matches!(err, FeedgateError::MalformedStream(_)));
}

#[test]
fn test_unsupported_version_rejected() {
    let err = CommandStreamParser::new(b"GSA Adaptor Data Version 2 [\n]\n").unwrap_err();
    assert!(matches!(err, FeedgateError::MalformedStream(_)));
}

#[test]
fn test_empty_delimiter_rejected() {
    let err = CommandStreamParser::new(b"GSA Adaptor Data Version 1 []").unwrap_err();
    assert!(matches!(err, FeedgateError::MalformedStream(_)));
}

#[test]
fn test_reserved_delimiter_rejected() {
    for delim in ["a", "7", ":", "/", "_", "-", " ", "=", "+"] {
        let input = format!("GSA Adaptor Data Version 1 [{delim}]{delim}id=1");
        let err = CommandStreamParser::new(input.as_bytes()).unwrap_err();
        assert!(
            matches!(err, FeedgateError::MalformedStream(_)),
            "delimiter '{delim}' should be rejected"
        );
    }
}

#[test]
fn test_retriever_full_response() {
    let input = b"GSA Adaptor Data Version 1 [\n]\nid=doc1\nsecure\nno-index\ncrawl-once\nlast-modified=1000\ndisplay-url=http://example.com/d\nmeta-name=author\nmeta-value=fred\nanchor-uri=http://example.com/other\nanchor-text=other doc\ncontent\nHello World";
    let response = CommandStreamParser::new(input)
        .unwrap()
        .read_from_retriever()
        .unwrap();
    assert!(response.secure);
    assert!(response.no_index);
    assert!(!response.no_follow);
    assert!(response.crawl_once);
    assert_eq!(response.last_modified.unwrap().timestamp(), 1000);
    assert_eq!(
        response.display_url.as_ref().unwrap().as_str(),
        "http://example.com/d"
    );
    assert_eq!(response.metadata.first_value("author"), Some("fred"));
    assert_eq!(response.anchors.len(), 1);
    assert_eq!(response.anchors[0].1.as_deref(), Some("other doc"));
    assert_eq!(response.content.as_deref(), Some(&b"Hello World"[..]));
}

#[test]
fn test_retriever_content_keeps_embedded_delimiters() {
    // Once `content` is seen the rest of the stream is raw bytes.
    let input = b"GSA Adaptor Data Version 1 [\n]\nid=doc1\ncontent\nline one\nline two\n";
    let response = CommandStreamParser::new(input)
        .unwrap()
        .read_from_retriever()
        .unwrap();
    assert_eq!(response.content.as_deref(), Some(&b"line one\nline two\n"[..]));
}

#[test]
fn test_retriever_binary_content_with_nul_delimiter() {
    // The content marker ends with a literal newline even when the stream
    // delimiter is something else entirely; the tail is raw bytes and may
    // contain the delimiter, NULs, and invalid UTF-8.
    let mut input =
        b"GSA Adaptor Data Version 1 [\x00]\x00id=doc1\x00meta-name=author\x00meta-value=fred\x00content\n"
            .to_vec();
    let payload = b"\x00\xff\xfe raw \x00 bytes\nmore";
    input.extend_from_slice(payload);
    let response = CommandStreamParser::new(&input)
        .unwrap()
        .read_from_retriever()
        .unwrap();
    assert_eq!(response.metadata.first_value("author"), Some("fred"));
    assert_eq!(response.content.as_deref(), Some(&payload[..]));
}

#[test]
fn test_retriever_content_with_multibyte_delimiter() {
    let mut input = "GSA Adaptor Data Version 1 [\u{2603}]\u{2603}id=doc1\u{2603}secure\u{2603}content\n"
        .as_bytes()
        .to_vec();
    input.extend_from_slice("body with \u{2603} inside".as_bytes());
    let response = CommandStreamParser::new(&input)
        .unwrap()
        .read_from_retriever()
        .unwrap();
    assert!(response.secure);
    assert_eq!(
        response.content.as_deref(),
        Some("body with \u{2603} inside".as_bytes())
    );
}

#[test]
fn test_retriever_stream_ending_at_content_marker_is_empty_document() {
    let input = b"GSA Adaptor Data Version 1 [\x00]\x00id=doc1\x00content";
    let response = CommandStreamParser::new(input)
        .unwrap()
        .read_from_retriever()
        .unwrap();
    assert_eq!(response.content.as_deref(), Some(&b""[..]));
}

#[test]
fn test_retriever_up_to_date() {
    let input = b"GSA Adaptor Data Version 1 [\n]\nid=doc1\nup-to-date\n";
    let response = CommandStreamParser::new(input)
        .unwrap()
        .read_from_retriever()
        .unwrap();
    assert!(response.up_to_date);
    assert!(response.content.is_none());
}

#[test]
fn test_authorizer_decisions() {
    let input = b"GSA Adaptor Data Version 1 [\n]\nid=1\nauthz-status=PERMIT\nid=2\nauthz-status=DENY\nid=3\nauthz-status=INDETERMINATE\n";
    let decisions = CommandStreamParser::new(input)
        .unwrap()
        .read_from_authorizer()
        .unwrap();
    assert_eq!(decisions.get(&DocId::new("1")), Some(&AuthzStatus::Permit));
    assert_eq!(decisions.get(&DocId::new("2")), Some(&AuthzStatus::Deny));
    assert_eq!(
        decisions.get(&DocId::new("3")),
        Some(&AuthzStatus::Indeterminate)
    );
}

#[test]
fn test_authorizer_repository_unavailable() {
    let input = b"GSA Adaptor Data Version 1 [\n]\nrepository-unavailable\n";
    let err = CommandStreamParser::new(input)
        .unwrap()
        .read_from_authorizer()
        .unwrap_err();
    assert!(matches!(err, FeedgateError::Unavailable(_)));
}

#[test]
fn test_authorizer_stray_line_is_malformed() {
    let input = b"GSA Adaptor Data Version 1 [\n]\nauthz-status=PERMIT\n";
    let err = CommandStreamParser::new(input)
        .unwrap()
        .read_from_authorizer()
        .unwrap_err();
    assert!(matches!(err, FeedgateError::MalformedStream(_)));
}
