use feedgate::core::docid::{DocId, DocIdCodec};
use url::Url;

fn codec() -> DocIdCodec {
    DocIdCodec::new(Url::parse("http://localhost:5678/doc/").unwrap(), false)
}

#[test]
fn test_simple_round_trip() {
    let codec = codec();
    let id = DocId::new("some/path/file.txt");
    let url = codec.encode(&id).unwrap();
    assert_eq!(url.as_str(), "http://localhost:5678/doc/some/path/file.txt");
    let decoded = codec
        .decode(url.as_str().strip_prefix("http://localhost:5678/doc/").unwrap())
        .unwrap();
    assert_eq!(decoded, id);
}

#[test]
fn test_awkward_characters_round_trip() {
    let codec = codec();
    for raw in [
        "has space",
        "question?mark",
        "percent%sign",
        "hash#tag",
        "café",
        "a\\b",
        "..",
        "a/../b",
        "./hidden",
    ] {
        let id = DocId::new(raw);
        let url = codec.encode(&id).unwrap();
        let decoded = codec.decode_url(&url).unwrap();
        assert_eq!(decoded, id, "round trip failed for '{raw}'");
    }
}

#[test]
fn test_decode_url_rejects_foreign_base() {
    let codec = codec();
    let foreign = Url::parse("http://evil.example/doc/x").unwrap();
    assert!(codec.decode_url(&foreign).is_err());
}

#[test]
fn test_is_local_checks_scheme_host_port() {
    let codec = codec();
    assert!(codec.is_local(&Url::parse("http://localhost:5678/doc/x").unwrap()));
    assert!(!codec.is_local(&Url::parse("https://localhost:5678/doc/x").unwrap()));
    assert!(!codec.is_local(&Url::parse("http://localhost:9999/doc/x").unwrap()));
    assert!(!codec.is_local(&Url::parse("http://other:5678/doc/x").unwrap()));
}

#[test]
fn test_doc_id_is_url_mode_passes_through() {
    let codec = DocIdCodec::new(
        Url::parse("http://localhost:5678/doc/").unwrap(),
        true,
    );
    let id = DocId::new("http://repo.example/content/42");
    let url = codec.encode(&id).unwrap();
    assert_eq!(url.as_str(), "http://repo.example/content/42");
}

#[test]
fn test_doc_id_equality_is_exact() {
    assert_eq!(DocId::new("a"), DocId::new("a"));
    assert_ne!(DocId::new("a"), DocId::new("A"));
    assert_ne!(DocId::new("a"), DocId::new("a "));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Any id the back-end can produce must survive the URL round trip.
        #[test]
        fn roundtrip_never_loses_an_id(raw in "[ -~]{1,64}") {
            let codec = codec();
            let id = DocId::new(raw);
            let url = codec.encode(&id).unwrap();
            prop_assert_eq!(codec.decode_url(&url).unwrap(), id);
        }
    }
}
