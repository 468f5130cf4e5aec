use feedgate::core::metadata::Metadata;
use std::collections::BTreeSet;

#[test]
fn test_iteration_sorted_by_key_then_value() {
    let mut m = Metadata::new();
    m.add("b", "2");
    m.add("a", "9");
    m.add("a", "1");
    m.add("b", "1");

    let entries: Vec<(&str, &str)> = m.iter().collect();
    assert_eq!(entries, vec![("a", "1"), ("a", "9"), ("b", "1"), ("b", "2")]);
}

#[test]
fn test_duplicate_values_collapse() {
    let mut m = Metadata::new();
    m.add("k", "v");
    m.add("k", "v");
    assert_eq!(m.len(), 1);
}

#[test]
fn test_empty_value_set_equals_absent_key() {
    let mut with_empty = Metadata::new();
    with_empty.set("k", BTreeSet::new());
    assert_eq!(with_empty, Metadata::new());
    assert!(with_empty.values_of("k").is_none());
}

#[test]
fn test_set_replaces_values() {
    let mut m = Metadata::new();
    m.add("k", "old");
    m.set("k", BTreeSet::from(["new".to_string()]));
    assert_eq!(m.first_value("k"), Some("new"));
    assert_eq!(m.len(), 1);
}

#[test]
fn test_first_value_is_smallest() {
    let mut m = Metadata::new();
    m.add("k", "zebra");
    m.add("k", "aardvark");
    assert_eq!(m.first_value("k"), Some("aardvark"));
}

#[test]
fn test_from_entries_and_equality() {
    let a = Metadata::from_entries([("x", "1"), ("y", "2")]);
    let b = Metadata::from_entries([("y", "2"), ("x", "1")]);
    assert_eq!(a, b);
}

#[test]
fn test_remove() {
    let mut m = Metadata::from_entries([("x", "1")]);
    assert!(m.remove("x"));
    assert!(!m.remove("x"));
    assert!(m.is_empty());
}
