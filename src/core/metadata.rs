// src/core/metadata.rs

//! An ordered multimap of document metadata.
//!
//! Keys map to sets of values; iteration is stable, ascending by (key, value).
//! A key whose value set becomes empty is indistinguishable from an absent
//! key.

use std::collections::{BTreeMap, BTreeSet};

/// Multimap from metadata key to a set of values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a metadata set from (key, value) pairs.
    pub fn from_entries<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut m = Metadata::new();
        for (k, v) in pairs {
            m.add(k, v);
        }
        m
    }

    /// Adds one value to a key, creating the key as needed.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .entry(key.into())
            .or_default()
            .insert(value.into());
    }

    /// Replaces the full value set of a key. An empty set removes the key.
    pub fn set(&mut self, key: impl Into<String>, values: BTreeSet<String>) {
        let key = key.into();
        if values.is_empty() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, values);
        }
    }

    /// Replaces the whole contents with another metadata set.
    pub fn overwrite_with(&mut self, other: &Metadata) {
        self.entries = other.entries.clone();
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// The first value of a key in sort order, if any.
    pub fn first_value(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|set| set.iter().next())
            .map(String::as_str)
    }

    pub fn values_of(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct (key, value) entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    /// Iterates entries in ascending (key, value) order with no duplicates.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Metadata::from_entries(iter)
    }
}
