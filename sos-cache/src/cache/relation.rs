//! Set-valued identifier relation

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Map from an identifier to a non-empty set of related identifiers
///
/// A key never maps to an empty set: removing the last value drops the key,
/// and adding an empty collection does not create one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Relation(BTreeMap<String, BTreeSet<String>>);

impl Relation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values for `key` (empty if absent)
    pub fn get(&self, key: &str) -> BTreeSet<String> {
        self.0.get(key).cloned().unwrap_or_default()
    }

    pub fn values_of(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0.get(key).map(|v| v.contains(value)).unwrap_or(false)
    }

    /// Returns true if the pair was not present before
    pub fn add(&mut self, key: &str, value: &str) -> bool {
        self.0
            .entry(key.to_string())
            .or_default()
            .insert(value.to_string())
    }

    pub fn add_all<I, S>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values = values.into_iter().peekable();
        if values.peek().is_none() {
            return;
        }
        let entry = self.0.entry(key.to_string()).or_default();
        for value in values {
            entry.insert(value.as_ref().to_string());
        }
    }

    /// Replace the values of `key`; an empty collection removes the key
    pub fn set<I, S>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values: BTreeSet<String> = values.into_iter().map(|v| v.as_ref().to_string()).collect();
        if values.is_empty() {
            self.0.remove(key);
        } else {
            self.0.insert(key.to_string(), values);
        }
    }

    /// Remove one pair; returns true if `key` lost its last value
    pub fn remove_value(&mut self, key: &str, value: &str) -> bool {
        let emptied = match self.0.get_mut(key) {
            Some(values) => {
                values.remove(value);
                values.is_empty()
            }
            None => false,
        };
        if emptied {
            self.0.remove(key);
        }
        emptied
    }

    pub fn remove_key(&mut self, key: &str) -> Option<BTreeSet<String>> {
        self.0.remove(key)
    }

    /// Remove `value` under every key; returns the keys left without values
    pub fn remove_value_everywhere(&mut self, value: &str) -> Vec<String> {
        let mut emptied = Vec::new();
        for (key, values) in self.0.iter_mut() {
            if values.remove(value) && values.is_empty() {
                emptied.push(key.clone());
            }
        }
        for key in &emptied {
            self.0.remove(key);
        }
        emptied
    }

    /// Keep only the keys matching `keep`
    pub fn retain_keys<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.0.retain(|k, _| keep(k));
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn key_set(&self) -> BTreeSet<String> {
        self.0.keys().cloned().collect()
    }

    /// Union of all value sets
    pub fn all_values(&self) -> BTreeSet<String> {
        self.0.values().flatten().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge every pair of `other` into this relation
    pub fn merge(&mut self, other: &Relation) {
        for (key, values) in other.iter() {
            self.add_all(key, values);
        }
    }
}
