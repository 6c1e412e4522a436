//! String key/value protocol backed by an in-memory ordered map.

use super::{Protocol, Store};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The keys a store is responsible for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRegion {
    /// Every possible key.
    Universe,
    Keys(BTreeSet<String>),
}

impl KeyRegion {
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Keys(keys.into_iter().map(Into::into).collect())
    }

    /// The single-letter keys `a` to `z`.
    pub fn letters() -> Self {
        Self::from_keys(('a'..='z').map(String::from))
    }

    pub fn contains(&self, key: &str) -> bool {
        match self {
            Self::Universe => true,
            Self::Keys(keys) => keys.contains(key),
        }
    }
}

pub struct MemoryStore {
    region: KeyRegion,
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new(region: KeyRegion) -> Self {
        Self {
            region,
            values: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl Store for MemoryStore {
    type Region = KeyRegion;
    type Key = String;
    type Value = String;

    fn region(&self) -> &KeyRegion {
        &self.region
    }

    fn get(&self, key: &String) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn put(&mut self, key: String, value: String) {
        self.values.insert(key, value);
    }

    fn delete(&mut self, key: &String) {
        self.values.remove(key);
    }

    fn scan(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Sets (`Some`) or deletes (`None`) a batch of keys atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvWrite {
    pub values: BTreeMap<String, Option<String>>,
}

impl KvWrite {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::default().and_put(key, value)
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::default().and_delete(key)
    }

    pub fn and_put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), Some(value.into()));
        self
    }

    pub fn and_delete(mut self, key: impl Into<String>) -> Self {
        self.values.insert(key.into(), None);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvRead {
    Keys(BTreeSet<String>),
    /// Every key starting with the prefix. An empty prefix scans the whole store.
    Prefix(String),
}

impl KvRead {
    pub fn key(key: impl Into<String>) -> Self {
        Self::Keys(BTreeSet::from([key.into()]))
    }
}

/// Values found for a read. Absent keys are simply missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvReadResponse {
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyValueProtocol;

impl Protocol for KeyValueProtocol {
    type Store = MemoryStore;
    type Write = KvWrite;
    type Read = KvRead;
    type ReadResponse = KvReadResponse;

    fn apply(store: &mut MemoryStore, write: &KvWrite) {
        for (key, value) in &write.values {
            if !store.region.contains(key) {
                tracing::debug!("Ignoring write to key {:?} outside the store's region", key);
                continue;
            }
            match value {
                Some(value) => store.put(key.clone(), value.clone()),
                None => store.delete(key),
            }
        }
    }

    fn execute(store: &MemoryStore, read: &KvRead) -> KvReadResponse {
        let values = match read {
            KvRead::Keys(keys) => keys
                .iter()
                .filter_map(|key| store.get(key).map(|value| (key.clone(), value)))
                .collect(),
            KvRead::Prefix(prefix) => store
                .values
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(prefix.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        };
        KvReadResponse { values }
    }
}
