//!
//! gatehouse record store
//! ----------------------
//! Durable key/value persistence for the access core. Records are grouped into
//! namespaces (`users`, `credentials`); each namespace is one pretty-printed
//! JSON file under the data root, mirrored by an in-memory map guarded by a
//! `parking_lot::RwLock`. Mutations rewrite the namespace file under the same
//! write lock that updates the map, so readers always observe a state that has
//! been (or is about to be) persisted.
//!
//! The store is deliberately small: the access core only needs get/put/delete
//! and a listing per namespace. Anything heavier belongs to a real database
//! behind the same trait surface.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Store {
    root: PathBuf,
    /// namespace -> key -> record
    namespaces: RwLock<HashMap<String, HashMap<String, JsonValue>>>,
}

impl Store {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create or access data root: {}", root.display()))?;
        Ok(Self { root, namespaces: RwLock::new(HashMap::new()) })
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.root.join(format!("{}.json", namespace))
    }

    /// Load a namespace from disk into the cache if it is not already present.
    /// Missing files are treated as empty namespaces.
    fn ensure_loaded(&self, namespace: &str) {
        {
            let r = self.namespaces.read();
            if r.contains_key(namespace) { return; }
        }
        let mut loaded: HashMap<String, JsonValue> = HashMap::new();
        if let Ok(bytes) = fs::read(self.namespace_path(namespace)) {
            if let Ok(map) = serde_json::from_slice::<HashMap<String, JsonValue>>(&bytes) {
                loaded = map;
            }
        }
        let mut w = self.namespaces.write();
        w.entry(namespace.to_string()).or_insert(loaded);
    }

    fn persist_locked(&self, namespace: &str, map: &HashMap<String, JsonValue>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(map)?;
        fs::write(self.namespace_path(namespace), bytes)
            .with_context(|| format!("Failed to persist namespace: {}", namespace))?;
        Ok(())
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<JsonValue> {
        self.ensure_loaded(namespace);
        let r = self.namespaces.read();
        r.get(namespace).and_then(|m| m.get(key)).cloned()
    }

    pub fn put(&self, namespace: &str, key: &str, value: JsonValue) -> Result<()> {
        self.ensure_loaded(namespace);
        let mut w = self.namespaces.write();
        let map = w.entry(namespace.to_string()).or_default();
        map.insert(key.to_string(), value);
        self.persist_locked(namespace, map)
    }

    /// Remove a record. Returns the previous value when one existed.
    pub fn delete(&self, namespace: &str, key: &str) -> Result<Option<JsonValue>> {
        self.ensure_loaded(namespace);
        let mut w = self.namespaces.write();
        let map = w.entry(namespace.to_string()).or_default();
        let prev = map.remove(key);
        if prev.is_some() {
            self.persist_locked(namespace, map)?;
        }
        Ok(prev)
    }

    /// Snapshot of all (key, record) pairs in a namespace.
    pub fn list(&self, namespace: &str) -> Vec<(String, JsonValue)> {
        self.ensure_loaded(namespace);
        let r = self.namespaces.read();
        r.get(namespace)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, namespace: &str) -> usize {
        self.ensure_loaded(namespace);
        self.namespaces.read().get(namespace).map(|m| m.len()).unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct SharedStore(pub Arc<Store>);

impl SharedStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self(Arc::new(Store::new(root)?)))
    }
}

impl std::ops::Deref for SharedStore {
    type Target = Store;
    fn deref(&self) -> &Store { &self.0 }
}
