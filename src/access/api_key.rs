//! The single rotatable shared-secret API key.
//!
//! Exactly one value is valid at any time. Regeneration swaps and persists
//! the new key under the write lock, taking effect for the very next check;
//! sessions already authenticated under the old key keep their identity.

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::storage::SharedStore;

const CREDENTIALS_NAMESPACE: &str = "credentials";
const API_KEY_KEY: &str = "api_key";

pub struct ApiKeyStore {
    store: SharedStore,
    current: RwLock<String>,
}

fn random_key() -> String {
    Uuid::new_v4().simple().to_string()
}

impl ApiKeyStore {
    /// Load the persisted key, or mint and persist one on first start.
    pub fn new(store: SharedStore) -> AppResult<Self> {
        let current = match store.get(CREDENTIALS_NAMESPACE, API_KEY_KEY).and_then(|v| v.as_str().map(String::from)) {
            Some(key) => key,
            None => {
                let key = random_key();
                store
                    .put(CREDENTIALS_NAMESPACE, API_KEY_KEY, serde_json::json!(key))
                    .map_err(AppError::from)?;
                key
            }
        };
        Ok(Self { store, current: RwLock::new(current) })
    }

    /// Snapshot of the current key.
    pub fn get(&self) -> String {
        self.current.read().clone()
    }

    /// Constant-shape comparison against the presented key.
    pub fn matches(&self, presented: &str) -> bool {
        !presented.is_empty() && *self.current.read() == presented
    }

    /// Replace and persist a new key. Not transactional with in-flight
    /// requests; one already past verification completes under the old key.
    pub fn regenerate(&self) -> AppResult<String> {
        let key = random_key();
        let mut w = self.current.write();
        self.store
            .put(CREDENTIALS_NAMESPACE, API_KEY_KEY, serde_json::json!(key))
            .map_err(AppError::from)?;
        *w = key.clone();
        Ok(key)
    }
}
