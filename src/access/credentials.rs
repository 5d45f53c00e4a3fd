//! Durable user credential records and Argon2 password verification.
//!
//! Local accounts carry an Argon2 PHC hash with a per-user random salt;
//! directory accounts are shadow records with no hash (their passwords are
//! verified by the remote directory). Plaintext passwords are never stored
//! or logged. Username uniqueness is serialized under the single write lock,
//! which also covers the persistence write.

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::storage::SharedStore;

use super::identity::AuthSource;
use super::unix_now_secs;

const USERS_NAMESPACE: &str = "users";

/// Usernames reserved for the credential-less tiers; never creatable.
const RESERVED_USERNAMES: &[&str] = &["_trusted_user_", "_api_key_user_", "_anonymous_"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// Argon2 PHC string. Absent for directory shadow records.
    #[serde(default)]
    pub password_hash: Option<String>,
    pub source: AuthSource,
    /// Seconds since epoch, fractional.
    pub created_on: f64,
}

impl UserRecord {
    /// The client-visible projection; the hash never leaves the store.
    pub fn public_info(&self) -> serde_json::Value {
        serde_json::json!({
            "username": self.username,
            "source": self.source.as_str(),
            "created_on": self.created_on,
        })
    }
}

fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| AppError::internal("rng_failure", e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::internal("salt_encode", e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::internal("hash_failure", e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

pub struct CredentialStore {
    store: SharedStore,
    users: RwLock<HashMap<String, UserRecord>>,
}

impl CredentialStore {
    /// Load all user records from the durable store into memory.
    pub fn new(store: SharedStore) -> Self {
        let mut users = HashMap::new();
        for (key, value) in store.list(USERS_NAMESPACE) {
            match serde_json::from_value::<UserRecord>(value) {
                Ok(rec) => { users.insert(key, rec); }
                Err(e) => debug!(username = %key, "Skipping unreadable user record: {e}"),
            }
        }
        Self { store, users: RwLock::new(users) }
    }

    pub fn is_empty(&self) -> bool { self.users.read().is_empty() }

    /// Create a local account. Conflicts if the username exists under any source.
    pub fn create(&self, username: &str, password: &str) -> AppResult<UserRecord> {
        if username.trim().is_empty() || username != username.trim() {
            return Err(AppError::user("invalid_username", "username must be non-empty without surrounding whitespace"));
        }
        if RESERVED_USERNAMES.contains(&username) {
            return Err(AppError::user("reserved_username", "username is reserved"));
        }
        if password.is_empty() {
            return Err(AppError::user("invalid_password", "password must not be empty"));
        }
        let mut w = self.users.write();
        if w.contains_key(username) {
            return Err(AppError::conflict("user_exists", "username already exists"));
        }
        let rec = UserRecord {
            username: username.to_string(),
            password_hash: Some(hash_password(password)?),
            source: AuthSource::Local,
            created_on: unix_now_secs(),
        };
        self.store
            .put(USERS_NAMESPACE, username, serde_json::to_value(&rec).unwrap_or_default())
            .map_err(AppError::from)?;
        w.insert(username.to_string(), rec.clone());
        Ok(rec)
    }

    pub fn get(&self, username: &str) -> AppResult<UserRecord> {
        self.users
            .read()
            .get(username)
            .cloned()
            .ok_or_else(|| AppError::not_found("user_not_found", "no such user"))
    }

    /// Snapshot of all users, ordered by username for stable listings.
    pub fn list(&self) -> Vec<UserRecord> {
        let mut all: Vec<UserRecord> = self.users.read().values().cloned().collect();
        all.sort_by(|a, b| a.username.cmp(&b.username));
        all
    }

    pub fn delete(&self, username: &str) -> AppResult<UserRecord> {
        let mut w = self.users.write();
        let Some(rec) = w.remove(username) else {
            return Err(AppError::not_found("user_not_found", "no such user"));
        };
        self.store.delete(USERS_NAMESPACE, username).map_err(AppError::from)?;
        Ok(rec)
    }

    /// Replace the password hash after verifying the old password. Directory
    /// accounts have no local hash and cannot be reset here.
    pub fn reset_password(&self, username: &str, old_password: &str, new_password: &str) -> AppResult<UserRecord> {
        if new_password.is_empty() {
            return Err(AppError::user("invalid_password", "password must not be empty"));
        }
        let mut w = self.users.write();
        let Some(rec) = w.get_mut(username) else {
            debug!(username, "password reset for unknown user");
            return Err(AppError::invalid_credential());
        };
        let Some(hash) = rec.password_hash.as_deref() else {
            debug!(username, "password reset attempted on directory account");
            return Err(AppError::invalid_credential());
        };
        if !verify_password(hash, old_password) {
            debug!(username, "password reset with mismatched old password");
            return Err(AppError::invalid_credential());
        }
        rec.password_hash = Some(hash_password(new_password)?);
        let updated = rec.clone();
        self.store
            .put(USERS_NAMESPACE, username, serde_json::to_value(&updated).unwrap_or_default())
            .map_err(AppError::from)?;
        Ok(updated)
    }

    /// Verify a username/password pair against local records. The caller sees
    /// one failure shape; the log distinguishes unknown user from mismatch.
    pub fn verify_local(&self, username: &str, password: &str) -> AppResult<UserRecord> {
        let r = self.users.read();
        let Some(rec) = r.get(username) else {
            debug!(username, "login for unknown user");
            return Err(AppError::invalid_credential());
        };
        let Some(hash) = rec.password_hash.as_deref() else {
            debug!(username, "local login against directory account");
            return Err(AppError::invalid_credential());
        };
        if !verify_password(hash, password) {
            debug!(username, "login with mismatched password");
            return Err(AppError::invalid_credential());
        }
        Ok(rec.clone())
    }

    /// Create the shadow record backing a directory identity on its first
    /// successful bind. An existing record under either source is reused.
    pub fn ensure_directory_user(&self, username: &str) -> AppResult<UserRecord> {
        let mut w = self.users.write();
        if let Some(existing) = w.get(username) {
            return Ok(existing.clone());
        }
        let rec = UserRecord {
            username: username.to_string(),
            password_hash: None,
            source: AuthSource::Directory,
            created_on: unix_now_secs(),
        };
        self.store
            .put(USERS_NAMESPACE, username, serde_json::to_value(&rec).unwrap_or_default())
            .map_err(AppError::from)?;
        w.insert(username.to_string(), rec.clone());
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_store() -> CredentialStore {
        let tmp = tempfile::tempdir().unwrap();
        // Leak the tempdir so the path stays valid for the store's lifetime.
        let path = tmp.keep();
        CredentialStore::new(SharedStore::new(path).unwrap())
    }

    #[test]
    fn create_then_verify() {
        let users = fresh_store();
        users.create("alice", "pw1").unwrap();
        assert!(users.verify_local("alice", "pw1").is_ok());
        assert!(users.verify_local("alice", "pw2").is_err());
        assert!(users.verify_local("bob", "pw1").is_err());
    }

    #[test]
    fn duplicate_username_conflicts() {
        let users = fresh_store();
        users.create("alice", "pw1").unwrap();
        let err = users.create("alice", "other").unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[test]
    fn reserved_usernames_rejected() {
        let users = fresh_store();
        assert!(users.create("_trusted_user_", "pw").is_err());
        assert!(users.create("", "pw").is_err());
        assert!(users.create(" alice", "pw").is_err());
    }

    #[test]
    fn reset_password_requires_old() {
        let users = fresh_store();
        users.create("alice", "pw1").unwrap();
        assert!(users.reset_password("alice", "wrong", "pw2").is_err());
        users.reset_password("alice", "pw1", "pw2").unwrap();
        assert!(users.verify_local("alice", "pw1").is_err());
        assert!(users.verify_local("alice", "pw2").is_ok());
    }

    #[test]
    fn directory_shadow_has_no_hash() {
        let users = fresh_store();
        let rec = users.ensure_directory_user("dirk").unwrap();
        assert_eq!(rec.source, AuthSource::Directory);
        assert!(rec.password_hash.is_none());
        // Local verification must not accept a directory account
        assert!(users.verify_local("dirk", "anything").is_err());
        // Password reset on a shadow record is refused
        assert!(users.reset_password("dirk", "x", "y").is_err());
    }
}
