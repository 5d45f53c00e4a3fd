//! Pluggable username/password verification backends.
//!
//! One `verify` capability dispatched by the `source` tag: `local` compares
//! against the credential store's Argon2 hashes, `directory` performs a bind
//! through an injected [`DirectoryClient`] under a bounded timeout. Directory
//! connectivity failures surface as SourceUnavailable and are never conflated
//! with InvalidCredential; the HTTP layer collapses both to 401 for clients
//! while the distinction stays in the server log.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

use super::credentials::CredentialStore;
use super::identity::{AuthSource, Identity};

/// Wire collaborator for the remote directory service. The crate never
/// speaks the directory protocol itself; it consumes this capability.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Attempt a bind with the supplied credentials. `Ok(false)` means the
    /// directory answered and rejected them; `Err` means it could not answer.
    async fn bind(&self, username: &str, password: &str) -> anyhow::Result<bool>;
}

struct DirectoryBackend {
    client: Arc<dyn DirectoryClient>,
    timeout: Duration,
}

pub struct SourceRegistry {
    default_source: String,
    directory: Option<DirectoryBackend>,
}

impl SourceRegistry {
    pub fn new(default_source: impl Into<String>) -> Self {
        Self { default_source: default_source.into(), directory: None }
    }

    pub fn with_directory(mut self, client: Arc<dyn DirectoryClient>, timeout: Duration) -> Self {
        self.directory = Some(DirectoryBackend { client, timeout });
        self
    }

    pub fn default_source(&self) -> &str { &self.default_source }

    pub fn available_sources(&self) -> Vec<&'static str> {
        let mut sources = vec![AuthSource::Local.as_str()];
        if self.directory.is_some() {
            sources.push(AuthSource::Directory.as_str());
        }
        sources
    }

    /// Map an optional requested source name to a configured backend.
    pub fn resolve_source(&self, requested: Option<&str>) -> AppResult<AuthSource> {
        let name = requested.unwrap_or(self.default_source.as_str());
        let source = AuthSource::parse(name)
            .ok_or_else(|| AppError::unknown_source("unknown_source", format!("unknown authentication source: {name}")))?;
        if source == AuthSource::Directory && self.directory.is_none() {
            return Err(AppError::unknown_source("unknown_source", "directory source is not configured".to_string()));
        }
        Ok(source)
    }

    /// Turn (username, password) into a verified identity or a failure.
    pub async fn verify(
        &self,
        source: AuthSource,
        username: &str,
        password: &str,
        users: &CredentialStore,
    ) -> AppResult<Identity> {
        match source {
            AuthSource::Local => {
                let rec = users.verify_local(username, password)?;
                Ok(Identity::User { username: rec.username, source: AuthSource::Local })
            }
            AuthSource::Directory => {
                let Some(backend) = self.directory.as_ref() else {
                    return Err(AppError::unknown_source("unknown_source", "directory source is not configured".to_string()));
                };
                let bound = tokio::time::timeout(backend.timeout, backend.client.bind(username, password)).await;
                match bound {
                    Err(_) => {
                        warn!(username, "directory bind timed out");
                        Err(AppError::source_unavailable("source_unavailable", "directory did not answer in time".to_string()))
                    }
                    Ok(Err(e)) => {
                        warn!(username, "directory unreachable: {e}");
                        Err(AppError::source_unavailable("source_unavailable", "directory unreachable".to_string()))
                    }
                    Ok(Ok(false)) => {
                        debug!(username, "directory rejected credentials");
                        Err(AppError::invalid_credential())
                    }
                    Ok(Ok(true)) => {
                        // First successful bind creates the shadow record so
                        // listing and lookup work uniformly across sources.
                        users.ensure_directory_user(username)?;
                        Ok(Identity::User { username: username.to_string(), source: AuthSource::Directory })
                    }
                }
            }
        }
    }
}
