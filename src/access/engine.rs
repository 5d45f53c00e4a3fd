//! The authorization engine: answers "is this request allowed, and as whom?".
//!
//! Identity resolution walks a strict precedence ladder, each step
//! short-circuiting on success:
//!
//! 1. trusted network origin
//! 2. matching API key
//! 3. valid bearer access token
//! 4. consumable one-shot query token
//! 5. anonymous
//!
//! A step that fails (expired token, stale key) falls through to the next;
//! only the endpoint gate turns an anonymous result into a 401. All the
//! `/access/*` operations live here so the HTTP handlers and the WebSocket
//! JSON-RPC methods dispatch into one implementation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::AccessConfig;
use crate::error::{AppError, AppResult};
use crate::storage::SharedStore;

use super::api_key::ApiKeyStore;
use super::credentials::{CredentialStore, UserRecord};
use super::identity::{AuthSource, ConnectionOrigin, Identity};
use super::oneshot::OneshotRegistry;
use super::provider::{DirectoryClient, SourceRegistry};
use super::tokens::TokenService;
use super::trust::{Trust, TrustEvaluator};

/// Credentials a request presented, as extracted by the transport.
#[derive(Debug, Clone, Default)]
pub struct AuthMaterial {
    /// `X-Api-Key` header.
    pub api_key: Option<String>,
    /// `Authorization: Bearer <token>` header.
    pub bearer: Option<String>,
    /// `?token=` query parameter (one-shot).
    pub query_token: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// Result of a login-shaped operation (login, user creation, password reset).
#[derive(Debug, Clone)]
pub struct LoginTicket {
    pub username: String,
    pub token: String,
    pub refresh_token: String,
    pub source: AuthSource,
}

/// Result of refreshing an access token. The refresh token is not rotated.
#[derive(Debug, Clone)]
pub struct RefreshTicket {
    pub username: String,
    pub token: String,
    pub source: AuthSource,
}

pub struct AccessEngine {
    pub users: CredentialStore,
    pub tokens: TokenService,
    pub oneshot: OneshotRegistry,
    pub api_keys: ApiKeyStore,
    pub trust: TrustEvaluator,
    sources: SourceRegistry,
    force_logins: bool,
}

impl AccessEngine {
    /// Wire the engine from configuration and the shared record store. The
    /// directory client is a collaborator; without one the `directory`
    /// source is simply not available.
    pub fn new(
        config: &AccessConfig,
        store: SharedStore,
        directory_client: Option<Arc<dyn DirectoryClient>>,
    ) -> anyhow::Result<Self> {
        let trust = TrustEvaluator::from_config(&config.trusted_ranges, &config.trusted_domains)?;
        let mut sources = SourceRegistry::new(config.default_source.clone());
        if let (Some(dir_cfg), Some(client)) = (config.directory.as_ref(), directory_client) {
            sources = sources.with_directory(client, Duration::from_secs(dir_cfg.timeout_seconds));
        }
        let tokens = TokenService::new(&config.jwt, &store)?;
        let api_keys = ApiKeyStore::new(store.clone())?;
        let users = CredentialStore::new(store);
        Ok(Self {
            users,
            tokens,
            oneshot: OneshotRegistry::default(),
            api_keys,
            trust,
            sources,
            force_logins: config.force_logins,
        })
    }

    /// Resolve the identity a request acts under. Never fails; the weakest
    /// outcome is `Anonymous`.
    pub fn resolve(&self, origin: &ConnectionOrigin, material: &AuthMaterial) -> Identity {
        if self.trust.classify(origin) == Trust::Trusted {
            return Identity::Trusted;
        }
        if let Some(key) = material.api_key.as_deref() {
            if self.api_keys.matches(key) {
                return Identity::ApiKey;
            }
            debug!(ip = %origin.ip, "presented API key does not match");
        }
        if let Some(bearer) = material.bearer.as_deref() {
            match self.tokens.verify_access(bearer) {
                Ok(claims) => {
                    return Identity::User { username: claims.username, source: claims.source };
                }
                Err(e) => debug!(ip = %origin.ip, "bearer token rejected: {e}"),
            }
        }
        if let Some(token) = material.query_token.as_deref() {
            if let Some(identity) = self.oneshot.consume(token) {
                return identity;
            }
            debug!(ip = %origin.ip, "oneshot token rejected");
        }
        Identity::Anonymous
    }

    /// Gate for every endpoint that is not explicitly public.
    pub fn require_authenticated(&self, identity: &Identity) -> AppResult<()> {
        if identity.is_authenticated() {
            Ok(())
        } else {
            Err(AppError::unauthorized())
        }
    }

    // ----- /access/* operations, shared by HTTP and WebSocket -----

    pub async fn login(&self, req: &LoginRequest) -> AppResult<LoginTicket> {
        let source = self.sources.resolve_source(req.source.as_deref())?;
        let identity = self.sources.verify(source, &req.username, &req.password, &self.users).await?;
        let Identity::User { username, source } = identity else {
            return Err(AppError::invalid_credential());
        };
        let pair = self.tokens.issue_pair(&username, source)?;
        info!(username = %username, source = source.as_str(), "user logged in");
        Ok(LoginTicket { username, token: pair.token, refresh_token: pair.refresh_token, source })
    }

    pub fn refresh(&self, refresh_token: &str) -> AppResult<RefreshTicket> {
        let (token, claims) = self.tokens.issue_access_from_refresh(refresh_token)?;
        debug!(username = %claims.username, "access token refreshed");
        Ok(RefreshTicket { username: claims.username, token, source: claims.source })
    }

    /// Create a local account and log it in. Requires a non-anonymous caller.
    pub fn create_user(&self, caller: &Identity, username: &str, password: &str) -> AppResult<LoginTicket> {
        self.require_authenticated(caller)?;
        let rec = self.users.create(username, password)?;
        let pair = self.tokens.issue_pair(&rec.username, rec.source)?;
        info!(username = %rec.username, by = caller.display_name(), "user created");
        Ok(LoginTicket { username: rec.username, token: pair.token, refresh_token: pair.refresh_token, source: rec.source })
    }

    /// Delete an account. The caller must not be deleting the identity it is
    /// acting under; another authorized identity has to issue the delete.
    pub fn delete_user(&self, caller: &Identity, username: &str) -> AppResult<UserRecord> {
        self.require_authenticated(caller)?;
        if caller.username() == Some(username) {
            return Err(AppError::user("cannot_delete_self", "the acting account cannot delete itself"));
        }
        let rec = self.users.delete(username)?;
        info!(username = %rec.username, by = caller.display_name(), "user deleted");
        Ok(rec)
    }

    pub fn list_users(&self, caller: &Identity) -> AppResult<Vec<UserRecord>> {
        self.require_authenticated(caller)?;
        Ok(self.users.list())
    }

    /// Reset the caller's own password. Only user-tier callers have one.
    pub fn reset_password(&self, caller: &Identity, old_password: &str, new_password: &str) -> AppResult<LoginTicket> {
        self.require_authenticated(caller)?;
        let Some(username) = caller.username() else {
            return Err(AppError::user("no_user", "caller has no user account"));
        };
        let rec = self.users.reset_password(username, old_password, new_password)?;
        let pair = self.tokens.issue_pair(&rec.username, rec.source)?;
        info!(username = %rec.username, "user password reset");
        Ok(LoginTicket { username: rec.username, token: pair.token, refresh_token: pair.refresh_token, source: rec.source })
    }

    /// The caller's own record; credential-less tiers get synthetic markers.
    pub fn current_user(&self, caller: &Identity) -> AppResult<serde_json::Value> {
        self.require_authenticated(caller)?;
        match caller {
            Identity::User { username, .. } => Ok(self.users.get(username)?.public_info()),
            Identity::Trusted => Ok(serde_json::json!({
                "username": caller.display_name(),
                "source": "trusted",
                "created_on": null,
            })),
            Identity::ApiKey => Ok(serde_json::json!({
                "username": caller.display_name(),
                "source": "api_key",
                "created_on": null,
            })),
            Identity::Anonymous => Err(AppError::unauthorized()),
        }
    }

    /// Mint a one-shot token bound to the caller's identity, for requests
    /// that cannot carry custom headers.
    pub fn issue_oneshot(&self, caller: &Identity) -> AppResult<String> {
        self.require_authenticated(caller)?;
        Ok(self.oneshot.issue(caller.clone()))
    }

    /// Public probe describing how to authenticate against this server.
    pub fn info(&self, origin: &ConnectionOrigin) -> serde_json::Value {
        serde_json::json!({
            "default_source": self.sources.default_source(),
            "available_sources": self.sources.available_sources(),
            "login_required": self.force_logins && !self.users.is_empty(),
            "trusted": self.trust.classify(origin) == Trust::Trusted,
        })
    }

    pub fn api_key(&self, caller: &Identity) -> AppResult<String> {
        self.require_authenticated(caller)?;
        Ok(self.api_keys.get())
    }

    pub fn rotate_api_key(&self, caller: &Identity) -> AppResult<String> {
        self.require_authenticated(caller)?;
        let key = self.api_keys.regenerate()?;
        info!(by = caller.display_name(), "API key rotated");
        Ok(key)
    }

    /// Validate a logout request; the transport clears its own session.
    pub fn logout(&self, caller: &Identity) -> AppResult<String> {
        self.require_authenticated(caller)?;
        info!(username = caller.display_name(), "user logged out");
        Ok(caller.display_name().to_string())
    }
}
