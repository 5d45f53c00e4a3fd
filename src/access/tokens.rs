//! Signed access/refresh token issuance and verification.
//!
//! Tokens are HS256 JWTs over a single server-wide secret. The secret is
//! generated on first start and persisted alongside the API key so that
//! long-lived refresh tokens survive restarts. Claims carry fractional-second
//! `iat`/`exp` values; expiry is checked here rather than inside the JWT
//! library so TokenExpired and TokenMalformed remain distinguishable for
//! logging while both map to 401 at the boundary.

use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::JwtConfig;
use crate::error::{AppError, AppResult};
use crate::storage::SharedStore;

use super::identity::AuthSource;
use super::unix_now_secs;

const CREDENTIALS_NAMESPACE: &str = "credentials";
const SECRET_KEY: &str = "jwt_secret";

pub const TOKEN_TYPE_ACCESS: &str = "auth";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

/// Claims carried by both access and refresh tokens. The `jti` keeps two
/// tokens minted in the same clock tick distinct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub iat: f64,
    pub exp: f64,
    pub jti: String,
    pub username: String,
    pub source: AuthSource,
    pub token_type: String,
}

/// Access + refresh token pair returned by login-shaped operations.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
}

pub struct TokenService {
    issuer: String,
    access_ttl: f64,
    refresh_ttl: f64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    header: Header,
}

impl TokenService {
    /// Build the service, loading the persisted signing secret or minting one
    /// on first start.
    pub fn new(config: &JwtConfig, store: &SharedStore) -> AppResult<Self> {
        let secret = load_or_create_secret(store)?;
        Ok(Self {
            issuer: config.issuer.clone(),
            access_ttl: config.access_ttl_seconds as f64,
            refresh_ttl: config.refresh_ttl_seconds as f64,
            encoding_key: EncodingKey::from_secret(&secret),
            decoding_key: DecodingKey::from_secret(&secret),
            header: Header::new(Algorithm::HS256),
        })
    }

    /// Mint an access/refresh pair for a verified identity. Called on login,
    /// user creation and password reset.
    pub fn issue_pair(&self, username: &str, source: AuthSource) -> AppResult<TokenPair> {
        let token = self.issue(username, source, TOKEN_TYPE_ACCESS, self.access_ttl)?;
        let refresh_token = self.issue(username, source, TOKEN_TYPE_REFRESH, self.refresh_ttl)?;
        Ok(TokenPair { token, refresh_token })
    }

    fn issue(&self, username: &str, source: AuthSource, token_type: &str, ttl: f64) -> AppResult<String> {
        let now = unix_now_secs();
        let claims = Claims {
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl,
            jti: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            source,
            token_type: token_type.to_string(),
        };
        encode(&self.header, &claims, &self.encoding_key)
            .map_err(|e| AppError::internal("token_encode", e.to_string()))
    }

    /// Verify a refresh token and mint a fresh access token from it. The
    /// refresh token itself is not rotated.
    pub fn issue_access_from_refresh(&self, refresh_token: &str) -> AppResult<(String, Claims)> {
        let claims = self.decode_checked(refresh_token, TOKEN_TYPE_REFRESH)?;
        let access = self.issue(&claims.username, claims.source, TOKEN_TYPE_ACCESS, self.access_ttl)?;
        Ok((access, claims))
    }

    /// Verify an access token. Pure over the token and the static secret.
    pub fn verify_access(&self, token: &str) -> AppResult<Claims> {
        self.decode_checked(token, TOKEN_TYPE_ACCESS)
    }

    fn decode_checked(&self, token: &str, expected_type: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.clone()]);
        // Expiry is fractional-second and checked below; the library only
        // verifies signature, shape and issuer.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            debug!("token rejected: {e}");
            AppError::token_malformed("token_malformed", "signature or shape invalid")
        })?;
        let claims = data.claims;
        if claims.token_type != expected_type {
            debug!(token_type = %claims.token_type, expected = expected_type, "token type mismatch");
            return Err(AppError::token_malformed("token_malformed", "wrong token type"));
        }
        if unix_now_secs() >= claims.exp {
            debug!(username = %claims.username, "token past expiry");
            return Err(AppError::token_expired("token_expired", "token expired"));
        }
        Ok(claims)
    }
}

fn load_or_create_secret(store: &SharedStore) -> AppResult<Vec<u8>> {
    let b64 = base64::engine::general_purpose::STANDARD;
    if let Some(value) = store.get(CREDENTIALS_NAMESPACE, SECRET_KEY) {
        if let Some(encoded) = value.as_str() {
            if let Ok(bytes) = b64.decode(encoded) {
                return Ok(bytes);
            }
        }
        return Err(AppError::internal("secret_unreadable", "persisted signing secret is not valid base64"));
    }
    let mut secret = [0u8; 32];
    getrandom::getrandom(&mut secret)
        .map_err(|e| AppError::internal("rng_failure", e.to_string()))?;
    store
        .put(CREDENTIALS_NAMESPACE, SECRET_KEY, serde_json::json!(b64.encode(secret)))
        .map_err(AppError::from)?;
    Ok(secret.to_vec())
}
