//! Unified application error model and mapping helpers.
//! This module provides a common error enum used across frontends (HTTP, WebSocket)
//! and the access engine, along with helper mappers to each protocol.
//!
//! Credential failures are deliberately coarse at the boundary: unknown user,
//! wrong password, bad signature and expired token all surface as a single
//! 401 so callers cannot probe for account existence. The finer-grained
//! variants (TokenExpired vs TokenMalformed) exist for server-side logging.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    InvalidCredential { code: String, message: String },
    UnknownSource { code: String, message: String },
    SourceUnavailable { code: String, message: String },
    TokenExpired { code: String, message: String },
    TokenMalformed { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::InvalidCredential { code, .. }
            | AppError::UnknownSource { code, .. }
            | AppError::SourceUnavailable { code, .. }
            | AppError::TokenExpired { code, .. }
            | AppError::TokenMalformed { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::InvalidCredential { message, .. }
            | AppError::UnknownSource { message, .. }
            | AppError::SourceUnavailable { message, .. }
            | AppError::TokenExpired { message, .. }
            | AppError::TokenMalformed { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn unknown_source(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::UnknownSource { code: code.into(), message: msg.into() } }
    pub fn source_unavailable(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::SourceUnavailable { code: code.into(), message: msg.into() } }
    pub fn token_expired(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::TokenExpired { code: code.into(), message: msg.into() } }
    pub fn token_malformed(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::TokenMalformed { code: code.into(), message: msg.into() } }
    pub fn internal(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// The uniform credential failure reported to callers. Log the real
    /// reason before constructing this; the client only sees 401.
    pub fn invalid_credential() -> Self {
        AppError::InvalidCredential { code: "invalid_credential".into(), message: "invalid username, password or token".into() }
    }

    /// Denial for anonymous callers on gated endpoints.
    pub fn unauthorized() -> Self {
        AppError::InvalidCredential { code: "unauthorized".into(), message: "authorization required".into() }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::InvalidCredential { .. } => 401,
            AppError::UnknownSource { .. } => 400,
            AppError::SourceUnavailable { .. } => 503,
            // Both expiry and malformation collapse to 401 externally.
            AppError::TokenExpired { .. } | AppError::TokenMalformed { .. } => 401,
            AppError::Internal { .. } => 500,
        }
    }

    /// Client-visible (code, message) for the HTTP surface. Credential
    /// failures collapse to one indistinct shape.
    pub fn external_fields(&self) -> (String, String) {
        match self {
            AppError::InvalidCredential { .. } | AppError::TokenExpired { .. } | AppError::TokenMalformed { .. } => {
                ("unauthorized".to_string(), "unauthorized".to_string())
            }
            _ => (self.code_str().to_string(), self.message().to_string()),
        }
    }

    /// JSON-RPC mapping for the WebSocket surface: (code, message).
    /// Codes mirror the HTTP statuses so clients see one taxonomy.
    pub fn jsonrpc_fields(&self) -> (i64, String) {
        let status = self.http_status() as i64;
        let msg = match self {
            // Never distinguish expired from malformed on the wire.
            AppError::TokenExpired { .. } | AppError::TokenMalformed { .. } | AppError::InvalidCredential { .. } => {
                "unauthorized".to_string()
            }
            _ => self.message().to_string(),
        };
        (status, msg)
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as Internal unless downcasted elsewhere
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}
