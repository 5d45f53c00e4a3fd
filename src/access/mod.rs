//! Central authorization and session management for gatehouse.
//! Keep the public surface thin and split implementation across sub-modules.

mod api_key;
mod credentials;
mod engine;
mod identity;
mod oneshot;
mod provider;
mod session;
mod tokens;
mod trust;

pub use api_key::ApiKeyStore;
pub use credentials::{CredentialStore, UserRecord};
pub use engine::{AccessEngine, AuthMaterial, LoginRequest, LoginTicket, RefreshTicket};
pub use identity::{AuthSource, ConnectionOrigin, Identity, Tier};
pub use oneshot::{OneshotRegistry, ONESHOT_TTL};
pub use provider::{DirectoryClient, SourceRegistry};
pub use session::{SessionContext, SessionState};
pub use tokens::{Claims, TokenPair, TokenService, TOKEN_TYPE_ACCESS, TOKEN_TYPE_REFRESH};
pub use trust::{Trust, TrustEvaluator};

/// Wall-clock seconds since epoch, fractional. All token arithmetic uses
/// this one representation to avoid rounding drift across verification.
pub(crate) fn unix_now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
