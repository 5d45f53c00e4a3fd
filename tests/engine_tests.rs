//! Authorization engine tests: the resolution precedence ladder, trusted
//! origins, API key rotation against live sessions and endpoint gating.

use std::net::IpAddr;

use gatehouse::access::{
    AccessEngine, AuthMaterial, AuthSource, ConnectionOrigin, Identity, SessionContext,
};
use gatehouse::config::AccessConfig;
use gatehouse::error::AppError;
use gatehouse::storage::SharedStore;

fn engine_with(tweak: impl FnOnce(&mut AccessConfig)) -> AccessEngine {
    let tmp = tempfile::tempdir().unwrap();
    let store = SharedStore::new(tmp.keep()).unwrap();
    let mut cfg = AccessConfig::default();
    tweak(&mut cfg);
    AccessEngine::new(&cfg, store, None).unwrap()
}

fn trusted_engine() -> AccessEngine {
    engine_with(|cfg| cfg.trusted_ranges = vec!["10.0.0.0/8".to_string()])
}

fn origin(ip: &str) -> ConnectionOrigin {
    ConnectionOrigin::new(ip.parse::<IpAddr>().unwrap())
}

#[test]
fn trusted_origin_wins_without_credentials() {
    let engine = trusted_engine();
    let id = engine.resolve(&origin("10.1.2.3"), &AuthMaterial::default());
    assert_eq!(id, Identity::Trusted);
    // and from outside the range, nothing resolves
    let id = engine.resolve(&origin("203.0.113.5"), &AuthMaterial::default());
    assert_eq!(id, Identity::Anonymous);
}

#[test]
fn trusted_caller_manages_users_without_tokens() {
    let engine = trusted_engine();
    let caller = engine.resolve(&origin("10.1.2.3"), &AuthMaterial::default());

    let ticket = engine.create_user(&caller, "alice", "pw1").unwrap();
    assert_eq!(ticket.username, "alice");
    assert_eq!(ticket.source, AuthSource::Local);

    let users = engine.list_users(&caller).unwrap();
    assert_eq!(users.len(), 1);

    engine.delete_user(&caller, "alice").unwrap();
    assert!(engine.list_users(&caller).unwrap().is_empty());
}

#[test]
fn api_key_outranks_bearer_token() {
    let engine = trusted_engine();
    let trusted = Identity::Trusted;
    let ticket = engine.create_user(&trusted, "alice", "pw1").unwrap();
    let key = engine.api_keys.get();

    let material = AuthMaterial {
        api_key: Some(key),
        bearer: Some(ticket.token),
        query_token: None,
    };
    let id = engine.resolve(&origin("203.0.113.5"), &material);
    assert_eq!(id, Identity::ApiKey);
}

#[test]
fn bearer_token_resolves_user_tier() {
    let engine = trusted_engine();
    let ticket = engine.create_user(&Identity::Trusted, "alice", "pw1").unwrap();
    let material = AuthMaterial { bearer: Some(ticket.token), ..Default::default() };
    let id = engine.resolve(&origin("203.0.113.5"), &material);
    assert_eq!(id, Identity::User { username: "alice".into(), source: AuthSource::Local });
}

#[test]
fn stale_api_key_falls_through_to_anonymous() {
    let engine = trusted_engine();
    let old_key = engine.api_keys.get();
    engine.rotate_api_key(&Identity::Trusted).unwrap();

    let material = AuthMaterial { api_key: Some(old_key), ..Default::default() };
    let id = engine.resolve(&origin("203.0.113.5"), &material);
    assert_eq!(id, Identity::Anonymous);
}

#[test]
fn rotation_does_not_evict_live_sessions() {
    let engine = trusted_engine();
    let key = engine.api_keys.get();

    // A WebSocket connection authenticates once at connect time
    let material = AuthMaterial { api_key: Some(key.clone()), ..Default::default() };
    let id = engine.resolve(&origin("203.0.113.5"), &material);
    let mut session = SessionContext::new();
    assert!(session.authenticate(id));

    // Key rotates mid-connection
    let new_key = engine.rotate_api_key(&Identity::Trusted).unwrap();
    assert_ne!(key, new_key);

    // New requests with the old key fail...
    let id = engine.resolve(&origin("203.0.113.5"), &material);
    assert_eq!(id, Identity::Anonymous);

    // ...but the session's identity still governs its frames
    assert_eq!(session.identity(), Identity::ApiKey);
    assert!(engine.list_users(&session.identity()).is_ok());
}

#[test]
fn oneshot_token_flows_through_the_ladder_once() {
    let engine = trusted_engine();
    let caller = Identity::User { username: "alice".into(), source: AuthSource::Local };
    engine.create_user(&Identity::Trusted, "alice", "pw1").unwrap();

    let token = engine.issue_oneshot(&caller).unwrap();
    let material = AuthMaterial { query_token: Some(token.clone()), ..Default::default() };

    let id = engine.resolve(&origin("203.0.113.5"), &material);
    assert_eq!(id, caller);

    // Second presentation of the same token resolves nothing
    let id = engine.resolve(&origin("203.0.113.5"), &material);
    assert_eq!(id, Identity::Anonymous);
}

#[test]
fn anonymous_callers_are_gated() {
    let engine = trusted_engine();
    let anon = Identity::Anonymous;
    assert!(matches!(engine.list_users(&anon).unwrap_err(), AppError::InvalidCredential { .. }));
    assert!(matches!(engine.create_user(&anon, "x", "y").unwrap_err(), AppError::InvalidCredential { .. }));
    assert!(matches!(engine.issue_oneshot(&anon).unwrap_err(), AppError::InvalidCredential { .. }));
    assert!(matches!(engine.api_key(&anon).unwrap_err(), AppError::InvalidCredential { .. }));
    assert!(matches!(engine.current_user(&anon).unwrap_err(), AppError::InvalidCredential { .. }));
}

#[test]
fn info_probe_is_public_and_reports_trust() {
    let engine = engine_with(|cfg| {
        cfg.trusted_ranges = vec!["10.0.0.0/8".to_string()];
        cfg.force_logins = true;
    });
    let inside = engine.info(&origin("10.0.0.9"));
    assert_eq!(inside["trusted"], true);
    assert_eq!(inside["default_source"], "local");
    assert_eq!(inside["available_sources"], serde_json::json!(["local"]));
    // No users yet, so a login cannot be demanded
    assert_eq!(inside["login_required"], false);

    engine.create_user(&Identity::Trusted, "alice", "pw1").unwrap();
    let outside = engine.info(&origin("203.0.113.5"));
    assert_eq!(outside["trusted"], false);
    assert_eq!(outside["login_required"], true);
}

#[test]
fn delete_requires_another_identity() {
    let engine = trusted_engine();
    engine.create_user(&Identity::Trusted, "alice", "pw1").unwrap();
    engine.create_user(&Identity::Trusted, "bob", "pw2").unwrap();

    let alice = Identity::User { username: "alice".into(), source: AuthSource::Local };
    let err = engine.delete_user(&alice, "alice").unwrap_err();
    assert!(matches!(err, AppError::UserInput { .. }));

    // Another user may delete alice; a trusted caller may delete anyone
    engine.delete_user(&Identity::User { username: "bob".into(), source: AuthSource::Local }, "alice").unwrap();
    engine.delete_user(&Identity::Trusted, "bob").unwrap();
}

#[test]
fn current_user_reports_synthetic_names_for_credential_tiers() {
    let engine = trusted_engine();
    let trusted = engine.current_user(&Identity::Trusted).unwrap();
    assert_eq!(trusted["username"], "_trusted_user_");
    assert_eq!(trusted["source"], "trusted");
    assert!(trusted["created_on"].is_null());

    let api = engine.current_user(&Identity::ApiKey).unwrap();
    assert_eq!(api["username"], "_api_key_user_");
}
