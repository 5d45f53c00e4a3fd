//! End-to-end access flows: login round trips, password reset, concurrent
//! user creation, directory-backed logins and the WebSocket-style session
//! lifecycle. These exercise positive and negative paths the way a client
//! would see them.

use std::sync::Arc;

use async_trait::async_trait;
use gatehouse::access::{
    AccessEngine, AuthMaterial, AuthSource, ConnectionOrigin, DirectoryClient, Identity,
    LoginRequest, SessionContext,
};
use gatehouse::config::{AccessConfig, DirectoryConfig};
use gatehouse::error::AppError;
use gatehouse::storage::SharedStore;

fn fresh_engine() -> AccessEngine {
    let tmp = tempfile::tempdir().unwrap();
    let store = SharedStore::new(tmp.keep()).unwrap();
    let mut cfg = AccessConfig::default();
    cfg.trusted_ranges = vec!["10.0.0.0/8".to_string()];
    AccessEngine::new(&cfg, store, None).unwrap()
}

fn login_req(username: &str, password: &str) -> LoginRequest {
    serde_json::from_value(serde_json::json!({"username": username, "password": password})).unwrap()
}

#[tokio::test]
async fn create_login_reset_relogin() {
    let engine = fresh_engine();

    // An elevated caller provisions the account
    engine.create_user(&Identity::Trusted, "alice", "pw1").unwrap();

    // Login with the fresh credentials
    let ticket = engine.login(&login_req("alice", "pw1")).await.unwrap();
    assert_eq!(ticket.username, "alice");
    assert_eq!(ticket.source, AuthSource::Local);
    let alice = Identity::User { username: "alice".into(), source: AuthSource::Local };

    // Reset the password as alice herself
    engine.reset_password(&alice, "pw1", "pw2").unwrap();

    // The old password no longer logs in
    let err = engine.login(&login_req("alice", "pw1")).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidCredential { .. }));

    // The new one does
    let ticket = engine.login(&login_req("alice", "pw2")).await.unwrap();
    assert_eq!(ticket.username, "alice");
}

#[tokio::test]
async fn login_mints_distinct_tokens_each_call() {
    let engine = fresh_engine();
    engine.create_user(&Identity::Trusted, "alice", "pw1").unwrap();
    let a = engine.login(&login_req("alice", "pw1")).await.unwrap();
    let b = engine.login(&login_req("alice", "pw1")).await.unwrap();
    assert_ne!(a.token, b.token);
    assert_ne!(a.refresh_token, b.refresh_token);

    // Both resolve to the same user through the engine
    let origin = ConnectionOrigin::new("203.0.113.5".parse().unwrap());
    for token in [a.token, b.token] {
        let id = engine.resolve(&origin, &AuthMaterial { bearer: Some(token), ..Default::default() });
        assert_eq!(id.username(), Some("alice"));
    }
}

#[tokio::test]
async fn refresh_flow_round_trips() {
    let engine = fresh_engine();
    engine.create_user(&Identity::Trusted, "alice", "pw1").unwrap();
    let ticket = engine.login(&login_req("alice", "pw1")).await.unwrap();

    let refreshed = engine.refresh(&ticket.refresh_token).unwrap();
    assert_eq!(refreshed.username, "alice");
    assert_ne!(refreshed.token, ticket.token);

    // A refresh with garbage is refused
    assert!(engine.refresh("garbage").is_err());
}

#[test]
fn concurrent_creation_yields_one_winner() {
    let engine = Arc::new(fresh_engine());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(std::thread::spawn(move || {
            engine.create_user(&Identity::Trusted, "alice", "pw1").is_ok()
        }));
    }
    let successes: usize = handles.into_iter().map(|h| if h.join().unwrap() { 1 } else { 0 }).sum();
    assert_eq!(successes, 1, "exactly one creation must win");
    assert_eq!(engine.list_users(&Identity::Trusted).unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_source_is_reported_as_such() {
    let engine = fresh_engine();
    let req: LoginRequest = serde_json::from_value(serde_json::json!({
        "username": "alice", "password": "pw1", "source": "kerberos"
    }))
    .unwrap();
    assert!(matches!(engine.login(&req).await.unwrap_err(), AppError::UnknownSource { .. }));
    // Directory is not configured on this engine either
    let req: LoginRequest = serde_json::from_value(serde_json::json!({
        "username": "alice", "password": "pw1", "source": "directory"
    }))
    .unwrap();
    assert!(matches!(engine.login(&req).await.unwrap_err(), AppError::UnknownSource { .. }));
}

struct OneAccountDirectory;

#[async_trait]
impl DirectoryClient for OneAccountDirectory {
    async fn bind(&self, username: &str, password: &str) -> anyhow::Result<bool> {
        Ok(username == "dirk" && password == "dir-pw")
    }
}

struct UnreachableDirectory;

#[async_trait]
impl DirectoryClient for UnreachableDirectory {
    async fn bind(&self, _username: &str, _password: &str) -> anyhow::Result<bool> {
        anyhow::bail!("network is down")
    }
}

fn directory_engine(client: Arc<dyn DirectoryClient>) -> AccessEngine {
    let tmp = tempfile::tempdir().unwrap();
    let store = SharedStore::new(tmp.keep()).unwrap();
    let mut cfg = AccessConfig::default();
    cfg.directory = Some(DirectoryConfig { url: "ldap://directory.test:389".into(), timeout_seconds: 1 });
    AccessEngine::new(&cfg, store, Some(client)).unwrap()
}

#[tokio::test]
async fn first_directory_login_creates_shadow_user() {
    let engine = directory_engine(Arc::new(OneAccountDirectory));
    let req: LoginRequest = serde_json::from_value(serde_json::json!({
        "username": "dirk", "password": "dir-pw", "source": "directory"
    }))
    .unwrap();

    let ticket = engine.login(&req).await.unwrap();
    assert_eq!(ticket.source, AuthSource::Directory);

    // The shadow record shows up in listings like any local user
    let users = engine.list_users(&Identity::Trusted).unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].username, "dirk");
    assert_eq!(users[0].source, AuthSource::Directory);

    // A second login reuses the record instead of conflicting
    engine.login(&req).await.unwrap();
    assert_eq!(engine.list_users(&Identity::Trusted).unwrap().len(), 1);
}

#[tokio::test]
async fn unreachable_directory_never_reads_as_bad_password() {
    let engine = directory_engine(Arc::new(UnreachableDirectory));
    let req: LoginRequest = serde_json::from_value(serde_json::json!({
        "username": "dirk", "password": "dir-pw", "source": "directory"
    }))
    .unwrap();
    let err = engine.login(&req).await.unwrap_err();
    assert!(matches!(err, AppError::SourceUnavailable { .. }));
    // And the directory is advertised as available regardless
    let info = engine.info(&ConnectionOrigin::new("203.0.113.5".parse().unwrap()));
    assert_eq!(info["available_sources"], serde_json::json!(["local", "directory"]));
}

#[tokio::test]
async fn websocket_style_session_lifecycle() {
    let engine = fresh_engine();
    engine.create_user(&Identity::Trusted, "alice", "pw1").unwrap();

    // Connect without credentials: session starts unauthenticated
    let mut session = SessionContext::new();
    assert!(matches!(
        engine.current_user(&session.identity()).unwrap_err(),
        AppError::InvalidCredential { .. }
    ));

    // Post-connect identify with an access token
    let ticket = engine.login(&login_req("alice", "pw1")).await.unwrap();
    let origin = ConnectionOrigin::new("203.0.113.5".parse().unwrap());
    let id = engine.resolve(&origin, &AuthMaterial { bearer: Some(ticket.token), ..Default::default() });
    assert!(session.authenticate(id));

    // Every later frame acts as alice with no re-authentication
    for _ in 0..3 {
        let user = engine.current_user(&session.identity()).unwrap();
        assert_eq!(user["username"], "alice");
    }

    // Logout drops back to unauthenticated on a live connection
    engine.logout(&session.identity()).unwrap();
    session.logout();
    assert!(engine.current_user(&session.identity()).is_err());

    // Disconnect is terminal
    session.close();
    assert!(!session.authenticate(Identity::Trusted));
    assert!(session.is_closed());
}

#[tokio::test]
async fn oneshot_token_authorizes_one_headerless_request() {
    let engine = fresh_engine();
    engine.create_user(&Identity::Trusted, "alice", "pw1").unwrap();
    let ticket = engine.login(&login_req("alice", "pw1")).await.unwrap();

    let origin = ConnectionOrigin::new("203.0.113.5".parse().unwrap());
    let alice = engine.resolve(&origin, &AuthMaterial { bearer: Some(ticket.token), ..Default::default() });
    let token = engine.issue_oneshot(&alice).unwrap();

    // The query-string request carries nothing but the token
    let material = AuthMaterial { query_token: Some(token), ..Default::default() };
    let id = engine.resolve(&origin, &material);
    assert_eq!(id.username(), Some("alice"));
    assert!(engine.current_user(&id).is_ok());

    // Replay is refused
    assert_eq!(engine.resolve(&origin, &material), Identity::Anonymous);
}
