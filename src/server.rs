//!
//! gatehouse HTTP/WS server
//! ------------------------
//! This module defines the Axum-based HTTP API and WebSocket interface for the
//! access core.
//!
//! Responsibilities:
//! - Extracting presented credentials (bearer token, API key, query token)
//!   and the connection origin for every request.
//! - Mounting the `/access/*` endpoints backed by the authorization engine.
//! - The `/websocket` endpoint speaking the mirrored `access.*` JSON-RPC
//!   method namespace, with one SessionContext per connection.
//! - Background sweeping of the one-shot token registry.
//!
//! Public endpoints are login, refresh_jwt and info; everything else runs
//! through the engine's identity resolution and authentication gate.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::access::{
    AccessEngine, AuthMaterial, ConnectionOrigin, DirectoryClient, Identity, LoginRequest,
    SessionContext,
};
use crate::config::{AccessConfig, ServerConfig};
use crate::error::AppError;
use crate::storage::SharedStore;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AccessEngine>,
}

fn log_startup(server: &ServerConfig, access: &AccessConfig) {
    info!(
        target: "startup",
        "gatehouse starting. http_port={}, data_root={:?}, default_source={}, trusted_ranges={:?}, trusted_domains={:?}, force_logins={}, directory={}",
        server.http_port,
        server.data_root,
        access.default_source,
        access.trusted_ranges,
        access.trusted_domains,
        access.force_logins,
        access.directory.is_some(),
    );
}

/// Start the HTTP/WebSocket server with explicit configuration. The optional
/// directory client is the collaborator behind the `directory` auth source.
pub async fn run_with_config(
    server: ServerConfig,
    access: AccessConfig,
    directory: Option<Arc<dyn DirectoryClient>>,
) -> anyhow::Result<()> {
    log_startup(&server, &access);

    let store = SharedStore::new(&server.data_root)?;
    let engine = Arc::new(AccessEngine::new(&access, store, directory)?);

    // Start background oneshot-token sweeper
    {
        let engine_for_sweep = engine.clone();
        tokio::spawn(async move {
            use std::time::Duration;
            loop {
                let removed = engine_for_sweep.oneshot.sweep();
                if removed > 0 { debug!(removed = removed, "oneshot_sweep"); }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
    }

    let app = router(AppState { engine });

    let addr: SocketAddr = format!("0.0.0.0:{}", server.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

// Backward-compatible entry that uses env-derived defaults
pub async fn run() -> anyhow::Result<()> {
    run_with_config(ServerConfig::from_env(), AccessConfig::from_env(), None).await
}

/// Mount all HTTP and WebSocket routes onto the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "gatehouse ok" }))
        .route("/access/login", post(login))
        .route("/access/logout", post(logout))
        .route("/access/user", get(get_user).post(post_user).delete(delete_user))
        .route("/access/users/list", get(list_users))
        .route("/access/user/password", post(reset_password))
        .route("/access/refresh_jwt", post(refresh_jwt))
        .route("/access/oneshot_token", get(oneshot_token))
        .route("/access/info", get(info_probe))
        .route("/access/api_key", get(get_api_key).post(post_api_key))
        .route("/websocket", get(ws_handler))
        .with_state(state)
}

fn origin_from(addr: SocketAddr) -> ConnectionOrigin {
    // The transport only knows the peer address; a reverse-resolved hostname
    // would be attached here when a fronting proxy supplies one.
    ConnectionOrigin::new(addr.ip())
}

fn parse_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let rest = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let rest = rest.trim();
    if rest.is_empty() { None } else { Some(rest.to_string()) }
}

fn auth_material(headers: &HeaderMap, query: &HashMap<String, String>) -> AuthMaterial {
    AuthMaterial {
        api_key: headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        bearer: parse_bearer(headers),
        query_token: query.get("token").cloned(),
    }
}

fn error_response(e: &AppError) -> (StatusCode, Json<Value>) {
    let (code, message) = e.external_fields();
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"status": "error", "code": code, "message": message})))
}

#[derive(Debug, Deserialize)]
struct CreateUserPayload { username: String, password: String }

#[derive(Debug, Deserialize)]
struct DeleteUserPayload { username: String }

#[derive(Debug, Deserialize)]
struct ResetPasswordPayload { password: String, new_password: String }

#[derive(Debug, Deserialize)]
struct RefreshPayload { refresh_token: String }

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> impl IntoResponse {
    match state.engine.login(&payload).await {
        Ok(ticket) => (StatusCode::OK, Json(json!({
            "username": ticket.username,
            "token": ticket.token,
            "refresh_token": ticket.refresh_token,
            "action": "user_logged_in",
            "source": ticket.source.as_str(),
        }))),
        Err(e) => error_response(&e),
    }
}

async fn logout(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let identity = state.engine.resolve(&origin_from(addr), &auth_material(&headers, &query));
    match state.engine.logout(&identity) {
        Ok(username) => (StatusCode::OK, Json(json!({"username": username, "action": "user_logged_out"}))),
        Err(e) => error_response(&e),
    }
}

async fn get_user(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let identity = state.engine.resolve(&origin_from(addr), &auth_material(&headers, &query));
    match state.engine.current_user(&identity) {
        Ok(user) => (StatusCode::OK, Json(user)),
        Err(e) => error_response(&e),
    }
}

async fn post_user(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(payload): Json<CreateUserPayload>,
) -> impl IntoResponse {
    let identity = state.engine.resolve(&origin_from(addr), &auth_material(&headers, &query));
    match state.engine.create_user(&identity, &payload.username, &payload.password) {
        Ok(ticket) => (StatusCode::OK, Json(json!({
            "username": ticket.username,
            "token": ticket.token,
            "refresh_token": ticket.refresh_token,
            "action": "user_created",
            "source": ticket.source.as_str(),
        }))),
        Err(e) => error_response(&e),
    }
}

async fn delete_user(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(payload): Json<DeleteUserPayload>,
) -> impl IntoResponse {
    let identity = state.engine.resolve(&origin_from(addr), &auth_material(&headers, &query));
    match state.engine.delete_user(&identity, &payload.username) {
        Ok(rec) => (StatusCode::OK, Json(json!({"username": rec.username, "action": "user_deleted"}))),
        Err(e) => error_response(&e),
    }
}

async fn list_users(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let identity = state.engine.resolve(&origin_from(addr), &auth_material(&headers, &query));
    match state.engine.list_users(&identity) {
        Ok(users) => {
            let users: Vec<Value> = users.iter().map(|u| u.public_info()).collect();
            (StatusCode::OK, Json(json!({"users": users})))
        }
        Err(e) => error_response(&e),
    }
}

async fn reset_password(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(payload): Json<ResetPasswordPayload>,
) -> impl IntoResponse {
    let identity = state.engine.resolve(&origin_from(addr), &auth_material(&headers, &query));
    match state.engine.reset_password(&identity, &payload.password, &payload.new_password) {
        Ok(ticket) => (StatusCode::OK, Json(json!({"username": ticket.username, "action": "user_password_reset"}))),
        Err(e) => error_response(&e),
    }
}

async fn refresh_jwt(
    State(state): State<AppState>,
    Json(payload): Json<RefreshPayload>,
) -> impl IntoResponse {
    match state.engine.refresh(&payload.refresh_token) {
        Ok(ticket) => (StatusCode::OK, Json(json!({
            "username": ticket.username,
            "token": ticket.token,
            "action": "user_jwt_refresh",
            "source": ticket.source.as_str(),
        }))),
        Err(e) => error_response(&e),
    }
}

async fn oneshot_token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let identity = state.engine.resolve(&origin_from(addr), &auth_material(&headers, &query));
    match state.engine.issue_oneshot(&identity) {
        Ok(token) => (StatusCode::OK, token).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

async fn info_probe(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    (StatusCode::OK, Json(state.engine.info(&origin_from(addr))))
}

async fn get_api_key(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let identity = state.engine.resolve(&origin_from(addr), &auth_material(&headers, &query));
    match state.engine.api_key(&identity) {
        Ok(key) => (StatusCode::OK, key).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

async fn post_api_key(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let identity = state.engine.resolve(&origin_from(addr), &auth_material(&headers, &query));
    match state.engine.rotate_api_key(&identity) {
        Ok(key) => (StatusCode::OK, key).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

// ----- WebSocket: the mirrored access.* JSON-RPC namespace -----

async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let origin = origin_from(addr);
    // Steps 1-4 of the resolution ladder run once, at connect time, against
    // the upgrade request. The result seeds this connection's session.
    let identity = state.engine.resolve(&origin, &auth_material(&headers, &query));
    ws.on_upgrade(move |socket| handle_socket(state, origin, identity, socket))
}

async fn handle_socket(state: AppState, origin: ConnectionOrigin, identity: Identity, mut socket: WebSocket) {
    let mut session = SessionContext::new();
    if identity.is_authenticated() {
        session.authenticate(identity);
    }
    while let Some(Ok(msg)) = socket.next().await {
        match msg {
            Message::Text(text) => {
                let response = dispatch_rpc(&state, &origin, &mut session, text.as_str()).await;
                if socket.send(Message::Text(response.to_string().into())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    session.close();
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[allow(dead_code)]
    #[serde(default)]
    jsonrpc: Option<String>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

fn rpc_result(id: Option<Value>, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "result": result, "id": id})
}

fn rpc_error(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "error": {"code": code, "message": message}, "id": id})
}

fn rpc_app_error(id: Option<Value>, e: &AppError) -> Value {
    let (code, message) = e.jsonrpc_fields();
    rpc_error(id, code, &message)
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, ()> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|_| ())
}

/// Dispatch one JSON-RPC frame. Login/identify/logout mutate the session;
/// every other method acts under the session's current identity.
async fn dispatch_rpc(state: &AppState, origin: &ConnectionOrigin, session: &mut SessionContext, text: &str) -> Value {
    let req: RpcRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(_) => return rpc_error(None, -32700, "parse error"),
    };
    let id = req.id.clone();
    let engine = &state.engine;
    let identity = session.identity();
    match req.method.as_str() {
        "access.login" => {
            let Ok(payload) = parse_params::<LoginRequest>(req.params) else {
                return rpc_error(id, -32602, "invalid params");
            };
            match engine.login(&payload).await {
                Ok(ticket) => {
                    session.authenticate(Identity::User { username: ticket.username.clone(), source: ticket.source });
                    rpc_result(id, json!({
                        "username": ticket.username,
                        "token": ticket.token,
                        "refresh_token": ticket.refresh_token,
                        "action": "user_logged_in",
                        "source": ticket.source.as_str(),
                    }))
                }
                Err(e) => rpc_app_error(id, &e),
            }
        }
        "access.identify" => {
            #[derive(Debug, Deserialize)]
            struct IdentifyPayload {
                #[serde(default)]
                access_token: Option<String>,
                #[serde(default)]
                api_key: Option<String>,
            }
            let Ok(payload) = parse_params::<IdentifyPayload>(req.params) else {
                return rpc_error(id, -32602, "invalid params");
            };
            let material = AuthMaterial { api_key: payload.api_key, bearer: payload.access_token, query_token: None };
            let resolved = engine.resolve(origin, &material);
            if resolved.is_authenticated() {
                let summary = serde_json::to_value(&resolved).unwrap_or(Value::Null);
                session.authenticate(resolved);
                rpc_result(id, summary)
            } else {
                rpc_app_error(id, &AppError::unauthorized())
            }
        }
        "access.logout" => match engine.logout(&identity) {
            Ok(username) => {
                session.logout();
                rpc_result(id, json!({"username": username, "action": "user_logged_out"}))
            }
            Err(e) => rpc_app_error(id, &e),
        },
        "access.get_user" => match engine.current_user(&identity) {
            Ok(user) => rpc_result(id, user),
            Err(e) => rpc_app_error(id, &e),
        },
        "access.post_user" => {
            let Ok(payload) = parse_params::<CreateUserPayload>(req.params) else {
                return rpc_error(id, -32602, "invalid params");
            };
            match engine.create_user(&identity, &payload.username, &payload.password) {
                Ok(ticket) => rpc_result(id, json!({
                    "username": ticket.username,
                    "token": ticket.token,
                    "refresh_token": ticket.refresh_token,
                    "action": "user_created",
                    "source": ticket.source.as_str(),
                })),
                Err(e) => rpc_app_error(id, &e),
            }
        }
        "access.delete_user" => {
            let Ok(payload) = parse_params::<DeleteUserPayload>(req.params) else {
                return rpc_error(id, -32602, "invalid params");
            };
            match engine.delete_user(&identity, &payload.username) {
                Ok(rec) => rpc_result(id, json!({"username": rec.username, "action": "user_deleted"})),
                Err(e) => rpc_app_error(id, &e),
            }
        }
        "access.users_list" => match engine.list_users(&identity) {
            Ok(users) => {
                let users: Vec<Value> = users.iter().map(|u| u.public_info()).collect();
                rpc_result(id, json!({"users": users}))
            }
            Err(e) => rpc_app_error(id, &e),
        },
        "access.user_password" => {
            let Ok(payload) = parse_params::<ResetPasswordPayload>(req.params) else {
                return rpc_error(id, -32602, "invalid params");
            };
            match engine.reset_password(&identity, &payload.password, &payload.new_password) {
                Ok(ticket) => rpc_result(id, json!({"username": ticket.username, "action": "user_password_reset"})),
                Err(e) => rpc_app_error(id, &e),
            }
        }
        "access.refresh_jwt" => {
            let Ok(payload) = parse_params::<RefreshPayload>(req.params) else {
                return rpc_error(id, -32602, "invalid params");
            };
            match engine.refresh(&payload.refresh_token) {
                Ok(ticket) => rpc_result(id, json!({
                    "username": ticket.username,
                    "token": ticket.token,
                    "action": "user_jwt_refresh",
                    "source": ticket.source.as_str(),
                })),
                Err(e) => rpc_app_error(id, &e),
            }
        }
        "access.oneshot_token" => match engine.issue_oneshot(&identity) {
            Ok(token) => rpc_result(id, json!(token)),
            Err(e) => rpc_app_error(id, &e),
        },
        "access.info" => rpc_result(id, engine.info(origin)),
        "access.get_api_key" => match engine.api_key(&identity) {
            Ok(key) => rpc_result(id, json!(key)),
            Err(e) => rpc_app_error(id, &e),
        },
        "access.post_api_key" => match engine.rotate_api_key(&identity) {
            Ok(key) => rpc_result(id, json!(key)),
            Err(e) => rpc_app_error(id, &e),
        },
        _ => rpc_error(id, -32601, "method not found"),
    }
}
