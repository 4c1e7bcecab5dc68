use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        FromRequestParts, Query, State,
    },
    http::{request::Parts, Method},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use courier_shared::constants::MAX_FRAME_SIZE;
use courier_shared::{Message, MessageRequest, UserId};
use courier_store::{DatabaseInfo, MessageWithUsers, User};

use crate::auth::{Authenticator, Identity};
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionSettings};
use crate::delivery::DeliveryPipeline;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::store::MessageStore;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub pipeline: DeliveryPipeline,
    pub store: Arc<dyn MessageStore>,
    pub authenticator: Authenticator,
    pub settings: ConnectionSettings,
}

impl AppState {
    pub fn new(
        config: &ServerConfig,
        pipeline: DeliveryPipeline,
        authenticator: Authenticator,
    ) -> Self {
        Self {
            hub: pipeline.hub().clone(),
            store: pipeline.store().clone(),
            pipeline,
            authenticator,
            settings: config.connection_settings(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .route("/api/send_message", post(send_message))
        .route("/api/messages", get(message_history))
        .route("/api/online_users", get(online_users))
        .route("/api/db-info", get(db_info))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The caller of a REST route, authenticated from the bearer header.
pub struct AuthUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(AuthUser(state.authenticator.verify_headers(&parts.headers)?))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct WsParams {
    token: Option<String>,
}

#[derive(Deserialize)]
struct HistoryParams {
    with: Option<String>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Authenticate before upgrading, so a rejected client never reaches the
/// hub.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let identity = state.authenticator.verify_query(params.token.as_deref())?;

    Ok(ws
        .max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(state, identity, socket)))
}

async fn handle_socket(state: AppState, identity: Identity, socket: WebSocket) {
    let user_id = identity.user_id.clone();
    let (connection, handle) = Connection::new(user_id.clone(), &state.settings);
    info!(user = %user_id, connection = %connection.id(), "WebSocket connected");

    if let Err(e) = state.store.upsert_user(identity.directory_entry()).await {
        warn!(user = %user_id, error = %e, "Failed to refresh user directory");
    }

    state
        .hub
        .register(user_id, handle, identity.presence())
        .await;
    connection.run(socket, state.pipeline).await;
}

/// The body is decoded by hand so malformed requests get the same JSON
/// error body as every other failure.
async fn send_message(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    body: Bytes,
) -> Result<Json<Message>, ServerError> {
    let request = MessageRequest::from_json(&body)?;
    let message = state
        .pipeline
        .submit_from_api(&identity.user_id, request)
        .await?;
    Ok(Json(message))
}

async fn message_history(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<MessageWithUsers>>, ServerError> {
    let other = params
        .with
        .filter(|w| !w.is_empty())
        .map(UserId)
        .ok_or_else(|| ServerError::BadRequest("Missing 'with' parameter".to_string()))?;

    let messages = state
        .store
        .find_between_with_users(&identity.user_id, &other)
        .await?;
    Ok(Json(messages))
}

async fn online_users(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> Result<Json<Vec<User>>, ServerError> {
    Ok(Json(online_directory(&state.hub, state.store.as_ref()).await?))
}

/// Online users with their directory details. Users missing from the
/// directory, or every user when the lookup fails, are reported from their
/// presence record alone.
async fn online_directory(hub: &Hub, store: &dyn MessageStore) -> Result<Vec<User>, ServerError> {
    let online = hub.list_online().await?;
    let ids = online.iter().map(|u| u.id.clone()).collect();

    let mut directory = match store.find_users(ids).await {
        Ok(directory) => directory,
        Err(e) => {
            warn!(error = %e, "User directory lookup failed, using presence data");
            HashMap::new()
        }
    };

    Ok(online
        .into_iter()
        .map(|presence| {
            directory.remove(&presence.id).unwrap_or(User {
                id: presence.id,
                name: presence.name,
                email: String::new(),
                role: presence.role,
            })
        })
        .collect())
}

async fn db_info(State(state): State<AppState>) -> Result<Json<DatabaseInfo>, ServerError> {
    Ok(Json(state.store.info().await?))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(state, listener).await
}

/// Serve on an already-bound listener.
pub async fn serve_on(state: AppState, listener: TcpListener) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting HTTP API server");

    axum::serve(listener, app).await?;

    Ok(())
}
