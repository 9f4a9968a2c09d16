use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::conversations;
use parley_api::devices;
use parley_api::error::ApiError;
use parley_api::history;
use parley_api::middleware::{decode_token, require_auth};
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::push::PushClient;
use parley_gateway::registry::Registry;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    registry: Registry,
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let push_url = std::env::var("PARLEY_PUSH_URL").ok();

    // Init database
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let registry = Registry::new();
    let push = push_url.map(|url| {
        info!("Push notifier configured at {}", url);
        PushClient::new(url)
    });
    let dispatcher = Dispatcher::new(registry.clone(), db.clone(), push);
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    let state = ServerState {
        app: app_state.clone(),
        registry,
        dispatcher,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/conversations", post(conversations::create_conversation))
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/{conversation_id}/block",
            post(conversations::block_conversation),
        )
        .route(
            "/conversations/{conversation_id}/unblock",
            post(conversations::unblock_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(history::get_messages),
        )
        .route(
            "/conversations/{conversation_id}/read",
            post(history::mark_read),
        )
        .route("/devices", put(devices::register_device))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/conversations/{conversation_id}/ws", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct WsAuthQuery {
    /// Browser WebSocket clients cannot set headers, so the token may also
    /// arrive as a query parameter.
    token: Option<String>,
}

/// The Authorizing step of the connection lifecycle: the token must be valid,
/// the conversation must exist for the requesting participant, and it must
/// not be blocked. Any failure rejects the upgrade before a socket opens, so
/// no partial state is ever registered.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Path(conversation_id): Path<i64>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)
        .or(query.token.as_deref())
        .ok_or(ApiError::Unauthorized)?;
    let claims = decode_token(&state.jwt_secret, token)?;

    let conversation =
        conversations::authorize_live_channel(&state.app.db, conversation_id, claims.sub)?
            .into_model();
    let registry = state.registry.clone();
    let dispatcher = state.dispatcher.clone();
    let db = state.app.db.clone();

    Ok(ws
        .on_upgrade(move |socket| {
            connection::serve(
                socket,
                registry,
                dispatcher,
                db,
                conversation,
                claims.sub,
                claims.username,
            )
        })
        .into_response())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
