//! API Router and Application State
//!
//! Central routing configuration and shared state. The HTTP surface is
//! deliberately tiny: the WebSocket upgrade and a health probe. Everything
//! else happens on the event bus.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::gateway::{self, Registry};
use crate::playback::ErrorReports;
use crate::resolve::Resolver;
use crate::signaling::SignalingSets;
use crate::store::{ChatRepository, Kv, RoomRepository, SocketMap};
use crate::util::KeyedLocks;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// K/V adapter (Redis or in-process)
    pub kv: Kv,
    /// Room records
    pub rooms: RoomRepository,
    /// Chat history
    pub chat: ChatRepository,
    /// userId -> connection id identity map
    pub sockets: SocketMap,
    /// Source resolver for set-video
    pub resolver: Resolver,
    /// Live connections on this instance
    pub registry: Arc<Registry>,
    /// Per-room peer sets for voice and camera meshes
    pub signals: Arc<SignalingSets>,
    /// Advisory locks serializing room mutations
    pub room_locks: KeyedLocks,
    /// Advisory locks serializing reaction rewrites per (room, message)
    pub reaction_locks: KeyedLocks,
    /// Playback failure reporters per room, for the proxy fallback flip
    pub playback_reports: Arc<ErrorReports>,
}

impl AppState {
    /// Create new application state around a connected store.
    pub fn new(config: Config, kv: Kv) -> anyhow::Result<Self> {
        let resolver = Resolver::new(&config)?;
        Ok(Self {
            rooms: RoomRepository::new(kv.clone(), config.room_ttl),
            chat: ChatRepository::new(kv.clone(), config.chat_history, config.chat_ttl),
            sockets: SocketMap::new(kv.clone(), config.socket_ttl),
            resolver,
            registry: Arc::new(Registry::new()),
            signals: Arc::new(SignalingSets::new()),
            room_locks: KeyedLocks::new(),
            reaction_locks: KeyedLocks::new(),
            playback_reports: Arc::new(ErrorReports::new()),
            config: Arc::new(config),
            kv,
        })
    }

    /// State over the in-process store, for tests.
    #[must_use]
    pub fn for_test() -> Self {
        Self::new(Config::default_for_test(), Kv::memory()).expect("test state")
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    // In production, set CORS_ALLOWED_ORIGINS to specific origins
    let cors = if state.config.cors_allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any).allow_methods(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any)
    };

    Router::new()
        .route("/ws", get(gateway::ws_handler))
        .route("/health", get(health))
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Liveness and store round-trip probe.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.kv.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "connections": state.registry.len(),
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Store health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "store-unreachable" })),
            )
        }
    }
}
