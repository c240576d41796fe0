//! Web server — axum REST API over the packet store.
//!
//! Shared state holds one SQLite connection behind a mutex plus the
//! optional ingest bearer token. Handlers lock, query, release; nothing
//! holds the lock across an await.

use std::sync::{Arc, Mutex};

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::db::{now_epoch, Database};

pub mod ingest;
pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub db: Mutex<Database>,
    pub token: Option<String>,
    pub started: f64,
}

impl AppState {
    pub fn new(db: Database, token: Option<String>) -> Self {
        AppState {
            db: Mutex::new(db),
            token,
            started: now_epoch(),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Ingest API (multi-feeder)
        .route(
            "/api/v1/packets",
            axum::routing::post(ingest::api_ingest_packets),
        )
        .route("/api/v1/feeders", axum::routing::get(ingest::api_feeders))
        // Read API
        .route(
            "/api/v1/station/:callsign",
            axum::routing::get(routes::api_station),
        )
        .route("/api/v1/to/:callsign", axum::routing::get(routes::api_to))
        .route("/api/v1/within", axum::routing::get(routes::api_within))
        .route("/api/v1/cell/:code", axum::routing::get(routes::api_cell))
        .route("/api/v1/status", axum::routing::get(routes::api_status))
        .with_state(state)
        .layer(cors)
}

/// Start the web server.
pub async fn serve(db: Database, bind: String, token: Option<String>) {
    let state = Arc::new(AppState::new(db, token));
    let app = build_router(state);

    tracing::info!("aprs-hub listening on http://{bind}");

    let listener = tokio::net::TcpListener::bind(&bind).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
