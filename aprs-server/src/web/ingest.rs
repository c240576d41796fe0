//! Feeder ingest API — feeders POST raw packet lines here.
//!
//! Each feeder identifies by name. Lines are parsed server-side; a line
//! the grammar rejects is counted and dropped without failing the batch.
//! A module-level roster tracks which feeders have reported recently.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use aprs_core::packet::AprsPacket;
use aprs_core::parser::AprsParser;

use crate::db::now_epoch;
use crate::web::AppState;

// ---------------------------------------------------------------------------
// Feeder roster (module-level, protected by RwLock)
// ---------------------------------------------------------------------------

static FEEDERS: LazyLock<RwLock<HashMap<String, FeederStatus>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Seconds since the last batch before a feeder counts as offline.
pub const ONLINE_WINDOW_SECS: f64 = 120.0;

#[derive(Clone, serde::Serialize)]
struct FeederStatus {
    name: String,
    packets_received: u64,
    accepted: u64,
    last_seen: f64,
}

/// Number of feeders heard from within the online window.
pub fn online_feeders() -> usize {
    let roster = FEEDERS.read().unwrap();
    let current = now_epoch();
    roster
        .values()
        .filter(|f| current - f.last_seen < ONLINE_WINDOW_SECS)
        .count()
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct IngestRequest {
    feeder: Option<String>,
    packets: Vec<String>,
}

// ---------------------------------------------------------------------------
// Auth helper
// ---------------------------------------------------------------------------

/// Validate bearer token if auth is configured. Returns Err response on failure.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    let expected = match &state.token {
        Some(t) => t,
        None => return Ok(()), // no token configured, accept everything
    };

    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if let Some(token) = auth_header.strip_prefix("Bearer ") {
        if token == expected {
            return Ok(());
        }
    }

    Err((
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "invalid or missing bearer token"})),
    ))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/packets — batch ingest from a feeder.
pub async fn api_ingest_packets(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IngestRequest>,
) -> (StatusCode, Json<Value>) {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }

    let feeder = body.feeder.unwrap_or_else(|| "anonymous".to_string());
    let parser = AprsParser::new();

    let mut parsed: Vec<AprsPacket> = Vec::with_capacity(body.packets.len());
    let mut parse_failures = 0usize;
    for raw in &body.packets {
        match parser.parse(raw) {
            Ok(packet) => parsed.push(packet),
            Err(err) => {
                parse_failures += 1;
                tracing::debug!(error = %err, raw = %raw, "dropping unparseable packet");
            }
        }
    }

    let accepted = {
        let mut db = state.db.lock().unwrap();
        match db.put_packets(&parsed, now_epoch()) {
            Ok(n) => n,
            Err(err) => {
                tracing::error!(error = %err, "packet batch failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": err.to_string()})),
                );
            }
        }
    };
    let deduplicated = parsed.len() - accepted;

    // Update feeder roster
    {
        let mut roster = FEEDERS.write().unwrap();
        let entry = roster
            .entry(feeder.clone())
            .or_insert_with(|| FeederStatus {
                name: feeder.clone(),
                packets_received: 0,
                accepted: 0,
                last_seen: 0.0,
            });
        entry.packets_received += body.packets.len() as u64;
        entry.accepted += accepted as u64;
        entry.last_seen = now_epoch();
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "accepted": accepted,
            "deduplicated": deduplicated,
            "parse_failures": parse_failures,
        })),
    )
}

/// GET /api/v1/feeders — every feeder that has reported, with status.
pub async fn api_feeders(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    let roster = FEEDERS.read().unwrap();
    let current = now_epoch();

    let feeders: Vec<Value> = roster
        .values()
        .map(|f| {
            let online = (current - f.last_seen) < ONLINE_WINDOW_SECS;
            json!({
                "name": f.name,
                "packets_received": f.packets_received,
                "accepted": f.accepted,
                "last_seen": f.last_seen,
                "online": online,
            })
        })
        .collect();

    Json(json!(feeders))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::db::Database;

    fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db").to_str().unwrap().to_string();
        let db = Database::open(&db_path).unwrap();
        (Arc::new(AppState::new(db, None)), dir)
    }

    fn test_state_with_auth(token: &str) -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db").to_str().unwrap().to_string();
        let db = Database::open(&db_path).unwrap();
        (
            Arc::new(AppState::new(db, Some(token.to_string()))),
            dir,
        )
    }

    async fn post_packets(app: axum::Router, body: &str, auth: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/v1/packets")
            .header("content-type", "application/json");
        if let Some(token) = auth {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let response = app
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_ingest_mixed_batch() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state.clone());

        let body = r#"{"feeder":"kp4-balcony","packets":[
            "N0CALL>APRS:>hello from the test",
            "this line has no header",
            "K2XYZ-7>APRS:=4048.68N/08000.15W>mobile"
        ]}"#;
        let (status, json) = post_packets(app, body, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["accepted"], 2);
        assert_eq!(json["deduplicated"], 0);
        assert_eq!(json["parse_failures"], 1);
        assert_eq!(state.db.lock().unwrap().count_packets(), 2);
    }

    #[tokio::test]
    async fn test_ingest_repost_deduplicates() {
        let (state, _dir) = test_state();
        let body = r#"{"feeder":"kp4-roof","packets":["N1DED>APRS:>repeated words"]}"#;

        let app = crate::web::build_router(state.clone());
        let (_, first) = post_packets(app, body, None).await;
        assert_eq!(first["accepted"], 1);

        let app = crate::web::build_router(state.clone());
        let (status, second) = post_packets(app, body, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["accepted"], 0);
        assert_eq!(second["deduplicated"], 1);
        assert_eq!(state.db.lock().unwrap().count_packets(), 1);
    }

    #[tokio::test]
    async fn test_ingest_all_unparseable_is_still_ok() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let body = r#"{"packets":["junk","more junk"]}"#;
        let (status, json) = post_packets(app, body, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["accepted"], 0);
        assert_eq!(json["parse_failures"], 2);
    }

    #[tokio::test]
    async fn test_api_feeders_lists_reporter() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state.clone());
        let body = r#"{"feeder":"feeder-roster-probe","packets":["N2RST>APRS:>roster entry"]}"#;
        post_packets(app, body, None).await;

        let app = crate::web::build_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/feeders")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();

        // Roster is shared process-wide, so look for our entry rather
        // than asserting on the whole list.
        let entry = json
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["name"] == "feeder-roster-probe")
            .expect("feeder listed");
        assert_eq!(entry["online"], true);
        assert_eq!(entry["packets_received"], 1);
    }

    #[tokio::test]
    async fn test_auth_reject_without_token() {
        let (state, _dir) = test_state_with_auth("secret-token-123");
        let app = crate::web::build_router(state);

        let body = r#"{"packets":["N0CALL>APRS:>hi"]}"#;
        let (status, _) = post_packets(app, body, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_reject_wrong_token() {
        let (state, _dir) = test_state_with_auth("secret-token-123");
        let app = crate::web::build_router(state);

        let body = r#"{"packets":["N0CALL>APRS:>hi"]}"#;
        let (status, _) = post_packets(app, body, Some("wrong-token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_accept_correct_token() {
        let (state, _dir) = test_state_with_auth("secret-token-123");
        let app = crate::web::build_router(state);

        let body = r#"{"packets":["N0CALL>APRS:>hi"]}"#;
        let (status, json) = post_packets(app, body, Some("secret-token-123")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["accepted"], 1);
    }

    #[tokio::test]
    async fn test_no_auth_accepts_all() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let body = r#"{"packets":["N0CALL>APRS:>open door"]}"#;
        let (status, _) = post_packets(app, body, None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
