//! REST API route handlers.
//!
//! Envelope and cell queries return the same snapshot commands the
//! viewer cache applies, so a client can feed responses straight into
//! its region cache. Queries that simply find nothing answer 200 with
//! empty results; error statuses are kept for bad input and store
//! failures.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use aprs_core::geocell::{point_code, CellBounds, Geocell};
use aprs_core::packet::{
    Ax25Address, CacheUpdateCommand, CacheUpdateCommandPosits, TimestampedPosit,
    TimestampedSerializedPacket,
};
use aprs_core::parser::AprsParser;

use crate::db::{now_epoch, PacketRow, PositRow, StoreError};
use crate::web::AppState;

// ---------------------------------------------------------------------------
// Query param types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct StationParams {
    limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct WithinParams {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
    kind: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn packet_to_wire(row: &PacketRow) -> TimestampedSerializedPacket {
    TimestampedSerializedPacket {
        millis_since_epoch: (row.received * 1000.0) as i64,
        packet: row.packet.clone(),
    }
}

/// Decoded posit for the map. A row whose stored packet no longer parses
/// is skipped rather than served broken.
fn posit_to_wire(row: &PositRow) -> Option<TimestampedPosit> {
    let packet = AprsParser::new().parse(&row.packet).ok()?;
    let symbol = packet.symbol().ok().flatten()?;
    Some(TimestampedPosit {
        millis_since_epoch: (row.received * 1000.0) as i64,
        station: row.address(),
        location: point_code(row.latitude, row.longitude),
        symbol,
    })
}

/// Envelope responses are snapshots: the flag tells the client to
/// evict any held station the fresh row set no longer mentions.
fn posits_command(epoch: i64, rows: &[PositRow]) -> CacheUpdateCommandPosits {
    CacheUpdateCommandPosits {
        evict_all_old_stations: true,
        epoch_seconds: epoch,
        new_or_updated: rows.iter().filter_map(posit_to_wire).collect(),
        stations_to_evict: Vec::new(),
    }
}

fn store_error_response(err: StoreError) -> (StatusCode, Json<Value>) {
    let code = match err {
        StoreError::SpatialBounds { .. } => StatusCode::BAD_REQUEST,
        StoreError::Sqlite(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(json!({"error": err.to_string()})))
}

// ---------------------------------------------------------------------------
// Station endpoints
// ---------------------------------------------------------------------------

/// GET /api/v1/station/:callsign — station details plus recent packets.
///
/// A callsign never heard answers 200 with a null station and an empty
/// packet list; errors are reserved for malformed input and store
/// failures.
pub async fn api_station(
    State(state): State<Arc<AppState>>,
    Path(callsign): Path<String>,
    Query(params): Query<StationParams>,
) -> impl IntoResponse {
    let station = match Ax25Address::from_str(&callsign.to_ascii_uppercase()) {
        Ok(s) => s,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    };
    let limit = params.limit.unwrap_or(100);

    let db = state.db.lock().unwrap();
    let row = db.get_station(&station);
    let packets: Vec<TimestampedSerializedPacket> = db
        .get_station_packets(&station, limit)
        .iter()
        .map(packet_to_wire)
        .collect();

    Json(json!({
        "station": row,
        "packets": packets,
    }))
    .into_response()
}

/// GET /api/v1/to/:callsign — packets addressed to a station, newest
/// first. An unknown destination answers with an empty list.
pub async fn api_to(
    State(state): State<Arc<AppState>>,
    Path(callsign): Path<String>,
    Query(params): Query<StationParams>,
) -> impl IntoResponse {
    let station = match Ax25Address::from_str(&callsign.to_ascii_uppercase()) {
        Ok(s) => s,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    };
    let limit = params.limit.unwrap_or(100);

    let db = state.db.lock().unwrap();
    let packets: Vec<TimestampedSerializedPacket> = db
        .get_packets_to(&station, limit)
        .iter()
        .map(packet_to_wire)
        .collect();

    Json(json!({ "packets": packets })).into_response()
}

// ---------------------------------------------------------------------------
// Envelope endpoints
// ---------------------------------------------------------------------------

/// GET /api/v1/within — snapshot command for an arbitrary envelope.
///
/// `kind=posits` (default) returns decoded positions; `kind=packets`
/// returns the raw packet lines of every station positioned inside.
/// An envelope with nothing fresh answers with an empty snapshot, not
/// an error.
pub async fn api_within(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WithinParams>,
) -> impl IntoResponse {
    let bounds = CellBounds {
        west: params.west,
        south: params.south,
        east: params.east,
        north: params.north,
    };

    let db = state.db.lock().unwrap();
    let now = now_epoch();
    match params.kind.as_deref().unwrap_or("posits") {
        "posits" => match db.get_posits_within(&bounds, now) {
            Ok(hit) => {
                let (epoch, rows) = hit.unwrap_or((now as i64, Vec::new()));
                Json(json!(posits_command(epoch, &rows))).into_response()
            }
            Err(err) => store_error_response(err).into_response(),
        },
        "packets" => match db.get_packets_within(&bounds, now) {
            Ok(hit) => {
                let (epoch, rows) = hit.unwrap_or((now as i64, Vec::new()));
                let command = CacheUpdateCommand {
                    evict_all_old_stations: true,
                    epoch_seconds: epoch,
                    new_or_updated: rows.iter().map(packet_to_wire).collect(),
                    stations_to_evict: Vec::new(),
                };
                Json(json!(command)).into_response()
            }
            Err(err) => store_error_response(err).into_response(),
        },
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown kind: {other}")})),
        )
            .into_response(),
    }
}

/// GET /api/v1/cell/:code — snapshot command for one geocell. An empty
/// cell answers with an empty snapshot, not an error.
pub async fn api_cell(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    let cell = match Geocell::from_code(&code) {
        Ok(c) => c,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    };

    let db = state.db.lock().unwrap();
    let now = now_epoch();
    match db.get_posits_within(&cell.bounds(), now) {
        Ok(hit) => {
            let (epoch, rows) = hit.unwrap_or((now as i64, Vec::new()));
            Json(json!(posits_command(epoch, &rows))).into_response()
        }
        Err(err) => store_error_response(err).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/status — health, uptime, store counters.
pub async fn api_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.db.lock().unwrap().stats();
    Json(json!({
        "status": "ok",
        "uptime_sec": now_epoch() - state.started,
        "stations": stats.stations,
        "packets": stats.packets,
        "posits": stats.posits,
        "feeders_online": crate::web::ingest::online_feeders(),
    }))
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

        let mut db = Database::open(&db_path).unwrap();
        let parser = AprsParser::new();
        let packets = vec![
            parser
                .parse("N0CALL-9>APRS,TCPIP*:=4048.68N/08000.15W>on my way")
                .unwrap(),
            parser.parse("K2XYZ>APRS:>status only, no position").unwrap(),
        ];
        db.put_packets(&packets, now_epoch()).unwrap();

        (Arc::new(AppState::new(db, None)), dir)
    }

    async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_api_station() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, json) = get(app, "/api/v1/station/N0CALL-9").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["station"]["call"], "N0CALL");
        assert_eq!(json["station"]["ssid"], "9");
        assert_eq!(json["station"]["packet_count"], 1);
        let packets = json["packets"].as_array().unwrap();
        assert_eq!(packets.len(), 1);
        assert!(packets[0]["packet"]
            .as_str()
            .unwrap()
            .contains("4048.68N"));
        assert!(packets[0]["millisSinceEpoch"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_api_station_lowercase_path() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, _) = get(app, "/api/v1/station/n0call-9").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_station_unknown_is_empty_not_error() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, json) = get(app, "/api/v1/station/W1AW").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["station"], Value::Null);
        assert_eq!(json["packets"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_api_station_invalid_callsign() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, _) = get(app, "/api/v1/station/N0CALL-").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_api_to() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, json) = get(app, "/api/v1/to/APRS").await;
        assert_eq!(status, StatusCode::OK);
        let packets = json["packets"].as_array().unwrap();
        assert_eq!(packets.len(), 2, "both seed packets are addressed to APRS");
        assert!(packets[0]["packet"].as_str().unwrap().contains(">APRS"));
    }

    #[tokio::test]
    async fn test_api_to_unknown_is_empty_not_error() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, json) = get(app, "/api/v1/to/W1AW").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["packets"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_api_within_posits() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, json) =
            get(app, "/api/v1/within?west=-81&south=40&east=-79&north=41").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["evictAllOldStations"], true,
            "envelope responses are snapshots"
        );
        let posits = json["newOrUpdated"].as_array().unwrap();
        assert_eq!(posits.len(), 1, "only the posit-bearing station");
        assert_eq!(posits[0]["station"]["call"], "N0CALL");
        assert!(posits[0]["location"].as_str().unwrap().starts_with("dpr0"));
    }

    #[tokio::test]
    async fn test_api_within_packets() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, json) = get(
            app,
            "/api/v1/within?west=-81&south=40&east=-79&north=41&kind=packets",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["evictAllOldStations"], true);
        let packets = json["newOrUpdated"].as_array().unwrap();
        assert_eq!(packets.len(), 1);
        assert!(packets[0]["packet"]
            .as_str()
            .unwrap()
            .starts_with("N0CALL-9>APRS"));
    }

    #[tokio::test]
    async fn test_api_within_nothing_fresh_is_empty_snapshot() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, json) = get(app, "/api/v1/within?west=0&south=0&east=1&north=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["evictAllOldStations"], true);
        assert_eq!(json["newOrUpdated"].as_array().unwrap().len(), 0);
        assert!(json["epochSeconds"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_api_within_invalid_envelope() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, _) =
            get(app, "/api/v1/within?west=10&south=0&east=-10&north=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_api_within_unknown_kind() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, _) = get(
            app,
            "/api/v1/within?west=-81&south=40&east=-79&north=41&kind=stations",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_api_cell() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        // dpr0 contains 40.81N 80.00W
        let (status, json) = get(app, "/api/v1/cell/dpr0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["newOrUpdated"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_api_cell_empty_is_empty_snapshot() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, json) = get(app, "/api/v1/cell/zzzz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["evictAllOldStations"], true);
        assert_eq!(json["newOrUpdated"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_api_cell_invalid_code() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        // 'a' is not in the cell alphabet
        let (status, _) = get(app, "/api/v1/cell/aaaa").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_api_status() {
        let (state, _dir) = test_state();
        let app = crate::web::build_router(state);

        let (status, json) = get(app, "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["stations"], 3, "two sources plus the APRS destination");
        assert_eq!(json["packets"], 2);
        assert_eq!(json["posits"], 1);
    }
}
