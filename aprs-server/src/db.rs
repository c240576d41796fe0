//! SQLite persistence — WAL mode, 3 tables, indexed queries.
//!
//! Schema: stations, packets, latest_posits. Packets keep the raw line
//! exactly as received, indexed by source and by destination;
//! latest_posits holds one decoded position per station so envelope
//! queries never reparse.
//!
//! Every time-dependent method takes the current time as an explicit
//! epoch-seconds parameter. Callers pass [`now_epoch`]; tests pass fixed
//! values, which is what makes the dedup and freshness windows testable.

use rusqlite::{params, Connection, Result as SqlResult};
use serde::Serialize;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use aprs_core::geocell::CellBounds;
use aprs_core::packet::{AprsPacket, Ax25Address};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stations (
    call TEXT NOT NULL,
    ssid TEXT NOT NULL DEFAULT '',
    first_heard REAL NOT NULL,
    last_heard REAL NOT NULL,
    packet_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (call, ssid)
);

CREATE TABLE IF NOT EXISTS packets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    call TEXT NOT NULL,
    ssid TEXT NOT NULL DEFAULT '',
    dest_call TEXT NOT NULL,
    dest_ssid TEXT NOT NULL DEFAULT '',
    received REAL NOT NULL,
    packet TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS latest_posits (
    call TEXT NOT NULL,
    ssid TEXT NOT NULL DEFAULT '',
    received REAL NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    packet TEXT NOT NULL,
    PRIMARY KEY (call, ssid)
);

CREATE INDEX IF NOT EXISTS idx_packets_station ON packets(call, ssid, received);
CREATE INDEX IF NOT EXISTS idx_packets_dest ON packets(dest_call, dest_ssid, received);
CREATE INDEX IF NOT EXISTS idx_packets_received ON packets(received);
CREATE INDEX IF NOT EXISTS idx_posits_received ON latest_posits(received);
CREATE INDEX IF NOT EXISTS idx_posits_lat_lon ON latest_posits(latitude, longitude);
"#;

/// Seconds within which an identical packet from the same source is the
/// same transmission heard twice, not new data.
pub const DEDUP_WINDOW_SECS: f64 = 30.0;

/// Seconds a posit stays fresh enough to serve from envelope queries.
pub const FRESH_WINDOW_SECS: f64 = 3600.0;

/// Seconds packets and posits are retained before cleanup removes them.
pub const RETENTION_SECS: f64 = 24.0 * 3600.0;

/// Hard cap on per-station packet queries.
pub const MAX_QUERY_LIMIT: i64 = 500;

/// Current wall clock as epoch seconds.
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Errors from the packet store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid envelope: west {west} south {south} east {east} north {north}")]
    SpatialBounds {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    },
}

/// SQLite database for APRS packet storage.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &str) -> SqlResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Database { conn })
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        Self::open(":memory:")
    }

    // -----------------------------------------------------------------------
    // Ingest
    // -----------------------------------------------------------------------

    /// Store a batch of parsed packets heard at `received`.
    ///
    /// One transaction for the whole batch: station upserts for both
    /// ends of the header, packet rows, and latest-posit upserts land
    /// together or not at all. Destinations get identity rows only;
    /// heard stats count actual transmissions. A packet whose source
    /// and exact text match a row from the last [`DEDUP_WINDOW_SECS`]
    /// is dropped silently. Returns rows inserted.
    pub fn put_packets(
        &mut self,
        packets: &[AprsPacket],
        received: f64,
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0usize;

        for packet in packets {
            let call = packet.source.call.as_str();
            let ssid = packet.source.ssid.as_deref().unwrap_or("");
            let dest_call = packet.dest.call.as_str();
            let dest_ssid = packet.dest.ssid.as_deref().unwrap_or("");
            let text = packet.to_string();

            let duplicate: bool = tx.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM packets
                     WHERE call = ?1 AND ssid = ?2 AND packet = ?3 AND received > ?4
                 )",
                params![call, ssid, text, received - DEDUP_WINDOW_SECS],
                |r| r.get(0),
            )?;
            if duplicate {
                continue;
            }

            tx.execute(
                "INSERT INTO stations (call, ssid, first_heard, last_heard, packet_count)
                 VALUES (?1, ?2, ?3, ?3, 1)
                 ON CONFLICT(call, ssid) DO UPDATE SET
                     last_heard = excluded.last_heard,
                     packet_count = packet_count + 1",
                params![call, ssid, received],
            )?;
            // Being addressed creates an identity row but never bumps
            // the heard stats.
            tx.execute(
                "INSERT INTO stations (call, ssid, first_heard, last_heard, packet_count)
                 VALUES (?1, ?2, ?3, ?3, 0)
                 ON CONFLICT(call, ssid) DO NOTHING",
                params![dest_call, dest_ssid, received],
            )?;
            tx.execute(
                "INSERT INTO packets (call, ssid, dest_call, dest_ssid, received, packet)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![call, ssid, dest_call, dest_ssid, received, text],
            )?;

            // A packet with no position, or with conflicting duplicate
            // positions, gets no posit row.
            if let Ok(Some(position)) = packet.position() {
                tx.execute(
                    "INSERT INTO latest_posits (call, ssid, received, latitude, longitude, packet)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(call, ssid) DO UPDATE SET
                         received = excluded.received,
                         latitude = excluded.latitude,
                         longitude = excluded.longitude,
                         packet = excluded.packet",
                    params![call, ssid, received, position.latitude, position.longitude, text],
                )?;
            }
            inserted += 1;
        }

        tx.commit()?;
        Ok(inserted)
    }

    // -----------------------------------------------------------------------
    // Station queries
    // -----------------------------------------------------------------------

    pub fn get_station(&self, station: &Ax25Address) -> Option<StationRow> {
        self.conn
            .query_row(
                "SELECT call, ssid, first_heard, last_heard, packet_count
                 FROM stations WHERE call = ?1 AND ssid = ?2",
                params![station.call, station.ssid.as_deref().unwrap_or("")],
                |r| {
                    Ok(StationRow {
                        call: r.get(0)?,
                        ssid: opt_ssid(r.get(1)?),
                        first_heard: r.get(2)?,
                        last_heard: r.get(3)?,
                        packet_count: r.get(4)?,
                    })
                },
            )
            .ok()
    }

    /// Packets for one station, newest first. `limit` clamps to
    /// 1..=[`MAX_QUERY_LIMIT`].
    pub fn get_station_packets(&self, station: &Ax25Address, limit: i64) -> Vec<PacketRow> {
        let limit = limit.clamp(1, MAX_QUERY_LIMIT);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT call, ssid, received, packet
                 FROM packets WHERE call = ?1 AND ssid = ?2
                 ORDER BY received DESC LIMIT ?3",
            )
            .unwrap();

        stmt.query_map(
            params![station.call, station.ssid.as_deref().unwrap_or(""), limit],
            |r| {
                Ok(PacketRow {
                    call: r.get(0)?,
                    ssid: opt_ssid(r.get(1)?),
                    received: r.get(2)?,
                    packet: r.get(3)?,
                })
            },
        )
        .unwrap()
        .filter_map(|r| r.ok())
        .collect()
    }

    /// Packets addressed to one station, newest first. Rows carry the
    /// sender's identity. `limit` clamps to 1..=[`MAX_QUERY_LIMIT`].
    pub fn get_packets_to(&self, station: &Ax25Address, limit: i64) -> Vec<PacketRow> {
        let limit = limit.clamp(1, MAX_QUERY_LIMIT);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT call, ssid, received, packet
                 FROM packets WHERE dest_call = ?1 AND dest_ssid = ?2
                 ORDER BY received DESC LIMIT ?3",
            )
            .unwrap();

        stmt.query_map(
            params![station.call, station.ssid.as_deref().unwrap_or(""), limit],
            |r| {
                Ok(PacketRow {
                    call: r.get(0)?,
                    ssid: opt_ssid(r.get(1)?),
                    received: r.get(2)?,
                    packet: r.get(3)?,
                })
            },
        )
        .unwrap()
        .filter_map(|r| r.ok())
        .collect()
    }

    // -----------------------------------------------------------------------
    // Envelope queries
    // -----------------------------------------------------------------------

    /// Latest posits inside the envelope heard within the last hour,
    /// newest first. `None` when nothing qualifies.
    pub fn get_posits_within(
        &self,
        bounds: &CellBounds,
        now: f64,
    ) -> Result<Option<(i64, Vec<PositRow>)>, StoreError> {
        validate_bounds(bounds)?;
        let mut stmt = self.conn.prepare(
            "SELECT call, ssid, received, latitude, longitude, packet
             FROM latest_posits
             WHERE longitude >= ?1 AND longitude < ?2
               AND latitude >= ?3 AND latitude < ?4
               AND received > ?5
             ORDER BY received DESC",
        )?;
        let rows: Vec<PositRow> = stmt
            .query_map(
                params![
                    bounds.west,
                    bounds.east,
                    bounds.south,
                    bounds.north,
                    now - FRESH_WINDOW_SECS
                ],
                |r| {
                    Ok(PositRow {
                        call: r.get(0)?,
                        ssid: opt_ssid(r.get(1)?),
                        received: r.get(2)?,
                        latitude: r.get(3)?,
                        longitude: r.get(4)?,
                        packet: r.get(5)?,
                    })
                },
            )?
            .filter_map(|r| r.ok())
            .collect();

        for row in &rows {
            debug_assert!(
                bounds.contains(row.latitude, row.longitude),
                "posit row outside the queried envelope"
            );
        }

        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some((now as i64, rows)))
        }
    }

    /// Raw packets of the last hour from stations whose latest posit lies
    /// inside the envelope, newest first. `None` when nothing qualifies.
    pub fn get_packets_within(
        &self,
        bounds: &CellBounds,
        now: f64,
    ) -> Result<Option<(i64, Vec<PacketRow>)>, StoreError> {
        validate_bounds(bounds)?;
        let cutoff = now - FRESH_WINDOW_SECS;
        let mut stmt = self.conn.prepare(
            "SELECT p.call, p.ssid, p.received, p.packet
             FROM packets p
             JOIN latest_posits lp ON lp.call = p.call AND lp.ssid = p.ssid
             WHERE lp.longitude >= ?1 AND lp.longitude < ?2
               AND lp.latitude >= ?3 AND lp.latitude < ?4
               AND lp.received > ?5 AND p.received > ?5
             ORDER BY p.received DESC",
        )?;
        let rows: Vec<PacketRow> = stmt
            .query_map(
                params![bounds.west, bounds.east, bounds.south, bounds.north, cutoff],
                |r| {
                    Ok(PacketRow {
                        call: r.get(0)?,
                        ssid: opt_ssid(r.get(1)?),
                        received: r.get(2)?,
                        packet: r.get(3)?,
                    })
                },
            )?
            .filter_map(|r| r.ok())
            .collect();

        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some((now as i64, rows)))
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Delete packets and posits older than the retention window.
    /// Returns (packets removed, posits removed).
    pub fn cleanup(&mut self, now: f64) -> Result<(usize, usize), StoreError> {
        let cutoff = now - RETENTION_SECS;
        let packets = self
            .conn
            .execute("DELETE FROM packets WHERE received < ?1", params![cutoff])?;
        let posits = self.conn.execute(
            "DELETE FROM latest_posits WHERE received < ?1",
            params![cutoff],
        )?;
        Ok((packets, posits))
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub fn count_stations(&self) -> i64 {
        self.conn
            .query_row("SELECT COUNT(*) FROM stations", [], |r| r.get(0))
            .unwrap_or(0)
    }

    pub fn count_packets(&self) -> i64 {
        self.conn
            .query_row("SELECT COUNT(*) FROM packets", [], |r| r.get(0))
            .unwrap_or(0)
    }

    pub fn count_posits(&self) -> i64 {
        self.conn
            .query_row("SELECT COUNT(*) FROM latest_posits", [], |r| r.get(0))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> DbStats {
        DbStats {
            stations: self.count_stations(),
            packets: self.count_packets(),
            posits: self.count_posits(),
        }
    }
}

fn validate_bounds(bounds: &CellBounds) -> Result<(), StoreError> {
    let CellBounds {
        west,
        south,
        east,
        north,
    } = *bounds;
    let valid = west <= east
        && south <= north
        && (-180.0..=180.0).contains(&west)
        && (-180.0..=180.0).contains(&east)
        && (-90.0..=90.0).contains(&south)
        && (-90.0..=90.0).contains(&north);
    if valid {
        Ok(())
    } else {
        Err(StoreError::SpatialBounds {
            west,
            south,
            east,
            north,
        })
    }
}

fn opt_ssid(ssid: String) -> Option<String> {
    if ssid.is_empty() {
        None
    } else {
        Some(ssid)
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StationRow {
    pub call: String,
    pub ssid: Option<String>,
    pub first_heard: f64,
    pub last_heard: f64,
    pub packet_count: i64,
}

impl StationRow {
    pub fn address(&self) -> Ax25Address {
        Ax25Address {
            call: self.call.clone(),
            ssid: self.ssid.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PacketRow {
    pub call: String,
    pub ssid: Option<String>,
    pub received: f64,
    pub packet: String,
}

#[derive(Debug, Serialize)]
pub struct PositRow {
    pub call: String,
    pub ssid: Option<String>,
    pub received: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub packet: String,
}

impl PositRow {
    pub fn address(&self) -> Ax25Address {
        Ax25Address {
            call: self.call.clone(),
            ssid: self.ssid.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DbStats {
    pub stations: i64,
    pub packets: i64,
    pub posits: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
