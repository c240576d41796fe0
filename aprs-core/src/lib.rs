//! aprs-core: Pure APRS parsing, position math, and caching library.
//!
//! No async, no network I/O — just the packet model and algorithms. This
//! crate is the shared core used by `aprs-server` (store + HTTP API),
//! `aprs-feeder` (APRS-IS ingest), and `aprs-viewer` (region cache
//! client).

pub mod angle;
pub mod cellcache;
pub mod config;
pub mod geocell;
pub mod packet;
pub mod parser;
pub mod types;

// Re-export commonly used types at crate root
pub use cellcache::{CacheUpdateListener, PacketCache};
pub use geocell::{CellBounds, Geocell};
pub use packet::{
    AprsPacket, Ax25Address, CacheUpdateCommand, CacheUpdateCommandPosits, TimestampedPosit,
    TimestampedSerializedPacket,
};
pub use parser::{latin1_to_string, AprsParser};
pub use types::*;
