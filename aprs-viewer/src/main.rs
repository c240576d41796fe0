//! aprs-viewer — terminal client for an aprs-hub server.
//!
//! `watch` keeps a region of cells loaded through the [`region`]
//! loader and logs station movement; `cell` is a one-shot fetch of a
//! single cell, printed as a table.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tracing_subscriber::EnvFilter;

use aprs_core::cellcache::CacheUpdateListener;
use aprs_core::config;
use aprs_core::geocell::{CellBounds, Geocell, CELL_HEIGHT_DEG, CELL_WIDTH_DEG};
use aprs_core::packet::{Ax25Address, TimestampedPosit};

mod region;

use region::{HttpPositFetcher, PositFetcher, RegionLoader};

#[derive(Parser)]
#[command(name = "aprs-viewer", version, about = "Terminal APRS region viewer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a region and log station updates as they arrive
    Watch {
        /// Hub base URL (default from config, http://127.0.0.1:8150)
        #[arg(long)]
        server: Option<String>,

        /// Region center latitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        latitude: Option<f64>,

        /// Region center longitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        longitude: Option<f64>,

        /// Cells outward from the center in each direction
        #[arg(long)]
        radius_cells: Option<u32>,

        /// Seconds between maintenance passes
        #[arg(long, default_value = "10")]
        interval: u64,
    },

    /// Fetch one cell and print its stations
    Cell {
        /// 4-character cell code, e.g. dpr0
        code: String,

        /// Hub base URL (default from config, http://127.0.0.1:8150)
        #[arg(long)]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let cfg = config::load_config().viewer;

    match cli.command {
        Commands::Watch {
            server,
            latitude,
            longitude,
            radius_cells,
            interval,
        } => {
            let server = server.unwrap_or(cfg.server);
            let latitude = latitude.or(cfg.latitude).unwrap_or_else(|| {
                eprintln!("Error: no latitude given and none configured");
                std::process::exit(1);
            });
            let longitude = longitude.or(cfg.longitude).unwrap_or_else(|| {
                eprintln!("Error: no longitude given and none configured");
                std::process::exit(1);
            });
            let radius_cells = radius_cells.unwrap_or(cfg.radius_cells);
            cmd_watch(server, latitude, longitude, radius_cells, interval).await;
        }
        Commands::Cell { code, server } => {
            let server = server.unwrap_or(cfg.server);
            cmd_cell(&code, server).await;
        }
    }
}

// ---------------------------------------------------------------------------
// watch
// ---------------------------------------------------------------------------

/// Logs cache deltas as they are applied.
struct LogListener;

impl CacheUpdateListener for LogListener {
    fn update_stations(&mut self, posits: &[TimestampedPosit]) {
        for posit in posits {
            tracing::info!(
                station = %posit.station,
                location = %posit.location,
                symbol = %format!("{}{}", posit.symbol.table, posit.symbol.symbol),
                "station update"
            );
        }
    }

    fn evict_stations(&mut self, stations: &[Ax25Address]) {
        for station in stations {
            tracing::info!(station = %station, "station dropped");
        }
    }
}

/// Envelope `radius_cells` cells out from the center in each direction,
/// clamped to valid coordinates.
fn region_bounds(latitude: f64, longitude: f64, radius_cells: u32) -> CellBounds {
    let r = f64::from(radius_cells);
    CellBounds {
        west: (longitude - r * CELL_WIDTH_DEG).max(-180.0),
        south: (latitude - r * CELL_HEIGHT_DEG).max(-90.0),
        east: (longitude + r * CELL_WIDTH_DEG).min(180.0),
        north: (latitude + r * CELL_HEIGHT_DEG).min(90.0),
    }
}

async fn cmd_watch(
    server: String,
    latitude: f64,
    longitude: f64,
    radius_cells: u32,
    interval: u64,
) {
    let bounds = region_bounds(latitude, longitude, radius_cells);
    let visible = Geocell::cells_within(&bounds);
    tracing::info!(
        server = %server,
        center = %Geocell::containing(latitude, longitude),
        cells = visible.len(),
        "watching region"
    );

    let fetcher = Arc::new(HttpPositFetcher::new(server));
    let mut loader = RegionLoader::new(fetcher);
    let mut listener = LogListener;

    let target = loader.cache().target_cells();
    if visible.len() > target {
        tracing::warn!(
            cells = visible.len(),
            target,
            "region exceeds the cache's cell target; no cells will load until --radius-cells shrinks"
        );
    }

    let mut tick = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                loader.ensure_region_loaded(&visible, epoch_seconds(), &mut listener);
            }
            _ = &mut ctrl_c => {
                tracing::info!("shutting down");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// cell
// ---------------------------------------------------------------------------

async fn cmd_cell(code: &str, server: String) {
    let cell = match Geocell::from_code(code) {
        Ok(cell) => cell,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let fetcher = HttpPositFetcher::new(server);
    match fetcher.fetch(&cell).await {
        Ok(command) if command.new_or_updated.is_empty() => {
            println!("No stations heard recently in cell {cell}");
        }
        Ok(command) => print_posits(&cell, &command.new_or_updated),
        Err(e) => {
            eprintln!("Error fetching cell {cell}: {e}");
            std::process::exit(1);
        }
    }
}

fn print_posits(cell: &Geocell, posits: &[TimestampedPosit]) {
    let bounds = cell.bounds();
    println!();
    println!(
        "Cell {} ({:.4}..{:.4} N, {:.4}..{:.4} E): {} station(s)",
        cell,
        bounds.south,
        bounds.north,
        bounds.west,
        bounds.east,
        posits.len()
    );
    println!();

    let now_millis = (epoch_seconds() * 1000.0) as i64;
    let mut table = Table::new();
    table.set_header(vec!["Station", "Location", "Symbol", "Heard"]);
    for posit in posits {
        let age_secs = (now_millis - posit.millis_since_epoch).max(0) / 1000;
        table.add_row(vec![
            Cell::new(posit.station.to_string()),
            Cell::new(&posit.location),
            Cell::new(format!("{}{}", posit.symbol.table, posit.symbol.symbol)),
            Cell::new(format!("{age_secs}s ago")),
        ]);
    }
    println!("{table}");
}

fn epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bounds_span() {
        let bounds = region_bounds(40.81, -80.0, 1);
        assert!(bounds.west < -80.0 && bounds.east > -80.0);
        assert!(bounds.south < 40.81 && bounds.north > 40.81);
        // Radius 1: one cell width out each side of the center.
        assert!((bounds.east - bounds.west - 2.0 * CELL_WIDTH_DEG).abs() < 1e-9);

        let cells = Geocell::cells_within(&bounds);
        assert!(cells.contains(&Geocell::containing(40.81, -80.0)));
    }

    #[test]
    fn test_region_bounds_clamped_at_poles() {
        let bounds = region_bounds(89.95, 0.0, 3);
        assert!(bounds.north <= 90.0);
        assert!(bounds.south < 89.95);
    }

    #[test]
    fn test_wide_radius_overflows_cache_target() {
        // --radius-cells 5 spans an 11x11 region, more cells than the
        // cache will track; watch warns instead of silently idling.
        let target = aprs_core::cellcache::PacketCache::new().target_cells();
        let wide = Geocell::cells_within(&region_bounds(40.81, -80.0, 5));
        assert!(wide.len() > target);
        let fits = Geocell::cells_within(&region_bounds(40.81, -80.0, 4));
        assert!(fits.len() <= target, "radius 4 still fits the cache");
    }
}
