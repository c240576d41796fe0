//! aprs-server: CLI + web server for APRS packet aggregation.

use std::io::{self, BufRead};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tracing_subscriber::EnvFilter;

use aprs_core::config;
use aprs_core::packet::AprsPacket;
use aprs_core::parser::AprsParser;

mod db;
mod web;

#[derive(Parser)]
#[command(name = "aprs", version, about = "APRS packet hub and archive")]
struct Cli {
    /// SQLite database path (overrides the configured path)
    #[arg(long)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Listen address as host:port (overrides the configured bind)
        #[arg(long)]
        bind: Option<String>,

        /// Bearer token feeders must present; absent means open ingest
        #[arg(long, env = "APRS_HUB_TOKEN")]
        token: Option<String>,
    },

    /// Ingest raw packet lines from a file into the database
    Ingest {
        /// Path to a file of packet lines (one per line), or - for stdin
        file: PathBuf,
    },

    /// Parse one packet line and print its fields
    Parse {
        /// Raw packet line, e.g. 'N0CALL>APRS:>hello'
        packet: String,
    },

    /// Show database statistics
    Stats,

    /// Delete packets older than the retention window
    Cleanup,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = config::load_config();
    let db_path = cli
        .database
        .unwrap_or_else(|| cfg.server.database.clone());

    match cli.command {
        Commands::Serve { bind, token } => {
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            let token = token.or_else(|| cfg.server.token.clone());
            cmd_serve(&db_path, bind, token).await;
        }
        Commands::Ingest { file } => cmd_ingest(&db_path, file),
        Commands::Parse { packet } => cmd_parse(&packet),
        Commands::Stats => cmd_stats(&db_path),
        Commands::Cleanup => cmd_cleanup(&db_path),
    }
}

fn open_database(db_path: &str) -> db::Database {
    db::Database::open(db_path).unwrap_or_else(|e| {
        eprintln!("Error opening database {db_path}: {e}");
        std::process::exit(1);
    })
}

async fn cmd_serve(db_path: &str, bind: String, token: Option<String>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let database = open_database(db_path);
    web::serve(database, bind, token).await;
}

fn cmd_ingest(db_path: &str, file: PathBuf) {
    let mut database = open_database(db_path);

    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(&file).unwrap_or_else(|e| {
            eprintln!("Error opening {}: {e}", file.display());
            std::process::exit(1);
        });
        Box::new(io::BufReader::new(f))
    };

    let parser = AprsParser::new();
    let now = db::now_epoch();
    let mut batch: Vec<AprsPacket> = Vec::new();
    let mut total_lines = 0u64;
    let mut parse_failures = 0u64;
    let mut accepted = 0usize;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };

        let raw = line.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        total_lines += 1;

        match parser.parse(raw) {
            Ok(packet) => batch.push(packet),
            Err(_) => parse_failures += 1,
        }

        if batch.len() >= 500 {
            accepted += flush_batch(&mut database, &mut batch, now);
        }
    }
    accepted += flush_batch(&mut database, &mut batch, now);

    let deduplicated = total_lines as usize - parse_failures as usize - accepted;

    println!();
    println!("Ingest complete: {}", file.display());
    println!();
    let mut table = Table::new();
    table.set_header(vec!["Lines", "Accepted", "Deduplicated", "Parse failures"]);
    table.add_row(vec![
        Cell::new(total_lines),
        Cell::new(accepted),
        Cell::new(deduplicated),
        Cell::new(parse_failures),
    ]);
    println!("{table}");
}

fn flush_batch(database: &mut db::Database, batch: &mut Vec<AprsPacket>, now: f64) -> usize {
    if batch.is_empty() {
        return 0;
    }
    let inserted = database.put_packets(batch, now).unwrap_or_else(|e| {
        eprintln!("Error writing batch: {e}");
        std::process::exit(1);
    });
    batch.clear();
    inserted
}

fn cmd_parse(raw: &str) {
    let packet = match AprsParser::new().parse(raw) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let info = &packet.information_field;
    let position = match packet.position() {
        Ok(Some(p)) => format!("{:.5}, {:.5}", p.latitude, p.longitude),
        Ok(None) => "-".into(),
        Err(e) => e.to_string(),
    };
    let symbol = match packet.symbol() {
        Ok(Some(s)) => format!("{}{}", s.table, s.symbol),
        Ok(None) => "-".into(),
        Err(e) => e.to_string(),
    };
    let timestamp = match packet.timestamp() {
        Ok(Some(t)) => t.to_string(),
        Ok(None) => "-".into(),
        Err(e) => e.to_string(),
    };

    let mut table = Table::new();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec![Cell::new("Source"), Cell::new(packet.source.to_string())]);
    table.add_row(vec![Cell::new("Destination"), Cell::new(packet.dest.to_string())]);
    table.add_row(vec![
        Cell::new("Path"),
        Cell::new(if packet.path.segments.is_empty() {
            "-".to_string()
        } else {
            packet.path.to_string()
        }),
    ]);
    table.add_row(vec![Cell::new("Data type"), Cell::new(info.data_type)]);
    table.add_row(vec![Cell::new("Timestamp"), Cell::new(timestamp)]);
    table.add_row(vec![Cell::new("Position"), Cell::new(position)]);
    table.add_row(vec![Cell::new("Symbol"), Cell::new(symbol)]);
    table.add_row(vec![
        Cell::new("Extension"),
        Cell::new(
            info.extension
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or("-".into()),
        ),
    ]);
    table.add_row(vec![Cell::new("Comment"), Cell::new(&info.comment)]);
    table.add_row(vec![
        Cell::new("Weather"),
        Cell::new(if packet.is_weather() { "yes" } else { "no" }),
    ]);

    println!("{table}");
}

fn cmd_stats(db_path: &str) {
    let database = open_database(db_path);
    let stats = database.stats();

    println!();
    println!("Database: {db_path}");
    println!();
    println!("  Stations:  {}", stats.stations);
    println!("  Packets:   {}", stats.packets);
    println!("  Posits:    {}", stats.posits);
    println!();
}

fn cmd_cleanup(db_path: &str) {
    let mut database = open_database(db_path);

    let (packets, posits) = database.cleanup(db::now_epoch()).unwrap_or_else(|e| {
        eprintln!("Error during cleanup: {e}");
        std::process::exit(1);
    });

    println!("Removed {packets} packets and {posits} posits past retention");
}
