//! aprs-feeder: APRS-IS uplink for an aprs-hub server.
//!
//! Connects to an APRS-IS server read-only, batches raw packet lines,
//! and POSTs them to the hub ingest API. No parsing happens here; the
//! hub owns interpretation.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use aprs_core::config;

mod client;

#[derive(Parser)]
#[command(name = "aprs-feeder", version, about = "APRS-IS to aprs-hub feeder")]
struct Cli {
    /// APRS-IS server hostname (overrides the configured server)
    #[arg(long)]
    server: Option<String>,

    /// APRS-IS server port
    #[arg(long)]
    port: Option<u16>,

    /// Login callsign
    #[arg(long)]
    callsign: Option<String>,

    /// APRS-IS passcode; -1 gives read-only access
    #[arg(long)]
    passcode: Option<String>,

    /// APRS-IS filter expression, e.g. 'r/40.8/-80.0/200'
    #[arg(long)]
    filter: Option<String>,

    /// Hub base URL to POST batches to
    #[arg(long)]
    endpoint: Option<String>,

    /// Bearer token for the hub ingest API
    #[arg(long, env = "APRS_HUB_TOKEN")]
    token: Option<String>,

    /// Feeder name reported to the hub (defaults to the callsign)
    #[arg(long)]
    name: Option<String>,

    /// Packets per batch before an immediate flush
    #[arg(long, default_value = "25")]
    batch_size: usize,

    /// Seconds between interval flushes
    #[arg(long, default_value = "5")]
    flush_interval: u64,
}

#[tokio::main]
async fn main() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let cfg = config::load_config().feeder;

    let callsign = cli.callsign.unwrap_or(cfg.callsign);
    let config = client::FeederClientConfig {
        server: cli.server.unwrap_or(cfg.server),
        port: cli.port.unwrap_or(cfg.port),
        passcode: cli.passcode.unwrap_or(cfg.passcode),
        filter: cli.filter.or(cfg.filter),
        endpoint: cli.endpoint.unwrap_or(cfg.endpoint),
        token: cli.token,
        feeder_name: cli.name.unwrap_or_else(|| callsign.clone()),
        callsign,
        batch_size: cli.batch_size,
        flush_interval_secs: cli.flush_interval,
        retry_delay_secs: 1,
        max_retry_delay_secs: 60,
    };

    client::FeederClient::new(config).run().await;
}
