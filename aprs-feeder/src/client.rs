//! APRS-IS client — connects read-only, batches lines, POSTs to the hub.
//!
//! The feeder never interprets packet content. Lines arrive ISO-8859-1
//! encoded, get decoded losslessly, and travel to the hub as-is; the
//! hub's parser is the single point of interpretation.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use aprs_core::parser::latin1_to_string;

/// Seconds between keepalive comment lines sent to the APRS-IS server.
const KEEPALIVE_INTERVAL_SECS: u64 = 20;

/// Outcome of one connection attempt.
enum ConnectionOutcome {
    /// Server closed the stream; reconnect with backoff reset.
    ServerClosed,
    /// Dial failed before the session started.
    Failed(std::io::Error),
    /// Session was up, then an I/O error ended it.
    Errored(std::io::Error),
    /// Ctrl-C; stop reconnecting.
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct FeederClientConfig {
    pub server: String,
    pub port: u16,
    pub callsign: String,
    pub passcode: String,
    pub filter: Option<String>,
    pub endpoint: String,
    pub token: Option<String>,
    pub feeder_name: String,
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
}

pub struct FeederClient {
    config: FeederClientConfig,
    http: reqwest::Client,
}

impl FeederClient {
    pub fn new(config: FeederClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                eprintln!("Error building HTTP client: {e}");
                std::process::exit(1);
            });
        FeederClient { config, http }
    }

    /// Connect, read, reconnect until Ctrl-C.
    ///
    /// Dial failures back off with doubling delay up to the configured
    /// cap; a session that was established resets the delay.
    pub async fn run(&self) {
        let mut delay = self.config.retry_delay_secs;

        loop {
            match self.connect_and_run().await {
                ConnectionOutcome::Shutdown => return,
                ConnectionOutcome::ServerClosed => {
                    tracing::warn!("server closed the connection");
                    delay = self.config.retry_delay_secs;
                }
                ConnectionOutcome::Errored(e) => {
                    tracing::error!(error = %e, "connection errored");
                    delay = self.config.retry_delay_secs;
                }
                ConnectionOutcome::Failed(e) => {
                    tracing::error!(error = %e, "connection failed");
                }
            }

            tracing::info!(delay, "reconnecting after delay");
            tokio::time::sleep(Duration::from_secs(delay)).await;
            delay = (delay * 2).min(self.config.max_retry_delay_secs);
        }
    }

    async fn connect_and_run(&self) -> ConnectionOutcome {
        let address = format!("{}:{}", self.config.server, self.config.port);
        tracing::info!(%address, "connecting to APRS-IS");

        let stream = match TcpStream::connect(&address).await {
            Ok(s) => s,
            Err(e) => return ConnectionOutcome::Failed(e),
        };
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let login = build_login(&self.config);
        tracing::info!(login = %login.trim_end(), "logging in");
        if let Err(e) = writer.write_all(login.as_bytes()).await {
            return ConnectionOutcome::Errored(e);
        }
        if let Err(e) = writer.flush().await {
            return ConnectionOutcome::Errored(e);
        }

        let mut line: Vec<u8> = Vec::new();
        let mut batch: Vec<String> = Vec::new();
        let mut flush_tick =
            tokio::time::interval(Duration::from_secs(self.config.flush_interval_secs));
        let mut keepalive_tick =
            tokio::time::interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                // Cancel-safe: a partial read stays in `line` and the
                // next read appends to it.
                read = reader.read_until(b'\n', &mut line) => match read {
                    Ok(0) => {
                        self.flush(&mut batch).await;
                        return ConnectionOutcome::ServerClosed;
                    }
                    Ok(_) => {
                        let text = latin1_to_string(&line);
                        line.clear();
                        let trimmed = text.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if trimmed.starts_with('#') {
                            tracing::debug!(message = %trimmed, "server chatter");
                            continue;
                        }
                        batch.push(trimmed.to_string());
                        if batch.len() >= self.config.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    Err(e) => {
                        self.flush(&mut batch).await;
                        return ConnectionOutcome::Errored(e);
                    }
                },
                _ = flush_tick.tick() => {
                    self.flush(&mut batch).await;
                }
                _ = keepalive_tick.tick() => {
                    if let Err(e) = writer.write_all(b"# aprs-hub keepalive\r\n").await {
                        self.flush(&mut batch).await;
                        return ConnectionOutcome::Errored(e);
                    }
                }
                _ = &mut ctrl_c => {
                    tracing::info!("shutting down, flushing tail");
                    self.flush(&mut batch).await;
                    return ConnectionOutcome::Shutdown;
                }
            }
        }
    }

    /// POST the batch to the hub ingest API. A failed delivery logs and
    /// drops the batch rather than queueing it for retry.
    async fn flush(&self, batch: &mut Vec<String>) {
        if batch.is_empty() {
            return;
        }
        let lines = std::mem::take(batch);
        let count = lines.len();

        let mut request = self
            .http
            .post(format!("{}/api/v1/packets", self.config.endpoint))
            .json(&ingest_payload(&self.config.feeder_name, &lines));
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(count, "batch delivered");
            }
            Ok(response) => {
                tracing::warn!(count, status = %response.status(), "hub rejected batch, dropping");
            }
            Err(e) => {
                tracing::warn!(count, error = %e, "batch delivery failed, dropping");
            }
        }
    }
}

/// Build the APRS-IS login line. Passcode `-1` requests read-only access.
fn build_login(config: &FeederClientConfig) -> String {
    let mut login = format!(
        "user {} pass {} vers aprs-hub {}",
        config.callsign,
        config.passcode,
        env!("CARGO_PKG_VERSION"),
    );
    if let Some(filter) = &config.filter {
        login.push_str(" filter ");
        login.push_str(filter);
    }
    login.push_str("\r\n");
    login
}

fn ingest_payload(feeder: &str, packets: &[String]) -> serde_json::Value {
    serde_json::json!({
        "feeder": feeder,
        "packets": packets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FeederClientConfig {
        FeederClientConfig {
            server: "rotate.aprs2.net".to_string(),
            port: 14580,
            callsign: "N0CALL".to_string(),
            passcode: "-1".to_string(),
            filter: None,
            endpoint: "http://127.0.0.1:8150".to_string(),
            token: None,
            feeder_name: "N0CALL".to_string(),
            batch_size: 25,
            flush_interval_secs: 5,
            retry_delay_secs: 1,
            max_retry_delay_secs: 60,
        }
    }

    #[test]
    fn test_login_read_only() {
        let login = build_login(&test_config());
        assert_eq!(
            login,
            format!(
                "user N0CALL pass -1 vers aprs-hub {}\r\n",
                env!("CARGO_PKG_VERSION")
            )
        );
    }

    #[test]
    fn test_login_with_passcode_and_filter() {
        let mut config = test_config();
        config.callsign = "KB3TTP-2".to_string();
        config.passcode = "24237".to_string();
        config.filter = Some("r/40.8/-80.0/200".to_string());

        let login = build_login(&config);
        assert_eq!(
            login,
            format!(
                "user KB3TTP-2 pass 24237 vers aprs-hub {} filter r/40.8/-80.0/200\r\n",
                env!("CARGO_PKG_VERSION")
            )
        );
    }

    #[test]
    fn test_ingest_payload_shape() {
        let packets = vec![
            "N0CALL>APRS:>hello".to_string(),
            "K2XYZ>APRS:>world".to_string(),
        ];
        let payload = ingest_payload("balcony", &packets);

        assert_eq!(payload["feeder"], "balcony");
        assert_eq!(payload["packets"].as_array().unwrap().len(), 2);
        assert_eq!(payload["packets"][0], "N0CALL>APRS:>hello");
    }
}
