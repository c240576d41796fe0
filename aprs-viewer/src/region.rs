//! Region loader — keeps a set of visible cells populated from a hub.
//!
//! Async shell around the synchronous [`PacketCache`]: each call to
//! [`RegionLoader::ensure_region_loaded`] first applies completed
//! fetches, then dispatches new ones for the cells the cache reports
//! as wanting data, bounded by the in-flight cap. Fetch tasks report
//! back over a channel, so the loader itself never blocks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use aprs_core::cellcache::{CacheUpdateListener, PacketCache};
use aprs_core::geocell::Geocell;
use aprs_core::packet::CacheUpdateCommandPosits;

/// Attempts per cell before the fetch gives up and the cell stays stale.
const MAX_FETCH_ATTEMPTS: u32 = 5;

/// Per-attempt deadline.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on concurrently in-flight cell fetches.
pub const DEFAULT_MAX_REQUESTS: usize = 4;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("bad response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Source of per-cell position snapshots.
#[async_trait]
pub trait PositFetcher: Send + Sync {
    /// Fetches the snapshot command for one cell. The hub answers every
    /// well-formed cell query with a command, empty region or not, so a
    /// successful fetch always marks the cell fresh when applied.
    async fn fetch(&self, cell: &Geocell) -> Result<CacheUpdateCommandPosits, FetchError>;
}

/// A finished fetch task. `command` is `None` when every attempt failed.
struct FetchOutcome {
    cell: Geocell,
    command: Option<CacheUpdateCommandPosits>,
}

pub struct RegionLoader {
    cache: PacketCache,
    fetcher: Arc<dyn PositFetcher>,
    in_flight: HashSet<Geocell>,
    max_requests: usize,
    outcome_tx: mpsc::UnboundedSender<FetchOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<FetchOutcome>,
}

impl RegionLoader {
    pub fn new(fetcher: Arc<dyn PositFetcher>) -> Self {
        Self::with_limits(fetcher, PacketCache::new(), DEFAULT_MAX_REQUESTS)
    }

    pub fn with_limits(
        fetcher: Arc<dyn PositFetcher>,
        cache: PacketCache,
        max_requests: usize,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        RegionLoader {
            cache,
            fetcher,
            in_flight: HashSet::new(),
            max_requests,
            outcome_tx,
            outcome_rx,
        }
    }

    /// One maintenance pass: apply completed fetches, then start new
    /// ones for visible cells that want data. Never blocks; call it on
    /// a cadence and the region converges.
    pub fn ensure_region_loaded(
        &mut self,
        visible: &[Geocell],
        now: f64,
        listener: &mut dyn CacheUpdateListener,
    ) {
        self.drain_outcomes(now, listener);

        let wanting = self.cache.update_visible_cells(visible, now, listener);
        let budget = self.max_requests.saturating_sub(self.in_flight.len());
        let dispatch: Vec<Geocell> = wanting
            .into_iter()
            .filter(|cell| !self.in_flight.contains(cell))
            .take(budget)
            .collect();

        for cell in dispatch {
            self.in_flight.insert(cell.clone());
            let fetcher = self.fetcher.clone();
            let tx = self.outcome_tx.clone();
            tokio::spawn(async move {
                let outcome = fetch_with_retry(fetcher, cell).await;
                // Receiver lives as long as the loader; a send failure
                // just means the loader is gone.
                let _ = tx.send(outcome);
            });
        }
    }

    fn drain_outcomes(&mut self, now: f64, listener: &mut dyn CacheUpdateListener) {
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.in_flight.remove(&outcome.cell);
            match outcome.command {
                Some(command) => {
                    self.cache.update_cell(&outcome.cell, &command, now, listener);
                }
                None => {
                    tracing::warn!(cell = %outcome.cell, "fetch failed, cell stays stale");
                }
            }
        }
    }

    pub fn cache(&self) -> &PacketCache {
        &self.cache
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

async fn fetch_with_retry(fetcher: Arc<dyn PositFetcher>, cell: Geocell) -> FetchOutcome {
    for attempt in 1..=MAX_FETCH_ATTEMPTS {
        match tokio::time::timeout(FETCH_TIMEOUT, fetcher.fetch(&cell)).await {
            Ok(Ok(command)) => {
                return FetchOutcome {
                    cell,
                    command: Some(command),
                };
            }
            Ok(Err(e)) => {
                tracing::warn!(cell = %cell, attempt, error = %e, "cell fetch failed");
            }
            Err(_) => {
                tracing::warn!(cell = %cell, attempt, "cell fetch timed out");
            }
        }
        if attempt < MAX_FETCH_ATTEMPTS {
            tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
        }
    }
    FetchOutcome {
        cell,
        command: None,
    }
}

// ---------------------------------------------------------------------------
// HTTP fetcher
// ---------------------------------------------------------------------------

/// Fetches cell snapshots from an aprs-hub server's `/api/v1/cell` route.
pub struct HttpPositFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPositFetcher {
    /// `base_url` without a trailing slash, e.g. `http://127.0.0.1:8150`.
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                eprintln!("Error building HTTP client: {e}");
                std::process::exit(1);
            });
        HttpPositFetcher { http, base_url }
    }
}

#[async_trait]
impl PositFetcher for HttpPositFetcher {
    async fn fetch(&self, cell: &Geocell) -> Result<CacheUpdateCommandPosits, FetchError> {
        let url = format!("{}/api/v1/cell/{}", self.base_url, cell.code());
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use aprs_core::geocell::CellBounds;
    use aprs_core::packet::{AprsSymbol, Ax25Address, TimestampedPosit};

    #[derive(Default)]
    struct RecordingListener {
        updated: Vec<TimestampedPosit>,
        evicted: Vec<Ax25Address>,
    }

    impl CacheUpdateListener for RecordingListener {
        fn update_stations(&mut self, posits: &[TimestampedPosit]) {
            self.updated.extend_from_slice(posits);
        }

        fn evict_stations(&mut self, stations: &[Ax25Address]) {
            self.evicted.extend_from_slice(stations);
        }
    }

    enum StubResponse {
        Posits(Vec<TimestampedPosit>),
        Empty,
    }

    /// Cells without a configured response fail every attempt.
    struct StubFetcher {
        responses: Mutex<HashMap<String, StubResponse>>,
        calls: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        fn new() -> Self {
            StubFetcher {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn respond(self, code: &str, response: StubResponse) -> Self {
            self.set_response(code, response);
            self
        }

        fn set_response(&self, code: &str, response: StubResponse) {
            self.responses
                .lock()
                .unwrap()
                .insert(code.to_string(), response);
        }

        fn calls_for(&self, code: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.as_str() == code)
                .count()
        }
    }

    #[async_trait]
    impl PositFetcher for StubFetcher {
        async fn fetch(&self, cell: &Geocell) -> Result<CacheUpdateCommandPosits, FetchError> {
            self.calls.lock().unwrap().push(cell.code().to_string());
            match self.responses.lock().unwrap().get(cell.code()) {
                Some(StubResponse::Posits(posits)) => Ok(CacheUpdateCommandPosits {
                    evict_all_old_stations: true,
                    epoch_seconds: 1_000,
                    new_or_updated: posits.clone(),
                    stations_to_evict: Vec::new(),
                }),
                Some(StubResponse::Empty) => Ok(CacheUpdateCommandPosits::evict_all(1_000)),
                None => Err(FetchError::Status(500)),
            }
        }
    }

    fn posit(call: &str) -> TimestampedPosit {
        TimestampedPosit {
            millis_since_epoch: 1_000_000,
            station: Ax25Address::new(call, None),
            location: "dpr0bc9h".to_string(),
            symbol: AprsSymbol::new('/', '>'),
        }
    }

    /// Under the paused clock this skips past every retry backoff, so
    /// spawned fetch tasks run to completion.
    async fn settle() {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_applies_to_cache() {
        let cell = Geocell::containing(40.81, -80.0);
        let fetcher = Arc::new(
            StubFetcher::new().respond(cell.code(), StubResponse::Posits(vec![posit("N0CALL")])),
        );
        let mut loader = RegionLoader::new(fetcher.clone());
        let mut listener = RecordingListener::default();
        let visible = vec![cell.clone()];

        loader.ensure_region_loaded(&visible, 1_000.0, &mut listener);
        assert_eq!(loader.in_flight_count(), 1);

        settle().await;
        loader.ensure_region_loaded(&visible, 1_001.0, &mut listener);

        assert_eq!(loader.in_flight_count(), 0);
        assert_eq!(listener.updated.len(), 1);
        assert_eq!(listener.updated[0].station.call, "N0CALL");
        assert_eq!(
            loader.cache().stations_in(&cell),
            vec![Ax25Address::new("N0CALL", None)]
        );
        assert_eq!(fetcher.calls_for(cell.code()), 1, "fresh cell refetched");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_region_response_marks_cell_fresh() {
        let cell = Geocell::containing(40.81, -80.0);
        let fetcher = Arc::new(StubFetcher::new().respond(cell.code(), StubResponse::Empty));
        let mut loader = RegionLoader::new(fetcher.clone());
        let mut listener = RecordingListener::default();
        let visible = vec![cell.clone()];

        loader.ensure_region_loaded(&visible, 1_000.0, &mut listener);
        settle().await;
        loader.ensure_region_loaded(&visible, 1_001.0, &mut listener);

        assert!(loader.cache().stations_in(&cell).is_empty());
        assert_eq!(loader.in_flight_count(), 0);

        // The empty cell is now fresh, not stale.
        loader.ensure_region_loaded(&visible, 1_002.0, &mut listener);
        assert_eq!(loader.in_flight_count(), 0);
        assert_eq!(fetcher.calls_for(cell.code()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_evicts_stations_gone_from_snapshot() {
        let cell = Geocell::containing(40.81, -80.0);
        let fetcher = Arc::new(
            StubFetcher::new().respond(cell.code(), StubResponse::Posits(vec![posit("N0CALL")])),
        );
        let mut loader = RegionLoader::new(fetcher.clone());
        let mut listener = RecordingListener::default();
        let visible = vec![cell.clone()];

        loader.ensure_region_loaded(&visible, 1_000.0, &mut listener);
        settle().await;
        loader.ensure_region_loaded(&visible, 1_001.0, &mut listener);
        assert_eq!(
            loader.cache().stations_in(&cell),
            vec![Ax25Address::new("N0CALL", None)]
        );

        // The station ages out server-side; the next snapshot is empty.
        fetcher.set_response(cell.code(), StubResponse::Empty);
        loader.ensure_region_loaded(&visible, 1_130.0, &mut listener);
        settle().await;
        loader.ensure_region_loaded(&visible, 1_131.0, &mut listener);

        assert!(loader.cache().stations_in(&cell).is_empty());
        assert_eq!(listener.evicted, vec![Ax25Address::new("N0CALL", None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_leaves_cell_stale() {
        let cell = Geocell::containing(40.81, -80.0);
        let fetcher = Arc::new(StubFetcher::new());
        let mut loader = RegionLoader::new(fetcher.clone());
        let mut listener = RecordingListener::default();
        let visible = vec![cell.clone()];

        loader.ensure_region_loaded(&visible, 1_000.0, &mut listener);
        settle().await;
        assert_eq!(fetcher.calls_for(cell.code()), 5, "retries exhausted");

        // The failure clears in-flight and the cell re-qualifies.
        loader.ensure_region_loaded(&visible, 1_001.0, &mut listener);
        assert_eq!(loader.in_flight_count(), 1);
        assert!(listener.updated.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_bounded_by_max_requests() {
        let bounds = CellBounds {
            west: -80.2,
            south: 40.7,
            east: -79.6,
            north: 41.0,
        };
        let visible = Geocell::cells_within(&bounds);
        assert!(visible.len() > 4, "envelope too small for this test");

        let fetcher = Arc::new(StubFetcher::new());
        let mut loader = RegionLoader::with_limits(fetcher, PacketCache::new(), 4);
        let mut listener = RecordingListener::default();

        loader.ensure_region_loaded(&visible, 1_000.0, &mut listener);
        assert_eq!(loader.in_flight_count(), 4);
    }
}
