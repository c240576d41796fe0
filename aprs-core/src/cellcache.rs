//! Client-side cache of geocell contents.
//!
//! A map client keeps one [`PacketCacheCell`] per visible 4-char geocell,
//! holding the latest posit per station. The cache tells its caller which
//! cells need a server refresh; applying the server's
//! [`CacheUpdateCommandPosits`] funnels plot changes through a
//! [`CacheUpdateListener`] so the drawing layer only ever hears about
//! deltas.
//!
//! Cells are kept in most-recently-used order. When the cell count
//! reaches `max_cells`, everything beyond the first `target_cells` is
//! purged and each purged cell's stations are announced exactly once.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::geocell::Geocell;
use crate::packet::{Ax25Address, CacheUpdateCommandPosits, TimestampedPosit};

/// Number of cells the cache aims to hold.
pub const DEFAULT_TARGET_CELLS: usize = 100;
/// Hard ceiling; reaching it purges back down to the target.
pub const DEFAULT_MAX_CELLS: usize = 150;

/// Seconds a successful update keeps a cell fresh.
const FRESHNESS_WINDOW_SECS: f64 = 120.0;

/// Receives plot deltas as cache contents change.
pub trait CacheUpdateListener {
    fn update_stations(&mut self, posits: &[TimestampedPosit]);
    fn evict_stations(&mut self, stations: &[Ax25Address]);
}

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

/// One geocell's worth of stations.
#[derive(Debug, Default)]
struct PacketCacheCell {
    packets_by_station: HashMap<Ax25Address, TimestampedPosit>,
    /// Epoch seconds of the last successful update. `None` until the
    /// first update lands, and after that only moved by `update`, so a
    /// failed fetch leaves the cell due for retry.
    freshness: Option<f64>,
}

impl PacketCacheCell {
    fn wants_update(&self, now: f64) -> bool {
        match self.freshness {
            None => true,
            Some(updated) => now - updated > FRESHNESS_WINDOW_SECS,
        }
    }

    /// A command with `evict_all_old_stations` is a snapshot: held
    /// stations missing from `new_or_updated` are evicted, stations it
    /// still carries are just updated in place.
    fn update(
        &mut self,
        command: &CacheUpdateCommandPosits,
        now: f64,
        listener: &mut dyn CacheUpdateListener,
    ) {
        if command.evict_all_old_stations {
            let keep: HashSet<&Ax25Address> =
                command.new_or_updated.iter().map(|p| &p.station).collect();
            let dropped: Vec<Ax25Address> = self
                .packets_by_station
                .keys()
                .filter(|station| !keep.contains(*station))
                .cloned()
                .collect();
            if !dropped.is_empty() {
                for station in &dropped {
                    self.packets_by_station.remove(station);
                }
                listener.evict_stations(&dropped);
            }
        }
        if !command.stations_to_evict.is_empty() {
            for station in &command.stations_to_evict {
                self.packets_by_station.remove(station);
            }
            listener.evict_stations(&command.stations_to_evict);
        }
        if !command.new_or_updated.is_empty() {
            for posit in &command.new_or_updated {
                self.packets_by_station
                    .insert(posit.station.clone(), posit.clone());
            }
            listener.update_stations(&command.new_or_updated);
        }
        self.freshness = Some(now);
    }

    fn stations(&self) -> Vec<Ax25Address> {
        self.packets_by_station.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// MRU-ordered cache of visible geocells.
#[derive(Debug)]
pub struct PacketCache {
    cells: HashMap<Geocell, PacketCacheCell>,
    /// Front is most recently used.
    order: VecDeque<Geocell>,
    target_cells: usize,
    max_cells: usize,
}

impl Default for PacketCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_TARGET_CELLS, DEFAULT_MAX_CELLS)
    }

    /// `target_cells` must not exceed `max_cells`.
    pub fn with_limits(target_cells: usize, max_cells: usize) -> Self {
        PacketCache {
            cells: HashMap::new(),
            order: VecDeque::new(),
            target_cells,
            max_cells,
        }
    }

    /// Declares the currently visible cells and returns the ones needing
    /// a refresh.
    ///
    /// A request for more cells than the cache may hold is refused
    /// outright (empty return, no state change): honoring it would purge
    /// cells the caller just declared visible.
    pub fn update_visible_cells(
        &mut self,
        visible: &[Geocell],
        now: f64,
        listener: &mut dyn CacheUpdateListener,
    ) -> Vec<Geocell> {
        if visible.len() > self.target_cells {
            return Vec::new();
        }
        let mut wanting = Vec::new();
        for cell in visible {
            self.touch(cell);
            let wants = self
                .cells
                .get(cell)
                .map_or(false, |entry| entry.wants_update(now));
            if wants {
                wanting.push(cell.clone());
            }
        }
        self.evict_to_target(listener);
        wanting
    }

    /// Applies a server command to one cell, allocating it if the cell
    /// was purged while the fetch was in flight.
    pub fn update_cell(
        &mut self,
        cell: &Geocell,
        command: &CacheUpdateCommandPosits,
        now: f64,
        listener: &mut dyn CacheUpdateListener,
    ) {
        self.touch(cell);
        if let Some(entry) = self.cells.get_mut(cell) {
            entry.update(command, now, listener);
        }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Cells the cache aims to hold; visibility requests larger than
    /// this are refused.
    pub fn target_cells(&self) -> usize {
        self.target_cells
    }

    /// Stations currently held for a cell, unordered.
    pub fn stations_in(&self, cell: &Geocell) -> Vec<Ax25Address> {
        self.cells.get(cell).map(PacketCacheCell::stations).unwrap_or_default()
    }

    fn touch(&mut self, cell: &Geocell) {
        if self.cells.contains_key(cell) {
            if let Some(index) = self.order.iter().position(|c| c == cell) {
                self.order.remove(index);
            }
        } else {
            self.cells.insert(cell.clone(), PacketCacheCell::default());
        }
        self.order.push_front(cell.clone());
    }

    fn evict_to_target(&mut self, listener: &mut dyn CacheUpdateListener) {
        if self.cells.len() < self.max_cells {
            return;
        }
        let doomed: Vec<Geocell> = self
            .order
            .iter()
            .skip(self.target_cells)
            .cloned()
            .collect();
        for cell in doomed {
            self.purge_cell(&cell, listener);
        }
    }

    fn purge_cell(&mut self, cell: &Geocell, listener: &mut dyn CacheUpdateListener) {
        if let Some(purged) = self.cells.remove(cell) {
            let stations = purged.stations();
            if !stations.is_empty() {
                listener.evict_stations(&stations);
            }
        }
        if let Some(index) = self.order.iter().position(|c| c == cell) {
            self.order.remove(index);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
