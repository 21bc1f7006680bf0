//! Per-instrument incremental bar cache with merge-append semantics.
//!
//! Repeated scans only pull the gap since the last cached bar instead of a
//! full history reload. Merges are keyed by timestamp; the newest fragment
//! wins on conflict. The cache never shrinks except on explicit invalidation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use optdesk_core::Bar;

/// How the next load for an instrument should be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// No usable entry — load the whole lookback.
    Full { days: u32 },
    /// Entry is usable — load only the gap since the last cached bar.
    Incremental { days: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    Full,
    Incremental,
}

struct SeriesEntry {
    /// Chronological, unique timestamps.
    bars: Vec<Bar>,
    last_update: DateTime<Utc>,
    load_mode: LoadMode,
    invalid: bool,
}

/// Thread-safe series cache. One mutex domain; merges for the same
/// instrument serialize under it.
pub struct SeriesCache {
    entries: Mutex<HashMap<String, SeriesEntry>>,
    min_incremental_days: u32,
}

impl SeriesCache {
    pub fn new(min_incremental_days: u32) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            min_incremental_days: min_incremental_days.max(1),
        }
    }

    /// Decide how the next load for `symbol` should be issued.
    pub fn plan(&self, symbol: &str, lookback_days: u32, force_full: bool) -> FetchPlan {
        let entries = self.entries.lock().expect("series cache lock poisoned");

        let entry = match entries.get(symbol) {
            Some(e) if !force_full && !e.invalid && !e.bars.is_empty() => e,
            _ => return FetchPlan::Full { days: lookback_days },
        };

        let last = entry.bars[entry.bars.len() - 1].timestamp.date_naive();
        let gap = (Utc::now().date_naive() - last).num_days().max(0) as u32;
        let days = gap.clamp(self.min_incremental_days, lookback_days);
        FetchPlan::Incremental { days }
    }

    /// Merge received bars into the entry for `symbol`.
    ///
    /// Bars are keyed by timestamp; a new bar overwrites an existing bar with
    /// the same key, others are appended, and the result is re-sorted. An
    /// invalidated entry is replaced wholesale by the next merge.
    pub fn apply(&self, symbol: &str, bars: Vec<Bar>) {
        if bars.is_empty() {
            debug!(symbol, "No bars received, cache unchanged");
            return;
        }

        let mut entries = self.entries.lock().expect("series cache lock poisoned");
        let received = bars.len();

        match entries.get_mut(symbol) {
            Some(entry) if !entry.invalid => {
                let mut merged: BTreeMap<DateTime<Utc>, Bar> = entry
                    .bars
                    .drain(..)
                    .map(|b| (b.timestamp, b))
                    .collect();
                for bar in bars {
                    merged.insert(bar.timestamp, bar);
                }
                entry.bars = merged.into_values().collect();
                entry.last_update = Utc::now();
                entry.load_mode = LoadMode::Incremental;
                info!(symbol, received, total = entry.bars.len(), "Merged bars");
            }
            _ => {
                let merged: BTreeMap<DateTime<Utc>, Bar> =
                    bars.into_iter().map(|b| (b.timestamp, b)).collect();
                let bars: Vec<Bar> = merged.into_values().collect();
                info!(symbol, total = bars.len(), "Loaded full series");
                entries.insert(
                    symbol.to_string(),
                    SeriesEntry {
                        bars,
                        last_update: Utc::now(),
                        load_mode: LoadMode::Full,
                        invalid: false,
                    },
                );
            }
        }
    }

    /// Current series for `symbol`, if cached.
    pub fn series(&self, symbol: &str) -> Option<Vec<Bar>> {
        let entries = self.entries.lock().expect("series cache lock poisoned");
        entries.get(symbol).map(|e| e.bars.clone())
    }

    pub fn len(&self, symbol: &str) -> usize {
        let entries = self.entries.lock().expect("series cache lock poisoned");
        entries.get(symbol).map_or(0, |e| e.bars.len())
    }

    /// Mark `symbol` invalid; the next plan is a full load which replaces
    /// the entry.
    pub fn invalidate(&self, symbol: &str) {
        let mut entries = self.entries.lock().expect("series cache lock poisoned");
        if let Some(entry) = entries.get_mut(symbol) {
            entry.invalid = true;
            info!(symbol, "Series cache entry invalidated");
        }
    }
}
