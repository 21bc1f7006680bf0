//! Gateway request pacing.
//!
//! The broker admits at most N historical-series requests per rolling
//! window (60 per 10 minutes for daily bars); exceeding it triggers a
//! pacing violation and a forced disconnect. The pacer sits in front of
//! every outbound request and delays, never rejects, once the budget for
//! the current window is spent.
//!
//! Implemented as an admission log: the timestamps of the last N grants
//! are kept, and the next caller sleeps until the oldest one falls out of
//! the window. A quiet desk can issue the whole budget back to back; no
//! rolling window ever sees more than N admissions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::warn;

use optdesk_core::config::PacingConfig;

/// Thread-safe pacer with separate budgets for series loads and
/// metadata lookups (fundamentals, chains). Clone to share.
#[derive(Clone)]
pub struct RequestPacer {
    series: Arc<AdmissionWindow>,
    metadata: Arc<AdmissionWindow>,
}

struct AdmissionWindow {
    window: Duration,
    budget: usize,
    admissions: Mutex<VecDeque<Instant>>,
}

impl AdmissionWindow {
    fn new(budget: u32, window_secs: u64) -> Self {
        let budget = budget.max(1) as usize;
        Self {
            window: Duration::from_secs(window_secs.max(1)),
            budget,
            admissions: Mutex::new(VecDeque::with_capacity(budget)),
        }
    }

    /// Block until a slot opens, then record the admission.
    ///
    /// The lock is never held across the sleep; concurrent waiters race for
    /// the freed slot and the losers go back to sleep on the next oldest
    /// admission.
    async fn admit(&self) {
        loop {
            let wait_until = {
                let mut log = self.admissions.lock().expect("pacer lock poisoned");
                let now = Instant::now();
                Self::prune(&mut log, now, self.window);
                if log.len() < self.budget {
                    log.push_back(now);
                    return;
                }
                match log.front() {
                    Some(&oldest) => oldest + self.window,
                    None => now,
                }
            };
            sleep_until(wait_until).await;
        }
    }

    fn slot_available(&self) -> bool {
        let mut log = self.admissions.lock().expect("pacer lock poisoned");
        Self::prune(&mut log, Instant::now(), self.window);
        log.len() < self.budget
    }

    fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while log
            .front()
            .is_some_and(|&oldest| now.duration_since(oldest) >= window)
        {
            log.pop_front();
        }
    }
}

impl RequestPacer {
    pub fn new(config: &PacingConfig) -> Self {
        Self {
            series: Arc::new(AdmissionWindow::new(
                config.series_per_window,
                config.window_secs,
            )),
            metadata: Arc::new(AdmissionWindow::new(
                config.metadata_per_window,
                config.window_secs,
            )),
        }
    }

    /// Wait for a series-request slot.
    pub async fn acquire_series(&self) {
        if !self.series.slot_available() {
            warn!("Series request budget exhausted, pacing");
        }
        self.series.admit().await;
    }

    /// Wait for a fundamentals/chain slot.
    pub async fn acquire_metadata(&self) {
        self.metadata.admit().await;
    }

    /// Whether a series slot is available right now. Does not consume one.
    pub fn series_slot_available(&self) -> bool {
        self.series.slot_available()
    }
}

impl Default for RequestPacer {
    fn default() -> Self {
        Self::new(&PacingConfig::default())
    }
}

impl std::fmt::Debug for RequestPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPacer").finish_non_exhaustive()
    }
}
