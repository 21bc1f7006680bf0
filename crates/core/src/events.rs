//! Signal and exit events emitted by the scan loop.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::position::ExitReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDirection {
    Entry,
    Exit,
}

/// One indicator check's contribution to a signal decision.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorVote {
    pub name: &'static str,
    pub fired: bool,
    pub weight: f64,
}

impl IndicatorVote {
    pub fn new(name: &'static str, fired: bool, weight: f64) -> Self {
        Self {
            name,
            fired,
            weight,
        }
    }
}

/// A scored trade signal. Immutable once produced; consumed once by the
/// sizer or discarded.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: SignalDirection,
    /// Normalized vote sum in [0, 1].
    pub confidence: f64,
    pub votes: Vec<IndicatorVote>,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// Names of the checks that voted in favor.
    pub fn contributing(&self) -> Vec<&'static str> {
        self.votes
            .iter()
            .filter(|v| v.fired)
            .map(|v| v.name)
            .collect()
    }

    /// Absolute distance between entry and stop level.
    pub fn stop_distance(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }
}

/// Emitted exactly once when a position transitions OPEN -> CLOSED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitEvent {
    pub position_id: i64,
    pub symbol: String,
    pub reason: ExitReason,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub days_to_expiry: i64,
    pub timestamp: DateTime<Utc>,
}
