//! Shared market-data types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// Options contract right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "C"),
            Self::Put => write!(f, "P"),
        }
    }
}

/// A watchlist instrument with its metadata and valuation fields.
///
/// Mirrors one row of the instruments table. Valuation fields are optional —
/// fundamentals may not have been imported yet for a freshly added symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub enabled: bool,
    pub sector: Option<String>,
    pub pe_ratio: Option<Decimal>,
    /// Median P/E of the instrument's sector, used as the valuation baseline.
    pub sector_pe_median: Option<Decimal>,
    pub fcf_yield: Option<Decimal>,
}

impl Instrument {
    /// A bare instrument with no fundamentals attached.
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            enabled: true,
            sector: None,
            pe_ratio: None,
            sector_pe_median: None,
            fcf_yield: None,
        }
    }
}
