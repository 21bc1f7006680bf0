//! Gateway request/response types.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use optdesk_core::OptionRight;

/// Identifier issued by the correlator for one outstanding request.
pub type RequestId = u64;

/// What kind of data a gateway request is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Historical daily bars.
    Series,
    /// Fundamentals report (single-fragment).
    Fundamentals,
    /// Option chain descriptors with current marks.
    Chain,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Series => write!(f, "series"),
            Self::Fundamentals => write!(f, "fundamentals"),
            Self::Chain => write!(f, "chain"),
        }
    }
}

/// One option contract from a chain response, with its current marks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDescriptor {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub right: OptionRight,
    pub multiplier: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    /// Last trade on the underlying, carried alongside the chain snapshot.
    pub underlying_last: Option<Decimal>,
}

impl ContractDescriptor {
    /// Midpoint mark, falling back to last when one side is missing.
    pub fn mark(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => self.last,
        }
    }
}

/// Raw fundamentals report for an instrument, one fragment per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsReport {
    pub symbol: String,
    pub pe_ratio: Option<Decimal>,
    pub fcf_yield: Option<Decimal>,
    pub sector: Option<String>,
}
