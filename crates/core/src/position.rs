//! Options positions with structure-aware P&L and risk math.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::OptionRight;

/// The shape of a position.
///
/// Premiums on the position are quoted per share; `net_credit` on a spread is
/// the total credit received per contract in dollars (strike width is in
/// underlying points, so max risk is `width * multiplier - net_credit`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructureKind {
    SingleLegLong {
        right: OptionRight,
        strike: Decimal,
    },
    SingleLegShort {
        right: OptionRight,
        strike: Decimal,
    },
    CreditSpread {
        short_strike: Decimal,
        long_strike: Decimal,
        net_credit: Decimal,
    },
}

impl StructureKind {
    /// Strikes that identify the structure, for the duplicate-position guard.
    pub fn strikes(&self) -> Vec<Decimal> {
        match self {
            Self::SingleLegLong { strike, .. } | Self::SingleLegShort { strike, .. } => {
                vec![*strike]
            }
            Self::CreditSpread {
                short_strike,
                long_strike,
                ..
            } => vec![*short_strike, *long_strike],
        }
    }

    /// Whether an adverse underlying move is upward (puts, bear spreads) or
    /// downward (calls).
    pub fn adverse_move_is_up(&self) -> bool {
        match self {
            Self::SingleLegLong { right, .. } | Self::SingleLegShort { right, .. } => {
                matches!(right, OptionRight::Put)
            }
            Self::CreditSpread { .. } => true,
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    AutoCloseDte,
    Expired,
    IndicatorReversal,
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop_loss"),
            Self::TakeProfit => write!(f, "take_profit"),
            Self::AutoCloseDte => write!(f, "auto_close_dte"),
            Self::Expired => write!(f, "expired"),
            Self::IndicatorReversal => write!(f, "indicator_reversal"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// An options position tracked by the lifecycle book.
///
/// Created on acceptance of a sized signal; mutated only by revaluation;
/// never deleted — closing transitions it to the terminal CLOSED state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub symbol: String,
    pub structure: StructureKind,
    pub expiry: NaiveDate,
    /// Premium per share at entry.
    pub entry_premium: Decimal,
    pub entry_underlying: Decimal,
    pub quantity: i32,
    /// Contract multiplier (100 for standard US equity options).
    pub multiplier: Decimal,
    /// Underlying level that invalidates the thesis.
    pub stop_loss_underlying: Decimal,
    /// Premium level at which profit is taken.
    pub take_profit_premium: Decimal,
    /// Close at or below this many days to expiry while unprofitable.
    pub auto_close_dte: i64,
    pub current_premium: Decimal,
    pub current_underlying: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    /// Calendar days until expiration as of `today`.
    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry - today).num_days()
    }

    /// Mark-to-market P&L for the structure.
    pub fn pnl(&self) -> Decimal {
        let qty = Decimal::from(self.quantity);
        match &self.structure {
            StructureKind::SingleLegLong { .. } => {
                (self.current_premium - self.entry_premium) * self.multiplier * qty
            }
            // Short legs and credit spreads profit when the mark decays.
            StructureKind::SingleLegShort { .. } | StructureKind::CreditSpread { .. } => {
                (self.entry_premium - self.current_premium) * self.multiplier * qty
            }
        }
    }

    /// P&L as a percentage of max risk.
    pub fn pnl_pct(&self) -> Decimal {
        let max_risk = self.max_risk();
        if max_risk.is_zero() {
            return Decimal::ZERO;
        }
        (self.pnl() / max_risk) * Decimal::from(100)
    }

    /// Capital at risk for the structure, the unit of cushion accounting.
    pub fn max_risk(&self) -> Decimal {
        let qty = Decimal::from(self.quantity);
        match &self.structure {
            StructureKind::SingleLegLong { .. } => self.entry_premium * self.multiplier * qty,
            // Collateral-style bound for a cash-secured short leg.
            StructureKind::SingleLegShort { strike, .. } => {
                ((*strike - self.entry_premium) * self.multiplier).max(Decimal::ZERO) * qty
            }
            StructureKind::CreditSpread {
                short_strike,
                long_strike,
                net_credit,
            } => {
                let width = (*long_strike - *short_strike).abs();
                (width * self.multiplier - *net_credit).max(Decimal::ZERO) * qty
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// True when this position and the candidate share instrument and
    /// structure-identifying strikes/expiry.
    pub fn same_structure(&self, symbol: &str, strikes: &[Decimal], expiry: NaiveDate) -> bool {
        self.symbol == symbol && self.expiry == expiry && self.structure.strikes() == strikes
    }
}
