//! Risk-budget position sizing.
//!
//! Sizing is a pure function of its inputs; nothing is committed until the
//! caller registers the position with the book. Rejection checks run in a
//! fixed order so the reported reason is deterministic.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use optdesk_core::config::RiskConfig;
use optdesk_core::{Position, Signal, StructureKind};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SizingRejection {
    #[error("stop distance is zero; cannot derive a quantity")]
    ZeroStopDistance,
    #[error("sized quantity {quantity} is below the minimum {minimum}")]
    BelowMinimumQuantity { quantity: i64, minimum: i64 },
    #[error("an open position already exists for {symbol} with the same strikes and expiry")]
    DuplicatePosition { symbol: String },
    #[error("open position count {open} is at the maximum {maximum}")]
    MaxPositionsReached { open: usize, maximum: usize },
    #[error("projected cushion {projected_cushion:.4} is below the floor {floor:.4}")]
    CushionBreach { projected_cushion: f64, floor: f64 },
    #[error("projected risk {projected_risk} exceeds account capital {capital}")]
    InsufficientCapital {
        projected_risk: Decimal,
        capital: Decimal,
    },
}

/// Candidate structure being sized against a signal.
#[derive(Debug, Clone)]
pub struct SizingRequest<'a> {
    pub signal: &'a Signal,
    pub structure: &'a StructureKind,
    pub expiry: NaiveDate,
    /// Contract multiplier (100 for standard US equity options).
    pub multiplier: Decimal,
    /// Capital at risk for one contract of this structure.
    pub per_contract_risk: Decimal,
}

/// Convert a risk budget and stop distance into a contract quantity.
///
/// `quantity = floor(capital * risk_fraction / (stop_distance * multiplier))`,
/// then portfolio limits are applied in order: minimum quantity, duplicate
/// guard, position-count ceiling, cushion floor, capital ceiling.
pub fn size(
    request: &SizingRequest<'_>,
    risk: &RiskConfig,
    open_positions: &[Position],
) -> Result<i32, SizingRejection> {
    let stop_distance = request.signal.stop_distance();
    if stop_distance.is_zero() {
        return Err(SizingRejection::ZeroStopDistance);
    }

    let risk_fraction =
        Decimal::from_f64_retain(risk.risk_per_trade).unwrap_or(Decimal::ZERO);
    let budget = risk.account_capital * risk_fraction;
    let quantity = (budget / (stop_distance * request.multiplier))
        .floor()
        .to_i64()
        .unwrap_or(0);

    if quantity < risk.min_quantity {
        return Err(SizingRejection::BelowMinimumQuantity {
            quantity,
            minimum: risk.min_quantity,
        });
    }

    let strikes = request.structure.strikes();
    let duplicate = open_positions.iter().any(|p| {
        p.is_open() && p.same_structure(&request.signal.symbol, &strikes, request.expiry)
    });
    if duplicate {
        return Err(SizingRejection::DuplicatePosition {
            symbol: request.signal.symbol.clone(),
        });
    }

    let open = open_positions.iter().filter(|p| p.is_open()).count();
    if open >= risk.max_open_positions {
        return Err(SizingRejection::MaxPositionsReached {
            open,
            maximum: risk.max_open_positions,
        });
    }

    let committed: Decimal = open_positions
        .iter()
        .filter(|p| p.is_open())
        .map(Position::max_risk)
        .sum();
    let added = request.per_contract_risk * Decimal::from(quantity);
    let projected = committed + added;

    if !risk.account_capital.is_zero() {
        let cushion = (risk.account_capital - projected) / risk.account_capital;
        let cushion = cushion.to_f64().unwrap_or(0.0);
        if cushion < risk.cushion_floor {
            return Err(SizingRejection::CushionBreach {
                projected_cushion: cushion,
                floor: risk.cushion_floor,
            });
        }
    }

    if projected > risk.account_capital {
        return Err(SizingRejection::InsufficientCapital {
            projected_risk: projected,
            capital: risk.account_capital,
        });
    }

    Ok(i32::try_from(quantity).unwrap_or(i32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use optdesk_core::{OptionRight, PositionStatus, SignalDirection};
    use rust_decimal_macros::dec;

    fn signal(entry: Decimal, stop: Decimal) -> Signal {
        Signal {
            symbol: "AAPL".to_string(),
            direction: SignalDirection::Entry,
            confidence: 0.5,
            votes: Vec::new(),
            entry_price: entry,
            stop_loss: stop,
            take_profit: entry * dec!(1.05),
            timestamp: Utc::now(),
        }
    }

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 19).unwrap()
    }

    fn structure() -> StructureKind {
        StructureKind::SingleLegLong {
            right: OptionRight::Call,
            strike: dec!(180),
        }
    }

    fn open_position(symbol: &str, entry_premium: Decimal, quantity: i32) -> Position {
        Position {
            id: 1,
            symbol: symbol.to_string(),
            structure: StructureKind::SingleLegLong {
                right: OptionRight::Put,
                strike: dec!(500),
            },
            expiry: NaiveDate::from_ymd_opt(2026, 9, 18).unwrap(),
            entry_premium,
            entry_underlying: dec!(510),
            quantity,
            multiplier: dec!(100),
            stop_loss_underlying: dec!(520),
            take_profit_premium: entry_premium * dec!(2),
            auto_close_dte: 10,
            current_premium: entry_premium,
            current_underlying: dec!(510),
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            exit_reason: None,
        }
    }

    #[test]
    fn quantity_is_floor_of_budget_over_adjusted_stop_distance() {
        // 100_000 * 0.01 = 1_000 budget; stop distance 4 * 100 multiplier
        // = 400 per contract; floor(1000 / 400) = 2.
        let structure = structure();
        let signal = signal(dec!(185), dec!(181));
        let request = SizingRequest {
            signal: &signal,
            structure: &structure,
            expiry: expiry(),
            multiplier: dec!(100),
            per_contract_risk: dec!(520),
        };
        assert_eq!(size(&request, &RiskConfig::default(), &[]), Ok(2));
    }

    #[test]
    fn zero_stop_distance_is_rejected_regardless_of_capital() {
        let structure = structure();
        let signal = signal(dec!(185), dec!(185));
        let request = SizingRequest {
            signal: &signal,
            structure: &structure,
            expiry: expiry(),
            multiplier: dec!(100),
            per_contract_risk: dec!(520),
        };
        let risk = RiskConfig {
            account_capital: Decimal::from(10_000_000),
            ..RiskConfig::default()
        };
        assert_eq!(size(&request, &risk, &[]), Err(SizingRejection::ZeroStopDistance));
    }

    #[test]
    fn tiny_budget_rejects_below_minimum_quantity() {
        let structure = structure();
        let signal = signal(dec!(185), dec!(181));
        let request = SizingRequest {
            signal: &signal,
            structure: &structure,
            expiry: expiry(),
            multiplier: dec!(100),
            per_contract_risk: dec!(520),
        };
        let risk = RiskConfig {
            account_capital: Decimal::from(10_000),
            ..RiskConfig::default()
        };
        // Budget 100, per-contract stop risk 400 -> quantity 0.
        assert!(matches!(
            size(&request, &risk, &[]),
            Err(SizingRejection::BelowMinimumQuantity { quantity: 0, .. })
        ));
    }

    #[test]
    fn duplicate_structure_is_rejected() {
        let structure = structure();
        let signal = signal(dec!(185), dec!(181));
        let request = SizingRequest {
            signal: &signal,
            structure: &structure,
            expiry: expiry(),
            multiplier: dec!(100),
            per_contract_risk: dec!(520),
        };

        let mut existing = open_position("AAPL", dec!(5), 1);
        existing.structure = structure.clone();
        existing.expiry = expiry();

        assert_eq!(
            size(&request, &RiskConfig::default(), &[existing]),
            Err(SizingRejection::DuplicatePosition {
                symbol: "AAPL".to_string()
            })
        );
    }

    #[test]
    fn position_ceiling_is_enforced() {
        let structure = structure();
        let signal = signal(dec!(185), dec!(181));
        let request = SizingRequest {
            signal: &signal,
            structure: &structure,
            expiry: expiry(),
            multiplier: dec!(100),
            per_contract_risk: dec!(520),
        };
        let risk = RiskConfig {
            max_open_positions: 1,
            cushion_floor: 0.0,
            ..RiskConfig::default()
        };
        let existing = open_position("MSFT", dec!(5), 1);
        assert!(matches!(
            size(&request, &risk, &[existing]),
            Err(SizingRejection::MaxPositionsReached { open: 1, maximum: 1 })
        ));
    }

    #[test]
    fn cushion_floor_rejects_marginal_position() {
        // Capital 100_000, committed risk 85_000, new position adds 6_000:
        // projected cushion (100_000 - 91_000) / 100_000 = 0.09 < 0.10.
        let structure = structure();
        let signal = signal(dec!(185), dec!(175));
        let request = SizingRequest {
            signal: &signal,
            structure: &structure,
            expiry: expiry(),
            multiplier: dec!(100),
            per_contract_risk: dec!(6000),
        };
        // Budget 1000 / (10 * 100) = quantity 1.
        let existing = open_position("MSFT", dec!(85), 10); // 85 * 100 * 10 = 85_000
        let result = size(&request, &RiskConfig::default(), &[existing]);
        match result {
            Err(SizingRejection::CushionBreach {
                projected_cushion, ..
            }) => assert!((projected_cushion - 0.09).abs() < 1e-9),
            other => panic!("expected cushion breach, got {other:?}"),
        }
    }

    #[test]
    fn closed_positions_do_not_count_against_limits() {
        let structure = structure();
        let signal = signal(dec!(185), dec!(181));
        let request = SizingRequest {
            signal: &signal,
            structure: &structure,
            expiry: expiry(),
            multiplier: dec!(100),
            per_contract_risk: dec!(520),
        };
        let risk = RiskConfig {
            max_open_positions: 1,
            ..RiskConfig::default()
        };
        let mut closed = open_position("MSFT", dec!(85), 10);
        closed.status = PositionStatus::Closed;
        assert_eq!(size(&request, &risk, &[closed]), Ok(2));
    }

    #[test]
    fn insufficient_capital_with_no_cushion_floor() {
        let structure = structure();
        let signal = signal(dec!(185), dec!(181));
        let request = SizingRequest {
            signal: &signal,
            structure: &structure,
            expiry: expiry(),
            multiplier: dec!(100),
            // One contract of risk already exceeds the whole account.
            per_contract_risk: dec!(30_000),
        };
        let risk = RiskConfig {
            account_capital: Decimal::from(50_000),
            risk_per_trade: 0.02,
            cushion_floor: -1.0,
            ..RiskConfig::default()
        };
        // Budget 1000 / 400 = quantity 2; projected risk 60_000 > 50_000.
        assert!(matches!(
            size(&request, &risk, &[]),
            Err(SizingRejection::InsufficientCapital { .. })
        ));
    }
}
