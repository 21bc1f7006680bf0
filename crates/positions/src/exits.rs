//! Exit predicates evaluated against fresh marks.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use optdesk_core::config::RiskConfig;
use optdesk_core::{ExitReason, Position, StructureKind};

/// First exit predicate that holds for `position`, if any.
///
/// Checked in order: expiry, stop-loss on the underlying, take-profit on the
/// premium mark, then the near-expiry auto-close for decaying structures.
/// Closed positions never match.
pub fn check_exit(position: &Position, risk: &RiskConfig, today: NaiveDate) -> Option<ExitReason> {
    if !position.is_open() {
        return None;
    }

    let dte = position.days_to_expiry(today);
    if dte <= 0 {
        return Some(ExitReason::Expired);
    }

    let stop_hit = if position.structure.adverse_move_is_up() {
        position.current_underlying >= position.stop_loss_underlying
    } else {
        position.current_underlying <= position.stop_loss_underlying
    };
    if stop_hit {
        return Some(ExitReason::StopLoss);
    }

    // Long structures take profit as the mark appreciates, short premium
    // structures as it decays.
    let target_hit = match position.structure {
        StructureKind::SingleLegLong { .. } => {
            position.current_premium >= position.take_profit_premium
        }
        StructureKind::SingleLegShort { .. } | StructureKind::CreditSpread { .. } => {
            position.current_premium <= position.take_profit_premium
        }
    };
    if target_hit {
        return Some(ExitReason::TakeProfit);
    }

    if dte <= position.auto_close_dte
        && (position.pnl() < Decimal::ZERO || risk.force_close_profitable_near_expiry)
    {
        return Some(ExitReason::AutoCloseDte);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use optdesk_core::{OptionRight, PositionStatus};
    use rust_decimal_macros::dec;

    fn long_call() -> Position {
        Position {
            id: 1,
            symbol: "AAPL".to_string(),
            structure: StructureKind::SingleLegLong {
                right: OptionRight::Call,
                strike: dec!(180),
            },
            expiry: NaiveDate::from_ymd_opt(2026, 6, 19).unwrap(),
            entry_premium: dec!(5.20),
            entry_underlying: dec!(185),
            quantity: 2,
            multiplier: dec!(100),
            stop_loss_underlying: dec!(181.30),
            take_profit_premium: dec!(7.80),
            auto_close_dte: 10,
            current_premium: dec!(5.20),
            current_underlying: dec!(185),
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            exit_reason: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[test]
    fn healthy_position_has_no_exit() {
        let position = long_call();
        assert_eq!(check_exit(&position, &RiskConfig::default(), today()), None);
    }

    #[test]
    fn underlying_below_stop_exits_long_call() {
        let mut position = long_call();
        position.current_underlying = dec!(181.00);
        assert_eq!(
            check_exit(&position, &RiskConfig::default(), today()),
            Some(ExitReason::StopLoss)
        );
    }

    #[test]
    fn underlying_above_stop_exits_put_structures() {
        let mut position = long_call();
        position.structure = StructureKind::SingleLegLong {
            right: OptionRight::Put,
            strike: dec!(180),
        };
        position.stop_loss_underlying = dec!(188.70);
        position.current_underlying = dec!(189.00);
        assert_eq!(
            check_exit(&position, &RiskConfig::default(), today()),
            Some(ExitReason::StopLoss)
        );
    }

    #[test]
    fn premium_at_target_takes_profit() {
        let mut position = long_call();
        position.current_premium = dec!(7.80);
        assert_eq!(
            check_exit(&position, &RiskConfig::default(), today()),
            Some(ExitReason::TakeProfit)
        );
    }

    #[test]
    fn credit_spread_takes_profit_on_decay() {
        let mut position = long_call();
        position.structure = StructureKind::CreditSpread {
            short_strike: dec!(540),
            long_strike: dec!(545),
            net_credit: dec!(125),
        };
        position.entry_premium = dec!(1.25);
        position.take_profit_premium = dec!(0.40);
        position.stop_loss_underlying = dec!(560);
        position.current_underlying = dec!(530);
        position.current_premium = dec!(0.35);
        assert_eq!(
            check_exit(&position, &RiskConfig::default(), today()),
            Some(ExitReason::TakeProfit)
        );
    }

    #[test]
    fn near_expiry_losing_position_auto_closes() {
        let mut position = long_call();
        position.current_premium = dec!(3.00);
        position.expiry = today() + chrono::Duration::days(5);
        assert_eq!(
            check_exit(&position, &RiskConfig::default(), today()),
            Some(ExitReason::AutoCloseDte)
        );
    }

    #[test]
    fn near_expiry_winner_is_held_unless_configured() {
        let mut position = long_call();
        position.current_premium = dec!(6.00);
        position.expiry = today() + chrono::Duration::days(5);
        assert_eq!(check_exit(&position, &RiskConfig::default(), today()), None);

        let force = RiskConfig {
            force_close_profitable_near_expiry: true,
            ..RiskConfig::default()
        };
        assert_eq!(
            check_exit(&position, &force, today()),
            Some(ExitReason::AutoCloseDte)
        );
    }

    #[test]
    fn expiry_dominates_other_predicates() {
        let mut position = long_call();
        position.current_underlying = dec!(170);
        position.expiry = today();
        assert_eq!(
            check_exit(&position, &RiskConfig::default(), today()),
            Some(ExitReason::Expired)
        );
    }

    #[test]
    fn closed_position_never_matches() {
        let mut position = long_call();
        position.status = PositionStatus::Closed;
        position.current_underlying = dec!(170);
        assert_eq!(check_exit(&position, &RiskConfig::default(), today()), None);
    }
}
