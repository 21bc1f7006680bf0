//! Position lifecycle book.
//!
//! Owns the set of positions. Positions are created on acceptance of a
//! sized signal, mutated only by revaluation, and never deleted — closing
//! is a terminal state transition. The portfolio cushion is always derived
//! from the live open set, never stored.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};

use optdesk_core::config::RiskConfig;
use optdesk_core::{ExitEvent, ExitReason, Position, PositionStatus, StructureKind};

use crate::exits;
use crate::sizing::SizingRejection;

/// On-demand aggregate over the open position set.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    pub capital: Decimal,
    pub committed_risk: Decimal,
    /// (capital − committed risk) / capital.
    pub cushion: Decimal,
    pub open_positions: usize,
}

/// Everything needed to register a new position after sizing.
#[derive(Debug, Clone)]
pub struct PositionDraft {
    pub symbol: String,
    pub structure: StructureKind,
    pub expiry: NaiveDate,
    pub entry_premium: Decimal,
    pub entry_underlying: Decimal,
    pub quantity: i32,
    pub multiplier: Decimal,
    pub stop_loss_underlying: Decimal,
    pub take_profit_premium: Decimal,
}

pub struct PositionBook {
    risk: RiskConfig,
    positions: Mutex<Vec<Position>>,
    next_id: AtomicI64,
}

impl PositionBook {
    pub fn new(risk: RiskConfig) -> Self {
        Self {
            risk,
            positions: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Seed the book from persisted rows at startup.
    pub fn restore(&self, positions: Vec<Position>) {
        let mut max_id = self.next_id.load(Ordering::Relaxed);
        let mut book = self.positions.lock().expect("position book lock poisoned");
        for position in positions {
            max_id = max_id.max(position.id + 1);
            book.push(position);
        }
        self.next_id.store(max_id, Ordering::Relaxed);
    }

    /// Register a sized position.
    ///
    /// The duplicate and cushion invariants are rechecked under the book
    /// lock: sizing ran against a snapshot that may be stale by commit time.
    pub fn open(&self, draft: PositionDraft) -> Result<Position, SizingRejection> {
        let mut book = self.positions.lock().expect("position book lock poisoned");

        let strikes = draft.structure.strikes();
        if book
            .iter()
            .any(|p| p.is_open() && p.same_structure(&draft.symbol, &strikes, draft.expiry))
        {
            return Err(SizingRejection::DuplicatePosition {
                symbol: draft.symbol,
            });
        }

        let open = book.iter().filter(|p| p.is_open()).count();
        if open >= self.risk.max_open_positions {
            return Err(SizingRejection::MaxPositionsReached {
                open,
                maximum: self.risk.max_open_positions,
            });
        }

        let position = Position {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            symbol: draft.symbol,
            structure: draft.structure,
            expiry: draft.expiry,
            entry_premium: draft.entry_premium,
            entry_underlying: draft.entry_underlying,
            quantity: draft.quantity,
            multiplier: draft.multiplier,
            stop_loss_underlying: draft.stop_loss_underlying,
            take_profit_premium: draft.take_profit_premium,
            auto_close_dte: self.risk.auto_close_dte,
            current_premium: draft.entry_premium,
            current_underlying: draft.entry_underlying,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            exit_reason: None,
        };

        let committed: Decimal = book
            .iter()
            .filter(|p| p.is_open())
            .map(Position::max_risk)
            .sum();
        let projected = committed + position.max_risk();
        if !self.risk.account_capital.is_zero() {
            let cushion = (self.risk.account_capital - projected) / self.risk.account_capital;
            let floor =
                Decimal::from_f64_retain(self.risk.cushion_floor).unwrap_or(Decimal::ZERO);
            if cushion < floor {
                return Err(SizingRejection::CushionBreach {
                    projected_cushion: cushion.to_f64().unwrap_or(0.0),
                    floor: self.risk.cushion_floor,
                });
            }
        }

        info!(
            id = position.id,
            symbol = %position.symbol,
            quantity = position.quantity,
            max_risk = %position.max_risk(),
            "Position opened"
        );
        book.push(position.clone());
        Ok(position)
    }

    /// Apply fresh marks to a position and run the exit predicates.
    ///
    /// Returns the exit event on an OPEN → CLOSED transition; revaluing an
    /// already-closed position is a no-op.
    pub fn revalue(
        &self,
        position_id: i64,
        premium: Decimal,
        underlying: Decimal,
        today: NaiveDate,
    ) -> Option<ExitEvent> {
        let mut book = self.positions.lock().expect("position book lock poisoned");
        let position = book.iter_mut().find(|p| p.id == position_id)?;
        if !position.is_open() {
            return None;
        }

        position.current_premium = premium;
        position.current_underlying = underlying;

        let reason = exits::check_exit(position, &self.risk, today)?;
        Some(Self::close(position, reason, today))
    }

    /// Close for an externally determined reason (operator action, indicator
    /// reversal). No-op when the position is already closed.
    pub fn close_with(
        &self,
        position_id: i64,
        reason: ExitReason,
        today: NaiveDate,
    ) -> Option<ExitEvent> {
        let mut book = self.positions.lock().expect("position book lock poisoned");
        let position = book.iter_mut().find(|p| p.id == position_id)?;
        if !position.is_open() {
            warn!(id = position_id, "Close of already-closed position ignored");
            return None;
        }
        Some(Self::close(position, reason, today))
    }

    /// Operator-issued close.
    pub fn close_manual(&self, position_id: i64, today: NaiveDate) -> Option<ExitEvent> {
        self.close_with(position_id, ExitReason::Manual, today)
    }

    fn close(position: &mut Position, reason: ExitReason, today: NaiveDate) -> ExitEvent {
        position.status = PositionStatus::Closed;
        position.closed_at = Some(Utc::now());
        position.exit_reason = Some(reason);
        info!(
            id = position.id,
            symbol = %position.symbol,
            %reason,
            pnl = %position.pnl(),
            "Position closed"
        );
        ExitEvent {
            position_id: position.id,
            symbol: position.symbol.clone(),
            reason,
            pnl: position.pnl(),
            pnl_pct: position.pnl_pct(),
            days_to_expiry: position.days_to_expiry(today),
            timestamp: Utc::now(),
        }
    }

    /// Cushion and committed risk derived from the live open set.
    pub fn snapshot(&self) -> PortfolioSnapshot {
        let book = self.positions.lock().expect("position book lock poisoned");
        let committed: Decimal = book
            .iter()
            .filter(|p| p.is_open())
            .map(Position::max_risk)
            .sum();
        let cushion = if self.risk.account_capital.is_zero() {
            Decimal::ZERO
        } else {
            (self.risk.account_capital - committed) / self.risk.account_capital
        };
        PortfolioSnapshot {
            capital: self.risk.account_capital,
            committed_risk: committed,
            cushion,
            open_positions: book.iter().filter(|p| p.is_open()).count(),
        }
    }

    pub fn open_position_for(&self, symbol: &str) -> Option<Position> {
        let book = self.positions.lock().expect("position book lock poisoned");
        book.iter()
            .find(|p| p.is_open() && p.symbol == symbol)
            .cloned()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        let book = self.positions.lock().expect("position book lock poisoned");
        book.iter().filter(|p| p.is_open()).cloned().collect()
    }

    pub fn all_positions(&self) -> Vec<Position> {
        self.positions
            .lock()
            .expect("position book lock poisoned")
            .clone()
    }
}
