//! Postgres store for instrument metadata, positions, and signal history.
//!
//! Tables: `instruments` (watchlist + valuation fields), `positions`
//! (lifecycle rows, structure serialized as JSONB), `signal_history`
//! (audit trail). Every call here is treated as fallible-but-non-fatal by
//! the scan loop — a failed save is logged and the cycle proceeds.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use optdesk_core::{ExitReason, Instrument, Position, PositionStatus, Signal};

/// Load all enabled watchlist instruments.
pub async fn load_instruments(pool: &PgPool) -> Result<Vec<Instrument>> {
    // Runtime query — switch to query_as! after migrations are applied.
    let rows = sqlx::query(
        r#"
        SELECT symbol, enabled, sector, pe_ratio, sector_pe_median, fcf_yield
        FROM instruments
        WHERE enabled = TRUE
        ORDER BY symbol ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut instruments = Vec::with_capacity(rows.len());
    for row in rows {
        instruments.push(Instrument {
            symbol: row.get("symbol"),
            enabled: row.get("enabled"),
            sector: row.get("sector"),
            pe_ratio: row.get("pe_ratio"),
            sector_pe_median: row.get("sector_pe_median"),
            fcf_yield: row.get("fcf_yield"),
        });
    }

    Ok(instruments)
}

/// Load positions still marked open, for seeding the book at startup.
pub async fn load_open_positions(pool: &PgPool) -> Result<Vec<Position>> {
    let rows = sqlx::query(
        r#"
        SELECT id, symbol, structure, expiry, entry_premium, entry_underlying,
               quantity, multiplier, stop_loss_underlying, take_profit_premium,
               auto_close_dte, current_premium, current_underlying, opened_at
        FROM positions
        WHERE status = 'open'
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut positions = Vec::with_capacity(rows.len());
    for row in rows {
        let structure: serde_json::Value = row.get("structure");
        positions.push(Position {
            id: row.get("id"),
            symbol: row.get("symbol"),
            structure: serde_json::from_value(structure)?,
            expiry: row.get("expiry"),
            entry_premium: row.get("entry_premium"),
            entry_underlying: row.get("entry_underlying"),
            quantity: row.get("quantity"),
            multiplier: row.get("multiplier"),
            stop_loss_underlying: row.get("stop_loss_underlying"),
            take_profit_premium: row.get("take_profit_premium"),
            auto_close_dte: row.get("auto_close_dte"),
            current_premium: row.get("current_premium"),
            current_underlying: row.get("current_underlying"),
            status: PositionStatus::Open,
            opened_at: row.get("opened_at"),
            closed_at: None,
            exit_reason: None,
        });
    }

    Ok(positions)
}

/// Insert a newly opened position; returns the synthetic row id.
pub async fn insert_position(pool: &PgPool, position: &Position) -> Result<i64> {
    let structure = serde_json::to_value(&position.structure)?;

    let row = sqlx::query(
        r#"
        INSERT INTO positions (
            symbol, structure, expiry, entry_premium, entry_underlying,
            quantity, multiplier, stop_loss_underlying, take_profit_premium,
            auto_close_dte, current_premium, current_underlying, status, opened_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'open', $13)
        RETURNING id
        "#,
    )
    .bind(&position.symbol)
    .bind(structure)
    .bind(position.expiry)
    .bind(position.entry_premium)
    .bind(position.entry_underlying)
    .bind(position.quantity)
    .bind(position.multiplier)
    .bind(position.stop_loss_underlying)
    .bind(position.take_profit_premium)
    .bind(position.auto_close_dte)
    .bind(position.current_premium)
    .bind(position.current_underlying)
    .bind(position.opened_at)
    .fetch_one(pool)
    .await?;

    Ok(row.get("id"))
}

/// Write back current marks and P&L after a revaluation.
pub async fn update_position_marks(pool: &PgPool, position: &Position) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE positions
        SET current_premium = $2, current_underlying = $3, pnl = $4
        WHERE id = $1
        "#,
    )
    .bind(position.id)
    .bind(position.current_premium)
    .bind(position.current_underlying)
    .bind(position.pnl())
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a position closed with its exit reason.
pub async fn close_position(
    pool: &PgPool,
    position_id: i64,
    reason: ExitReason,
    closed_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE positions
        SET status = 'closed', exit_reason = $2, closed_at = $3
        WHERE id = $1
        "#,
    )
    .bind(position_id)
    .bind(reason.to_string())
    .bind(closed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Append a signal to the audit history.
pub async fn record_signal(pool: &PgPool, signal: &Signal) -> Result<()> {
    let direction = match signal.direction {
        optdesk_core::SignalDirection::Entry => "entry",
        optdesk_core::SignalDirection::Exit => "exit",
    };

    sqlx::query(
        r#"
        INSERT INTO signal_history (
            symbol, direction, confidence, entry_price, stop_loss,
            take_profit, contributing, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&signal.symbol)
    .bind(direction)
    .bind(signal.confidence)
    .bind(signal.entry_price)
    .bind(signal.stop_loss)
    .bind(signal.take_profit)
    .bind(signal.contributing().join(" + "))
    .bind(signal.timestamp)
    .execute(pool)
    .await?;

    Ok(())
}
