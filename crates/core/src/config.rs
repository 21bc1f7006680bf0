//! Desk configuration, loaded via figment (TOML + environment).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub risk: RiskConfig,
    pub indicators: IndicatorConfig,
    pub scanner: ScannerConfig,
    pub pacing: PacingConfig,
}

/// TWS/Gateway connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Use 127.0.0.1, not localhost — the gateway may block IPv6.
    pub host: String,
    /// 7497 = paper, 7496 = live.
    pub port: u16,
    pub client_id: i32,
    /// Per-request completion wait in seconds.
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 1,
            request_timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    pub fn paper() -> Self {
        Self::default()
    }

    pub fn live() -> Self {
        Self {
            port: 7496,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/optdesk".to_string(),
            max_connections: 10,
        }
    }
}

/// Risk and sizing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub account_capital: Decimal,
    /// Fraction of capital risked per trade (0.01 = 1%).
    pub risk_per_trade: f64,
    pub max_open_positions: usize,
    pub min_quantity: i64,
    /// Reject new positions that would push cushion below this floor.
    pub cushion_floor: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// DTE at or below which unprofitable decaying structures are closed.
    pub auto_close_dte: i64,
    /// Also force-close profitable structures near expiry (assignment risk).
    pub force_close_profitable_near_expiry: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            account_capital: Decimal::from(100_000),
            risk_per_trade: 0.01,
            max_open_positions: 5,
            min_quantity: 1,
            cushion_floor: 0.10,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.05,
            auto_close_dte: 10,
            force_close_profitable_near_expiry: false,
        }
    }
}

/// Indicator periods and thresholds for the signal evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ma_short_period: usize,
    pub ma_long_period: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,
    /// Lookback for rolling extrema (252 trading days = 52 weeks).
    pub extrema_lookback: usize,
    /// Closeness to an extreme, as a fraction of the 52-week range.
    pub extrema_proximity: f64,
    /// P/E above `sector_pe_median * multiplier` counts as overvalued.
    pub pe_ratio_multiplier: f64,
    /// Minimum affirmative votes for an entry signal.
    pub min_votes_for_entry: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ma_short_period: 20,
            ma_long_period: 50,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
            extrema_lookback: 252,
            extrema_proximity: 0.2,
            pe_ratio_multiplier: 1.5,
            min_votes_for_entry: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub scan_interval_secs: u64,
    /// Full-load lookback (252 trading days = one trading year).
    pub history_days: u32,
    /// Minimum incremental window, to tolerate weekends and holidays.
    pub min_incremental_days: u32,
    /// Static watchlist fallback when no store is attached.
    pub watchlist: Vec<String>,
    /// Timed-out correlator entries older than this are reaped.
    pub stale_request_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 300,
            history_days: 252,
            min_incremental_days: 5,
            watchlist: ["AAPL", "MSFT", "GOOGL", "AMZN", "TSLA"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            stale_request_secs: 300,
        }
    }
}

/// Historical-data pacing windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Series-fetch admissions per rolling window.
    pub series_per_window: u32,
    pub window_secs: u64,
    /// Independent, more generous window for fundamentals and chains.
    pub metadata_per_window: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            series_per_window: 60,
            window_secs: 600,
            metadata_per_window: 600,
        }
    }
}
