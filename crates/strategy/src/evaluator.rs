//! Voting signal evaluator.
//!
//! Runs a set of independent indicator checks over an instrument's series.
//! Each check that can be evaluated yields a boolean vote with a weight;
//! checks whose lookback exceeds the series (or whose fundamentals are
//! missing) are skipped entirely rather than counted against the total.
//!
//! Entry and exit are mutually exclusive on position existence, so a single
//! evaluation can never produce both.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use optdesk_core::config::{IndicatorConfig, RiskConfig};
use optdesk_core::{Bar, IndicatorVote, Instrument, Position, Signal, SignalDirection};

use crate::indicators;

pub struct SignalEvaluator {
    indicators: IndicatorConfig,
    risk: RiskConfig,
    stop_factor: Decimal,
    take_profit_factor: Decimal,
}

impl SignalEvaluator {
    pub fn new(indicators: IndicatorConfig, risk: RiskConfig) -> Self {
        let stop_factor =
            Decimal::from_f64_retain(1.0 - risk.stop_loss_pct).unwrap_or(Decimal::ONE);
        let take_profit_factor =
            Decimal::from_f64_retain(1.0 + risk.take_profit_pct).unwrap_or(Decimal::ONE);
        Self {
            indicators,
            risk,
            stop_factor,
            take_profit_factor,
        }
    }

    /// Evaluate one instrument. Produces an entry signal when no position is
    /// open and enough checks vote in favor, an exit signal when a position
    /// is open and a terminal predicate holds, and nothing otherwise.
    pub fn evaluate(
        &self,
        instrument: &Instrument,
        bars: &[Bar],
        open_position: Option<&Position>,
    ) -> Option<Signal> {
        if bars.is_empty() {
            return None;
        }
        match open_position {
            None => self.evaluate_entry(instrument, bars),
            Some(position) => self.evaluate_exit(position, bars),
        }
    }

    fn evaluate_entry(&self, instrument: &Instrument, bars: &[Bar]) -> Option<Signal> {
        let cfg = &self.indicators;
        let closes: Vec<f64> = bars
            .iter()
            .map(|b| b.close.to_f64().unwrap_or(0.0))
            .collect();
        let close = bars[bars.len() - 1].close;
        let last = *closes.last()?;

        let mut votes = Vec::new();

        // Trend: short EMA above long EMA.
        if let (Some(short), Some(long)) = (
            indicators::ema(&closes, cfg.ma_short_period),
            indicators::ema(&closes, cfg.ma_long_period),
        ) {
            votes.push(IndicatorVote::new("ema_trend", short > long, 1.0));
        }

        // Oscillator: RSI at or below the oversold threshold.
        if let Some(rsi) = indicators::rsi(&closes, cfg.rsi_period) {
            votes.push(IndicatorVote::new("rsi_oversold", rsi <= cfg.rsi_oversold, 1.0));
        }

        // Momentum: MACD line crossing above its signal line.
        if let Some(macd) =
            indicators::macd(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal)
        {
            votes.push(IndicatorVote::new("macd_cross", macd.bullish_cross(), 1.0));
        }

        // Volatility band: close below the lower Bollinger band.
        if let Some(bands) =
            indicators::bollinger(&closes, cfg.bollinger_period, cfg.bollinger_std_dev)
        {
            votes.push(IndicatorVote::new("bollinger_band", last < bands.lower, 1.0));
        }

        // Proximity to the rolling low.
        if let Some((low, high)) = indicators::rolling_extrema(&closes, cfg.extrema_lookback) {
            let near_low = last <= low + cfg.extrema_proximity * (high - low);
            votes.push(IndicatorVote::new("yearly_low", near_low, 1.0));
        }

        // Valuation: P/E not stretched against the sector median.
        if let (Some(pe), Some(median)) = (instrument.pe_ratio, instrument.sector_pe_median) {
            let ceiling = median
                * Decimal::from_f64_retain(cfg.pe_ratio_multiplier).unwrap_or(Decimal::ONE);
            votes.push(IndicatorVote::new("valuation", pe <= ceiling, 1.0));
        }

        // Cash generation: positive free-cash-flow yield.
        if let Some(fcf) = instrument.fcf_yield {
            votes.push(IndicatorVote::new("fcf_yield", fcf > Decimal::ZERO, 1.0));
        }

        if votes.is_empty() {
            return None;
        }

        let fired: f64 = votes.iter().filter(|v| v.fired).map(|v| v.weight).sum();
        let total: f64 = votes.iter().map(|v| v.weight).sum();
        let fired_count = votes.iter().filter(|v| v.fired).count();

        if fired_count < cfg.min_votes_for_entry {
            debug!(
                symbol = %instrument.symbol,
                fired = fired_count,
                required = cfg.min_votes_for_entry,
                "Not enough affirmative votes"
            );
            return None;
        }

        Some(Signal {
            symbol: instrument.symbol.clone(),
            direction: SignalDirection::Entry,
            confidence: fired / total,
            votes,
            entry_price: close,
            stop_loss: close * self.stop_factor,
            take_profit: close * self.take_profit_factor,
            timestamp: Utc::now(),
        })
    }

    fn evaluate_exit(&self, position: &Position, bars: &[Bar]) -> Option<Signal> {
        let cfg = &self.indicators;
        let last_bar = &bars[bars.len() - 1];
        let close = last_bar.close;
        let closes: Vec<f64> = bars
            .iter()
            .map(|b| b.close.to_f64().unwrap_or(0.0))
            .collect();

        let stop_hit = if position.structure.adverse_move_is_up() {
            close >= position.stop_loss_underlying
        } else {
            close <= position.stop_loss_underlying
        };

        let reversal = indicators::rsi(&closes, cfg.rsi_period)
            .is_some_and(|rsi| rsi >= cfg.rsi_overbought);

        let dte = position.days_to_expiry(last_bar.timestamp.date_naive());
        let dte_close = dte <= self.risk.auto_close_dte
            && (position.pnl() < Decimal::ZERO || self.risk.force_close_profitable_near_expiry);

        let votes = vec![
            IndicatorVote::new("stop_loss", stop_hit, 1.0),
            IndicatorVote::new("rsi_overbought", reversal, 1.0),
            IndicatorVote::new("dte_auto_close", dte_close, 1.0),
        ];

        if !votes.iter().any(|v| v.fired) {
            return None;
        }

        let fired: f64 = votes.iter().filter(|v| v.fired).map(|v| v.weight).sum();
        let total: f64 = votes.iter().map(|v| v.weight).sum();

        Some(Signal {
            symbol: position.symbol.clone(),
            direction: SignalDirection::Exit,
            confidence: fired / total,
            votes,
            entry_price: close,
            stop_loss: position.stop_loss_underlying,
            take_profit: position.take_profit_premium,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use optdesk_core::{OptionRight, PositionStatus, StructureKind};
    use rust_decimal_macros::dec;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let close = Decimal::from_f64_retain(close).unwrap();
                Bar {
                    timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 21, 0, 0).unwrap()
                        + chrono::Duration::days(i as i64),
                    open: close,
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: 1_000,
                }
            })
            .collect()
    }

    /// Steep decline into a short rally: depressed RSI while the fast EMA
    /// pulls back above the slow one.
    fn reversal_closes() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..60).map(|i| 250.0 - 2.0 * i as f64).collect();
        let turn = *closes.last().unwrap();
        closes.extend((1..=8).map(|i| turn + 0.5 * i as f64));
        closes
    }

    fn evaluator(indicators: IndicatorConfig, risk: RiskConfig) -> SignalEvaluator {
        SignalEvaluator::new(indicators, risk)
    }

    #[test]
    fn two_vote_reversal_produces_one_entry_signal() {
        let eval = evaluator(
            IndicatorConfig {
                ma_short_period: 2,
                ma_long_period: 5,
                min_votes_for_entry: 2,
                ..IndicatorConfig::default()
            },
            RiskConfig::default(),
        );
        let bars = bars_from_closes(&reversal_closes());
        let instrument = Instrument::new("AAPL");

        let signal = eval.evaluate(&instrument, &bars, None).expect("entry signal");
        assert_eq!(signal.direction, SignalDirection::Entry);

        let contributing = signal.contributing();
        assert!(contributing.contains(&"ema_trend"), "votes: {contributing:?}");
        assert!(contributing.contains(&"rsi_oversold"), "votes: {contributing:?}");

        // Confidence is the normalized vote sum.
        let fired = signal.votes.iter().filter(|v| v.fired).count() as f64;
        let total = signal.votes.len() as f64;
        assert!((signal.confidence - fired / total).abs() < 1e-12);

        // Stop and target bracket the entry price.
        assert_eq!(signal.entry_price, bars.last().unwrap().close);
        assert!(signal.stop_loss < signal.entry_price);
        assert!(signal.take_profit > signal.entry_price);
    }

    #[test]
    fn below_minimum_votes_yields_no_signal() {
        // Steady uptrend: trend votes yes, everything else no.
        let eval = evaluator(
            IndicatorConfig {
                ma_short_period: 2,
                ma_long_period: 5,
                min_votes_for_entry: 2,
                ..IndicatorConfig::default()
            },
            RiskConfig::default(),
        );
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + 0.5 * i as f64).collect();
        let bars = bars_from_closes(&closes);

        assert!(eval.evaluate(&Instrument::new("AAPL"), &bars, None).is_none());
    }

    #[test]
    fn series_shorter_than_every_lookback_yields_nothing() {
        let eval = evaluator(IndicatorConfig::default(), RiskConfig::default());
        let bars = bars_from_closes(&[100.0, 101.0, 102.0]);
        assert!(eval.evaluate(&Instrument::new("AAPL"), &bars, None).is_none());
    }

    #[test]
    fn missing_fundamentals_skip_valuation_votes() {
        let eval = evaluator(
            IndicatorConfig {
                ma_short_period: 2,
                ma_long_period: 5,
                min_votes_for_entry: 2,
                ..IndicatorConfig::default()
            },
            RiskConfig::default(),
        );
        let bars = bars_from_closes(&reversal_closes());

        let bare = Instrument::new("AAPL");
        let signal = eval.evaluate(&bare, &bars, None).expect("entry signal");
        let names: Vec<_> = signal.votes.iter().map(|v| v.name).collect();
        assert!(!names.contains(&"valuation"));
        assert!(!names.contains(&"fcf_yield"));

        let mut with_fundamentals = Instrument::new("AAPL");
        with_fundamentals.pe_ratio = Some(dec!(18));
        with_fundamentals.sector_pe_median = Some(dec!(20));
        with_fundamentals.fcf_yield = Some(dec!(0.05));
        let signal = eval
            .evaluate(&with_fundamentals, &bars, None)
            .expect("entry signal");
        let names: Vec<_> = signal.votes.iter().map(|v| v.name).collect();
        assert!(names.contains(&"valuation"));
        assert!(names.contains(&"fcf_yield"));
    }

    fn open_call_position(stop: Decimal, expiry: NaiveDate) -> Position {
        Position {
            id: 1,
            symbol: "AAPL".to_string(),
            structure: StructureKind::SingleLegLong {
                right: OptionRight::Call,
                strike: dec!(180),
            },
            expiry,
            entry_premium: dec!(5),
            entry_underlying: dec!(185),
            quantity: 1,
            multiplier: dec!(100),
            stop_loss_underlying: stop,
            take_profit_premium: dec!(7.5),
            auto_close_dte: 10,
            current_premium: dec!(4),
            current_underlying: dec!(184),
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            exit_reason: None,
        }
    }

    #[test]
    fn stop_cross_fires_exit_signal() {
        let eval = evaluator(IndicatorConfig::default(), RiskConfig::default());
        let closes: Vec<f64> = (0..40).map(|i| 190.0 - 0.5 * i as f64).collect();
        let bars = bars_from_closes(&closes);
        // Long call: adverse move is down; final close 170.5 < stop 181.
        let position = open_call_position(dec!(181), NaiveDate::from_ymd_opt(2026, 6, 19).unwrap());

        let signal = eval
            .evaluate(&Instrument::new("AAPL"), &bars, Some(&position))
            .expect("exit signal");
        assert_eq!(signal.direction, SignalDirection::Exit);
        assert!(signal.contributing().contains(&"stop_loss"));
    }

    #[test]
    fn no_exit_while_position_is_healthy() {
        let eval = evaluator(IndicatorConfig::default(), RiskConfig::default());
        // Mild drift well above the stop, RSI mid-range, expiry far away.
        let closes: Vec<f64> = (0..40)
            .map(|i| 185.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let bars = bars_from_closes(&closes);
        let position = open_call_position(dec!(150), NaiveDate::from_ymd_opt(2026, 6, 19).unwrap());

        assert!(eval
            .evaluate(&Instrument::new("AAPL"), &bars, Some(&position))
            .is_none());
    }

    #[test]
    fn near_expiry_unprofitable_position_fires_auto_close() {
        let eval = evaluator(IndicatorConfig::default(), RiskConfig::default());
        let closes: Vec<f64> = (0..40)
            .map(|i| 185.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let bars = bars_from_closes(&closes);
        // Last bar lands on 2025-02-09; expiry five days later, mark under water.
        let expiry = bars.last().unwrap().timestamp.date_naive() + chrono::Duration::days(5);
        let position = open_call_position(dec!(150), expiry);
        assert!(position.pnl() < Decimal::ZERO);

        let signal = eval
            .evaluate(&Instrument::new("AAPL"), &bars, Some(&position))
            .expect("exit signal");
        assert!(signal.contributing().contains(&"dte_auto_close"));
    }

    #[test]
    fn near_expiry_profitable_position_is_left_alone_by_default() {
        let eval = evaluator(IndicatorConfig::default(), RiskConfig::default());
        let closes: Vec<f64> = (0..40)
            .map(|i| 185.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let bars = bars_from_closes(&closes);
        let expiry = bars.last().unwrap().timestamp.date_naive() + chrono::Duration::days(5);
        let mut position = open_call_position(dec!(150), expiry);
        position.current_premium = dec!(6); // profitable

        assert!(eval
            .evaluate(&Instrument::new("AAPL"), &bars, Some(&position))
            .is_none());
    }
}
