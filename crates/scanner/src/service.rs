//! The scan loop: fetch, evaluate, size, commit, revalue.
//!
//! One cycle walks the watchlist through the fetch→evaluate→size pipeline,
//! then revalues every open position against fresh chain marks, then reaps
//! stale correlator entries. Persistence is fallible-but-non-fatal: a failed
//! save is logged and the cycle continues.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use optdesk_core::config::DeskConfig;
use optdesk_core::{
    ExitReason, Instrument, OptionRight, Position, Signal, SignalDirection, StructureKind,
};
use optdesk_data::store;
use optdesk_gateway::{ContractDescriptor, MarketDataService};
use optdesk_positions::{sizing, PositionBook, PositionDraft, SizingRequest};
use optdesk_strategy::SignalEvaluator;

use crate::events::{EventBus, EventStreams};

pub struct ScannerService {
    config: DeskConfig,
    market_data: Arc<MarketDataService>,
    evaluator: SignalEvaluator,
    book: Arc<PositionBook>,
    pool: Option<PgPool>,
    bus: EventBus,
}

impl ScannerService {
    pub fn new(
        config: DeskConfig,
        market_data: Arc<MarketDataService>,
        book: Arc<PositionBook>,
        pool: Option<PgPool>,
    ) -> (Self, EventStreams) {
        let (bus, streams) = EventBus::new();
        let evaluator = SignalEvaluator::new(config.indicators.clone(), config.risk.clone());
        (
            Self {
                config,
                market_data,
                evaluator,
                book,
                pool,
                bus,
            },
            streams,
        )
    }

    /// On-demand aggregate over the open position set.
    pub fn portfolio_snapshot(&self) -> optdesk_positions::PortfolioSnapshot {
        self.book.snapshot()
    }

    pub fn list_open_positions(&self) -> Vec<Position> {
        self.book.open_positions()
    }

    /// Seed the book from the store, then scan on the configured interval.
    pub async fn run(&self) -> Result<()> {
        if let Some(pool) = &self.pool {
            match store::load_open_positions(pool).await {
                Ok(positions) => {
                    info!(count = positions.len(), "Restored open positions");
                    self.book.restore(positions);
                }
                Err(err) => warn!(%err, "Could not restore positions, starting empty"),
            }
        }

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.scanner.scan_interval_secs));
        loop {
            interval.tick().await;
            if let Err(err) = self.run_cycle().await {
                error!(%err, "Scan cycle failed");
            }
        }
    }

    /// One full scan cycle.
    pub async fn run_cycle(&self) -> Result<()> {
        let today = Utc::now().date_naive();
        let instruments = self.watchlist().await;
        info!(instruments = instruments.len(), "Scan cycle started");

        for instrument in &instruments {
            self.scan_instrument(instrument, today).await;
        }

        self.revalue_positions(today).await;

        let purged = self
            .market_data
            .purge_stale_requests(Duration::from_secs(self.config.scanner.stale_request_secs));
        if purged > 0 {
            warn!(purged, "Reaped stale gateway requests");
        }
        Ok(())
    }

    async fn watchlist(&self) -> Vec<Instrument> {
        if let Some(pool) = &self.pool {
            match store::load_instruments(pool).await {
                Ok(instruments) if !instruments.is_empty() => return instruments,
                Ok(_) => debug!("Instrument table empty, using static watchlist"),
                Err(err) => warn!(%err, "Instrument load failed, using static watchlist"),
            }
        }
        self.config
            .scanner
            .watchlist
            .iter()
            .map(|s| Instrument::new(s))
            .collect()
    }

    async fn scan_instrument(&self, instrument: &Instrument, today: NaiveDate) {
        let bars = match self
            .market_data
            .fetch_series(&instrument.symbol, self.config.scanner.history_days, false)
            .await
        {
            Ok(bars) => bars,
            Err(err) => {
                warn!(symbol = %instrument.symbol, %err, "Series fetch failed, skipping");
                return;
            }
        };

        let instrument = self.with_fundamentals(instrument).await;
        let open = self.book.open_position_for(&instrument.symbol);
        let Some(signal) = self.evaluator.evaluate(&instrument, &bars, open.as_ref()) else {
            return;
        };

        info!(
            symbol = %signal.symbol,
            direction = ?signal.direction,
            confidence = signal.confidence,
            contributing = ?signal.contributing(),
            "Signal produced"
        );
        if let Some(pool) = &self.pool {
            if let Err(err) = store::record_signal(pool, &signal).await {
                warn!(%err, "Signal history write failed");
            }
        }

        match signal.direction {
            SignalDirection::Entry => self.open_from_signal(&signal, today).await,
            SignalDirection::Exit => {
                if let Some(position) = open {
                    self.exit_from_signal(&position, &signal, today).await;
                }
            }
        }
        self.bus.publish_signal(signal);
    }

    /// Backfill valuation fields from the gateway when the instrument row
    /// carries none, so the fundamentals votes are not skipped for symbols
    /// that were never imported. A failed refresh is not fatal; the
    /// evaluator simply skips those votes.
    async fn with_fundamentals(&self, instrument: &Instrument) -> Instrument {
        let mut instrument = instrument.clone();
        if instrument.pe_ratio.is_some() || instrument.fcf_yield.is_some() {
            return instrument;
        }
        match self.market_data.fetch_fundamentals(&instrument.symbol).await {
            Ok(report) => {
                instrument.pe_ratio = report.pe_ratio;
                instrument.fcf_yield = report.fcf_yield;
                if instrument.sector.is_none() {
                    instrument.sector = report.sector;
                }
            }
            Err(err) => {
                debug!(symbol = %instrument.symbol, %err, "Fundamentals refresh failed")
            }
        }
        instrument
    }

    /// Size the signal against a concrete contract and commit on acceptance.
    async fn open_from_signal(&self, signal: &Signal, today: NaiveDate) {
        let chain = match self.market_data.fetch_chain(&signal.symbol).await {
            Ok(chain) => chain,
            Err(err) => {
                warn!(symbol = %signal.symbol, %err, "Chain fetch failed, signal dropped");
                return;
            }
        };

        let Some(contract) = self.select_entry_contract(&chain, signal.entry_price, today) else {
            debug!(symbol = %signal.symbol, "No eligible contract in chain");
            return;
        };
        let Some(premium) = contract.mark() else {
            debug!(symbol = %signal.symbol, "Selected contract has no usable mark");
            return;
        };

        let structure = StructureKind::SingleLegLong {
            right: contract.right,
            strike: contract.strike,
        };
        let request = SizingRequest {
            signal,
            structure: &structure,
            expiry: contract.expiry,
            multiplier: contract.multiplier,
            per_contract_risk: premium * contract.multiplier,
        };
        let quantity = match sizing::size(&request, &self.config.risk, &self.book.open_positions())
        {
            Ok(quantity) => quantity,
            Err(rejection) => {
                info!(symbol = %signal.symbol, %rejection, "Signal rejected by sizer");
                return;
            }
        };

        let take_profit_factor =
            Decimal::from_f64_retain(1.0 + self.config.risk.take_profit_pct)
                .unwrap_or(Decimal::ONE);
        let draft = PositionDraft {
            symbol: signal.symbol.clone(),
            structure,
            expiry: contract.expiry,
            entry_premium: premium,
            entry_underlying: signal.entry_price,
            quantity,
            multiplier: contract.multiplier,
            stop_loss_underlying: signal.stop_loss,
            take_profit_premium: premium * take_profit_factor,
        };

        match self.book.open(draft) {
            Ok(position) => {
                if let Some(pool) = &self.pool {
                    if let Err(err) = store::insert_position(pool, &position).await {
                        warn!(id = position.id, %err, "Position insert failed");
                    }
                }
            }
            Err(rejection) => {
                info!(symbol = %signal.symbol, %rejection, "Position rejected at commit")
            }
        }
    }

    /// Act on an exit signal: revalue against fresh marks first so the
    /// recorded reason reflects the predicate that actually holds; fall back
    /// to an indicator-reversal close when only the oscillator fired.
    async fn exit_from_signal(&self, position: &Position, signal: &Signal, today: NaiveDate) {
        let (premium, underlying) = self
            .marks_for(position)
            .await
            .unwrap_or((position.current_premium, signal.entry_price));

        let event = self
            .book
            .revalue(position.id, premium, underlying, today)
            .or_else(|| {
                signal
                    .contributing()
                    .contains(&"rsi_overbought")
                    .then(|| self.book.close_with(position.id, ExitReason::IndicatorReversal, today))
                    .flatten()
            });

        if let Some(event) = event {
            self.persist_close(event.reason, event.position_id).await;
            self.bus.publish_exit(event);
        }
    }

    /// Revalue every open position against fresh chain marks.
    async fn revalue_positions(&self, today: NaiveDate) {
        for position in self.book.open_positions() {
            let Some((premium, underlying)) = self.marks_for(&position).await else {
                warn!(id = position.id, symbol = %position.symbol, "No mark, skipping revaluation");
                continue;
            };

            match self.book.revalue(position.id, premium, underlying, today) {
                Some(event) => {
                    self.persist_close(event.reason, event.position_id).await;
                    self.bus.publish_exit(event);
                }
                None => {
                    if let (Some(pool), Some(updated)) =
                        (&self.pool, self.book.open_position_for(&position.symbol))
                    {
                        if let Err(err) = store::update_position_marks(pool, &updated).await {
                            warn!(id = position.id, %err, "Mark write-back failed");
                        }
                    }
                }
            }
        }
    }

    /// Current premium and underlying marks for a position's structure.
    ///
    /// Spreads are marked leg by leg: the net mark is what closing the
    /// structure would cost, short leg minus long leg.
    async fn marks_for(&self, position: &Position) -> Option<(Decimal, Decimal)> {
        let chain = match self.market_data.fetch_chain(&position.symbol).await {
            Ok(chain) => chain,
            Err(err) => {
                warn!(symbol = %position.symbol, %err, "Chain fetch failed");
                return None;
            }
        };

        let leg_at = |strike: Decimal| {
            chain
                .iter()
                .find(|c| c.expiry == position.expiry && c.strike == strike)
        };
        let (premium, contract) = match &position.structure {
            StructureKind::CreditSpread {
                short_strike,
                long_strike,
                ..
            } => {
                let short = leg_at(*short_strike)?;
                let long = leg_at(*long_strike)?;
                (short.mark()? - long.mark()?, short)
            }
            single_leg => {
                let leg = leg_at(*single_leg.strikes().first()?)?;
                (leg.mark()?, leg)
            }
        };
        let underlying = contract
            .underlying_last
            .or_else(|| {
                self.market_data
                    .cache()
                    .series(&position.symbol)
                    .and_then(|bars| bars.last().map(|b| b.close))
            })
            .unwrap_or(position.current_underlying);
        Some((premium, underlying))
    }

    /// Nearest-the-money call with enough time left to clear the auto-close
    /// threshold, on the earliest eligible expiry.
    fn select_entry_contract<'a>(
        &self,
        chain: &'a [ContractDescriptor],
        entry_price: Decimal,
        today: NaiveDate,
    ) -> Option<&'a ContractDescriptor> {
        let min_expiry = today + chrono::Duration::days(self.config.risk.auto_close_dte + 1);
        chain
            .iter()
            .filter(|c| c.right == OptionRight::Call && c.expiry >= min_expiry)
            .min_by_key(|c| (c.expiry, (c.strike - entry_price).abs()))
    }

    async fn persist_close(&self, reason: ExitReason, position_id: i64) {
        if let Some(pool) = &self.pool {
            if let Err(err) = store::close_position(pool, position_id, reason, Utc::now()).await {
                warn!(id = position_id, %err, "Position close write failed");
            }
        }
    }
}
