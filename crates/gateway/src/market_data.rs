//! Market data fetch pipeline: cache plan, pacing, request, correlate, merge.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use optdesk_core::Bar;
use optdesk_data::{FetchPlan, SeriesCache};

use crate::correlator::{GatewayEvents, RequestCorrelator, ResponsePayload};
use crate::rate_limit::RequestPacer;
use crate::transport::GatewayTransport;
use crate::types::{ContractDescriptor, FundamentalsReport, RequestKind};

/// Front door for all gateway data requests.
///
/// Every fetch goes through the same pipeline: consult the series cache for
/// a plan, wait for a pacing slot, register with the correlator, send over
/// the transport, and await the assembled payload.
pub struct MarketDataService {
    transport: Arc<dyn GatewayTransport>,
    correlator: Arc<RequestCorrelator>,
    pacer: RequestPacer,
    cache: Arc<SeriesCache>,
    request_timeout: Duration,
}

impl MarketDataService {
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        correlator: Arc<RequestCorrelator>,
        pacer: RequestPacer,
        cache: Arc<SeriesCache>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            correlator,
            pacer,
            cache,
            request_timeout,
        }
    }

    /// Inbound event sink for the gateway session.
    pub fn events(&self) -> Arc<dyn GatewayEvents> {
        self.correlator.clone()
    }

    pub fn cache(&self) -> &SeriesCache {
        &self.cache
    }

    /// Reclaim correlator entries abandoned by timeout. Call once per cycle.
    pub fn purge_stale_requests(&self, max_age: Duration) -> usize {
        self.correlator.purge_stale(max_age)
    }

    /// Fetch the daily series for `symbol`, incrementally where possible.
    ///
    /// Returns the full merged series from the cache. If the request fails
    /// but a previous load is cached, the stale series is returned instead
    /// so one bad cycle does not blind the evaluator.
    pub async fn fetch_series(
        &self,
        symbol: &str,
        lookback_days: u32,
        force_full: bool,
    ) -> Result<Vec<Bar>> {
        let plan = self.cache.plan(symbol, lookback_days, force_full);
        let days = match plan {
            FetchPlan::Full { days } => days,
            FetchPlan::Incremental { days } => days,
        };

        self.pacer.acquire_series().await;

        let id = self.correlator.submit(RequestKind::Series, symbol);
        let outcome = match self
            .transport
            .request_series(id, symbol, days)
            .await
            .with_context(|| format!("failed to send series request for {symbol}"))
        {
            // The abandoned entry is reclaimed by purge_stale.
            Err(err) => Err(err),
            Ok(()) => self
                .correlator
                .await_completion(id, self.request_timeout)
                .await
                .map_err(anyhow::Error::from),
        };

        match outcome {
            Ok(ResponsePayload::Series(bars)) => {
                info!(symbol, received = bars.len(), ?plan, "Series received");
                self.cache.apply(symbol, bars);
            }
            Ok(other) => bail!("series request {id} resolved to mismatched payload {other:?}"),
            Err(err) => {
                if let Some(stale) = self.cache.series(symbol) {
                    warn!(symbol, %err, "Series fetch failed, using cached series");
                    return Ok(stale);
                }
                return Err(err).with_context(|| format!("series fetch failed for {symbol}"));
            }
        }

        self.cache
            .series(symbol)
            .with_context(|| format!("series cache empty for {symbol} after merge"))
    }

    /// Fetch the fundamentals report for `symbol`.
    pub async fn fetch_fundamentals(&self, symbol: &str) -> Result<FundamentalsReport> {
        self.pacer.acquire_metadata().await;

        let id = self.correlator.submit(RequestKind::Fundamentals, symbol);
        self.transport
            .request_fundamentals(id, symbol)
            .await
            .with_context(|| format!("failed to send fundamentals request for {symbol}"))?;

        match self.correlator.await_completion(id, self.request_timeout).await? {
            ResponsePayload::Fundamentals(report) => Ok(report),
            other => bail!("fundamentals request {id} resolved to mismatched payload {other:?}"),
        }
    }

    /// Fetch the option chain with current marks for `symbol`.
    pub async fn fetch_chain(&self, symbol: &str) -> Result<Vec<ContractDescriptor>> {
        self.pacer.acquire_metadata().await;

        let id = self.correlator.submit(RequestKind::Chain, symbol);
        self.transport
            .request_chain(id, symbol)
            .await
            .with_context(|| format!("failed to send chain request for {symbol}"))?;

        match self.correlator.await_completion(id, self.request_timeout).await? {
            ResponsePayload::Chain(contracts) => Ok(contracts),
            other => bail!("chain request {id} resolved to mismatched payload {other:?}"),
        }
    }
}
