//! Request correlation for the multiplexed gateway session.
//!
//! Every outbound request gets a process-unique id from a monotonic counter.
//! Response fragments arrive tagged with that id on the session's event
//! callbacks and are accumulated here until the terminal marker, at which
//! point the waiting task is released with the assembled payload.
//!
//! A request that times out is NOT removed: late fragments for it are still
//! accepted and merged, and the entry is reclaimed by `purge_stale` on the
//! next scan cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

use optdesk_core::Bar;

use crate::types::{ContractDescriptor, FundamentalsReport, RequestId, RequestKind};

/// Gateway error codes at or above this are status notices, not failures.
const INFORMATIONAL_CODE_FLOOR: i32 = 2000;
const INFORMATIONAL_CODE_CEILING: i32 = 3000;

#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("request {id} ({kind} {symbol}) timed out after {timeout:?}")]
    Timeout {
        id: RequestId,
        kind: RequestKind,
        symbol: String,
        timeout: Duration,
    },
    #[error("gateway error {code} on request {id}: {message}")]
    Gateway {
        id: RequestId,
        code: i32,
        message: String,
    },
    #[error("unknown request id {0}")]
    Unknown(RequestId),
}

/// Assembled response for one completed request.
#[derive(Debug, Clone)]
pub enum ResponsePayload {
    Series(Vec<Bar>),
    Fundamentals(FundamentalsReport),
    Chain(Vec<ContractDescriptor>),
}

/// Inbound event callbacks from the gateway session.
///
/// The session thread calls these as tagged fragments arrive; the correlator
/// implements them to route fragments into pending request state.
pub trait GatewayEvents: Send + Sync {
    fn on_connection_established(&self);
    fn on_series_fragment(&self, request_id: RequestId, bar: Bar);
    fn on_series_complete(&self, request_id: RequestId);
    /// Fundamentals arrive as a single fragment that also completes the request.
    fn on_fundamentals_fragment(&self, request_id: RequestId, report: FundamentalsReport);
    fn on_chain_fragment(&self, request_id: RequestId, contract: ContractDescriptor);
    fn on_chain_complete(&self, request_id: RequestId);
    /// Session-level errors carry no request id.
    fn on_error(&self, request_id: Option<RequestId>, code: i32, message: &str);
}

struct PendingRequest {
    kind: RequestKind,
    symbol: String,
    created_at: Instant,
    bars: Vec<Bar>,
    contracts: Vec<ContractDescriptor>,
    fundamentals: Option<FundamentalsReport>,
    completed: bool,
    error: Option<(i32, String)>,
    notify: Arc<Notify>,
}

impl PendingRequest {
    fn new(kind: RequestKind, symbol: &str) -> Self {
        Self {
            kind,
            symbol: symbol.to_string(),
            created_at: Instant::now(),
            bars: Vec::new(),
            contracts: Vec::new(),
            fundamentals: None,
            completed: false,
            error: None,
            notify: Arc::new(Notify::new()),
        }
    }

    fn into_payload(self) -> ResponsePayload {
        match self.kind {
            RequestKind::Series => ResponsePayload::Series(self.bars),
            RequestKind::Chain => ResponsePayload::Chain(self.contracts),
            RequestKind::Fundamentals => {
                ResponsePayload::Fundamentals(self.fundamentals.unwrap_or(FundamentalsReport {
                    symbol: self.symbol,
                    pe_ratio: None,
                    fcf_yield: None,
                    sector: None,
                }))
            }
        }
    }
}

/// Maps request ids to in-flight request state.
pub struct RequestCorrelator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new outstanding request and return its id.
    ///
    /// Ids are unique for the life of the process; they are never reused,
    /// even after completion or purge.
    pub fn submit(&self, kind: RequestKind, symbol: &str) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock().expect("correlator lock poisoned");
        pending.insert(id, PendingRequest::new(kind, symbol));
        debug!(request_id = id, %kind, symbol, "Request registered");
        id
    }

    /// Wait until the request completes, fails, or the timeout elapses.
    ///
    /// On success or gateway error the entry is removed. On timeout the
    /// entry is left in place so late fragments still merge; `purge_stale`
    /// reclaims it later.
    pub async fn await_completion(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> Result<ResponsePayload, RequestError> {
        let notify = {
            let pending = self.pending.lock().expect("correlator lock poisoned");
            match pending.get(&id) {
                Some(entry) => entry.notify.clone(),
                None => return Err(RequestError::Unknown(id)),
            }
        };

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Arm the notification before inspecting state: `notified()` only
            // registers once polled, so a completion landing between the
            // check and the first poll would otherwise be lost.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.try_take(id) {
                return outcome;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // A completion racing the deadline must still win.
                if let Some(outcome) = self.try_take(id) {
                    return outcome;
                }
                let (kind, symbol) = {
                    let pending = self.pending.lock().expect("correlator lock poisoned");
                    match pending.get(&id) {
                        Some(entry) => (entry.kind, entry.symbol.clone()),
                        None => return Err(RequestError::Unknown(id)),
                    }
                };
                warn!(request_id = id, %kind, symbol, ?timeout, "Request timed out");
                return Err(RequestError::Timeout {
                    id,
                    kind,
                    symbol,
                    timeout,
                });
            }
        }
    }

    /// Remove and return the request outcome if it reached a terminal state.
    fn try_take(&self, id: RequestId) -> Option<Result<ResponsePayload, RequestError>> {
        let mut pending = self.pending.lock().expect("correlator lock poisoned");
        let entry = pending.get(&id)?;

        if let Some((code, message)) = entry.error.clone() {
            pending.remove(&id);
            return Some(Err(RequestError::Gateway { id, code, message }));
        }
        if entry.completed {
            let entry = pending.remove(&id)?;
            return Some(Ok(entry.into_payload()));
        }
        None
    }

    /// Number of requests currently outstanding.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("correlator lock poisoned").len()
    }

    /// Drop entries older than `max_age` and return how many were removed.
    ///
    /// Called once per scan cycle to reclaim requests abandoned by timeout.
    pub fn purge_stale(&self, max_age: Duration) -> usize {
        let mut pending = self.pending.lock().expect("correlator lock poisoned");
        let before = pending.len();
        pending.retain(|id, entry| {
            let keep = entry.created_at.elapsed() <= max_age;
            if !keep {
                warn!(
                    request_id = id,
                    kind = %entry.kind,
                    symbol = %entry.symbol,
                    "Purging stale request"
                );
            }
            keep
        });
        before - pending.len()
    }

    fn with_entry(&self, id: RequestId, f: impl FnOnce(&mut PendingRequest)) {
        let mut pending = self.pending.lock().expect("correlator lock poisoned");
        match pending.get_mut(&id) {
            Some(entry) => f(entry),
            // Fragment for a purged or never-issued id; drop it.
            None => debug!(request_id = id, "Fragment for unknown request dropped"),
        }
    }

    /// Like `with_entry`, but fragments arriving after the terminal marker
    /// no longer mutate the assembled payload.
    fn with_active_entry(&self, id: RequestId, f: impl FnOnce(&mut PendingRequest)) {
        let mut pending = self.pending.lock().expect("correlator lock poisoned");
        match pending.get_mut(&id) {
            Some(entry) if !entry.completed => f(entry),
            Some(_) => debug!(request_id = id, "Fragment after completion dropped"),
            None => debug!(request_id = id, "Fragment for unknown request dropped"),
        }
    }
}

impl GatewayEvents for RequestCorrelator {
    fn on_connection_established(&self) {
        debug!("Gateway session established");
    }

    fn on_series_fragment(&self, request_id: RequestId, bar: Bar) {
        self.with_active_entry(request_id, |entry| entry.bars.push(bar));
    }

    fn on_series_complete(&self, request_id: RequestId) {
        self.with_entry(request_id, |entry| {
            entry.completed = true;
            entry.notify.notify_waiters();
        });
    }

    fn on_fundamentals_fragment(&self, request_id: RequestId, report: FundamentalsReport) {
        self.with_active_entry(request_id, |entry| {
            entry.fundamentals = Some(report);
            entry.completed = true;
            entry.notify.notify_waiters();
        });
    }

    fn on_chain_fragment(&self, request_id: RequestId, contract: ContractDescriptor) {
        self.with_active_entry(request_id, |entry| entry.contracts.push(contract));
    }

    fn on_chain_complete(&self, request_id: RequestId) {
        self.with_entry(request_id, |entry| {
            entry.completed = true;
            entry.notify.notify_waiters();
        });
    }

    fn on_error(&self, request_id: Option<RequestId>, code: i32, message: &str) {
        if (INFORMATIONAL_CODE_FLOOR..INFORMATIONAL_CODE_CEILING).contains(&code) {
            // Status notices (farm connectivity etc.) are not request failures.
            debug!(?request_id, code, message, "Gateway notice");
            return;
        }
        let Some(request_id) = request_id else {
            warn!(code, message, "Gateway session error");
            return;
        };
        warn!(request_id, code, message, "Gateway error");
        self.with_entry(request_id, |entry| {
            entry.error = Some((code, message.to_string()));
            entry.notify.notify_waiters();
        });
    }
}
