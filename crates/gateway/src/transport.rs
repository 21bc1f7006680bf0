//! Transport seam between the desk and the broker gateway session.
//!
//! The wire protocol lives behind this trait so the scan pipeline can be
//! exercised against in-process fakes. A production implementation forwards
//! each call to the broker connection and feeds responses back through
//! [`GatewayEvents`](crate::correlator::GatewayEvents).

use anyhow::Result;
use async_trait::async_trait;

use crate::types::RequestId;

/// Outbound side of a gateway session.
///
/// Implementations must tag every response fragment with the `RequestId`
/// passed here; the correlator routes on nothing else.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Ask for `days` of daily bars for `symbol`.
    async fn request_series(&self, request_id: RequestId, symbol: &str, days: u32) -> Result<()>;

    /// Ask for the fundamentals report for `symbol`.
    async fn request_fundamentals(&self, request_id: RequestId, symbol: &str) -> Result<()>;

    /// Ask for the option chain (with marks) for `symbol`.
    async fn request_chain(&self, request_id: RequestId, symbol: &str) -> Result<()>;

    /// Whether the underlying session is currently up.
    fn is_connected(&self) -> bool;
}
