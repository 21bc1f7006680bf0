//! Broker gateway plumbing: request correlation over a multiplexed session,
//! pacing, and the market data fetch pipeline.

pub mod correlator;
pub mod market_data;
pub mod rate_limit;
pub mod transport;
pub mod types;

pub use correlator::{GatewayEvents, RequestCorrelator, RequestError, ResponsePayload};
pub use market_data::MarketDataService;
pub use rate_limit::RequestPacer;
pub use transport::GatewayTransport;
pub use types::{ContractDescriptor, FundamentalsReport, RequestId, RequestKind};
