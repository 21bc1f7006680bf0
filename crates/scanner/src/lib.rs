//! Scan-loop orchestration: wires the gateway pipeline, evaluator, sizer,
//! and position book together and exposes signal/exit event streams.

pub mod events;
pub mod service;

pub use events::{EventBus, EventStreams};
pub use service::ScannerService;
