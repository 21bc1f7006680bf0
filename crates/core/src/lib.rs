//! Shared types, events, position math, and configuration for the desk.

pub mod config;
pub mod config_loader;
pub mod events;
pub mod position;
pub mod types;

pub use config::{
    DeskConfig, GatewayConfig, IndicatorConfig, PacingConfig, RiskConfig, ScannerConfig,
    StoreConfig,
};
pub use config_loader::ConfigLoader;
pub use events::{ExitEvent, IndicatorVote, Signal, SignalDirection};
pub use position::{ExitReason, Position, PositionStatus, StructureKind};
pub use types::{Bar, Instrument, OptionRight};
