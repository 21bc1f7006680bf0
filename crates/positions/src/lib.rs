//! Position sizing and lifecycle tracking.

pub mod book;
pub mod exits;
pub mod sizing;

pub use book::{PortfolioSnapshot, PositionBook, PositionDraft};
pub use exits::check_exit;
pub use sizing::{size, SizingRejection, SizingRequest};
