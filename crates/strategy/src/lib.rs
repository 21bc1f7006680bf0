//! Signal generation: indicator math and the voting evaluator.

pub mod evaluator;
pub mod indicators;

pub use evaluator::SignalEvaluator;
