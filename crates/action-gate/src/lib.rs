//! Success-condition gate
//!
//! This crate decides whether an action had its intended effect:
//! - Evaluation scopes (top page, subframes, popups), enumerated fresh
//! - Frame resolution from recorded frame hints
//! - OR-combined condition evaluation with per-condition timeouts

pub mod errors;
pub mod evaluator;
pub mod frames;
pub mod scopes;

pub use errors::*;
pub use evaluator::*;
pub use frames::*;
pub use scopes::*;
