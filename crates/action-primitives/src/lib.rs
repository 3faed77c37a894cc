//! Browser driver capability used by the scenario step executor.
//!
//! The executor never talks to a browser directly. It drives a
//! [`BrowserDriver`], which the CDP adapter implements for Chromium and the
//! `fake` feature implements in memory for tests.

pub mod driver;
pub mod errors;
pub mod scripts;
pub mod types;
mod waiting;

#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use driver::*;
pub use errors::*;
pub use types::*;
pub use waiting::*;
