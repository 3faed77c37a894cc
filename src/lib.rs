//! Scenario runner library
//!
//! Exposes the CLI, configuration and scenario loading for integration testing

pub mod cli;
pub mod config;
pub mod scenario;

pub use config::RunnerConfig;
pub use scenario::{load_scenario, prepare, Prepared};
