//! Step execution layer
//!
//! Runs compiled scenarios against a [`BrowserDriver`]: clicks and fills go
//! through a bounded, multi-strategy action transaction confirmed by success
//! conditions; every other step kind is a single driver operation. The run
//! loop records a step log and collects failure artifacts.
//!
//! [`BrowserDriver`]: action_primitives::BrowserDriver

pub mod artifacts;
pub mod checkpoints;
pub mod config;
pub mod errors;
pub mod navigation;
pub mod runner;
pub mod steps;
pub mod transaction;

pub use artifacts::{FailureCollector, FailureSite, FAILURE_CONTEXT_FILE};
pub use checkpoints::{
    Checkpoint, CheckpointSink, JsonlCheckpointSink, MemoryCheckpointSink, NullCheckpointSink,
    StepCheckpoints, CHECKPOINT_FILE,
};
pub use config::{ArtifactOptions, AuthOptions, ExecutorTimings, FlowConfig};
pub use errors::{FlowError, StepError};
pub use navigation::PageStack;
pub use runner::{
    DefaultScenarioRunner, FailureReport, RunReport, ScenarioRunner, FAIL_SCREENSHOT,
    STEP_LOG_FILE,
};
pub use steps::{StepExecutor, StepOutcome};
pub use transaction::{
    after_failure, after_strategy, ActionAttemptResult, ActionKind, ActionTransaction, Strategy,
    TransactionOutcome, TransactionRequest, TxState,
};
