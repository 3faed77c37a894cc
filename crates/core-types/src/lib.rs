//! Shared scenario model: raw and compiled steps, success conditions, and the
//! records a run writes into its working directory.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod condition;
pub mod document;
pub mod errors;
pub mod report;
pub mod step;

pub use condition::{url_prefix_of, SuccessCondition, DEFAULT_CONDITION_TIMEOUT_MS};
pub use document::{
    parse_scenario, resolve_url, CompiledScenario, CompilerMeta, DocumentFormat, RawScenario,
    ScenarioDocument, COMPILER_VERSION,
};
pub use errors::ScenarioError;
pub use report::{FailureArtifactBundle, FrameRecord, PageRecord, StepLogEntry, StepStatus};
pub use step::{CompiledStep, FrameHint, RawStep, StepFields, StepKind};

/// Identifier of one scenario run.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a page (tab/window) inside a browsing session.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub String);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a frame inside a page.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub String);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zero-padded step number used in artifact file names (`step_007_click.png`).
pub fn step_number(index: usize) -> String {
    format!("{index:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_numbers_are_three_digits() {
        assert_eq!(step_number(1), "001");
        assert_eq!(step_number(42), "042");
        assert_eq!(step_number(1234), "1234");
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
