//! Step execution error types

use action_gate::GateError;
use action_primitives::DriverError;
use thiserror::Error;

/// Terminal reasons a step can fail.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StepError {
    /// No element matched the candidate
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// Element exists but is disabled, hidden, zero-sized or ignores pointer events
    #[error("element not actionable: {selector} ({reason})")]
    ElementNotActionable { selector: String, reason: String },

    /// Every action strategy raised for one candidate
    #[error("all strategies failed for {selector}: {last_error}")]
    AllStrategiesFailed { selector: String, last_error: String },

    /// The action ran but no success condition held in any scope
    #[error("success condition timeout: {0}")]
    SuccessConditionTimeout(String),

    #[error("unknown step type: {0}")]
    UnknownStepType(String),

    #[error("frame resolution failed: {0}")]
    FrameResolutionFailed(String),

    #[error("popup not opened: {0}")]
    PopupNotOpened(String),

    /// expect_*/ensure_* observed something other than what was asserted
    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    /// The step lacks a field its kind requires
    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

impl StepError {
    /// Whether another attempt on the same candidate may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StepError::ElementNotFound(_)
            | StepError::ElementNotActionable { .. }
            | StepError::AllStrategiesFailed { .. }
            | StepError::SuccessConditionTimeout(_) => true,
            StepError::Driver(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Stable code written to logs and `failure_context.json`.
    pub fn code(&self) -> &'static str {
        match self {
            StepError::ElementNotFound(_) => "ELEMENT_NOT_FOUND",
            StepError::ElementNotActionable { .. } => "ELEMENT_NOT_ACTIONABLE",
            StepError::AllStrategiesFailed { .. } => "ALL_STRATEGIES_FAILED",
            StepError::SuccessConditionTimeout(_) => "SUCCESS_CONDITION_TIMEOUT",
            StepError::UnknownStepType(_) => "UNKNOWN_STEP_TYPE",
            StepError::FrameResolutionFailed(_) => "FRAME_RESOLUTION_FAILED",
            StepError::PopupNotOpened(_) => "POPUP_NOT_OPENED",
            StepError::AssertionFailed(_) => "ASSERTION_FAILED",
            StepError::InvalidStep(_) => "INVALID_STEP",
            StepError::Driver(_) => "DRIVER_ERROR",
        }
    }
}

/// Failures of the run loop itself, as opposed to a failing step.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("working directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("browser session error: {0}")]
    Driver(#[from] DriverError),
}

impl From<GateError> for StepError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::FrameNotFound(what) => StepError::FrameResolutionFailed(what),
            GateError::Driver(err) => StepError::Driver(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            StepError::PopupNotOpened("x".into()).code(),
            "POPUP_NOT_OPENED"
        );
        assert_eq!(
            StepError::from(GateError::FrameNotFound("pay".into())).code(),
            "FRAME_RESOLUTION_FAILED"
        );
    }

    #[test]
    fn unknown_types_are_not_retried() {
        assert!(!StepError::UnknownStepType("hover".into()).is_retryable());
        assert!(StepError::ElementNotFound("#a".into()).is_retryable());
        assert!(!StepError::Driver(DriverError::Closed("page".into())).is_retryable());
    }
}
