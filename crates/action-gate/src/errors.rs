//! Error types for scope and frame resolution

use action_primitives::DriverError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GateError {
    /// A step named a frame that never appeared
    #[error("frame not found: {0}")]
    FrameNotFound(String),

    /// Driver failed while enumerating pages or frames
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

impl GateError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GateError::FrameNotFound(_) => false,
            GateError::Driver(err) => err.is_retryable(),
        }
    }
}
