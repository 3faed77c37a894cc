use std::fmt;

use action_primitives::DriverError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What went wrong talking to Chromium.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    #[error("deadline exceeded")]
    NavTimeout,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("target not found")]
    TargetNotFound,
    #[error("page script threw")]
    ScriptException,
    #[error("internal error")]
    Internal,
}

/// Adapter error with an optional hint and structured payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<AdapterError> for DriverError {
    fn from(err: AdapterError) -> Self {
        let message = err.to_string();
        match err.kind {
            AdapterErrorKind::NavTimeout => DriverError::Timeout(message),
            AdapterErrorKind::TargetNotFound => DriverError::Closed(message),
            AdapterErrorKind::ScriptException => DriverError::Script(message),
            AdapterErrorKind::CdpIo | AdapterErrorKind::Internal => DriverError::Io(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_onto_driver_errors() {
        let timeout: DriverError = AdapterError::new(AdapterErrorKind::NavTimeout)
            .with_hint("Page.navigate")
            .into();
        assert_eq!(timeout, DriverError::Timeout("deadline exceeded: Page.navigate".into()));

        let gone: DriverError = AdapterError::new(AdapterErrorKind::TargetNotFound).into();
        assert!(matches!(gone, DriverError::Closed(_)));
        assert!(!gone.is_retryable());
    }
}
