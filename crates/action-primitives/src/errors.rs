//! Error types reported by browser drivers

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// No element matched the selector in the given context
    #[error("element not found: {0}")]
    NotFound(String),

    /// Bounded wait elapsed before the awaited state was reached
    #[error("timed out: {0}")]
    Timeout(String),

    /// Another element would receive the pointer event
    #[error("pointer intercepted: {0}")]
    Intercepted(String),

    /// Element exists but cannot take the interaction (disabled, hidden, ...)
    #[error("element not actionable: {0}")]
    NotActionable(String),

    /// Page script raised or returned something unusable
    #[error("script error: {0}")]
    Script(String),

    /// Transport or file-system failure
    #[error("driver i/o error: {0}")]
    Io(String),

    /// Page or session already closed
    #[error("closed: {0}")]
    Closed(String),
}

impl DriverError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::Timeout(_)
                | DriverError::Intercepted(_)
                | DriverError::NotActionable(_)
                | DriverError::NotFound(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_sessions_are_not_retried() {
        assert!(!DriverError::Closed("page".into()).is_retryable());
        assert!(DriverError::Intercepted("overlay".into()).is_retryable());
    }
}
