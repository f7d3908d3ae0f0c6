//! Error definitions
//!
//! This module provides the error taxonomy for stagekit. Every failure a
//! stage can carry or a wait can observe is one of these variants; errors
//! are clonable so that multiple waiters on the same stage each observe
//! the same failure.

use std::time::Duration;

use thiserror::Error;

/// Main error type for stagekit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// The producer computation panicked or otherwise failed
    #[error("Producer failed: {0}")]
    Producer(String),

    /// The stage was cancelled before producing a value
    #[error("Stage was cancelled")]
    Cancelled,

    /// A bounded wait expired before the stage reached a terminal state
    #[error("Wait timed out after {0:?}")]
    Timeout(Duration),

    /// A combinator body panicked while building the downstream result
    #[error("Composition failed: {0}")]
    Composition(String),
}

impl StageError {
    /// Create a producer error.
    #[must_use]
    pub fn producer(message: impl Into<String>) -> Self {
        Self::Producer(message.into())
    }

    /// Create a composition error.
    #[must_use]
    pub fn composition(message: impl Into<String>) -> Self {
        Self::Composition(message.into())
    }

    /// Returns true if this error came from a bounded wait expiring.
    ///
    /// A timeout is a property of one wait call, never of the stage
    /// itself; the same stage may still complete later.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            StageError::producer("boom").to_string(),
            "Producer failed: boom"
        );
        assert_eq!(StageError::Cancelled.to_string(), "Stage was cancelled");
        assert_eq!(
            StageError::composition("bad map").to_string(),
            "Composition failed: bad map"
        );
    }

    #[test]
    fn test_is_timeout() {
        assert!(StageError::Timeout(Duration::from_millis(5)).is_timeout());
        assert!(!StageError::Cancelled.is_timeout());
    }

    #[test]
    fn test_errors_clone() {
        let err = StageError::producer("boom");
        assert_eq!(err.clone(), err);
    }
}
