//! Error types for the weft dataflow runtime.
//!
//! Errors are grouped by where they surface. Channel and configuration
//! errors are returned synchronously to the caller that caused them. Body
//! errors never reach a caller directly: they are raised inside an actor
//! and routed to error handlers registered on the owning operator or agent.
//!
//! The root error type, `Error`, wraps all of them so that public APIs can
//! return a single `Result<T>`.

use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by user supplied operator bodies and agent updates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Root error type for weft.
#[derive(Debug, Error)]
pub enum Error {
    /// Channel read/write errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Invalid operator, selector or runtime configuration
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A failure raised by user code inside an actor
    #[error("Body error: {0}")]
    Body(#[from] BodyError),

    /// General runtime errors (scheduling, stopped actors)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Errors raised by channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// A single-assignment variable was bound a second time
    #[error("variable is already bound")]
    AlreadyBound,

    /// A read did not receive a value in time
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// An output index was outside the operator's output list
    #[error("output index {index} out of range for {outputs} output(s)")]
    OutputIndexOutOfRange {
        /// Requested output index
        index: usize,
        /// Number of configured outputs
        outputs: usize,
    },

    /// A positional write supplied the wrong number of values
    #[error("expected {expected} output value(s), got {actual}")]
    OutputCountMismatch {
        /// Number of configured outputs
        expected: usize,
        /// Number of values supplied
        actual: usize,
    },
}

/// Errors raised while constructing operators, selectors or the runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// An operator or selector was built without input channels
    #[error("at least one input channel is required")]
    NoInputs,

    /// `max_forks` must be at least one
    #[error("max_forks must be at least 1, got {0}")]
    InvalidMaxForks(usize),

    /// Any other invalid setting
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A failure raised by an operator body or an agent update.
#[derive(Debug, Error)]
pub enum BodyError {
    /// The user code returned an error
    #[error("body failed: {0}")]
    Failed(#[source] BoxError),

    /// The user code panicked
    #[error("body panicked: {0}")]
    Panicked(String),

    /// An agent validator rejected the proposed value
    #[error("update rejected: {0}")]
    Rejected(String),
}

impl BodyError {
    /// Build a `Panicked` error from a payload returned by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<unknown panic>".to_string()
        };
        Self::Panicked(message)
    }
}

/// Result type used throughout weft.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let error: Error = ChannelError::AlreadyBound.into();
        assert!(matches!(error, Error::Channel(ChannelError::AlreadyBound)));

        let error: Error = ConfigurationError::NoInputs.into();
        assert!(matches!(
            error,
            Error::Configuration(ConfigurationError::NoInputs)
        ));

        let error: Error = BodyError::Panicked("boom".into()).into();
        assert!(matches!(error, Error::Body(BodyError::Panicked(_))));
    }

    #[test]
    fn test_error_display() {
        let error: Error = ChannelError::OutputIndexOutOfRange {
            index: 3,
            outputs: 2,
        }
        .into();
        assert_eq!(
            error.to_string(),
            "Channel error: output index 3 out of range for 2 output(s)"
        );

        let error = ConfigurationError::InvalidMaxForks(0);
        assert_eq!(error.to_string(), "max_forks must be at least 1, got 0");
    }

    #[test]
    fn test_body_error_from_panic() {
        let payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
        let error = BodyError::from_panic(payload);
        assert!(matches!(&error, BodyError::Panicked(msg) if msg == "static message"));

        let payload =
            std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        let error = BodyError::from_panic(payload);
        assert!(matches!(&error, BodyError::Panicked(msg) if msg == "formatted 42"));
    }

    #[test]
    fn test_body_error_source() {
        use std::error::Error as _;

        let inner: BoxError = "inner failure".into();
        let error = BodyError::Failed(inner);
        assert_eq!(error.to_string(), "body failed: inner failure");
        assert!(error.source().is_some());
    }
}
