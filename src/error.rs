//! Custom error types for the crate.
//!
//! `ControlError` is the crate-wide error enum, built with `thiserror`. It
//! covers the failure classes that cross module boundaries: configuration
//! loading and validation, transport-level I/O, and the channel plumbing of
//! the driver front end.
//!
//! Validation and parse failures inside command execution deliberately do
//! *not* appear here: they are captured by the executor and reported as
//! strings inside the result envelope (see [`crate::command::executor`]),
//! never propagated as faults.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ControlResult<T> = std::result::Result<T, ControlError>;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport not connected")]
    NotConnected,

    #[error("No reply from instrument within {0:?}")]
    ReplyTimeout(Duration),

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("Driver task is gone (channel closed)")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_bound() {
        let err = ControlError::ReplyTimeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn transport_message_carries_detail() {
        let err = ControlError::Transport("read failed".into());
        assert_eq!(err.to_string(), "Transport error: read failed");
    }
}
