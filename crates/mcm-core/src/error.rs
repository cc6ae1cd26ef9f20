//! Error types shared by the MCM3000 driver crates.
//!
//! `McmError` is the single error type returned by controller operations.
//! Every failure the controller binding can report falls into one of a
//! handful of categories:
//!
//! - **`Connection`**: the serial port could not be opened, the device did not
//!   answer the identification query, or the connection has already been closed.
//! - **`Timeout`**: the device did not answer (or did not reach a target)
//!   within the configured bound.
//! - **`Range`**: a requested position lies outside the axis travel limits.
//!   Raised before anything is written to the wire.
//! - **`Protocol`**: a reply was malformed (wrong length, bad header,
//!   wrong channel, trailing bytes).
//! - **`InvalidAxis`**: the axis number is outside 1..=3 or not configured.
//! - **`Configuration`**: configuration failed to load or validate.
//!
//! The binding never retries; errors always reach the caller. Use
//! [`McmError::kind`] to branch on the category without matching fields.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type McmResult<T> = std::result::Result<T, McmError>;

/// Category of an [`McmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Port unavailable, device not answering at connect, or connection closed.
    Connection,
    /// No reply, or target not reached, within the bound.
    Timeout,
    /// Target outside the travel limits.
    Range,
    /// Malformed reply.
    Protocol,
    /// Axis number not valid for this controller.
    InvalidAxis,
    /// Configuration could not be loaded or validated.
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Range => "range",
            ErrorKind::Protocol => "protocol",
            ErrorKind::InvalidAxis => "invalid_axis",
            ErrorKind::Configuration => "configuration",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for MCM3000 controller operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum McmError {
    /// The port could not be opened or the connection is unusable.
    #[error("Connection error on '{port}': {message}")]
    Connection {
        /// Serial port name (or a description of the stream).
        port: String,
        /// What went wrong.
        message: String,
    },

    /// An operation did not complete within its bound.
    #[error("Timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        /// The operation that timed out (e.g. "encoder count reply").
        operation: String,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// Requested position is outside the travel limits of the axis.
    #[error("Axis {axis}: requested {requested_um} um is outside travel range [{min_um}, {max_um}] um")]
    Range {
        /// Axis number (1-based).
        axis: u8,
        /// Requested target in micrometres.
        requested_um: f64,
        /// Lower travel limit in micrometres.
        min_um: f64,
        /// Upper travel limit in micrometres.
        max_um: f64,
    },

    /// A reply did not match the expected frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Axis number outside 1..=3 or not configured on this controller.
    #[error("Invalid axis {0}: MCM3000 axes are 1-3 and must be configured")]
    InvalidAxis(u8),

    /// Configuration failed to load or validate.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl McmError {
    /// Build a `Connection` error.
    pub fn connection(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            port: port.into(),
            message: message.into(),
        }
    }

    /// Build a `Timeout` error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// The category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            McmError::Connection { .. } => ErrorKind::Connection,
            McmError::Timeout { .. } => ErrorKind::Timeout,
            McmError::Range { .. } => ErrorKind::Range,
            McmError::Protocol(_) => ErrorKind::Protocol,
            McmError::InvalidAxis(_) => ErrorKind::InvalidAxis,
            McmError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Whether the error came from the device not responding in time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}
