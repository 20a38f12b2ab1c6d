//! Error types for the lobby swarm.
//!
//! Every failure a unit can hit is a [`SwarmError`]. Whether a failure aborts
//! the unit or is absorbed locally is decided by [`SwarmError::kind`], never by
//! inspecting the message text.

use thiserror::Error;

/// How a [`SwarmError`] must be treated by the unit that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Abort the unit's pipeline. Other units are unaffected.
    Fatal,
    /// Log, degrade to "nothing known", and continue.
    Recoverable,
}

/// Errors that can occur while joining a session.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// A polling or discovery request could not be completed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An endpoint answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}")]
    HttpStatus {
        /// Which call failed (`discovery`, `handshake`, ...).
        endpoint: &'static str,
        /// The status code returned by the remote.
        status: u16,
    },

    /// The discovery endpoint returned something that is not a usable base URL.
    #[error("invalid server address {address:?}: {reason}")]
    InvalidServerAddress {
        /// Raw address as returned by the remote.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The polling handshake frame could not be parsed.
    #[error("handshake parse error: {0}")]
    Handshake(String),

    /// A polling frame did not follow the `<len>:<packet>` framing.
    #[error("frame error: {0}")]
    Frame(String),

    /// The registration POST was not acknowledged with `ok`.
    #[error("registration rejected (HTTP {status}): {body:?}")]
    RegistrationRejected {
        /// HTTP status of the registration response.
        status: u16,
        /// Response body, which was not the acknowledgment token.
        body: String,
    },

    /// The game reported that no more participants can join.
    #[error("game is full")]
    SessionFull,

    /// The game reported an error other than "full".
    #[error("game rejected the join (error {error})")]
    GameRejected {
        /// Embedded `error` value from the state payload, as JSON text.
        error: String,
    },

    /// The state poll body was not the expected event frame.
    #[error("malformed state poll response: {0}")]
    MalformedState(String),

    /// Failed to send a frame over the persistent connection.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the persistent connection.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The persistent connection is already closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a JSON payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwarmError {
    /// Classify this error as fatal to the unit or recoverable.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedState(_) => ErrorKind::Recoverable,
            _ => ErrorKind::Fatal,
        }
    }

    /// Returns `true` if this error must abort the unit.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

/// A specialized [`Result`] type for lobby swarm operations.
pub type Result<T> = std::result::Result<T, SwarmError>;

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn only_malformed_state_is_recoverable() {
        assert_eq!(
            SwarmError::MalformedState("x".into()).kind(),
            ErrorKind::Recoverable
        );
        assert_eq!(SwarmError::SessionFull.kind(), ErrorKind::Fatal);
        assert_eq!(
            SwarmError::GameRejected {
                error: "7".into()
            }
            .kind(),
            ErrorKind::Fatal
        );
        assert!(SwarmError::Handshake("short".into()).is_fatal());
        assert!(!SwarmError::MalformedState("x".into()).is_fatal());
    }

    #[test]
    fn display_names_the_endpoint() {
        let err = SwarmError::HttpStatus {
            endpoint: "discovery",
            status: 503,
        };
        assert_eq!(err.to_string(), "discovery returned HTTP 503");
    }
}
