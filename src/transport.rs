//! Transport abstraction for the persistent connection.
//!
//! The [`Transport`] trait is a bidirectional text frame channel. After the
//! polling session is upgraded, every Engine.IO packet is one text frame, so
//! implementations only move strings; framing rules live in
//! [`frame`](crate::frame).
//!
//! # Connection Setup
//!
//! Opening a connection is NOT part of [`Transport`]. A [`Connector`] turns an
//! upgrade URL plus headers into a connected transport, which keeps the unit
//! pipeline independent of the socket library and lets tests script the
//! remote side.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use lobby_swarm::error::SwarmError;
//! use lobby_swarm::transport::{Transport, TransportEvent};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SwarmError> {
//!         // Send one text frame
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Result<TransportEvent, SwarmError> {
//!         // Receive the next text frame, or report the close
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SwarmError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

use crate::error::SwarmError;

/// Close code used when the connection ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code used when a close frame carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Close code used when the client shuts the connection down itself.
pub const CLOSE_NORMAL: u16 = 1000;

/// Why a persistent connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text, possibly empty.
    pub reason: String,
}

impl CloseInfo {
    /// Close with an explicit code and reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The stream ended without a close handshake.
    pub fn abnormal() -> Self {
        Self::new(CLOSE_ABNORMAL, "")
    }
}

/// Something received from the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame.
    Text(String),
    /// The remote closed the connection.
    Closed(CloseInfo),
}

/// A bidirectional text frame transport.
///
/// # Object Safety
///
/// This trait is object-safe, so `Box<dyn Transport>` works for dynamic dispatch.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::TransportSend`] if the frame could not be sent, or
    /// [`SwarmError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), SwarmError>;

    /// Receive the next text frame, or the close that ended the connection.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::TransportReceive`] on a transport-level failure,
    /// and [`SwarmError::TransportClosed`] once the connection is over.
    async fn recv(&mut self) -> Result<TransportEvent, SwarmError>;

    /// Close the connection gracefully. Calling it twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources.
    async fn close(&mut self) -> Result<(), SwarmError>;
}

/// Opens persistent connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport this connector produces.
    type Transport: Transport;

    /// Connect to `url`, sending `headers` with the upgrade request.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(
        &self,
        url: &Url,
        headers: Vec<(HeaderName, HeaderValue)>,
    ) -> Result<Self::Transport, SwarmError>;
}
