//! Transport implementations for the persistent connection.
//!
//! | Feature                | Transport              | Connector               |
//! |------------------------|------------------------|-------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] | [`WebSocketConnector`]  |

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
