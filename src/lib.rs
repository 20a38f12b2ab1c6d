//! # Lobby Swarm
//!
//! Joins a batch of simulated participants to one Gartic Phone session by
//! replaying the browser client's handshake: server discovery, an Engine.IO v3
//! polling session, registration, a single game-state check, and finally a
//! WebSocket upgrade kept alive with heartbeats.
//!
//! ## Features
//!
//! - **Independent units**: every participant runs its own sequential pipeline;
//!   one unit failing never affects another
//! - **Explicit codec**: the handshake framing and the length-prefixed message
//!   envelope live in [`frame`] and are testable without I/O
//! - **Fatal vs recoverable errors**: [`SwarmError::kind`] separates "abort this
//!   unit" from "log and continue"
//! - **Cancellable heartbeat**: the heartbeat is owned by the connection loop
//!   and stops with it
//! - **Transport-agnostic**: the persistent connection goes through the
//!   [`Connector`] / [`Transport`] traits; `transport-websocket` (default)
//!   provides the WebSocket implementation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lobby_swarm::{SessionCode, Swarm, SwarmConfig};
//!
//! # async fn run() {
//! let swarm = Swarm::new(SwarmConfig::default().with_username_prefix("Bot"));
//! let code = SessionCode::parse("https://garticphone.com/?c=0fa1b2");
//! let report = swarm.run(&code, 5).await;
//! println!("{} connected, {} failed", report.succeeded(), report.failed());
//! # }
//! ```

pub mod code;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod headers;
pub mod id;
pub mod identity;
pub mod negotiator;
pub mod orchestrator;
pub mod polling;
pub mod registrar;
pub mod transport;
pub mod transports;
pub mod unit;
pub mod validator;

// Re-export primary types for ergonomic imports.
pub use code::SessionCode;
pub use config::SwarmConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use error::{ErrorKind, SwarmError};
pub use frame::Envelope;
pub use identity::ParticipantIdentity;
pub use negotiator::{SessionId, TransportSession};
pub use orchestrator::{ShutdownHandle, Swarm, SwarmReport, UnitOutcome};
pub use polling::PollingClient;
pub use transport::{CloseInfo, Connector, Transport, TransportEvent};
pub use unit::{Unit, UnitReport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
