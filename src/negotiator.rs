//! Transport negotiation: server discovery and the polling handshake.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::endpoint::Endpoint;
use crate::error::{Result, SwarmError};
use crate::frame::strip_handshake_frame;
use crate::polling::PollingClient;

// ── Session identifier ──────────────────────────────────────────────

/// Transport session identifier issued by the remote. Opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// The identifier as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Transport session ───────────────────────────────────────────────

/// Parameters of a negotiated transport session. Never mutated after the
/// handshake; the heartbeat interval captured here is used for the life of the
/// persistent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSession {
    /// Session identifier, attached to every later request.
    pub sid: SessionId,
    /// How often the client must send a heartbeat.
    pub ping_interval: Duration,
    /// How long the remote waits for a heartbeat before dropping us.
    pub ping_timeout: Duration,
    /// Transports the remote offers to upgrade to. Informational only.
    pub upgrades: Vec<String>,
}

/// JSON object inside the handshake frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeFrame {
    sid: SessionId,
    ping_interval: u64,
    ping_timeout: u64,
    #[serde(default)]
    upgrades: Vec<String>,
}

impl TransportSession {
    /// Parse a handshake response body.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Handshake`] if the framing is too short, the
    /// interior is not JSON, a required field is missing, or the ping interval
    /// is zero.
    pub fn from_frame(body: &str) -> Result<Self> {
        let json = strip_handshake_frame(body)?;
        let frame: HandshakeFrame =
            serde_json::from_str(json).map_err(|e| SwarmError::Handshake(e.to_string()))?;
        if frame.ping_interval == 0 {
            return Err(SwarmError::Handshake("pingInterval must be positive".into()));
        }
        Ok(Self {
            sid: frame.sid,
            ping_interval: Duration::from_millis(frame.ping_interval),
            ping_timeout: Duration::from_millis(frame.ping_timeout),
            upgrades: frame.upgrades,
        })
    }
}

// ── Negotiation ─────────────────────────────────────────────────────

impl PollingClient {
    /// Ask the discovery endpoint which server hosts this session.
    ///
    /// # Errors
    ///
    /// Fails on network errors, a non-success status, or a body that is not an
    /// absolute `http(s)` URL. All are fatal for the unit.
    pub async fn resolve_server(&self) -> Result<Endpoint> {
        let mut url = Url::parse(&self.discovery_url)
            .map_err(|e| SwarmError::Config(format!("discovery_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("code", self.code.as_str());

        let body = self
            .get_text(url, self.headers.anonymous(), "discovery")
            .await?;
        let endpoint = Endpoint::new(&body, &self.transport_path)?;
        info!(server = %endpoint.base(), "resolved game server");
        Ok(endpoint)
    }

    /// Open a polling session on `endpoint`.
    ///
    /// # Errors
    ///
    /// Fails on network errors, a non-success status, or a frame that
    /// [`TransportSession::from_frame`] rejects.
    pub async fn handshake(&self, endpoint: &Endpoint) -> Result<TransportSession> {
        let body = self
            .get_text(endpoint.polling(None), self.headers.anonymous(), "handshake")
            .await?;
        let session = TransportSession::from_frame(&body)?;
        debug!(
            sid = %session.sid,
            ping_interval_ms = session.ping_interval.as_millis(),
            ping_timeout_ms = session.ping_timeout.as_millis(),
            "transport session negotiated"
        );
        Ok(session)
    }
}

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
    use crate::code::SessionCode;
    use crate::config::SwarmConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HANDSHAKE: &str = r#"96:0{"sid":"abc","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":5000}2:40"#;

    fn client(server: &MockServer) -> PollingClient {
        let config =
            SwarmConfig::default().with_discovery_url(format!("{}/api/server", server.uri()));
        PollingClient::new(&config, SessionCode::parse("abc123")).unwrap()
    }

    #[test]
    fn frame_parses_timing_fields() {
        let session = TransportSession::from_frame(HANDSHAKE).unwrap();
        assert_eq!(session.sid, SessionId::from("abc"));
        assert_eq!(session.ping_interval, Duration::from_millis(25000));
        assert_eq!(session.ping_timeout, Duration::from_millis(5000));
        assert_eq!(session.upgrades, vec!["websocket".to_string()]);
    }

    #[test]
    fn frame_with_arbitrary_framing_chars() {
        let session =
            TransportSession::from_frame(r#"abcd{"sid":"x","pingInterval":1,"pingTimeout":2}wxyz"#)
                .unwrap();
        assert_eq!(session.sid.as_str(), "x");
        assert!(session.upgrades.is_empty());
    }

    #[test]
    fn frame_missing_fields_is_handshake_error() {
        let err = TransportSession::from_frame(r#"96:0{"sid":"abc"}2:40"#).unwrap_err();
        assert!(matches!(err, SwarmError::Handshake(_)));
    }

    #[test]
    fn frame_non_json_is_handshake_error() {
        let err = TransportSession::from_frame("96:0not json at all2:40").unwrap_err();
        assert!(matches!(err, SwarmError::Handshake(_)));
    }

    #[test]
    fn frame_too_short_is_handshake_error() {
        let err = TransportSession::from_frame("1:6").unwrap_err();
        assert!(matches!(err, SwarmError::Handshake(_)));
    }

    #[test]
    fn zero_ping_interval_is_rejected() {
        let err =
            TransportSession::from_frame(r#"96:0{"sid":"a","pingInterval":0,"pingTimeout":1}2:40"#)
                .unwrap_err();
        assert!(matches!(err, SwarmError::Handshake(_)));
    }

    #[tokio::test]
    async fn resolve_server_uses_body_as_address() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/server"))
            .and(query_param("code", "abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("https://server07.example.com"))
            .mount(&server)
            .await;

        let endpoint = client(&server).resolve_server().await.unwrap();
        assert_eq!(endpoint.base().as_str(), "https://server07.example.com/socket.io/");
    }

    #[tokio::test]
    async fn resolve_server_error_status_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/server"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server).resolve_server().await.unwrap_err();
        assert!(matches!(
            err,
            SwarmError::HttpStatus {
                endpoint: "discovery",
                status: 404
            }
        ));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn resolve_server_rejects_garbage_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/server"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let err = client(&server).resolve_server().await.unwrap_err();
        assert!(matches!(err, SwarmError::InvalidServerAddress { .. }));
    }

    #[tokio::test]
    async fn handshake_polls_without_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/socket.io/"))
            .and(query_param("EIO", "3"))
            .and(query_param("transport", "polling"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HANDSHAKE))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = Endpoint::new(&server.uri(), "/socket.io/").unwrap();
        let session = client(&server).handshake(&endpoint).await.unwrap();
        assert_eq!(session.sid.as_str(), "abc");

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].url.query_pairs().all(|(k, _)| k != "sid"));
        assert!(requests[0].headers.get("cookie").is_none());
    }
}
