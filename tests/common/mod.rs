#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Lobby Swarm integration tests.
//!
//! Provides a scripted [`MockConnector`] / [`MockTransport`] pair standing in
//! for the WebSocket side, and a [`FakeLobby`] built on `wiremock` that plays
//! the discovery and polling endpoints.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use lobby_swarm::transport::{CloseInfo, Connector, Transport, TransportEvent};
use lobby_swarm::{SwarmConfig, SwarmError};
use reqwest::header::{HeaderName, HeaderValue};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, Respond, ResponseTemplate};

// ── Scripted remote side ────────────────────────────────────────────

/// One scripted event the remote delivers after the connection opens.
#[derive(Debug, Clone)]
pub enum Scripted {
    Text(&'static str),
    Close(u16, &'static str),
    Error(&'static str),
}

impl Scripted {
    fn into_event(self) -> Result<TransportEvent, SwarmError> {
        match self {
            Self::Text(text) => Ok(TransportEvent::Text(text.to_string())),
            Self::Close(code, reason) => Ok(TransportEvent::Closed(CloseInfo::new(code, reason))),
            Self::Error(msg) => Err(SwarmError::TransportReceive(msg.to_string())),
        }
    }
}

// ── MockTransport ───────────────────────────────────────────────────

/// Replays a script and records everything the client sends.
pub struct MockTransport {
    incoming: VecDeque<Scripted>,
    fail_sends: bool,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SwarmError> {
        if self.fail_sends {
            return Err(SwarmError::TransportSend("broken pipe".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Result<TransportEvent, SwarmError> {
        if let Some(item) = self.incoming.pop_front() {
            item.into_event()
        } else {
            // Script exhausted: stay connected until shutdown.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), SwarmError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// What one `connect` call received and what the client did afterwards.
#[derive(Clone)]
pub struct ConnectAttempt {
    pub url: Url,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl ConnectAttempt {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, v)| v.to_str().unwrap().to_string())
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

/// Hands out a fresh [`MockTransport`] running `script` on every connect.
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Vec<Scripted>,
    fail_sends: bool,
    attempts: Arc<StdMutex<Vec<ConnectAttempt>>>,
}

impl MockConnector {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script,
            fail_sends: false,
            attempts: Arc::default(),
        }
    }

    /// Every transport handed out rejects sends, starting with the probe.
    pub fn with_failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    /// Wait until `count` connections have sent their probe.
    pub async fn wait_for_probes(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let probed = self
                    .attempts()
                    .iter()
                    .filter(|a| a.sent().first().map(String::as_str) == Some("2probe"))
                    .count();
                if probed >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connections did not open in time");
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(
        &self,
        url: &Url,
        headers: Vec<(HeaderName, HeaderValue)>,
    ) -> Result<MockTransport, SwarmError> {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.attempts.lock().unwrap().push(ConnectAttempt {
            url: url.clone(),
            headers,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });
        Ok(MockTransport {
            incoming: self.script.iter().cloned().collect(),
            fail_sends: self.fail_sends,
            sent,
            closed,
        })
    }
}

// ── FakeLobby (wiremock) ────────────────────────────────────────────

/// Matches polling requests that carry no `sid`, i.e. handshakes.
struct WithoutSid;

impl Match for WithoutSid {
    fn matches(&self, request: &Request) -> bool {
        !request.url.query_pairs().any(|(k, _)| k == "sid")
    }
}

/// Matches requests for one specific `sid`.
struct ForSid(&'static str);

impl Match for ForSid {
    fn matches(&self, request: &Request) -> bool {
        request
            .url
            .query_pairs()
            .any(|(k, v)| k == "sid" && v == self.0)
    }
}

/// Issues `sid-1`, `sid-2`, ... to consecutive handshakes.
struct HandshakeResponder {
    issued: AtomicUsize,
    ping_interval_ms: u64,
}

impl Respond for HandshakeResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        ResponseTemplate::new(200).set_body_string(handshake_body(
            &format!("sid-{n}"),
            self.ping_interval_ms,
        ))
    }
}

/// A handshake body as the remote frames it.
pub fn handshake_body(sid: &str, ping_interval_ms: u64) -> String {
    let json = serde_json::json!({
        "sid": sid,
        "upgrades": ["websocket"],
        "pingInterval": ping_interval_ms,
        "pingTimeout": 5000,
    });
    format!("96:0{json}2:40")
}

/// Discovery plus polling endpoints for one game session.
pub struct FakeLobby {
    pub server: MockServer,
}

impl FakeLobby {
    /// A lobby that accepts every registration and reports `state_body` on
    /// every state poll.
    pub async fn start(ping_interval_ms: u64, state_body: &str) -> Self {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/server"))
            .respond_with(ResponseTemplate::new(200).set_body_string(server.uri()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/socket.io/"))
            .and(WithoutSid)
            .respond_with(HandshakeResponder {
                issued: AtomicUsize::new(0),
                ping_interval_ms,
            })
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/socket.io/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/socket.io/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(state_body))
            .mount(&server)
            .await;

        Self { server }
    }

    /// Reject the registration of the unit holding `sid`.
    pub async fn reject_registration(&self, sid: &'static str, body: &str) {
        Mock::given(method("POST"))
            .and(path("/socket.io/"))
            .and(ForSid(sid))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Configuration pointing discovery at this lobby.
    pub fn config(&self) -> SwarmConfig {
        SwarmConfig::default()
            .with_discovery_url(format!("{}/api/server", self.server.uri()))
            .with_shutdown_timeout(Duration::from_millis(200))
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }
}
