//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! This module provides [`WebSocketTransport`], a [`Transport`] over a
//! WebSocket connection, and [`WebSocketConnector`], which opens one with the
//! upgrade headers the remote expects. Both `ws://` and `wss://` URLs are
//! supported; TLS is handled transparently via
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is enabled
//! (it is enabled by default).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use crate::error::SwarmError;
use crate::transport::{CloseInfo, Connector, Transport, TransportEvent, CLOSE_NO_STATUS};

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] implementation backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Dropping the future
/// returned by `recv` before it completes will not consume or lose any frames.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a WebSocket connection, adding `headers` to the upgrade
    /// request.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Io`] if the URL is invalid or the connection
    /// cannot be established. When the underlying error is an I/O error its
    /// [`ErrorKind`](std::io::ErrorKind) is preserved; all other errors are
    /// mapped to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(
        url: &str,
        headers: Vec<(HeaderName, HeaderValue)>,
    ) -> Result<Self, SwarmError> {
        tracing::debug!(url = %url, "connecting to WebSocket server");

        let mut request = url.into_client_request().map_err(io_error)?;
        request.headers_mut().extend(headers);

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(io_error)?;

        tracing::debug!(url = %url, "WebSocket connection established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

fn io_error(e: tokio_tungstenite::tungstenite::Error) -> SwarmError {
    let kind = match &e {
        tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    SwarmError::Io(std::io::Error::new(kind, e))
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), SwarmError> {
        if self.closed {
            return Err(SwarmError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| SwarmError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Result<TransportEvent, SwarmError> {
        if self.closed {
            return Err(SwarmError::TransportClosed);
        }
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(SwarmError::TransportReceive(e.to_string())),
                None => {
                    self.closed = true;
                    return Ok(TransportEvent::Closed(CloseInfo::abnormal()));
                }
            };

            match msg {
                Message::Text(text) => return Ok(TransportEvent::Text(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    self.closed = true;
                    let info = match frame {
                        Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.as_str()),
                        None => CloseInfo::new(CLOSE_NO_STATUS, ""),
                    };
                    return Ok(TransportEvent::Closed(info));
                }
                Message::Ping(_) => {
                    // tungstenite auto-queues a Pong reply.
                    tracing::debug!("received WebSocket ping");
                }
                Message::Pong(_) => {
                    tracing::debug!("received WebSocket pong (ignored)");
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    // Never produced by the read half; kept for exhaustiveness.
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), SwarmError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| SwarmError::TransportSend(e.to_string()))
    }
}

/// [`Connector`] that opens a [`WebSocketTransport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(
        &self,
        url: &Url,
        headers: Vec<(HeaderName, HeaderValue)>,
    ) -> Result<WebSocketTransport, SwarmError> {
        WebSocketTransport::connect(url.as_str(), headers).await
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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
    use std::sync::{Arc, Mutex as StdMutex};

    use reqwest::header::{COOKIE, ORIGIN, USER_AGENT};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::Io(_)));
    }

    // ── Mock-stream helpers ──────────────────────────────────────────────

    /// What the mock server saw in the upgrade request.
    #[derive(Debug, Default, Clone)]
    struct SeenUpgrade {
        uri: String,
        cookie: Option<String>,
        origin: Option<String>,
        user_agent: Option<String>,
    }

    /// Start a local WebSocket server that records the upgrade request, runs
    /// `handler` on the accepted connection, and returns its base URL.
    async fn start_mock_server<F, Fut>(handler: F) -> (String, Arc<StdMutex<SeenUpgrade>>)
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(StdMutex::new(SeenUpgrade::default()));
        let record = Arc::clone(&seen);

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let header = |name: HeaderName| {
                    req.headers()
                        .get(name)
                        .map(|v: &HeaderValue| v.to_str().unwrap().to_string())
                };
                *record.lock().unwrap() = SeenUpgrade {
                    uri: req.uri().to_string(),
                    cookie: header(COOKIE),
                    origin: header(ORIGIN),
                    user_agent: header(USER_AGENT),
                };
                Ok(resp)
            };
            let ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            handler(ws).await;
        });

        (format!("ws://{addr}"), seen)
    }

    fn upgrade_headers() -> Vec<(HeaderName, HeaderValue)> {
        vec![
            (COOKIE, HeaderValue::from_static("io=abc")),
            (ORIGIN, HeaderValue::from_static("https://garticphone.com")),
            (USER_AGENT, HeaderValue::from_static("insomnia/2023.6.0")),
        ]
    }

    // ── Mock-stream tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn connector_sends_upgrade_headers() {
        let (base, seen) = start_mock_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let url =
            Url::parse(&format!("{base}/socket.io/?EIO=3&transport=websocket&sid=abc")).unwrap();
        let mut transport = WebSocketConnector
            .connect(&url, upgrade_headers())
            .await
            .unwrap();
        let _ = transport.recv().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.uri, "/socket.io/?EIO=3&transport=websocket&sid=abc");
        assert_eq!(seen.cookie.as_deref(), Some("io=abc"));
        assert_eq!(seen.origin.as_deref(), Some("https://garticphone.com"));
        assert_eq!(seen.user_agent.as_deref(), Some("insomnia/2023.6.0"));
    }

    #[tokio::test]
    async fn recv_receives_text_frames() {
        let (url, _) = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("3probe".into())).await.unwrap();
            ws.send(Message::Text("3".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, vec![]).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap(),
            TransportEvent::Text("3probe".into())
        );
        assert_eq!(
            transport.recv().await.unwrap(),
            TransportEvent::Text("3".into())
        );
    }

    #[tokio::test]
    async fn recv_reports_close_code_and_reason() {
        let (url, _) = start_mock_server(|mut ws| async move {
            ws.close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "kicked".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, vec![]).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap(),
            TransportEvent::Closed(CloseInfo::new(1008, "kicked"))
        );
        assert!(matches!(
            transport.recv().await.unwrap_err(),
            SwarmError::TransportClosed
        ));
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let (url, _) = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, vec![]).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap(),
            TransportEvent::Text("after_binary".into())
        );
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let (url, _) = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, vec![]).await.unwrap();
        transport.close().await.unwrap();
        // Second close is a no-op.
        transport.close().await.unwrap();

        let err = transport.send("2".to_string()).await.unwrap_err();
        assert!(matches!(err, SwarmError::TransportClosed));
    }

    #[tokio::test]
    async fn send_round_trip() {
        let (url, _) = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, vec![]).await.unwrap();
        transport.send("2probe".to_string()).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap(),
            TransportEvent::Text("2probe".into())
        );
    }
}
