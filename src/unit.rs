//! One simulated participant: the sequential join pipeline.
//!
//! A [`Unit`] resolves the server, negotiates a polling session, registers its
//! identity, checks the game state once, then upgrades to a persistent
//! connection and stays there until the connection ends or the swarm shuts
//! down. Every stage waits for the previous one; a fatal error at any stage
//! ends the unit without touching any other unit.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use crate::code::SessionCode;
use crate::config::SwarmConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::identity::ParticipantIdentity;
use crate::negotiator::{SessionId, TransportSession};
use crate::polling::PollingClient;
use crate::transport::{CloseInfo, Connector};

/// What a unit did before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    /// 1-based unit index.
    pub index: usize,
    /// Identity the unit registered with.
    pub identity: ParticipantIdentity,
    /// Transport session the unit negotiated.
    pub sid: SessionId,
    /// `Closed` or `Failed`.
    pub final_state: ConnectionState,
    /// How the persistent connection closed, if it closed.
    pub close: Option<CloseInfo>,
    /// Transport error that ended the connection, if it failed.
    pub failure: Option<String>,
}

/// A single participant pipeline.
pub struct Unit<C: Connector> {
    index: usize,
    config: Arc<SwarmConfig>,
    connector: Arc<C>,
    client: PollingClient,
    identity: ParticipantIdentity,
    state: ConnectionState,
}

impl<C: Connector> Unit<C> {
    /// Prepare unit `index` for `code` with a freshly generated identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or header template cannot be built.
    pub fn new(
        index: usize,
        code: SessionCode,
        config: Arc<SwarmConfig>,
        connector: Arc<C>,
    ) -> Result<Self> {
        let client = PollingClient::new(&config, code)?;
        let identity = ParticipantIdentity::generate(&config);
        Ok(Self {
            index,
            config,
            connector,
            client,
            identity,
            state: ConnectionState::Negotiating,
        })
    }

    /// 1-based index used in log output.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The identity this unit registers with.
    pub fn identity(&self) -> &ParticipantIdentity {
        &self.identity
    }

    /// Current pipeline stage.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the pipeline to completion.
    ///
    /// Returns once the persistent connection closes or fails, or once
    /// `shutdown` flips to `true`.
    ///
    /// # Errors
    ///
    /// Returns the fatal error of whichever pre-connection stage failed. A
    /// connection that opened and later ended is reported through
    /// [`UnitReport`], not as an error.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<UnitReport> {
        match self.join().await {
            Ok((endpoint, session)) => self.connect(endpoint, session, shutdown).await,
            Err(e) => {
                warn!(stage = %self.state, "unit aborted: {e}");
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    /// Negotiate, register and validate over the polling transport.
    async fn join(&mut self) -> Result<(Endpoint, TransportSession)> {
        self.state = ConnectionState::Negotiating;
        let endpoint = self.client.resolve_server().await?;
        let session = self.client.handshake(&endpoint).await?;

        self.state = ConnectionState::Registering;
        self.client
            .register(&endpoint, &session.sid, &self.identity)
            .await?
            .into_result()?;
        info!(name = %self.identity.display_name, "registered participant");

        self.state = ConnectionState::Validating;
        if let Some(game) = self
            .client
            .check_game_state(&endpoint, &session.sid)
            .await?
        {
            debug!(state = %game, "game state");
        }

        Ok((endpoint, session))
    }

    async fn connect(
        &mut self,
        endpoint: Endpoint,
        session: TransportSession,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<UnitReport> {
        self.state = ConnectionState::Connecting;
        let url = endpoint.websocket(&session.sid)?;
        let headers = self.client.headers().upgrade(&session.sid)?;

        self.spawn_flush(endpoint, session.sid.clone());

        let transport = match self.connector.connect(&url, headers).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(stage = %self.state, "unit aborted: {e}");
                self.state = ConnectionState::Failed;
                return Err(e);
            }
        };

        let (mut connection, mut events) =
            ConnectionManager::start(transport, session.ping_interval, &self.config);
        self.state = ConnectionState::Open;

        let mut close = None;
        let mut failure = None;
        let stopped = async {
            // An error means the swarm handle is gone; nobody can ask us to stop.
            let requested = shutdown.wait_for(|stop| *stop).await.is_ok();
            if !requested {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                _ = &mut stopped => {
                    connection.shutdown().await;
                    // The loop may have failed before it saw the signal.
                    while let Some(event) = events.recv().await {
                        match event {
                            ConnectionEvent::Closed(info) => close = Some(info),
                            ConnectionEvent::Failed { error } => {
                                warn!("connection failed: {error}");
                                failure = Some(error);
                            }
                            _ => {}
                        }
                    }
                    break;
                }
                event = events.recv() => match event {
                    Some(ConnectionEvent::Opened) => {}
                    Some(ConnectionEvent::Upgraded) => debug!("upgraded to persistent transport"),
                    Some(ConnectionEvent::Message(text)) => debug!(%text, "message"),
                    Some(ConnectionEvent::Closed(info)) => {
                        info!(code = info.code, reason = %info.reason, "connection closed");
                        close = Some(info);
                        break;
                    }
                    Some(ConnectionEvent::Failed { error }) => {
                        warn!("connection failed: {error}");
                        failure = Some(error);
                        break;
                    }
                    None => break,
                },
            }
        }

        self.state = if failure.is_some() {
            ConnectionState::Failed
        } else {
            ConnectionState::Closed
        };

        Ok(UnitReport {
            index: self.index,
            identity: self.identity.clone(),
            sid: session.sid,
            final_state: self.state,
            close,
            failure,
        })
    }

    /// Poll once on the side so the remote flushes the polling session while
    /// the upgrade is in flight.
    fn spawn_flush(&self, endpoint: Endpoint, sid: SessionId) {
        let client = self.client.clone();
        tokio::spawn(
            async move {
                if let Err(e) = client.flush(&endpoint, &sid).await {
                    debug!("flush poll failed: {e}");
                }
            }
            .in_current_span(),
        );
    }
}

impl<C: Connector> std::fmt::Debug for Unit<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("index", &self.index)
            .field("identity", &self.identity)
            .field("state", &self.state)
            .finish()
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
    use crate::error::SwarmError;
    use crate::transport::{Transport, TransportEvent};
    use async_trait::async_trait;
    use reqwest::header::{HeaderName, HeaderValue};
    use url::Url;

    struct Refuses;

    struct Never;

    #[async_trait]
    impl Transport for Never {
        async fn send(&mut self, _message: String) -> Result<()> {
            Err(SwarmError::TransportClosed)
        }

        async fn recv(&mut self) -> Result<TransportEvent> {
            Err(SwarmError::TransportClosed)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for Refuses {
        type Transport = Never;

        async fn connect(
            &self,
            _url: &Url,
            _headers: Vec<(HeaderName, HeaderValue)>,
        ) -> Result<Never> {
            Err(SwarmError::TransportClosed)
        }
    }

    #[test]
    fn new_unit_starts_negotiating_with_own_identity() {
        let config = Arc::new(SwarmConfig::default().with_username_prefix("Sketch"));
        let connector = Arc::new(Refuses);
        let a = Unit::new(1, SessionCode::parse("abc"), Arc::clone(&config), Arc::clone(&connector))
            .unwrap();
        let b = Unit::new(2, SessionCode::parse("abc"), config, connector).unwrap();

        assert_eq!(a.state(), ConnectionState::Negotiating);
        assert_eq!(a.index(), 1);
        assert!(a.identity().display_name.starts_with("Sketch"));
        assert_ne!(a.identity().id, b.identity().id);
    }

    #[tokio::test]
    async fn unreachable_discovery_fails_the_unit() {
        let config = Arc::new(
            SwarmConfig::default().with_discovery_url("http://127.0.0.1:1/api/server"),
        );
        let unit = Unit::new(1, SessionCode::parse("abc"), config, Arc::new(Refuses)).unwrap();
        let (_tx, rx) = watch::channel(false);

        let err = unit.run(rx).await.unwrap_err();
        assert!(matches!(err, SwarmError::Http(_)), "got {err:?}");
        assert!(err.is_fatal());
    }
}
