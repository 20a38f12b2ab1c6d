//! Swarm orchestration: many independent units against one session.
//!
//! [`Swarm::run`] starts `count` units concurrently, each in its own
//! `unit{index=n}` tracing span, and waits for all of them. Units share the
//! read-only configuration and connector only; a failing unit is logged and
//! recorded, and never affects the others.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::code::SessionCode;
use crate::config::SwarmConfig;
use crate::error::Result;
use crate::transport::Connector;
use crate::unit::{Unit, UnitReport};

#[cfg(feature = "transport-websocket")]
use crate::transports::WebSocketConnector;

/// Result of one unit.
#[derive(Debug)]
pub struct UnitOutcome {
    /// 1-based unit index.
    pub index: usize,
    /// The unit's report, or the fatal error that stopped it.
    pub result: Result<UnitReport>,
}

/// Results of a whole swarm run, ordered by unit index.
#[derive(Debug, Default)]
pub struct SwarmReport {
    /// One entry per unit that ran to completion.
    pub outcomes: Vec<UnitOutcome>,
}

impl SwarmReport {
    /// Units whose persistent connection opened.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Units that stopped on a fatal error before connecting.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// The report of unit `index`, if it got that far.
    pub fn unit(&self, index: usize) -> Option<&UnitOutcome> {
        self.outcomes.iter().find(|o| o.index == index)
    }
}

/// Cloneable trigger that asks every live unit to close its connection.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    /// Signal shutdown. Units still in the polling stages finish those first.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    /// Whether shutdown was already requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }
}

/// Runs units against one session code.
pub struct Swarm<C: Connector> {
    config: Arc<SwarmConfig>,
    connector: Arc<C>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

#[cfg(feature = "transport-websocket")]
impl Swarm<WebSocketConnector> {
    /// A swarm that connects over WebSocket.
    pub fn new(config: SwarmConfig) -> Self {
        Self::with_connector(config, WebSocketConnector)
    }
}

impl<C: Connector> Swarm<C> {
    /// A swarm that opens persistent connections through `connector`.
    pub fn with_connector(config: SwarmConfig, connector: C) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// The configuration every unit runs with.
    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// A handle that stops the swarm from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Start `count` units for `code` and wait for all of them to finish.
    pub async fn run(&self, code: &SessionCode, count: usize) -> SwarmReport {
        let mut units = JoinSet::new();

        for index in 1..=count {
            let span = info_span!("unit", index);
            let unit = match Unit::new(
                index,
                code.clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.connector),
            ) {
                Ok(unit) => unit,
                Err(e) => {
                    span.in_scope(|| error!("failed to prepare unit: {e}"));
                    units.spawn(async move { UnitOutcome { index, result: Err(e) } });
                    continue;
                }
            };

            let shutdown = self.shutdown_tx.subscribe();
            units.spawn(
                async move {
                    let result = unit.run(shutdown).await;
                    UnitOutcome { index, result }
                }
                .instrument(span),
            );
        }

        let mut report = SwarmReport::default();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(join_err) => warn!("unit task ended abnormally: {join_err}"),
            }
        }
        report.outcomes.sort_by_key(|o| o.index);

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "swarm finished"
        );
        report
    }
}

impl<C: Connector> std::fmt::Debug for Swarm<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("config", &self.config)
            .field("shutdown", &*self.shutdown_tx.borrow())
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
    use crate::connection::ConnectionState;
    use crate::error::SwarmError;
    use crate::identity::ParticipantIdentity;

    fn outcome(index: usize, ok: bool) -> UnitOutcome {
        let result = if ok {
            Ok(UnitReport {
                index,
                identity: ParticipantIdentity::generate(&SwarmConfig::default()),
                sid: "abc".into(),
                final_state: ConnectionState::Closed,
                close: None,
                failure: None,
            })
        } else {
            Err(SwarmError::SessionFull)
        };
        UnitOutcome { index, result }
    }

    #[test]
    fn report_counts() {
        let report = SwarmReport {
            outcomes: vec![outcome(1, true), outcome(2, false), outcome(3, true)],
        };
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.unit(2).unwrap().result.is_err());
        assert!(report.unit(4).is_none());
    }

    #[test]
    fn shutdown_handle_is_shared() {
        let swarm = Swarm::with_connector(SwarmConfig::default(), NeverConnects);
        let a = swarm.shutdown_handle();
        let b = swarm.shutdown_handle();
        assert!(!b.is_shutdown());
        a.shutdown();
        assert!(b.is_shutdown());
    }

    #[tokio::test]
    async fn zero_units_is_an_empty_report() {
        let swarm = Swarm::with_connector(SwarmConfig::default(), NeverConnects);
        let report = swarm.run(&SessionCode::parse("abc"), 0).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(report.failed(), 0);
    }

    struct NeverConnects;

    #[async_trait::async_trait]
    impl Connector for NeverConnects {
        type Transport = NoTransport;

        async fn connect(
            &self,
            _url: &url::Url,
            _headers: Vec<(reqwest::header::HeaderName, reqwest::header::HeaderValue)>,
        ) -> Result<NoTransport> {
            Err(SwarmError::TransportClosed)
        }
    }

    struct NoTransport;

    #[async_trait::async_trait]
    impl crate::transport::Transport for NoTransport {
        async fn send(&mut self, _message: String) -> Result<()> {
            Err(SwarmError::TransportClosed)
        }

        async fn recv(&mut self) -> Result<crate::transport::TransportEvent> {
            Err(SwarmError::TransportClosed)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }
}
