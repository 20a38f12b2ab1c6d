//! Persistent connection manager.
//!
//! [`ConnectionManager`] is a thin handle over a background connection loop
//! that owns the upgraded [`Transport`]. The loop:
//!
//! 1. sends the probe frame as soon as it starts,
//! 2. answers the remote's probe acknowledgment with the upgrade confirmation,
//! 3. sends a heartbeat every `ping_interval`, regardless of traffic,
//! 4. stops on remote close, transport error, or [`ConnectionManager::shutdown`].
//!
//! The heartbeat timer lives inside the loop, so it is cancelled whenever the
//! loop exits; dropping the handle aborts the loop.
//!
//! # Example
//!
//! ```rust,ignore
//! let (mut connection, mut events) =
//!     ConnectionManager::start(transport, session.ping_interval, &config);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ConnectionEvent::Closed(info) => { /* … */ break }
//!         ConnectionEvent::Failed { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SwarmConfig;
use crate::frame::{ControlFrame, OutgoingFrame};
use crate::transport::{CloseInfo, Transport, TransportEvent, CLOSE_NORMAL};

/// Shortest heartbeat period the loop will run with.
const MIN_HEARTBEAT: Duration = Duration::from_millis(1);

// ── State ───────────────────────────────────────────────────────────

/// Where a unit is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Resolving the server and opening a polling session.
    Negotiating = 0,
    /// Submitting the participant registration.
    Registering = 1,
    /// Polling the game state once.
    Validating = 2,
    /// Opening the persistent connection.
    Connecting = 3,
    /// Persistent connection live, heartbeat running.
    Open = 4,
    /// Closed by the remote or by shutdown. Terminal.
    Closed = 5,
    /// Ended by an error. Terminal.
    Failed = 6,
}

impl ConnectionState {
    /// Returns `true` for [`Closed`](Self::Closed) and [`Failed`](Self::Failed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Negotiating,
            1 => Self::Registering,
            2 => Self::Validating,
            3 => Self::Connecting,
            4 => Self::Open,
            5 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Negotiating => "negotiating",
            Self::Registering => "registering",
            Self::Validating => "validating",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State shared between the handle and the connection loop.
struct SharedState(AtomicU8);

impl SharedState {
    fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move to `state` unless a terminal state was already reached.
    fn finish(&self, state: ConnectionState) {
        let current = self.0.load(Ordering::Acquire);
        if !ConnectionState::from_u8(current).is_terminal() {
            let _ = self.0.compare_exchange(
                current,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// Lifecycle events of a persistent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The loop started and sent its probe.
    Opened,
    /// The probe was acknowledged and the upgrade confirmed.
    Upgraded,
    /// An application message (`4...` packet) arrived.
    Message(String),
    /// The connection closed. Always the last event unless `Failed` is.
    Closed(CloseInfo),
    /// The transport failed. Always the last event unless `Closed` is.
    Failed {
        /// Description of the transport error.
        error: String,
    },
}

// ── Manager handle ──────────────────────────────────────────────────

/// Handle to a running persistent connection.
pub struct ConnectionManager {
    state: Arc<SharedState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl ConnectionManager {
    /// Start the connection loop on an already-upgraded transport.
    ///
    /// `ping_interval` is the heartbeat period captured at handshake time; it is
    /// used unchanged for the life of the connection.
    #[must_use = "the event receiver must be used to observe the connection"]
    pub fn start(
        transport: impl Transport,
        ping_interval: Duration,
        config: &SwarmConfig,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(SharedState::new(ConnectionState::Open));
        let task = tokio::spawn(connection_loop(
            transport,
            ping_interval.max(MIN_HEARTBEAT),
            event_tx,
            Arc::clone(&state),
            shutdown_rx,
        ));

        let manager = Self {
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (manager, event_rx)
    }

    /// Current state: `Open`, `Closed` or `Failed`.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Returns `true` while the connection loop is running.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Close the connection and stop the heartbeat.
    ///
    /// The loop gets `shutdown_timeout` to close the transport and emit its
    /// final `Closed` event; after that it is aborted.
    pub async fn shutdown(&mut self) {
        debug!("connection shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.finish(ConnectionState::Closed);
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // No executor context for a graceful close here; aborting drops the
        // loop future and with it the heartbeat timer.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Connection loop ─────────────────────────────────────────────────

async fn connection_loop(
    mut transport: impl Transport,
    ping_interval: Duration,
    event_tx: mpsc::Sender<ConnectionEvent>,
    state: Arc<SharedState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    info!("Connected to game session!");
    emit_event(&event_tx, ConnectionEvent::Opened).await;

    if let Err(e) = transport.send(OutgoingFrame::Probe.as_str().to_string()).await {
        error!("failed to send probe: {e}");
        emit_failed(&event_tx, &state, e.to_string()).await;
        return;
    }

    let mut heartbeat = interval_at(Instant::now() + ping_interval, ping_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                emit_closed(
                    &event_tx,
                    &state,
                    CloseInfo::new(CLOSE_NORMAL, "client shut down"),
                ).await;
                break;
            }

            _ = heartbeat.tick() => {
                if let Err(e) = transport.send(OutgoingFrame::Heartbeat.as_str().to_string()).await {
                    error!("heartbeat send error: {e}");
                    emit_failed(&event_tx, &state, e.to_string()).await;
                    break;
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Ok(TransportEvent::Text(text)) => {
                        if let Err(e) = handle_frame(&mut transport, &event_tx, text).await {
                            error!("transport send error: {e}");
                            emit_failed(&event_tx, &state, e.to_string()).await;
                            break;
                        }
                    }
                    Ok(TransportEvent::Closed(close)) => {
                        info!(code = close.code, reason = %close.reason, "connection closed by remote");
                        emit_closed(&event_tx, &state, close).await;
                        break;
                    }
                    Err(e) => {
                        error!("transport error: {e}");
                        emit_failed(&event_tx, &state, e.to_string()).await;
                        break;
                    }
                }
            }
        }
    }

    debug!("connection loop exited");
}

/// React to one text frame from the remote.
async fn handle_frame(
    transport: &mut impl Transport,
    event_tx: &mpsc::Sender<ConnectionEvent>,
    text: String,
) -> Result<(), crate::error::SwarmError> {
    match ControlFrame::parse(&text) {
        ControlFrame::ProbeAck => {
            transport
                .send(OutgoingFrame::Upgrade.as_str().to_string())
                .await?;
            debug!("transport upgrade confirmed");
            emit_event(event_tx, ConnectionEvent::Upgraded).await;
        }
        ControlFrame::Message(_) => {
            emit_event(event_tx, ConnectionEvent::Message(text)).await;
        }
        ControlFrame::Pong | ControlFrame::Noop => {}
        ControlFrame::Ping | ControlFrame::Close | ControlFrame::Other(_) => {
            debug!(frame = %text, "unhandled frame");
        }
    }
    Ok(())
}

/// Emit an event without blocking the loop; drop it if the channel is full.
async fn emit_event(event_tx: &mpsc::Sender<ConnectionEvent>, event: ConnectionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!("event channel full, dropping event: {dropped:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Terminal events use `send().await` so they are never dropped.
async fn emit_closed(
    event_tx: &mpsc::Sender<ConnectionEvent>,
    state: &SharedState,
    close: CloseInfo,
) {
    state.set(ConnectionState::Closed);
    if event_tx.send(ConnectionEvent::Closed(close)).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

async fn emit_failed(event_tx: &mpsc::Sender<ConnectionEvent>, state: &SharedState, error: String) {
    state.set(ConnectionState::Failed);
    if event_tx
        .send(ConnectionEvent::Failed { error })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// Records sent frames and replays scripted incoming events.
    struct MockTransport {
        incoming: VecDeque<Result<TransportEvent, SwarmError>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Result<TransportEvent, SwarmError>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> Result<(), SwarmError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Result<TransportEvent, SwarmError> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                // Script exhausted: stay silent until shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> Result<(), SwarmError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn text(frame: &str) -> Result<TransportEvent, SwarmError> {
        Ok(TransportEvent::Text(frame.to_string()))
    }

    fn config() -> SwarmConfig {
        SwarmConfig::default().with_shutdown_timeout(Duration::from_millis(100))
    }

    fn sent_frames(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<String> {
        sent.lock().unwrap().clone()
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn probe_is_sent_on_open() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (mut conn, mut events) =
            ConnectionManager::start(transport, Duration::from_secs(25), &config());

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Opened);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sent_frames(&sent), vec!["2probe"]);
        assert!(conn.is_open());

        conn.shutdown().await;
    }

    #[tokio::test]
    async fn probe_ack_is_answered_with_upgrade() {
        let (transport, sent, _closed) = MockTransport::new(vec![text("3probe")]);
        let (mut conn, mut events) =
            ConnectionManager::start(transport, Duration::from_secs(25), &config());

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Opened);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Upgraded);
        assert_eq!(sent_frames(&sent), vec!["2probe", "5"]);

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_fires_every_ping_interval() {
        let (transport, sent, _closed) = MockTransport::new(vec![text("3probe")]);
        let (mut conn, mut events) =
            ConnectionManager::start(transport, Duration::from_millis(25_000), &config());

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Opened);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Upgraded);

        tokio::time::sleep(Duration::from_millis(24_999)).await;
        assert_eq!(sent_frames(&sent), vec!["2probe", "5"]);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(sent_frames(&sent), vec!["2probe", "5", "2"]);

        tokio::time::sleep(Duration::from_millis(50_000)).await;
        assert_eq!(sent_frames(&sent), vec!["2probe", "5", "2", "2", "2"]);

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_ignores_message_traffic() {
        let (transport, sent, _closed) = MockTransport::new(vec![
            text(r#"42["chat","hi"]"#),
            text("3"),
            text(r#"42["chat","again"]"#),
        ]);
        let (mut conn, mut events) =
            ConnectionManager::start(transport, Duration::from_millis(1_000), &config());

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Opened);
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Message(r#"42["chat","hi"]"#.into())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Message(r#"42["chat","again"]"#.into())
        );

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let heartbeats = sent_frames(&sent).iter().filter(|f| *f == "2").count();
        assert_eq!(heartbeats, 3);

        conn.shutdown().await;
    }

    #[tokio::test]
    async fn remote_close_is_terminal() {
        let (transport, _sent, _closed) = MockTransport::new(vec![Ok(TransportEvent::Closed(
            CloseInfo::new(1001, "server restart"),
        ))]);
        let (conn, mut events) =
            ConnectionManager::start(transport, Duration::from_secs(25), &config());

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Opened);
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Closed(CloseInfo::new(1001, "server restart"))
        );
        // Loop exited: the channel ends and no reconnection happens.
        assert!(events.recv().await.is_none());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn transport_error_is_failed() {
        let (transport, _sent, _closed) = MockTransport::new(vec![Err(
            SwarmError::TransportReceive("connection reset".into()),
        )]);
        let (conn, mut events) =
            ConnectionManager::start(transport, Duration::from_secs(25), &config());

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Opened);
        let event = events.recv().await.unwrap();
        assert!(
            matches!(&event, ConnectionEvent::Failed { error } if error.contains("connection reset")),
            "unexpected event {event:?}"
        );
        assert!(events.recv().await.is_none());
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_heartbeat() {
        let (transport, sent, closed) = MockTransport::new(vec![]);
        let (mut conn, mut events) =
            ConnectionManager::start(transport, Duration::from_millis(1_000), &config());
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Opened);

        conn.shutdown().await;
        assert!(closed.load(Ordering::Acquire));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Closed(CloseInfo::new(CLOSE_NORMAL, "client shut down"))
        );

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(sent_frames(&sent), vec!["2probe"]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_heartbeat() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (conn, mut events) =
            ConnectionManager::start(transport, Duration::from_millis(1_000), &config());
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Opened);

        drop(conn);
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(sent_frames(&sent), vec!["2probe"]);
    }

    #[test]
    fn state_display_and_terminal() {
        assert_eq!(ConnectionState::Validating.to_string(), "validating");
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Open.is_terminal());
        for state in [
            ConnectionState::Negotiating,
            ConnectionState::Registering,
            ConnectionState::Validating,
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Closed,
            ConnectionState::Failed,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }
}
