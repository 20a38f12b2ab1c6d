#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end tests of a single unit's pipeline against a fake lobby.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeLobby, MockConnector, Scripted};
use lobby_swarm::{
    ConnectionState, SessionCode, SwarmConfig, SwarmError, Unit, UnitReport,
};
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CODE: &str = "https://garticphone.com/?c=abc123";

fn unit(config: SwarmConfig, connector: &MockConnector) -> Unit<MockConnector> {
    Unit::new(
        1,
        SessionCode::parse(CODE),
        Arc::new(config),
        Arc::new(connector.clone()),
    )
    .unwrap()
}

/// Run the unit in the background; flipping the returned sender stops it.
fn spawn(
    unit: Unit<MockConnector>,
) -> (
    watch::Sender<bool>,
    tokio::task::JoinHandle<lobby_swarm::error::Result<UnitReport>>,
) {
    let (tx, rx) = watch::channel(false);
    (tx, tokio::spawn(unit.run(rx)))
}

#[tokio::test]
async fn joins_and_keeps_heartbeat_running() {
    let lobby = FakeLobby::start(25_000, "1:61:1").await;
    let connector = MockConnector::new(vec![Scripted::Text("3probe")]);
    let (stop, handle) = spawn(unit(lobby.config(), &connector));

    connector.wait_for_probes(1).await;
    // Network work is done; from here on only the heartbeat timer matters.
    tokio::time::pause();

    let attempt = &connector.attempts()[0];
    assert_eq!(attempt.url.scheme(), "ws");
    assert_eq!(attempt.url.path(), "/socket.io/");
    let query: Vec<(String, String)> = attempt
        .url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    assert!(query.contains(&("EIO".into(), "3".into())));
    assert!(query.contains(&("transport".into(), "websocket".into())));
    assert!(query.contains(&("sid".into(), "sid-1".into())));
    assert_eq!(attempt.header("cookie").as_deref(), Some("io=sid-1"));
    assert_eq!(
        attempt.header("origin").as_deref(),
        Some("https://garticphone.com")
    );
    assert_eq!(
        attempt.header("user-agent").as_deref(),
        Some("insomnia/2023.6.0")
    );

    tokio::time::sleep(Duration::from_millis(24_000)).await;
    assert_eq!(attempt.sent(), vec!["2probe", "5"]);

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(attempt.sent(), vec!["2probe", "5", "2"]);

    tokio::time::sleep(Duration::from_millis(50_000)).await;
    assert_eq!(attempt.sent(), vec!["2probe", "5", "2", "2", "2"]);

    stop.send_replace(true);
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.sid.as_str(), "sid-1");
    assert_eq!(report.final_state, ConnectionState::Closed);
    assert_eq!(report.close.unwrap().code, 1000);
    assert!(attempt.closed.load(std::sync::atomic::Ordering::Relaxed));

    tokio::time::sleep(Duration::from_millis(100_000)).await;
    assert_eq!(attempt.sent().len(), 5, "heartbeat outlived the connection");
}

#[tokio::test]
async fn registration_and_polls_carry_the_session() {
    let lobby = FakeLobby::start(25_000, "1:61:1").await;
    let connector = MockConnector::new(vec![]);
    let (stop, handle) = spawn(unit(lobby.config(), &connector));
    connector.wait_for_probes(1).await;
    stop.send_replace(true);
    handle.await.unwrap().unwrap();

    let requests = lobby.requests().await;
    let registration = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .expect("no registration request");
    let body = String::from_utf8(registration.body.clone()).unwrap();
    let (prefix, packet) = body.split_once(':').unwrap();
    assert_eq!(prefix.parse::<usize>().unwrap(), packet.len());
    assert!(packet.starts_with("42[1,\""));
    assert!(packet.ends_with(r#","en",false,"abc123",null,null]"#));
    assert_eq!(
        registration.headers.get("cookie").unwrap().to_str().unwrap(),
        "io=sid-1"
    );

    let polls_with_sid = requests
        .iter()
        .filter(|r| r.method.as_str() == "GET" && r.url.query().unwrap_or("").contains("sid=sid-1"))
        .count();
    // State poll, plus the flush poll if it landed before the lobby was read.
    assert!(polls_with_sid >= 1);
}

#[tokio::test]
async fn full_game_never_connects() {
    let lobby = FakeLobby::start(25_000, r#"20:42[2,{"error":4}]"#).await;
    let connector = MockConnector::new(vec![]);
    let (_stop, handle) = spawn(unit(lobby.config(), &connector));

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, SwarmError::SessionFull), "got {err:?}");
    assert!(connector.attempts().is_empty());
}

#[tokio::test]
async fn other_game_error_never_connects() {
    let lobby = FakeLobby::start(25_000, r#"20:42[2,{"error":7}]"#).await;
    let connector = MockConnector::new(vec![]);
    let (_stop, handle) = spawn(unit(lobby.config(), &connector));

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, SwarmError::GameRejected { error } if error == "7"));
    assert!(connector.attempts().is_empty());
}

#[tokio::test]
async fn malformed_state_poll_still_connects() {
    let lobby = FakeLobby::start(25_000, "<html>bad gateway</html>").await;
    let connector = MockConnector::new(vec![Scripted::Close(1000, "bye")]);
    let (_stop, handle) = spawn(unit(lobby.config(), &connector));

    let report = handle.await.unwrap().unwrap();
    assert_eq!(connector.attempts().len(), 1);
    assert_eq!(report.final_state, ConnectionState::Closed);
    assert_eq!(report.close.unwrap().reason, "bye");
}

#[tokio::test]
async fn rejected_registration_is_fatal() {
    let lobby = FakeLobby::start(25_000, "1:61:1").await;
    lobby.reject_registration("sid-1", "error").await;
    let connector = MockConnector::new(vec![]);
    let (_stop, handle) = spawn(unit(lobby.config(), &connector));

    let err = handle.await.unwrap().unwrap_err();
    assert!(
        matches!(&err, SwarmError::RegistrationRejected { status: 200, body } if body == "error"),
        "got {err:?}"
    );
    assert!(err.is_fatal());
    assert!(connector.attempts().is_empty());
}

#[tokio::test]
async fn discovery_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/server"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let config =
        SwarmConfig::default().with_discovery_url(format!("{}/api/server", server.uri()));
    let connector = MockConnector::new(vec![]);
    let (_stop, handle) = spawn(unit(config, &connector));

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        SwarmError::HttpStatus {
            endpoint: "discovery",
            status: 503
        }
    ));
    assert!(connector.attempts().is_empty());
}

#[tokio::test]
async fn transport_error_ends_the_unit_without_retry() {
    let lobby = FakeLobby::start(25_000, "1:61:1").await;
    let connector = MockConnector::new(vec![
        Scripted::Text("3probe"),
        Scripted::Error("connection reset"),
    ]);
    let (_stop, handle) = spawn(unit(lobby.config(), &connector));

    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.final_state, ConnectionState::Failed);
    assert!(report.failure.unwrap().contains("connection reset"));
    assert_eq!(connector.attempts().len(), 1);
}

#[tokio::test]
async fn failure_racing_shutdown_is_still_reported() {
    let lobby = FakeLobby::start(25_000, "1:61:1").await;
    let connector = MockConnector::new(vec![]).with_failing_sends();
    // Stop is already requested when the connection opens, so the unit takes
    // its shutdown path while the loop is failing on the probe.
    let (stop, rx) = watch::channel(true);

    let report = unit(lobby.config(), &connector).run(rx).await.unwrap();
    assert_eq!(report.final_state, ConnectionState::Failed);
    assert!(report.failure.unwrap().contains("broken pipe"));
    assert!(report.close.is_none());
    assert_eq!(connector.attempts().len(), 1);
    drop(stop);
}
