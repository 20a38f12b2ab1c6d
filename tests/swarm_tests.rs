#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Tests of many units running against the same session.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{FakeLobby, MockConnector, Scripted};
use lobby_swarm::{ConnectionState, SessionCode, Swarm, SwarmError};

#[tokio::test]
async fn units_are_independent() {
    let lobby = FakeLobby::start(25_000, "1:61:1").await;
    let connector = MockConnector::new(vec![Scripted::Close(1000, "game over")]);
    let swarm = Swarm::with_connector(lobby.config(), connector.clone());

    let report = swarm.run(&SessionCode::parse("abc123"), 4).await;

    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.succeeded(), 4);
    let indices: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4]);

    let reports: Vec<_> = report
        .outcomes
        .iter()
        .map(|o| o.result.as_ref().unwrap())
        .collect();
    let ids: HashSet<_> = reports.iter().map(|r| r.identity.id).collect();
    let sids: HashSet<_> = reports.iter().map(|r| r.sid.clone()).collect();
    assert_eq!(ids.len(), 4, "identities must not be shared");
    assert_eq!(sids.len(), 4, "transport sessions must not be shared");
    assert!(reports
        .iter()
        .all(|r| r.final_state == ConnectionState::Closed));

    // Each connection used its own unit's credential.
    for attempt in connector.attempts() {
        let sid = attempt
            .url
            .query_pairs()
            .find(|(k, _)| k == "sid")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(attempt.header("cookie"), Some(format!("io={sid}")));
    }
}

#[tokio::test]
async fn one_rejected_registration_leaves_others_alone() {
    let lobby = FakeLobby::start(25_000, "1:61:1").await;
    lobby.reject_registration("sid-2", "error").await;
    let connector = MockConnector::new(vec![Scripted::Close(1000, "")]);
    let swarm = Swarm::with_connector(lobby.config(), connector.clone());

    let report = swarm.run(&SessionCode::parse("abc123"), 3).await;

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    let failed = report
        .outcomes
        .iter()
        .find_map(|o| o.result.as_ref().err())
        .unwrap();
    assert!(matches!(failed, SwarmError::RegistrationRejected { .. }));
    assert_eq!(connector.attempts().len(), 2);
    assert!(connector
        .attempts()
        .iter()
        .all(|a| a.header("cookie").as_deref() != Some("io=sid-2")));
}

#[tokio::test]
async fn shutdown_stops_open_connections() {
    let lobby = FakeLobby::start(25_000, "1:61:1").await;
    let connector = MockConnector::new(vec![Scripted::Text("3probe")]);
    let swarm = Arc::new(Swarm::with_connector(lobby.config(), connector.clone()));
    let shutdown = swarm.shutdown_handle();

    let running = {
        let swarm = Arc::clone(&swarm);
        tokio::spawn(async move { swarm.run(&SessionCode::parse("abc123"), 2).await })
    };

    connector.wait_for_probes(2).await;
    shutdown.shutdown();
    let report = running.await.unwrap();

    assert_eq!(report.succeeded(), 2);
    for outcome in &report.outcomes {
        let unit = outcome.result.as_ref().unwrap();
        assert_eq!(unit.final_state, ConnectionState::Closed);
        assert_eq!(unit.close.as_ref().unwrap().code, 1000);
    }
    assert!(connector
        .attempts()
        .iter()
        .all(|a| a.closed.load(std::sync::atomic::Ordering::Relaxed)));
}
