#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire format tests for Lobby Swarm.
//!
//! Verifies the handshake framing, the registration envelope, the state poll
//! interpretation, and the persistent connection control frames against
//! fixtures shaped like real remote traffic.

use std::time::Duration;

use lobby_swarm::frame::{
    js_len, strip_handshake_frame, ControlFrame, Envelope, OutgoingFrame, NOOP_SENTINEL,
};
use lobby_swarm::id::{generate_cache_buster, TOKEN_PREFIX};
use lobby_swarm::registrar::RegistrationPayload;
use lobby_swarm::validator::interpret_state_poll;
use lobby_swarm::{
    ErrorKind, ParticipantIdentity, SessionCode, SwarmConfig, SwarmError, TransportSession,
};
use serde_json::{json, Value};

// ════════════════════════════════════════════════════════════════════
// Helper
// ════════════════════════════════════════════════════════════════════

fn identity() -> ParticipantIdentity {
    ParticipantIdentity {
        id: uuid::Uuid::from_u128(0x1234),
        display_name: "Bot4821".into(),
        avatar: 12,
        locale: "en".into(),
    }
}

// ════════════════════════════════════════════════════════════════════
// Handshake
// ════════════════════════════════════════════════════════════════════

#[test]
fn handshake_fixture_parses() {
    let body = r#"96:0{"sid":"abc","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":5000}2:40"#;
    let session = TransportSession::from_frame(body).unwrap();
    assert_eq!(session.sid.as_str(), "abc");
    assert_eq!(session.ping_interval, Duration::from_millis(25_000));
    assert_eq!(session.ping_timeout, Duration::from_millis(5_000));
    assert_eq!(session.upgrades, vec!["websocket"]);
}

#[test]
fn handshake_strip_is_fixed_width() {
    assert_eq!(strip_handshake_frame("96:0{}2:40").unwrap(), "{}");
    assert_eq!(strip_handshake_frame("xxxxABCDyyyy").unwrap(), "ABCD");
    assert_eq!(strip_handshake_frame("12345678").unwrap(), "");
}

#[test]
fn short_handshake_is_rejected() {
    let err = strip_handshake_frame("1234567").unwrap_err();
    assert!(matches!(err, SwarmError::Handshake(_)));
    assert!(err.is_fatal());
}

#[test]
fn handshake_without_sid_is_fatal() {
    let body = r#"96:0{"pingInterval":25000,"pingTimeout":5000}2:40"#;
    let err = TransportSession::from_frame(body).unwrap_err();
    assert!(matches!(err, SwarmError::Handshake(_)));
    assert_eq!(err.kind(), ErrorKind::Fatal);
}

#[test]
fn handshake_with_zero_interval_is_fatal() {
    let body = r#"96:0{"sid":"abc","pingInterval":0,"pingTimeout":5000}2:40"#;
    assert!(TransportSession::from_frame(body).is_err());
}

// ════════════════════════════════════════════════════════════════════
// Registration envelope
// ════════════════════════════════════════════════════════════════════

#[test]
fn registration_payload_positions() {
    let identity = identity();
    let code = SessionCode::parse("https://garticphone.com/?c=abc123");
    let body = RegistrationPayload::new(&identity, &code).to_body().unwrap();

    let envelope = Envelope::decode(&body).unwrap();
    let json = envelope.packet().strip_prefix("42").unwrap();
    let value: Value = serde_json::from_str(json).unwrap();
    assert_eq!(
        value,
        json!([
            1,
            "00000000-0000-0000-0000-000000001234",
            "Bot4821",
            12,
            "en",
            false,
            "abc123",
            null,
            null
        ])
    );
}

#[test]
fn envelope_length_counts_tag() {
    let payload = r#"[1,"x"]"#;
    let body = Envelope::message(payload).encode();
    assert_eq!(body, format!("{}:42{payload}", payload.len() + 2));
}

#[test]
fn envelope_length_is_utf16_units() {
    // "é" is one UTF-16 unit but two UTF-8 bytes; "😀" is two units.
    assert_eq!(js_len("é"), 1);
    assert_eq!(js_len("😀"), 2);
    assert_eq!(Envelope::message(r#"["é"]"#).encode(), r#"7:42["é"]"#);
}

#[test]
fn envelope_decode_rejects_wrong_length() {
    assert!(matches!(
        Envelope::decode("9:42[1]").unwrap_err(),
        SwarmError::Frame(_)
    ));
    assert!(Envelope::decode("42[1]").is_err());
    assert!(Envelope::decode("x:42[1]").is_err());
}

// ════════════════════════════════════════════════════════════════════
// State poll
// ════════════════════════════════════════════════════════════════════

#[test]
fn noop_sentinel_is_no_state() {
    assert!(interpret_state_poll(NOOP_SENTINEL).unwrap().is_none());
}

#[test]
fn game_full_is_distinct_from_other_rejections() {
    assert!(matches!(
        interpret_state_poll(r#"20:42[2,{"error":4}]"#).unwrap_err(),
        SwarmError::SessionFull
    ));
    assert!(matches!(
        interpret_state_poll(r#"20:42[2,{"error":1}]"#).unwrap_err(),
        SwarmError::GameRejected { error } if error == "1"
    ));
    assert!(matches!(
        interpret_state_poll(r#"42[2,{"error":4.0}]"#).unwrap_err(),
        SwarmError::SessionFull
    ));
    assert!(matches!(
        interpret_state_poll(r#"42[2,{"error":"full"}]"#).unwrap_err(),
        SwarmError::GameRejected { .. }
    ));
}

#[test]
fn unparseable_state_is_recoverable() {
    for body in ["", "ok", "42[", "3:42{}", "[]]"] {
        match interpret_state_poll(body) {
            Ok(None) => {}
            Err(e) => assert_eq!(e.kind(), ErrorKind::Recoverable, "body {body:?}"),
            Ok(Some(v)) => panic!("unexpected state {v} for {body:?}"),
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// Persistent connection frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn outgoing_frames() {
    assert_eq!(OutgoingFrame::Probe.as_str(), "2probe");
    assert_eq!(OutgoingFrame::Upgrade.as_str(), "5");
    assert_eq!(OutgoingFrame::Heartbeat.as_str(), "2");
}

#[test]
fn incoming_frames() {
    assert_eq!(ControlFrame::parse("3probe"), ControlFrame::ProbeAck);
    assert_eq!(ControlFrame::parse("3"), ControlFrame::Pong);
    assert_eq!(
        ControlFrame::parse(r#"42["chat"]"#),
        ControlFrame::Message(r#"2["chat"]"#)
    );
    assert_eq!(ControlFrame::parse("probe"), ControlFrame::Other("probe"));
}

// ════════════════════════════════════════════════════════════════════
// Identifiers
// ════════════════════════════════════════════════════════════════════

#[test]
fn cache_busters_are_prefixed_and_vary() {
    let a = generate_cache_buster();
    let b = generate_cache_buster();
    assert!(a.starts_with(TOKEN_PREFIX));
    assert!(a
        .chars()
        .skip(TOKEN_PREFIX.len())
        .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    assert_ne!(a, b);
}

#[test]
fn identities_are_unique_per_unit() {
    let config = SwarmConfig::default();
    let a = ParticipantIdentity::generate(&config);
    let b = ParticipantIdentity::generate(&config);
    assert_ne!(a.id, b.id);
    assert!(a.display_name.starts_with("Bot"));
}
