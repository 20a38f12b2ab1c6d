//! Join validation: one state poll before committing to a persistent
//! connection.
//!
//! The poll is reconnaissance. A body that cannot be understood means "no
//! state known" and the unit carries on; an explicit rejection from the game
//! stops the unit before it connects.

use serde_json::Value;
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::error::{ErrorKind, Result, SwarmError};
use crate::frame::NOOP_SENTINEL;
use crate::negotiator::SessionId;
use crate::polling::PollingClient;

/// Embedded error code meaning the game has no free seat.
pub const GAME_FULL_CODE: i64 = 4;

/// Interpret a state poll body.
///
/// Returns `Ok(None)` when there is nothing to report, `Ok(Some(state))` with
/// the game payload, [`SwarmError::SessionFull`] or
/// [`SwarmError::GameRejected`] when the payload embeds any other truthy
/// `error` (non-zero number, non-empty string, `true`, array or object), and
/// the recoverable [`SwarmError::MalformedState`] when the body is not a
/// numeric-prefixed JSON array.
pub fn interpret_state_poll(body: &str) -> Result<Option<Value>> {
    if body == NOOP_SENTINEL {
        return Ok(None);
    }

    let start = body
        .find('[')
        .ok_or_else(|| SwarmError::MalformedState(format!("no event array in {body:?}")))?;
    let rest = body.get(start..).unwrap_or_default();

    // The array may be followed by further packets; only the first value counts.
    let first = serde_json::Deserializer::from_str(rest)
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| SwarmError::MalformedState("empty event array".into()))?
        .map_err(|e| SwarmError::MalformedState(e.to_string()))?;

    let Value::Array(items) = first else {
        return Err(SwarmError::MalformedState("event is not an array".into()));
    };
    let Some(payload) = items.into_iter().nth(1) else {
        return Ok(None);
    };

    match payload.get("error") {
        Some(error) if is_game_full(error) => Err(SwarmError::SessionFull),
        Some(error) if is_truthy(error) => Err(SwarmError::GameRejected {
            error: error.to_string(),
        }),
        _ => Ok(Some(payload)),
    }
}

/// `4`, whether encoded as an integer or a float.
fn is_game_full(error: &Value) -> bool {
    error.as_f64() == Some(GAME_FULL_CODE as f64)
}

/// The remote's own truthiness rule: only `null`, `false`, zero and the empty
/// string mean "no error". Empty arrays and objects count as errors.
fn is_truthy(error: &Value) -> bool {
    match error {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl PollingClient {
    /// Poll the session once and report the current game state.
    ///
    /// Malformed responses are logged and reported as `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Fails on network errors and on game rejections
    /// ([`SwarmError::SessionFull`], [`SwarmError::GameRejected`]); all are
    /// fatal for the unit.
    pub async fn check_game_state(
        &self,
        endpoint: &Endpoint,
        sid: &SessionId,
    ) -> Result<Option<Value>> {
        let headers = self.headers.with_credential(sid)?;
        let url = endpoint.polling(Some(sid));
        debug!(%url, "polling game state");
        let body = self.http.get(url).headers(headers).send().await?.text().await?;

        match interpret_state_poll(&body) {
            Err(e) if e.kind() == ErrorKind::Recoverable => {
                warn!("ignoring state poll response: {e}");
                Ok(None)
            }
            other => other,
        }
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
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn sentinel_means_nothing_to_report() {
        assert!(interpret_state_poll("1:61:1").unwrap().is_none());
    }

    #[test]
    fn payload_is_second_element() {
        let body = r#"120:42[5,{"users":[],"screen":1}]"#;
        let state = interpret_state_poll(body).unwrap().unwrap();
        assert_eq!(state, json!({"users": [], "screen": 1}));
    }

    #[test]
    fn trailing_packets_are_ignored() {
        let body = r#"17:42[5,{"turn":2}]1:6"#;
        let state = interpret_state_poll(body).unwrap().unwrap();
        assert_eq!(state["turn"], 2);
    }

    #[test]
    fn error_four_is_session_full() {
        let err = interpret_state_poll(r#"20:42[2,{"error":4}]"#).unwrap_err();
        assert!(matches!(err, SwarmError::SessionFull));
        assert!(err.is_fatal());
    }

    #[test]
    fn other_error_codes_are_generic_rejections() {
        let err = interpret_state_poll(r#"20:42[2,{"error":9}]"#).unwrap_err();
        assert!(matches!(err, SwarmError::GameRejected { error } if error == "9"));
    }

    #[test]
    fn float_four_is_session_full() {
        let err = interpret_state_poll(r#"42[2,{"error":4.0}]"#).unwrap_err();
        assert!(matches!(err, SwarmError::SessionFull));
    }

    #[test]
    fn string_error_is_a_rejection() {
        let err = interpret_state_poll(r#"42[2,{"error":"full"}]"#).unwrap_err();
        assert!(matches!(err, SwarmError::GameRejected { error } if error == r#""full""#));
    }

    #[test]
    fn boolean_error_is_a_rejection() {
        let err = interpret_state_poll(r#"42[2,{"error":true}]"#).unwrap_err();
        assert!(matches!(err, SwarmError::GameRejected { error } if error == "true"));
    }

    #[test]
    fn oversized_error_code_is_a_rejection() {
        let err = interpret_state_poll(r#"42[2,{"error":18446744073709551615}]"#).unwrap_err();
        assert!(matches!(err, SwarmError::GameRejected { .. }));
    }

    #[test]
    fn container_errors_are_rejections() {
        assert!(interpret_state_poll(r#"42[2,{"error":[]}]"#).is_err());
        assert!(interpret_state_poll(r#"42[2,{"error":{"reason":"banned"}}]"#).is_err());
    }

    #[test]
    fn falsy_errors_are_not_rejections() {
        for body in [
            r#"42[2,{"error":false}]"#,
            r#"42[2,{"error":null}]"#,
            r#"42[2,{"error":""}]"#,
            r#"42[2,{"error":0.0}]"#,
        ] {
            assert!(interpret_state_poll(body).unwrap().is_some(), "body {body}");
        }
    }

    #[test]
    fn zero_error_is_not_a_rejection() {
        let state = interpret_state_poll(r#"42[2,{"error":0}]"#).unwrap();
        assert!(state.is_some());
    }

    #[test]
    fn missing_array_is_recoverable() {
        let err = interpret_state_poll("ok").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Recoverable);
    }

    #[test]
    fn broken_json_is_recoverable() {
        let err = interpret_state_poll("42[1,{").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Recoverable);
    }

    #[test]
    fn single_element_array_has_no_state() {
        assert!(interpret_state_poll("42[1]").unwrap().is_none());
    }

    async fn poll(body: &str) -> Result<Option<Value>> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("sid", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client =
            PollingClient::new(&SwarmConfig::default(), SessionCode::parse("abc")).unwrap();
        let endpoint = Endpoint::new(&server.uri(), "/socket.io/").unwrap();
        client
            .check_game_state(&endpoint, &SessionId::from("abc"))
            .await
    }

    #[tokio::test]
    async fn check_game_state_swallows_malformed_body() {
        assert!(poll("<html>502</html>").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn check_game_state_propagates_full_game() {
        let err = poll(r#"20:42[2,{"error":4}]"#).await.unwrap_err();
        assert!(matches!(err, SwarmError::SessionFull));
    }

    #[tokio::test]
    async fn check_game_state_returns_payload() {
        let state = poll(r#"42[2,{"code":"abc"}]"#).await.unwrap();
        assert_eq!(state, Some(json!({"code": "abc"})));
    }
}
