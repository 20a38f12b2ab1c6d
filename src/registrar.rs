//! Participant registration over the polling transport.
//!
//! Registration is a single `42` event whose payload is a positional array:
//!
//! ```text
//! [1, id, name, avatar, locale, viewer, code, modCode, invite]
//! ```
//!
//! A rejected registration is never retried: sending the same identity twice
//! makes the remote report a duplicate.

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::ser::{Serialize, SerializeTuple, Serializer};
use tracing::{debug, warn};

use crate::code::SessionCode;
use crate::endpoint::Endpoint;
use crate::error::{Result, SwarmError};
use crate::frame::Envelope;
use crate::identity::ParticipantIdentity;
use crate::negotiator::SessionId;
use crate::polling::PollingClient;

/// Message type of a join request.
pub const JOIN_MESSAGE_TYPE: u8 = 1;

/// Body the remote answers with when it accepts a polling POST.
pub const ACK_TOKEN: &str = "ok";

const POSITIONS: usize = 9;

/// Registration payload, serialized as a fixed nine-position array.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationPayload<'a> {
    identity: &'a ParticipantIdentity,
    code: &'a SessionCode,
}

impl<'a> RegistrationPayload<'a> {
    /// Payload registering `identity` into the session `code` as a player.
    pub fn new(identity: &'a ParticipantIdentity, code: &'a SessionCode) -> Self {
        Self { identity, code }
    }

    /// Render the full polling request body (`<len>:42<json>`).
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Serialization`] if the payload cannot be encoded.
    pub fn to_body(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(Envelope::message(&json).encode())
    }
}

impl Serialize for RegistrationPayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_tuple(POSITIONS)?;
        seq.serialize_element(&JOIN_MESSAGE_TYPE)?;
        seq.serialize_element(&self.identity.id)?;
        seq.serialize_element(&self.identity.display_name)?;
        seq.serialize_element(&self.identity.avatar)?;
        seq.serialize_element(&self.identity.locale)?;
        // viewer
        seq.serialize_element(&false)?;
        seq.serialize_element(self.code.as_str())?;
        // moderator code, invite
        seq.serialize_element(&Option::<String>::None)?;
        seq.serialize_element(&Option::<String>::None)?;
        seq.end()
    }
}

/// What the remote answered to a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// HTTP status.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl Registration {
    /// `true` only for an HTTP success whose body is exactly [`ACK_TOKEN`].
    pub fn accepted(&self) -> bool {
        (200..300).contains(&self.status) && self.body == ACK_TOKEN
    }

    /// Turn the answer into a result, rejecting anything but acceptance.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::RegistrationRejected`] unless [`accepted`](Self::accepted).
    pub fn into_result(self) -> Result<()> {
        if self.accepted() {
            Ok(())
        } else {
            Err(SwarmError::RegistrationRejected {
                status: self.status,
                body: self.body,
            })
        }
    }
}

impl PollingClient {
    /// Submit the participant registration on an open polling session.
    ///
    /// The returned [`Registration`] reports acceptance; network failures are
    /// errors.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be sent or the payload cannot be encoded.
    pub async fn register(
        &self,
        endpoint: &Endpoint,
        sid: &SessionId,
        identity: &ParticipantIdentity,
    ) -> Result<Registration> {
        let body = RegistrationPayload::new(identity, &self.code).to_body()?;
        let mut headers = self.headers.with_credential(sid)?;
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain;charset=UTF-8"),
        );

        debug!(name = %identity.display_name, "registering participant");
        let response = self
            .http
            .post(endpoint.polling(Some(sid)))
            .headers(headers)
            .body(body)
            .send()
            .await?;
        let registration = Registration {
            status: response.status().as_u16(),
            body: response.text().await?,
        };
        if !registration.accepted() {
            warn!(
                status = registration.status,
                body = %registration.body,
                "registration not acknowledged"
            );
        }
        Ok(registration)
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
    use crate::config::SwarmConfig;
    use serde_json::{json, Value};
    use uuid::Uuid;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn identity() -> ParticipantIdentity {
        ParticipantIdentity {
            id: Uuid::from_u128(7),
            display_name: "Bot42".into(),
            avatar: 12,
            locale: "en".into(),
        }
    }

    #[test]
    fn payload_has_nine_positions_in_order() {
        let identity = identity();
        let code = SessionCode::parse("abc123");
        let value = serde_json::to_value(RegistrationPayload::new(&identity, &code)).unwrap();
        assert_eq!(
            value,
            json!([
                1,
                "00000000-0000-0000-0000-000000000007",
                "Bot42",
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
    fn body_is_length_prefixed_event() {
        let identity = identity();
        let code = SessionCode::parse("abc123");
        let payload = RegistrationPayload::new(&identity, &code);
        let json = serde_json::to_string(&payload).unwrap();
        let body = payload.to_body().unwrap();
        assert_eq!(body, format!("{}:42{json}", json.len() + 2));
    }

    #[test]
    fn acceptance_requires_success_and_ok_body() {
        let ok = Registration {
            status: 200,
            body: "ok".into(),
        };
        assert!(ok.accepted());
        assert!(ok.into_result().is_ok());

        let wrong_body = Registration {
            status: 200,
            body: "ok\n".into(),
        };
        assert!(!wrong_body.accepted());

        let wrong_status = Registration {
            status: 400,
            body: "ok".into(),
        };
        let err = wrong_status.into_result().unwrap_err();
        assert!(matches!(
            err,
            SwarmError::RegistrationRejected { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn register_posts_envelope_with_credential() {
        let server = MockServer::start().await;
        let identity = identity();
        let code = SessionCode::parse("abc123");
        let expected = RegistrationPayload::new(&identity, &code).to_body().unwrap();

        Mock::given(method("POST"))
            .and(path("/socket.io/"))
            .and(query_param("transport", "polling"))
            .and(query_param("sid", "abc"))
            .and(header("cookie", "io=abc"))
            .and(header("content-type", "text/plain;charset=UTF-8"))
            .and(body_string(expected))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = PollingClient::new(&SwarmConfig::default(), code).unwrap();
        let endpoint = Endpoint::new(&server.uri(), "/socket.io/").unwrap();
        let registration = client
            .register(&endpoint, &SessionId::from("abc"), &identity)
            .await
            .unwrap();
        assert!(registration.accepted());
    }

    #[tokio::test]
    async fn register_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"code":1}"#))
            .mount(&server)
            .await;

        let client =
            PollingClient::new(&SwarmConfig::default(), SessionCode::parse("abc")).unwrap();
        let endpoint = Endpoint::new(&server.uri(), "/socket.io/").unwrap();
        let registration = client
            .register(&endpoint, &SessionId::from("abc"), &identity())
            .await
            .unwrap();
        assert!(!registration.accepted());
        let parsed: Value = serde_json::from_str(&registration.body).unwrap();
        assert_eq!(parsed["code"], 1);
    }
}
