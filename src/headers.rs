//! Browser-like request headers.
//!
//! [`RequestHeaders`] is an immutable template built once per unit. The
//! transport session credential is never written into it; each call that needs
//! it passes the [`SessionId`] explicitly and receives a fresh header map.

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, COOKIE, ORIGIN,
    PRAGMA, REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};

use crate::code::SessionCode;
use crate::config::SwarmConfig;
use crate::error::{Result, SwarmError};
use crate::negotiator::SessionId;

/// Name of the cookie that carries the transport session identifier.
pub const SESSION_COOKIE: &str = "io";

/// Header template representing the impersonated web client.
#[derive(Debug, Clone)]
pub struct RequestHeaders {
    template: HeaderMap,
    origin: HeaderValue,
    user_agent: HeaderValue,
}

impl RequestHeaders {
    /// Build the template for one session code.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Config`] if the configured origin or user agent
    /// cannot be used as a header value.
    pub fn new(config: &SwarmConfig, code: &SessionCode) -> Result<Self> {
        let origin = header_value("origin", &config.origin)?;
        let user_agent = header_value("user_agent", &config.user_agent)?;
        let referer = header_value(
            "referer",
            &format!("{}/?c={code}", config.origin.trim_end_matches('/')),
        )?;

        let mut template = HeaderMap::new();
        template.insert(ACCEPT, HeaderValue::from_static("*/*"));
        template.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        template.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        template.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        template.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        template.insert(ORIGIN, origin.clone());
        template.insert(REFERER, referer);
        template.insert(USER_AGENT, user_agent.clone());

        Ok(Self {
            template,
            origin,
            user_agent,
        })
    }

    /// Headers for calls made before a session exists (discovery, handshake).
    pub fn anonymous(&self) -> HeaderMap {
        self.template.clone()
    }

    /// Headers for polling calls bound to a transport session.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Handshake`] if the session identifier cannot be
    /// carried in a cookie.
    pub fn with_credential(&self, sid: &SessionId) -> Result<HeaderMap> {
        let mut headers = self.template.clone();
        headers.insert(COOKIE, session_cookie(sid)?);
        Ok(headers)
    }

    /// Headers for the persistent connection upgrade: credential, origin and
    /// client identification only.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Handshake`] if the session identifier cannot be
    /// carried in a cookie.
    pub fn upgrade(&self, sid: &SessionId) -> Result<Vec<(HeaderName, HeaderValue)>> {
        Ok(vec![
            (COOKIE, session_cookie(sid)?),
            (ORIGIN, self.origin.clone()),
            (USER_AGENT, self.user_agent.clone()),
        ])
    }
}

fn session_cookie(sid: &SessionId) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("{SESSION_COOKIE}={sid}"))
        .map_err(|_| SwarmError::Handshake(format!("session id {sid:?} is not cookie-safe")))
}

fn header_value(key: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| SwarmError::Config(format!("{key} {value:?} is not a valid header value")))
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

    fn headers() -> RequestHeaders {
        RequestHeaders::new(&SwarmConfig::default(), &SessionCode::parse("abc123")).unwrap()
    }

    #[test]
    fn template_carries_referer_for_code() {
        let map = headers().anonymous();
        assert_eq!(map[REFERER], "https://garticphone.com/?c=abc123");
        assert_eq!(map[ORIGIN], "https://garticphone.com");
        assert_eq!(map[USER_AGENT], "insomnia/2023.6.0");
        assert!(map.get(COOKIE).is_none());
    }

    #[test]
    fn credential_is_added_without_touching_template() {
        let headers = headers();
        let with_sid = headers.with_credential(&SessionId::from("abc")).unwrap();
        assert_eq!(with_sid[COOKIE], "io=abc");
        assert!(headers.anonymous().get(COOKIE).is_none());
    }

    #[test]
    fn upgrade_headers_are_minimal() {
        let pairs = headers().upgrade(&SessionId::from("s1")).unwrap();
        let names: Vec<_> = pairs.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec![COOKIE, ORIGIN, USER_AGENT]);
        assert_eq!(pairs[0].1, "io=s1");
    }

    #[test]
    fn invalid_session_id_is_rejected() {
        let err = headers()
            .with_credential(&SessionId::from("bad\nsid"))
            .unwrap_err();
        assert!(matches!(err, SwarmError::Handshake(_)));
    }

    #[test]
    fn invalid_origin_is_config_error() {
        let config = SwarmConfig::default().with_origin("https://bad\u{7f}origin");
        let err = RequestHeaders::new(&config, &SessionCode::parse("x")).unwrap_err();
        assert!(matches!(err, SwarmError::Config(_)));
    }
}
