//! URLs of the Engine.IO endpoint on a discovered game server.

use url::Url;

use crate::error::{Result, SwarmError};
use crate::id::generate_cache_buster;
use crate::negotiator::SessionId;

/// Engine.IO protocol revision spoken by the remote.
pub const EIO_VERSION: &str = "3";

/// The Engine.IO endpoint of one game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
}

impl Endpoint {
    /// Combine a server base address with the Engine.IO path.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::InvalidServerAddress`] if `server` is not an
    /// absolute `http` or `https` URL.
    pub fn new(server: &str, transport_path: &str) -> Result<Self> {
        let invalid = |reason: String| SwarmError::InvalidServerAddress {
            address: server.to_string(),
            reason,
        };

        let mut base = Url::parse(server.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", base.scheme())));
        }
        if base.cannot_be_a_base() {
            return Err(invalid("not a base URL".into()));
        }

        let path = format!(
            "{}/{}",
            base.path().trim_end_matches('/'),
            transport_path.trim_start_matches('/')
        );
        base.set_path(&path);
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    /// Endpoint URL without query.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Polling URL with a fresh cache-busting token, bound to `sid` if given.
    pub fn polling(&self, sid: Option<&SessionId>) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("EIO", EIO_VERSION)
                .append_pair("transport", "polling")
                .append_pair("t", &generate_cache_buster());
            if let Some(sid) = sid {
                query.append_pair("sid", sid.as_str());
            }
        }
        url
    }

    /// Persistent connection URL: same host and path, upgraded scheme.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::InvalidServerAddress`] if the scheme cannot be
    /// upgraded.
    pub fn websocket(&self, sid: &SessionId) -> Result<Url> {
        let mut url = self.base.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| SwarmError::InvalidServerAddress {
                address: self.base.to_string(),
                reason: format!("cannot switch scheme to {scheme}"),
            })?;
        url.query_pairs_mut()
            .append_pair("EIO", EIO_VERSION)
            .append_pair("transport", "websocket")
            .append_pair("sid", sid.as_str());
        Ok(url)
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

    fn query(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn polling_url_without_session() {
        let endpoint = Endpoint::new("https://server03.example.com", "/socket.io/").unwrap();
        let url = endpoint.polling(None);
        assert_eq!(url.path(), "/socket.io/");
        let pairs = query(&url);
        assert_eq!(pairs[0], ("EIO".into(), "3".into()));
        assert_eq!(pairs[1], ("transport".into(), "polling".into()));
        assert_eq!(pairs[2].0, "t");
        assert!(pairs[2].1.starts_with("PLM"));
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn polling_url_with_session() {
        let endpoint = Endpoint::new("https://server03.example.com/", "socket.io/").unwrap();
        let url = endpoint.polling(Some(&SessionId::from("abc")));
        assert_eq!(url.path(), "/socket.io/");
        let pairs = query(&url);
        assert_eq!(pairs[3], ("sid".into(), "abc".into()));
    }

    #[test]
    fn websocket_url_upgrades_scheme() {
        let endpoint = Endpoint::new("https://server03.example.com", "/socket.io/").unwrap();
        let url = endpoint.websocket(&SessionId::from("abc")).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://server03.example.com/socket.io/?EIO=3&transport=websocket&sid=abc"
        );
    }

    #[test]
    fn plain_http_upgrades_to_ws() {
        let endpoint = Endpoint::new("http://127.0.0.1:4000", "/socket.io/").unwrap();
        let url = endpoint.websocket(&SessionId::from("s")).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.port(), Some(4000));
    }

    #[test]
    fn server_path_is_kept() {
        let endpoint = Endpoint::new("https://example.com/game", "/socket.io/").unwrap();
        assert_eq!(endpoint.base().path(), "/game/socket.io/");
    }

    #[test]
    fn rejects_non_http_addresses() {
        for bad in ["", "not a url", "ftp://example.com", "mailto:someone@example.com"] {
            let err = Endpoint::new(bad, "/socket.io/").unwrap_err();
            assert!(
                matches!(err, SwarmError::InvalidServerAddress { .. }),
                "{bad:?} should be rejected"
            );
        }
    }
}
