//! Configuration for a swarm of joining participants.
//!
//! [`SwarmConfig`] carries everything a unit needs besides the session code:
//! where to discover the game server, how to present itself to the remote,
//! and how the persistent connection loop is tuned.
//!
//! # Example
//!
//! ```
//! use lobby_swarm::config::SwarmConfig;
//!
//! let config = SwarmConfig::default()
//!     .with_username_prefix("Painter")
//!     .with_locale("fr");
//! assert_eq!(config.username_prefix, "Painter");
//! assert_eq!(config.avatar, 12);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SwarmError};

/// Default discovery endpoint that maps a session code to a game server.
pub const DEFAULT_DISCOVERY_URL: &str = "https://garticphone.com/api/server";

/// Default origin presented in `Origin` and `Referer` headers.
pub const DEFAULT_ORIGIN: &str = "https://garticphone.com";

/// Default path of the Engine.IO endpoint on the game server.
pub const DEFAULT_TRANSPORT_PATH: &str = "/socket.io/";

/// Client identification string. This one is not challenged by the remote's
/// automated-traffic filter.
pub const DEFAULT_USER_AGENT: &str = "insomnia/2023.6.0";

/// Default capacity of the bounded connection event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown of a connection.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration shared read-only by every unit of a swarm.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Discovery endpoint queried with `?code=<session code>`.
    pub discovery_url: String,
    /// Origin of the web client being impersonated.
    pub origin: String,
    /// Path of the Engine.IO endpoint on the discovered server.
    pub transport_path: String,
    /// Prefix of the generated display name. A random number is appended
    /// because the remote rejects duplicate names.
    pub username_prefix: String,
    /// Avatar selector sent at registration.
    pub avatar: u32,
    /// Locale tag sent at registration.
    pub locale: String,
    /// `User-Agent` presented on every request and on the upgrade.
    pub user_agent: String,
    /// Capacity of the bounded connection event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown of a persistent connection.
    ///
    /// Defaults to **1 second**. A zero timeout aborts the connection loop
    /// immediately.
    pub shutdown_timeout: Duration,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            discovery_url: DEFAULT_DISCOVERY_URL.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            transport_path: DEFAULT_TRANSPORT_PATH.to_string(),
            username_prefix: "Bot".to_string(),
            avatar: 12,
            locale: "en".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl SwarmConfig {
    /// Parse a configuration from TOML text. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Config`] if the text is not valid TOML or a key has
    /// the wrong type.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| SwarmError::Config(e.to_string()))?;
        Ok(file.apply(Self::default()))
    }

    /// Load a configuration file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Io`] if the file cannot be read, or
    /// [`SwarmError::Config`] if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Set the discovery endpoint.
    #[must_use]
    pub fn with_discovery_url(mut self, url: impl Into<String>) -> Self {
        self.discovery_url = url.into();
        self
    }

    /// Set the origin presented to the remote.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Set the Engine.IO endpoint path.
    #[must_use]
    pub fn with_transport_path(mut self, path: impl Into<String>) -> Self {
        self.transport_path = path.into();
        self
    }

    /// Set the display name prefix.
    #[must_use]
    pub fn with_username_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.username_prefix = prefix.into();
        self
    }

    /// Set the avatar selector.
    #[must_use]
    pub fn with_avatar(mut self, avatar: u32) -> Self {
        self.avatar = avatar;
        self
    }

    /// Set the locale tag.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Set the client identification string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── File format ─────────────────────────────────────────────────────

/// On-disk shape of the configuration. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    discovery_url: Option<String>,
    origin: Option<String>,
    transport_path: Option<String>,
    username: Option<String>,
    avatar: Option<u32>,
    locale: Option<String>,
    user_agent: Option<String>,
    event_channel_capacity: Option<usize>,
    shutdown_timeout_ms: Option<u64>,
}

impl ConfigFile {
    fn apply(self, mut config: SwarmConfig) -> SwarmConfig {
        if let Some(v) = self.discovery_url {
            config.discovery_url = v;
        }
        if let Some(v) = self.origin {
            config.origin = v;
        }
        if let Some(v) = self.transport_path {
            config.transport_path = v;
        }
        if let Some(v) = self.username {
            config.username_prefix = v;
        }
        if let Some(v) = self.avatar {
            config.avatar = v;
        }
        if let Some(v) = self.locale {
            config.locale = v;
        }
        if let Some(v) = self.user_agent {
            config.user_agent = v;
        }
        if let Some(v) = self.event_channel_capacity {
            config = config.with_event_channel_capacity(v);
        }
        if let Some(ms) = self.shutdown_timeout_ms {
            config.shutdown_timeout = Duration::from_millis(ms);
        }
        config
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

    #[test]
    fn config_defaults() {
        let config = SwarmConfig::default();
        assert_eq!(config.discovery_url, DEFAULT_DISCOVERY_URL);
        assert_eq!(config.origin, "https://garticphone.com");
        assert_eq!(config.transport_path, "/socket.io/");
        assert_eq!(config.username_prefix, "Bot");
        assert_eq!(config.avatar, 12);
        assert_eq!(config.locale, "en");
        assert_eq!(config.user_agent, "insomnia/2023.6.0");
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn event_channel_capacity_is_clamped_to_one() {
        let config = SwarmConfig::default().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let config = SwarmConfig::from_toml_str(
            r#"
            username = "Sketcher"
            avatar = 3
            shutdown_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.username_prefix, "Sketcher");
        assert_eq!(config.avatar, 3);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.locale, "en");
        assert_eq!(config.discovery_url, DEFAULT_DISCOVERY_URL);
    }

    #[test]
    fn empty_toml_is_default() {
        let config = SwarmConfig::from_toml_str("").unwrap();
        assert_eq!(config.username_prefix, "Bot");
    }

    #[test]
    fn toml_with_wrong_type_is_config_error() {
        let err = SwarmConfig::from_toml_str("avatar = \"twelve\"").unwrap_err();
        assert!(matches!(err, SwarmError::Config(_)));
    }

    #[test]
    fn toml_with_unknown_key_is_config_error() {
        let err = SwarmConfig::from_toml_str("colour = \"red\"").unwrap_err();
        assert!(matches!(err, SwarmError::Config(_)));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = SwarmConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, SwarmError::Io(_)));
    }
}
