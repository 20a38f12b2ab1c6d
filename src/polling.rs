//! HTTP long-polling plumbing shared by the pre-upgrade stages.
//!
//! [`PollingClient`] owns one `reqwest` client and the unit's header template.
//! The stages that run over the polling transport (negotiation, registration,
//! validation) are implemented as methods on it in their own modules.

use reqwest::header::HeaderMap;
use tracing::debug;
use url::Url;

use crate::code::SessionCode;
use crate::config::SwarmConfig;
use crate::endpoint::Endpoint;
use crate::error::{Result, SwarmError};
use crate::headers::RequestHeaders;
use crate::negotiator::SessionId;

/// Polling transport client for one unit.
///
/// Cloning is cheap: the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct PollingClient {
    pub(crate) http: reqwest::Client,
    pub(crate) headers: RequestHeaders,
    pub(crate) code: SessionCode,
    pub(crate) discovery_url: String,
    pub(crate) transport_path: String,
}

impl PollingClient {
    /// Build a polling client for `code`.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Config`] if the configured headers are invalid, or
    /// [`SwarmError::Http`] if the HTTP client cannot be constructed.
    pub fn new(config: &SwarmConfig, code: SessionCode) -> Result<Self> {
        let headers = RequestHeaders::new(config, &code)?;
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            headers,
            code,
            discovery_url: config.discovery_url.clone(),
            transport_path: config.transport_path.clone(),
        })
    }

    /// The session code this client joins.
    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    /// The unit's header template.
    pub fn headers(&self) -> &RequestHeaders {
        &self.headers
    }

    /// GET `url` and return the body, failing on a non-success status.
    pub(crate) async fn get_text(
        &self,
        url: Url,
        headers: HeaderMap,
        endpoint: &'static str,
    ) -> Result<String> {
        debug!(%url, endpoint, "GET");
        let response = self.http.get(url).headers(headers).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SwarmError::HttpStatus {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    /// Poll once so the remote flushes the polling side of a session that is
    /// being upgraded. The outcome carries no meaning for the caller.
    pub async fn flush(&self, endpoint: &Endpoint, sid: &SessionId) -> Result<()> {
        let headers = self.headers.with_credential(sid)?;
        let body = self
            .get_text(endpoint.polling(Some(sid)), headers, "flush")
            .await?;
        debug!(body = %body, "flush poll answered");
        Ok(())
    }
}
