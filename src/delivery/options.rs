//! Connection settings for the HTTP delivery transport along with validation
//! so a misconfigured API endpoint is rejected before any run starts.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.mailgun.net";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub api_base_url: String,
    pub domain: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl TransportOptions {
    pub fn new(domain: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            domain: domain.into().trim().to_owned(),
            api_key: api_key.into().trim().to_owned(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Endpoint that accepts one message per POST.
    pub fn messages_url(&self) -> String {
        format!("{}/v3/{}/messages", self.api_base_url, self.domain)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let url = self.api_base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("api_base_url must start with http:// or https://");
        }
        if self.domain.trim().is_empty() {
            bail!("domain cannot be empty");
        }
        if self.api_key.trim().is_empty() {
            bail!("api_key cannot be empty");
        }
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportOptions")
            .field("api_base_url", &self.api_base_url)
            .field("domain", &self.domain)
            .field("api_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
