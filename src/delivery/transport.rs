//! Delivery transport seam plus the Mailgun-style HTTP implementation used in
//! production. Workers only see the [`DeliveryTransport`] trait so tests can
//! script failures without a network.

use super::auth::build_auth_headers;
use super::options::TransportOptions;
use super::render::RenderedMessage;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Per-attempt submission failure. Transient from the sender's point of view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            TransportError::Network(_) => None,
        }
    }
}

pub trait DeliveryTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        message: &'a RenderedMessage,
    ) -> BoxFuture<'a, Result<(), TransportError>>;
}

impl<T: DeliveryTransport + ?Sized> DeliveryTransport for Arc<T> {
    fn send<'a>(
        &'a self,
        message: &'a RenderedMessage,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        (**self).send(message)
    }
}

/// Submits one message per POST to `<api_base_url>/v3/<domain>/messages`.
#[derive(Debug, Clone)]
pub struct MailgunTransport {
    client: reqwest::Client,
    endpoint: Arc<String>,
}

impl MailgunTransport {
    pub fn new(options: TransportOptions) -> Result<Self> {
        options.validate()?;

        let headers = build_auth_headers(&options.api_key)?;
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| anyhow!("failed to build delivery HTTP client: {err}"))?;

        Ok(Self {
            client,
            endpoint: Arc::new(options.messages_url()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn send_message(&self, message: &RenderedMessage) -> Result<(), TransportError> {
        let from = message.from_header();
        let to = message.to_header();
        let form = [
            ("from", from.as_str()),
            ("to", to.as_str()),
            ("subject", message.subject.as_str()),
            ("html", message.body.as_str()),
        ];

        let response = self
            .client
            .post(self.endpoint.as_str())
            .form(&form)
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::trace!(to = %message.recipient_email, "message accepted");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|err| format!("<unreadable body: {err}>"));
        Err(TransportError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

impl DeliveryTransport for MailgunTransport {
    fn send<'a>(
        &'a self,
        message: &'a RenderedMessage,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(self.send_message(message))
    }
}
