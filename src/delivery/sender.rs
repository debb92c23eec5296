//! Single-recipient delivery with a bounded retry budget.

use super::backoff::{retry_with_backoff, RetryBackoff};
use super::render::{MessageRenderer, RenderError};
use super::transport::{DeliveryTransport, TransportError};
use crate::recipients::{DispatchResult, Recipient};
use crate::runtime::telemetry::Telemetry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// One recipient paired with its position in the batch it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchTask {
    pub index: usize,
    pub recipient: Recipient,
}

impl DispatchTask {
    pub fn new(index: usize, recipient: Recipient) -> Self {
        Self { index, recipient }
    }
}

/// Why a single recipient could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    pub fn is_render(&self) -> bool {
        matches!(self, DispatchError::Render(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> RetryBackoff {
        RetryBackoff::new(self.initial_backoff, self.max_backoff)
            .with_max_attempts(self.max_attempts.max(1))
    }
}

/// Renders and submits one recipient, retrying transport failures only.
#[derive(Clone)]
pub struct RetryingSender {
    renderer: Arc<dyn MessageRenderer>,
    transport: Arc<dyn DeliveryTransport>,
    policy: RetryPolicy,
    telemetry: Arc<Telemetry>,
}

impl RetryingSender {
    pub fn new(
        renderer: Arc<dyn MessageRenderer>,
        transport: Arc<dyn DeliveryTransport>,
        policy: RetryPolicy,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            renderer,
            transport,
            policy,
            telemetry,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Always produces a result; per-recipient failures are folded into it.
    pub async fn attempt(&self, task: &DispatchTask) -> DispatchResult {
        match self.try_deliver(task).await {
            Ok(sent_at) => {
                self.telemetry.record_delivered();
                DispatchResult::sent(sent_at)
            }
            Err(err) => {
                if err.is_render() {
                    self.telemetry.record_render_failure();
                }
                self.telemetry.record_failed();
                tracing::warn!(
                    recipient = %task.recipient.id,
                    index = task.index,
                    error = %err,
                    "recipient dispatch failed"
                );
                DispatchResult::failed(err.to_string())
            }
        }
    }

    pub async fn try_deliver(&self, task: &DispatchTask) -> Result<DateTime<Utc>, DispatchError> {
        let message = self.renderer.render(&task.recipient)?;
        let recipient = task.recipient.id;
        let telemetry = &self.telemetry;

        retry_with_backoff(
            self.policy.backoff(),
            |_| self.transport.send(&message),
            |attempt, delay, err: &TransportError, will_retry| {
                telemetry.record_transport_error();
                if will_retry {
                    telemetry.record_transport_retry();
                    tracing::debug!(
                        %recipient,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transport attempt failed; retrying"
                    );
                } else {
                    tracing::debug!(
                        %recipient,
                        attempt,
                        error = %err,
                        "transport attempts exhausted"
                    );
                }
            },
        )
        .await?;

        Ok(Utc::now())
    }
}

impl std::fmt::Debug for RetryingSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingSender")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
