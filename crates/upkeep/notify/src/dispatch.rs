//! Best-effort notification dispatch.
//!
//! One detached task per triggering event, internally parallel per
//! recipient. A failed delivery is logged and forgotten; it never aborts
//! the remaining recipients and never reaches the caller. No retries.

use crate::targeting::NotificationPayload;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use upkeep_types::PrincipalId;

/// Per-recipient delivery failure.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The recipient's subscription no longer exists. The caller should
    /// drop it and stop addressing this recipient.
    #[error("subscription gone")]
    Gone,

    #[error("delivery failed: {0}")]
    Failed(String),
}

/// The opaque push transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(
        &self,
        recipient: &PrincipalId,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError>;

    /// Forget a recipient whose delivery came back [`DeliveryError::Gone`].
    async fn drop_subscription(&self, recipient: &PrincipalId);
}

/// Dispatch tuning.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Upper bound on a single recipient's delivery attempt. Local to that
    /// attempt; a timeout does not propagate anywhere.
    pub delivery_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

/// Fans payloads out to recipients off the critical path.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, config: DispatchConfig) -> Self {
        Self { notifier, config }
    }

    /// Deliver `payload` to every recipient on a detached task.
    ///
    /// Returns immediately; the handle is only useful to tests that want to
    /// await completion of the fan-out.
    pub fn dispatch(
        &self,
        recipients: Vec<PrincipalId>,
        payload: NotificationPayload,
    ) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        let timeout = self.config.delivery_timeout;

        tokio::spawn(async move {
            let deliveries = recipients.iter().map(|recipient| {
                let notifier = Arc::clone(&notifier);
                let payload = &payload;
                async move {
                    match tokio::time::timeout(timeout, notifier.deliver(recipient, payload)).await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(DeliveryError::Gone)) => {
                            tracing::info!(%recipient, "subscription gone, dropping");
                            notifier.drop_subscription(recipient).await;
                        }
                        Ok(Err(err)) => {
                            tracing::warn!(%recipient, error = %err, "notification delivery failed");
                        }
                        Err(_) => {
                            tracing::warn!(%recipient, "notification delivery timed out");
                        }
                    }
                }
            });
            join_all(deliveries).await;
        })
    }
}
