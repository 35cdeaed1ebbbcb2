//! Push delivery to client devices.
//!
//! The payload encryption and VAPID signing of Web Push happen in an external
//! relay; this module only hands `(subscription, notification)` pairs to it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::error::ServiceError;
use crate::notification::Notification;
use crate::subscriptions::PushSubscription;

/// Failure to deliver one notification to one subscription.
#[derive(Debug, Error)]
pub enum PushError {
    /// The relay or push service answered with a non-success status.
    #[error("push rejected with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// Network or protocol failure.
    #[error("push transport error: {0}")]
    Transport(String),

    /// Delivery did not finish in time.
    #[error("push timed out after {timeout_ms} ms")]
    Timeout {
        /// Elapsed bound in milliseconds.
        timeout_ms: u64,
    },

    /// The payload could not be serialized.
    #[error("push payload serialization failed: {0}")]
    Serialization(String),
}

/// Delivers a notification to a single device subscription.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Sends `notification` to `subscription`.
    async fn send(
        &self,
        subscription: &PushSubscription,
        notification: &Notification,
    ) -> Result<(), PushError>;
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    subscription: &'a PushSubscription,
    notification: &'a Notification,
}

/// Posts deliveries as JSON to a push relay endpoint.
pub struct HttpPushRelay {
    client: reqwest::Client,
    url: String,
}

impl HttpPushRelay {
    /// Creates a relay client with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Config(format!("push relay client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Relay endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushSender for HttpPushRelay {
    async fn send(
        &self,
        subscription: &PushSubscription,
        notification: &Notification,
    ) -> Result<(), PushError> {
        let body = serde_json::to_vec(&RelayRequest {
            subscription,
            notification,
        })
        .map_err(|e| PushError::Serialization(e.to_string()))?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PushError::Rejected {
                status: status.as_u16(),
            });
        }
        debug!(endpoint = %subscription.endpoint, "push relayed");
        Ok(())
    }
}

/// Drops every delivery. Used when no relay is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPushSender;

#[async_trait]
impl PushSender for NoopPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        notification: &Notification,
    ) -> Result<(), PushError> {
        debug!(
            endpoint = %subscription.endpoint,
            notification_type = %notification.notification_type,
            "no push relay configured, dropping notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationType;
    use crate::subscriptions::SubscriptionKeys;

    #[test]
    fn test_relay_request_shape() {
        let subscription = PushSubscription {
            endpoint: "https://p/1".to_string(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: "k".to_string(),
                auth: "a".to_string(),
            },
        };
        let notification = Notification::about_user(NotificationType::FriendRemoved, "amy");
        let value = serde_json::to_value(RelayRequest {
            subscription: &subscription,
            notification: &notification,
        })
        .unwrap();
        assert_eq!(value["subscription"]["endpoint"], "https://p/1");
        assert_eq!(value["notification"]["notificationType"], "FriendRemoved");
    }

    #[test]
    fn test_relay_keeps_url() {
        let relay = HttpPushRelay::new("https://relay.example/push", Duration::from_secs(2))
            .expect("client builds with a timeout");
        assert_eq!(relay.url(), "https://relay.example/push");
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_transport_error() {
        let relay =
            HttpPushRelay::new("http://127.0.0.1:9/push", Duration::from_millis(500)).unwrap();
        let subscription = PushSubscription {
            endpoint: "https://p/1".to_string(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: "k".to_string(),
                auth: "a".to_string(),
            },
        };
        let notification = Notification::about_user(NotificationType::FriendRemoved, "amy");
        let err = relay.send(&subscription, &notification).await.unwrap_err();
        assert!(matches!(err, PushError::Transport(_) | PushError::Timeout { .. }));
    }
}
