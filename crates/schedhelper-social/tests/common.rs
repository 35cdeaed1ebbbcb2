//! Shared fixtures for the social integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use schedhelper_social::{
    HelperConfig, Notification, NotificationType, PushError, PushSender, PushSubscription,
    SocialService, SubscriptionKeys,
};
use schedhelper_store::{AttrValue, ItemKey, KvBackend, MemoryBackend, Row};

/// Push sender that records every delivery instead of sending it.
#[derive(Default)]
pub struct RecordingPushSender {
    sent: Mutex<Vec<(String, Notification)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingPushSender {
    /// Makes deliveries to `endpoint` fail with a 410.
    pub fn fail_endpoint(&self, endpoint: &str) {
        self.failing.lock().unwrap().insert(endpoint.to_string());
    }

    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    /// Notifications delivered to `endpoint`.
    pub fn received(&self, endpoint: &str) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn count_of(&self, notification_type: NotificationType) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, n)| n.notification_type == notification_type)
            .count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl PushSender for RecordingPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        notification: &Notification,
    ) -> Result<(), PushError> {
        if self.failing.lock().unwrap().contains(&subscription.endpoint) {
            return Err(PushError::Rejected { status: 410 });
        }
        self.sent
            .lock()
            .unwrap()
            .push((subscription.endpoint.clone(), notification.clone()));
        Ok(())
    }
}

/// In-memory service with a recording push sender.
pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub sender: Arc<RecordingPushSender>,
    pub service: SocialService,
}

impl Harness {
    pub fn new() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let sender = Arc::new(RecordingPushSender::default());
        let config = HelperConfig {
            default_photo_url: "https://img.example/default.png".to_string(),
            ..HelperConfig::default()
        };
        let service = SocialService::new(backend.clone(), sender.clone(), &config);
        Self {
            backend,
            sender,
            service,
        }
    }

    /// Creates the personal row of `user_id` and indexes its name.
    pub async fn seed_user(&self, user_id: &str, name: &str) {
        let photo = format!("https://img.example/{}.png", user_id);
        self.backend
            .put_item(
                Row::new(ItemKey::personal(user_id))
                    .with_attr("name", AttrValue::S(name.to_string()))
                    .with_attr("email", AttrValue::S(format!("{}@scu.edu", user_id)))
                    .with_attr("photoUrl", AttrValue::S(photo.clone())),
            )
            .await
            .unwrap();
        self.service
            .names()
            .register_name(user_id, name, user_id, &photo)
            .await
            .unwrap();
    }

    /// Registers a device for `user_id`; returns its endpoint.
    pub async fn seed_subscription(&self, user_id: &str, device: u32) -> String {
        let sub = subscription(&endpoint(user_id, device));
        self.service
            .register_subscription(user_id, &sub)
            .await
            .unwrap();
        sub.endpoint
    }

    /// Appends `raw` verbatim to the stored subscription set of `user_id`.
    pub async fn seed_raw_subscription(&self, user_id: &str, raw: &str) {
        let key = ItemKey::personal(user_id);
        let mut set = self
            .backend
            .raw_attr(&key, "subscriptions")
            .and_then(|v| v.as_ss().cloned())
            .unwrap_or_default();
        set.insert(raw.to_string());
        self.backend
            .update_item(&key, vec![("subscriptions".to_string(), AttrValue::Ss(set))])
            .await
            .unwrap();
    }

    pub async fn befriend(&self, a: &str, b: &str) {
        self.service.graph().add_friend_edge(a, b).await.unwrap();
    }

    pub async fn request(&self, from: &str, to: &str) {
        self.service.graph().add_request_pair(from, to).await.unwrap();
    }
}

pub fn endpoint(user_id: &str, device: u32) -> String {
    format!("https://push.example/{}/{}", user_id, device)
}

pub fn subscription(endpoint: &str) -> PushSubscription {
    PushSubscription {
        endpoint: endpoint.to_string(),
        expiration_time: None,
        keys: SubscriptionKeys {
            p256dh: "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA".to_string(),
            auth: "tBHItJI5svbpez7KI4CCXg".to_string(),
        },
    }
}
