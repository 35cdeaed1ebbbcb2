//! Push subscription registry.
//!
//! A user's subscriptions are stored as canonical JSON strings in the
//! `subscriptions` string set of their `info#personal` row. An empty set is
//! stored as the null marker.

use schedhelper_store::key::{user_key, PERSONAL_SK};
use schedhelper_store::{RecordStore, SetAttr};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ServiceError};

/// Attribute of the personal row holding the subscription set.
pub const SUBSCRIPTIONS_ATTR: &str = "subscriptions";

/// Encryption keys of a Web Push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Client public key.
    pub p256dh: String,
    /// Authentication secret.
    pub auth: String,
}

/// A Web Push subscription as registered by a browser.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    /// Push service endpoint, unique per device.
    pub endpoint: String,
    /// Expiration in epoch millis, if the push service set one.
    #[serde(default)]
    pub expiration_time: Option<i64>,
    /// Encryption keys.
    pub keys: SubscriptionKeys,
}

impl PushSubscription {
    /// Parses a descriptor from JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        let sub: PushSubscription = serde_json::from_str(raw)
            .map_err(|e| ServiceError::invalid(format!("malformed push subscription: {}", e)))?;
        if sub.endpoint.is_empty() {
            return Err(ServiceError::invalid("push subscription without endpoint"));
        }
        Ok(sub)
    }

    /// Canonical JSON form; equal subscriptions always serialize identically.
    pub fn to_canonical_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ServiceError::invalid(format!("unserializable subscription: {}", e)))
    }
}

/// Reads and edits the per-user subscription set.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    store: RecordStore,
}

impl SubscriptionRegistry {
    /// Creates a registry on top of `store`.
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Adds `subscription` for `user_id`. Adding the same descriptor again is
    /// a no-op; a descriptor for an already registered endpoint replaces the
    /// stored one. Returns the number of stored subscriptions.
    pub async fn add_subscription(
        &self,
        user_id: &str,
        subscription: &PushSubscription,
    ) -> Result<usize> {
        let pk = user_key(user_id);
        let canonical = subscription.to_canonical_json()?;
        let current = self
            .store
            .read_set_attr(&pk, PERSONAL_SK, SUBSCRIPTIONS_ATTR)
            .await?;
        let stale: Vec<String> = current
            .iter()
            .filter(|raw| {
                **raw != canonical
                    && endpoint_of(raw).as_deref() == Some(subscription.endpoint.as_str())
            })
            .cloned()
            .collect();

        let next = self
            .store
            .update_set(&pk, PERSONAL_SK, SUBSCRIPTIONS_ATTR, &[canonical], &stale)
            .await?;
        debug!(user_id, count = next.len(), "subscription registered");
        Ok(next.len())
    }

    /// Removes every subscription of `user_id` with the given endpoint.
    ///
    /// Malformed stored entries are never removed. Returns how many entries
    /// were dropped.
    pub async fn remove_subscription(&self, user_id: &str, endpoint: &str) -> Result<usize> {
        let pk = user_key(user_id);
        let current = self
            .store
            .read_set_attr(&pk, PERSONAL_SK, SUBSCRIPTIONS_ATTR)
            .await?;
        let matching = matching_entries(user_id, &current, endpoint);
        if matching.is_empty() {
            return Ok(0);
        }
        self.store
            .update_set(&pk, PERSONAL_SK, SUBSCRIPTIONS_ATTR, &[], &matching)
            .await?;
        debug!(user_id, removed = matching.len(), "subscription removed");
        Ok(matching.len())
    }

    /// Lists the valid subscriptions of `user_id`; malformed entries are skipped.
    pub async fn list_subscriptions(&self, user_id: &str) -> Result<Vec<PushSubscription>> {
        let set = self
            .store
            .read_set_attr(&user_key(user_id), PERSONAL_SK, SUBSCRIPTIONS_ATTR)
            .await?;
        Ok(set
            .iter()
            .filter_map(|raw| match PushSubscription::from_json(raw) {
                Ok(sub) => Some(sub),
                Err(e) => {
                    warn!(user_id, "skipping stored subscription: {}", e);
                    None
                }
            })
            .collect())
    }
}

fn endpoint_of(raw: &str) -> Option<String> {
    PushSubscription::from_json(raw).ok().map(|sub| sub.endpoint)
}

fn matching_entries(user_id: &str, current: &SetAttr, endpoint: &str) -> Vec<String> {
    current
        .iter()
        .filter(|raw| match PushSubscription::from_json(raw) {
            Ok(sub) => sub.endpoint == endpoint,
            Err(_) => {
                warn!(user_id, "keeping malformed stored subscription");
                false
            }
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use schedhelper_store::key::ItemKey;
    use schedhelper_store::{AttrValue, KvBackend, MemoryBackend, Row, StoreConfig};
    use std::sync::Arc;

    fn sub(endpoint: &str) -> PushSubscription {
        PushSubscription {
            endpoint: endpoint.to_string(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: "BNc".to_string(),
                auth: "tBH".to_string(),
            },
        }
    }

    fn registry() -> (Arc<MemoryBackend>, SubscriptionRegistry) {
        let backend = Arc::new(MemoryBackend::new());
        let store = RecordStore::new(backend.clone(), StoreConfig::default());
        (backend, SubscriptionRegistry::new(store))
    }

    #[tokio::test]
    async fn test_add_same_descriptor_twice() {
        let (_, registry) = registry();
        assert_eq!(registry.add_subscription("amy", &sub("https://p/1")).await.unwrap(), 1);
        assert_eq!(registry.add_subscription("amy", &sub("https://p/1")).await.unwrap(), 1);
        assert_eq!(registry.list_subscriptions("amy").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_replaces_same_endpoint() {
        let (_, registry) = registry();
        registry.add_subscription("amy", &sub("https://p/1")).await.unwrap();
        let mut renewed = sub("https://p/1");
        renewed.keys.auth = "new".to_string();
        assert_eq!(registry.add_subscription("amy", &renewed).await.unwrap(), 1);
        let listed = registry.list_subscriptions("amy").await.unwrap();
        assert_eq!(listed, vec![renewed]);
    }

    #[tokio::test]
    async fn test_remove_last_writes_null_marker() {
        let (backend, registry) = registry();
        registry.add_subscription("amy", &sub("https://p/1")).await.unwrap();
        assert_eq!(registry.remove_subscription("amy", "https://p/1").await.unwrap(), 1);

        assert_eq!(
            backend.raw_attr(&ItemKey::personal("amy"), SUBSCRIPTIONS_ATTR),
            Some(AttrValue::Null)
        );
        assert!(registry.list_subscriptions("amy").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_endpoint_is_noop() {
        let (_, registry) = registry();
        registry.add_subscription("amy", &sub("https://p/1")).await.unwrap();
        assert_eq!(registry.remove_subscription("amy", "https://p/2").await.unwrap(), 0);
        assert_eq!(registry.list_subscriptions("amy").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_for_unknown_user_is_empty() {
        let (_, registry) = registry();
        assert!(registry.list_subscriptions("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entries_skipped_and_kept() {
        let (backend, registry) = registry();
        let valid = sub("https://p/1").to_canonical_json().unwrap();
        let set = ["not json".to_string(), valid].into_iter().collect();
        backend
            .put_item(
                Row::new(ItemKey::personal("amy"))
                    .with_attr(SUBSCRIPTIONS_ATTR, AttrValue::Ss(set)),
            )
            .await
            .unwrap();

        assert_eq!(registry.list_subscriptions("amy").await.unwrap().len(), 1);
        assert_eq!(registry.remove_subscription("amy", "https://p/1").await.unwrap(), 1);
        let raw = backend
            .raw_attr(&ItemKey::personal("amy"), SUBSCRIPTIONS_ATTR)
            .unwrap();
        assert_eq!(raw.as_ss().map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_descriptor_parsing() {
        let raw = r#"{"endpoint":"https://p/1","expirationTime":null,"keys":{"p256dh":"a","auth":"b"}}"#;
        let parsed = PushSubscription::from_json(raw).unwrap();
        assert_eq!(parsed.endpoint, "https://p/1");
        assert_eq!(parsed.to_canonical_json().unwrap(), raw);
        assert!(PushSubscription::from_json(r#"{"endpoint":""}"#).is_err());
    }
}
