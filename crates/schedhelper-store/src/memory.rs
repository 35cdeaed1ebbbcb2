//! In-memory table backend.
//!
//! Rows live in a `BTreeMap` ordered by `(pk, sk)`, so prefix queries are
//! range scans. Thread-safe via RwLock. Fault hooks let tests make specific
//! batch calls or partitions fail.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use crate::attr::{AttrValue, Item, Row};
use crate::backend::{KvBackend, WriteRequest, MAX_BATCH_WRITE_ITEMS};
use crate::error::{Result, StoreError};
use crate::key::ItemKey;

/// In-memory table backed by a BTreeMap.
///
/// Does not persist data across restarts.
#[derive(Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<ItemKey, Item>>>,
    batch_calls: AtomicUsize,
    failing_batch_calls: Mutex<HashSet<usize>>,
    unavailable_partitions: Mutex<HashSet<String>>,
}

impl MemoryBackend {
    /// Creates a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `batch_write_item` calls received so far, failed ones included.
    pub fn batch_call_count(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Makes the `call_number`-th `batch_write_item` call (1-based, counted
    /// since creation) fail with a transient error without applying anything.
    pub fn fail_batch_call(&self, call_number: usize) {
        if let Ok(mut failing) = self.failing_batch_calls.lock() {
            failing.insert(call_number);
        }
    }

    /// Makes every operation touching partition `pk` fail with a transient error.
    pub fn make_partition_unavailable(&self, pk: impl Into<String>) {
        if let Ok(mut partitions) = self.unavailable_partitions.lock() {
            partitions.insert(pk.into());
        }
    }

    /// Clears every partition fault.
    pub fn restore_partitions(&self) {
        if let Ok(mut partitions) = self.unavailable_partitions.lock() {
            partitions.clear();
        }
    }

    /// Number of rows stored.
    pub fn len(&self) -> usize {
        self.data.read().map(|data| data.len()).unwrap_or(0)
    }

    /// True if the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if a row exists at `key`.
    pub fn contains(&self, key: &ItemKey) -> bool {
        self.data
            .read()
            .map(|data| data.contains_key(key))
            .unwrap_or(false)
    }

    /// Raw attribute value, for assertions on the stored representation.
    pub fn raw_attr(&self, key: &ItemKey, attribute: &str) -> Option<AttrValue> {
        self.data
            .read()
            .ok()
            .and_then(|data| data.get(key).and_then(|item| item.get(attribute).cloned()))
    }

    fn check_partition(&self, pk: &str) -> Result<()> {
        let partitions = self
            .unavailable_partitions
            .lock()
            .map_err(|e| StoreError::backend(e.to_string()))?;
        if partitions.contains(pk) {
            return Err(StoreError::unavailable(format!("partition {} unavailable", pk)));
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get_item(&self, key: &ItemKey) -> Result<Option<Item>> {
        self.check_partition(&key.pk)?;
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::backend(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    async fn query(&self, pk: &str, sk_prefix: &str) -> Result<Vec<Row>> {
        self.check_partition(pk)?;
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::backend(e.to_string()))?;
        let start = ItemKey::new(pk, sk_prefix);
        let mut rows = Vec::new();
        for (key, attrs) in data.range(start..) {
            if key.pk != pk || !key.sk.starts_with(sk_prefix) {
                break;
            }
            rows.push(Row {
                key: key.clone(),
                attrs: attrs.clone(),
            });
        }
        Ok(rows)
    }

    async fn batch_write_item(&self, requests: Vec<WriteRequest>) -> Result<()> {
        let call_number = self.batch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if requests.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(StoreError::BatchTooLarge {
                len: requests.len(),
                max: MAX_BATCH_WRITE_ITEMS,
            });
        }
        let injected = self
            .failing_batch_calls
            .lock()
            .map_err(|e| StoreError::backend(e.to_string()))?
            .contains(&call_number);
        if injected {
            return Err(StoreError::unavailable(format!(
                "injected failure on batch call {}",
                call_number
            )));
        }
        for request in &requests {
            self.check_partition(&request.key().pk)?;
        }

        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::backend(e.to_string()))?;
        for request in requests {
            match request {
                WriteRequest::Put(row) => {
                    data.insert(row.key, row.attrs);
                }
                WriteRequest::Delete(key) => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn update_item(&self, key: &ItemKey, updates: Vec<(String, AttrValue)>) -> Result<()> {
        self.check_partition(&key.pk)?;
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::backend(e.to_string()))?;
        let item = data.entry(key.clone()).or_default();
        for (name, value) in updates {
            item.insert(name, value);
        }
        Ok(())
    }

    async fn put_item(&self, row: Row) -> Result<()> {
        self.check_partition(&row.key.pk)?;
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::backend(e.to_string()))?;
        data.insert(row.key, row.attrs);
        Ok(())
    }

    async fn delete_item(&self, key: &ItemKey) -> Result<()> {
        self.check_partition(&key.pk)?;
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::backend(e.to_string()))?;
        data.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pk: &str, sk: &str) -> Row {
        Row::new(ItemKey::new(pk, sk))
    }

    #[tokio::test]
    async fn test_put_get() {
        let backend = MemoryBackend::new();
        let key = ItemKey::new("u#a", "info#personal");
        backend
            .put_item(Row::new(key.clone()).with_attr("name", AttrValue::S("Amy".into())))
            .await
            .unwrap();

        let item = backend.get_item(&key).await.unwrap().unwrap();
        assert_eq!(item.get("name"), Some(&AttrValue::S("Amy".into())));
        assert!(backend
            .get_item(&ItemKey::new("u#b", "info#personal"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = MemoryBackend::new();
        let key = ItemKey::new("u#a", "friend#cur#b");
        backend.put_item(Row::new(key.clone())).await.unwrap();
        backend.delete_item(&key).await.unwrap();
        assert!(!backend.contains(&key));
        backend.delete_item(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_query_prefix_stays_in_partition() {
        let backend = MemoryBackend::new();
        for (pk, sk) in [
            ("u#a", "friend#cur#c"),
            ("u#a", "friend#cur#b"),
            ("u#a", "friend#req#in#d"),
            ("u#a", "info#personal"),
            ("u#ab", "friend#cur#x"),
        ] {
            backend.put_item(row(pk, sk)).await.unwrap();
        }

        let rows = backend.query("u#a", "friend#cur#").await.unwrap();
        let sks: Vec<_> = rows.iter().map(|r| r.sk()).collect();
        assert_eq!(sks, vec!["friend#cur#b", "friend#cur#c"]);

        let all = backend.query("u#a", "").await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|r| r.key.pk == "u#a"));
    }

    #[tokio::test]
    async fn test_batch_write() {
        let backend = MemoryBackend::new();
        backend.put_item(row("u#a", "existing")).await.unwrap();

        backend
            .batch_write_item(vec![
                WriteRequest::Put(row("u#a", "new1")),
                WriteRequest::Put(row("u#b", "new2")),
                WriteRequest::Delete(ItemKey::new("u#a", "existing")),
            ])
            .await
            .unwrap();

        assert!(backend.contains(&ItemKey::new("u#a", "new1")));
        assert!(backend.contains(&ItemKey::new("u#b", "new2")));
        assert!(!backend.contains(&ItemKey::new("u#a", "existing")));
        assert_eq!(backend.batch_call_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_write_rejects_oversized_batch() {
        let backend = MemoryBackend::new();
        let requests = (0..26)
            .map(|i| WriteRequest::Put(row("u#a", &format!("r{:02}", i))))
            .collect();
        let err = backend.batch_write_item(requests).await.unwrap_err();
        assert!(matches!(err, StoreError::BatchTooLarge { len: 26, max: 25 }));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_injected_batch_failure_applies_nothing() {
        let backend = MemoryBackend::new();
        backend.fail_batch_call(1);
        let err = backend
            .batch_write_item(vec![WriteRequest::Put(row("u#a", "x"))])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(backend.is_empty());

        backend
            .batch_write_item(vec![WriteRequest::Put(row("u#a", "x"))])
            .await
            .unwrap();
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_update_item_upserts() {
        let backend = MemoryBackend::new();
        let key = ItemKey::new("u#a", "info#personal");
        backend
            .update_item(&key, vec![("name".into(), AttrValue::S("Amy".into()))])
            .await
            .unwrap();
        backend
            .update_item(&key, vec![("subscriptions".into(), AttrValue::Null)])
            .await
            .unwrap();

        let item = backend.get_item(&key).await.unwrap().unwrap();
        assert_eq!(item.len(), 2);
        assert_eq!(backend.raw_attr(&key, "subscriptions"), Some(AttrValue::Null));
    }

    #[tokio::test]
    async fn test_unavailable_partition() {
        let backend = MemoryBackend::new();
        backend.make_partition_unavailable("u#a");
        assert!(backend.query("u#a", "").await.is_err());
        assert!(backend.query("u#b", "").await.is_ok());
        backend.restore_partitions();
        assert!(backend.query("u#a", "").await.is_ok());
    }
}
