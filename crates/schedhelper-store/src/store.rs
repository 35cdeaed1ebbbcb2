//! Typed record store over a [`KvBackend`].
//!
//! Adds what the backend does not enforce itself: chunking of large batch
//! writes to the per-call limit, read-modify-write of set attributes that
//! never writes an empty set, and a timeout plus cancellation bound on every
//! backend call.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attr::{AttrValue, Item, Row, SetAttr};
use crate::backend::{KvBackend, WriteRequest, MAX_BATCH_WRITE_ITEMS};
use crate::error::{Result, StoreError};
use crate::key::ItemKey;

/// Record store tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Upper bound on a single backend call.
    pub timeout: Duration,
    /// Requests per batch chunk, clamped to `1..=MAX_BATCH_WRITE_ITEMS`.
    pub max_batch_items: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_batch_items: MAX_BATCH_WRITE_ITEMS,
        }
    }
}

/// Outcome of a fully committed batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Backend calls issued.
    pub chunks: usize,
    /// Requests applied.
    pub items: usize,
}

/// Typed access to the single application table.
#[derive(Clone)]
pub struct RecordStore {
    backend: Arc<dyn KvBackend>,
    config: StoreConfig,
    cancel: CancellationToken,
}

impl RecordStore {
    /// Creates a store with its own (never fired) cancellation token.
    pub fn new(backend: Arc<dyn KvBackend>, config: StoreConfig) -> Self {
        Self::with_cancellation(backend, config, CancellationToken::new())
    }

    /// Creates a store whose calls abort once `cancel` fires.
    pub fn with_cancellation(
        backend: Arc<dyn KvBackend>,
        mut config: StoreConfig,
        cancel: CancellationToken,
    ) -> Self {
        config.max_batch_items = config.max_batch_items.clamp(1, MAX_BATCH_WRITE_ITEMS);
        Self {
            backend,
            config,
            cancel,
        }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    /// Active configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Token observed by every call of this store.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(op, "backend call cancelled");
                Err(StoreError::Cancelled)
            }
            res = self.call_uncancellable(op, fut) => res,
        }
    }

    // Batch chunks run to completion once issued; only the timeout applies.
    async fn call_uncancellable<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                let timeout_ms = self.config.timeout.as_millis() as u64;
                warn!(op, timeout_ms, "backend call timed out");
                Err(StoreError::Timeout { timeout_ms })
            }
        }
    }

    /// Reads one row, failing with [`StoreError::NotFound`] if it is absent.
    pub async fn get(&self, pk: &str, sk: &str) -> Result<Row> {
        self.get_optional(pk, sk)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                pk: pk.to_string(),
                sk: sk.to_string(),
            })
    }

    /// Reads one row if it exists.
    pub async fn get_optional(&self, pk: &str, sk: &str) -> Result<Option<Row>> {
        let key = ItemKey::new(pk, sk);
        let item = self.call("get_item", self.backend.get_item(&key)).await?;
        Ok(item.map(|attrs| Row { key, attrs }))
    }

    /// Rows of partition `pk` whose sort key starts with `sk_prefix`, ascending.
    pub async fn query_by_prefix(&self, pk: &str, sk_prefix: &str) -> Result<Vec<Row>> {
        let rows = self.call("query", self.backend.query(pk, sk_prefix)).await?;
        debug!(pk, sk_prefix, rows = rows.len(), "prefix query");
        Ok(rows)
    }

    /// Inserts or replaces a row.
    pub async fn put(&self, row: Row) -> Result<()> {
        self.call("put_item", self.backend.put_item(row)).await
    }

    /// Deletes a row; absent rows are not an error.
    pub async fn delete(&self, key: &ItemKey) -> Result<()> {
        self.call("delete_item", self.backend.delete_item(key)).await
    }

    /// Sets attributes on a row, creating the row if needed.
    pub async fn update_attributes(
        &self,
        key: &ItemKey,
        updates: Vec<(String, AttrValue)>,
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.call("update_item", self.backend.update_item(key, updates))
            .await
    }

    /// Applies puts and deletes in sequential chunks of at most
    /// `max_batch_items` requests.
    ///
    /// Stops at the first failing chunk. If that is the first chunk the
    /// backend error is returned as is; otherwise the error is
    /// [`StoreError::PartialBatchFailure`] and the committed chunks stay
    /// applied. Cancellation is checked before each chunk.
    pub async fn batch_write(&self, requests: Vec<WriteRequest>) -> Result<BatchReport> {
        let chunks = chunk_requests(requests, self.config.max_batch_items);
        let total_chunks = chunks.len();
        let mut report = BatchReport::default();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let len = chunk.len();
            let outcome = if self.cancel.is_cancelled() {
                Err(StoreError::Cancelled)
            } else {
                debug!(chunk = index, total_chunks, len, "issuing batch chunk");
                self.call_uncancellable("batch_write_item", self.backend.batch_write_item(chunk))
                    .await
            };

            if let Err(e) = outcome {
                warn!(
                    failed_chunk = index,
                    total_chunks,
                    committed_items = report.items,
                    error = %e,
                    "batch write stopped"
                );
                if report.chunks == 0 {
                    return Err(e);
                }
                return Err(StoreError::PartialBatchFailure {
                    committed_chunks: report.chunks,
                    committed_items: report.items,
                    failed_chunk: index,
                    total_chunks,
                    source: Box::new(e),
                });
            }
            report.chunks += 1;
            report.items += len;
        }

        if report.chunks > 1 {
            info!(chunks = report.chunks, items = report.items, "batch write committed");
        }
        Ok(report)
    }

    /// Deletes the given sort keys of one partition.
    pub async fn batch_delete(&self, pk: &str, sort_keys: &[String]) -> Result<BatchReport> {
        let keys = sort_keys
            .iter()
            .map(|sk| ItemKey::new(pk, sk.as_str()))
            .collect();
        self.batch_delete_keys(keys).await
    }

    /// Deletes arbitrary rows, possibly across partitions.
    pub async fn batch_delete_keys(&self, keys: Vec<ItemKey>) -> Result<BatchReport> {
        self.batch_write(keys.into_iter().map(WriteRequest::Delete).collect())
            .await
    }

    /// Reads a set attribute; absent rows and attributes read as null.
    pub async fn read_set_attr(&self, pk: &str, sk: &str, attribute: &str) -> Result<SetAttr> {
        let row = self.get_optional(pk, sk).await?;
        set_attr_of(pk, sk, row.as_ref().map(|r| &r.attrs), attribute)
    }

    /// Rewrites a set attribute to `(current ∪ add) \ remove`.
    ///
    /// An empty result is written as the null marker. Nothing is written when
    /// the set is unchanged, which keeps repeated calls idempotent and avoids
    /// creating a row just to hold a null marker.
    pub async fn update_set(
        &self,
        pk: &str,
        sk: &str,
        attribute: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<SetAttr> {
        let row = self.get_optional(pk, sk).await?;
        let current = set_attr_of(pk, sk, row.as_ref().map(|r| &r.attrs), attribute)?;
        let next = current.apply(add, remove);

        if next == current {
            debug!(pk, sk, attribute, "set unchanged, skipping write");
            return Ok(next);
        }

        let key = ItemKey::new(pk, sk);
        self.update_attributes(&key, vec![(attribute.to_string(), next.to_attr())])
            .await?;
        debug!(pk, sk, attribute, len = next.len(), "set attribute written");
        Ok(next)
    }

    /// Reads a map attribute; absent rows, absent attributes and null read as empty.
    pub async fn read_map(
        &self,
        pk: &str,
        sk: &str,
        attribute: &str,
    ) -> Result<BTreeMap<String, AttrValue>> {
        let row = self.get_optional(pk, sk).await?;
        map_attr_of(pk, sk, row.as_ref().map(|r| &r.attrs), attribute)
    }

    /// Upserts and removes entries of a map attribute.
    ///
    /// Removals are applied after upserts. An empty result is written as the
    /// null marker.
    pub async fn update_map_entries(
        &self,
        pk: &str,
        sk: &str,
        attribute: &str,
        upserts: BTreeMap<String, AttrValue>,
        removals: &[String],
    ) -> Result<BTreeMap<String, AttrValue>> {
        let row = self.get_optional(pk, sk).await?;
        let current = map_attr_of(pk, sk, row.as_ref().map(|r| &r.attrs), attribute)?;

        let mut next = current.clone();
        next.extend(upserts);
        for key in removals {
            next.remove(key);
        }
        if next == current {
            return Ok(next);
        }

        let value = if next.is_empty() {
            AttrValue::Null
        } else {
            AttrValue::M(next.clone())
        };
        self.update_attributes(&ItemKey::new(pk, sk), vec![(attribute.to_string(), value)])
            .await?;
        Ok(next)
    }
}

fn chunk_requests(requests: Vec<WriteRequest>, size: usize) -> Vec<Vec<WriteRequest>> {
    let mut chunks = Vec::with_capacity(requests.len().div_ceil(size));
    let mut iter = requests.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

fn set_attr_of(pk: &str, sk: &str, item: Option<&Item>, attribute: &str) -> Result<SetAttr> {
    SetAttr::from_attr(item.and_then(|attrs| attrs.get(attribute))).ok_or_else(|| {
        StoreError::TypeMismatch {
            pk: pk.to_string(),
            sk: sk.to_string(),
            attribute: attribute.to_string(),
            expected: "string set",
        }
    })
}

fn map_attr_of(
    pk: &str,
    sk: &str,
    item: Option<&Item>,
    attribute: &str,
) -> Result<BTreeMap<String, AttrValue>> {
    match item.and_then(|attrs| attrs.get(attribute)) {
        None | Some(AttrValue::Null) => Ok(BTreeMap::new()),
        Some(AttrValue::M(map)) => Ok(map.clone()),
        Some(_) => Err(StoreError::TypeMismatch {
            pk: pk.to_string(),
            sk: sk.to_string(),
            attribute: attribute.to_string(),
            expected: "map",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use async_trait::async_trait;

    fn store_with(backend: Arc<MemoryBackend>) -> RecordStore {
        RecordStore::new(backend, StoreConfig::default())
    }

    async fn seed_partition(backend: &MemoryBackend, pk: &str, count: usize) -> Vec<String> {
        let mut sks = Vec::new();
        for i in 0..count {
            let sk = format!("row#{:03}", i);
            backend
                .put_item(Row::new(ItemKey::new(pk, sk.as_str())))
                .await
                .unwrap();
            sks.push(sk);
        }
        sks
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = store_with(Arc::new(MemoryBackend::new()));
        let err = store.get("u#a", "info#personal").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get_optional("u#a", "info#personal").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_delete_57_rows_uses_three_chunks() {
        let backend = Arc::new(MemoryBackend::new());
        let sks = seed_partition(&backend, "u#a", 57).await;
        let store = store_with(backend.clone());

        let report = store.batch_delete("u#a", &sks).await.unwrap();

        assert_eq!(report, BatchReport { chunks: 3, items: 57 });
        assert_eq!(backend.batch_call_count(), 3);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_second_chunk_failure_is_partial() {
        let backend = Arc::new(MemoryBackend::new());
        let sks = seed_partition(&backend, "u#a", 57).await;
        backend.fail_batch_call(2);
        let store = store_with(backend.clone());

        let err = store.batch_delete("u#a", &sks).await.unwrap_err();
        match err {
            StoreError::PartialBatchFailure {
                committed_chunks,
                committed_items,
                failed_chunk,
                total_chunks,
                ref source,
            } => {
                assert_eq!(committed_chunks, 1);
                assert_eq!(committed_items, 25);
                assert_eq!(failed_chunk, 1);
                assert_eq!(total_chunks, 3);
                assert!(source.is_retryable());
            }
            other => panic!("unexpected error: {other}"),
        }

        // Chunk 3 was never issued.
        assert_eq!(backend.batch_call_count(), 2);
        for sk in &sks[..25] {
            assert!(!backend.contains(&ItemKey::new("u#a", sk.as_str())));
        }
        for sk in &sks[25..] {
            assert!(backend.contains(&ItemKey::new("u#a", sk.as_str())));
        }
    }

    #[tokio::test]
    async fn test_first_chunk_failure_surfaces_backend_error() {
        let backend = Arc::new(MemoryBackend::new());
        let sks = seed_partition(&backend, "u#a", 30).await;
        backend.fail_batch_call(1);
        let store = store_with(backend.clone());

        let err = store.batch_delete("u#a", &sks).await.unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable { .. }));
        assert_eq!(backend.len(), 30);
    }

    #[tokio::test]
    async fn test_empty_batch_issues_no_calls() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        let report = store.batch_write(Vec::new()).await.unwrap();
        assert_eq!(report, BatchReport::default());
        assert_eq!(backend.batch_call_count(), 0);
    }

    #[tokio::test]
    async fn test_smaller_chunk_size() {
        let backend = Arc::new(MemoryBackend::new());
        let sks = seed_partition(&backend, "u#a", 10).await;
        let store = RecordStore::new(
            backend.clone(),
            StoreConfig {
                max_batch_items: 4,
                ..StoreConfig::default()
            },
        );
        let report = store.batch_delete("u#a", &sks).await.unwrap();
        assert_eq!(report.chunks, 3);
    }

    #[tokio::test]
    async fn test_chunk_size_is_clamped() {
        let store = RecordStore::new(
            Arc::new(MemoryBackend::new()),
            StoreConfig {
                max_batch_items: 100,
                ..StoreConfig::default()
            },
        );
        assert_eq!(store.config().max_batch_items, MAX_BATCH_WRITE_ITEMS);
    }

    #[tokio::test]
    async fn test_cancellation_between_chunks_keeps_committed_chunks() {
        struct CancelAfterFirst {
            inner: MemoryBackend,
            token: CancellationToken,
        }

        #[async_trait]
        impl KvBackend for CancelAfterFirst {
            async fn get_item(&self, key: &ItemKey) -> Result<Option<Item>> {
                self.inner.get_item(key).await
            }
            async fn query(&self, pk: &str, sk_prefix: &str) -> Result<Vec<Row>> {
                self.inner.query(pk, sk_prefix).await
            }
            async fn batch_write_item(&self, requests: Vec<WriteRequest>) -> Result<()> {
                let res = self.inner.batch_write_item(requests).await;
                self.token.cancel();
                res
            }
            async fn update_item(
                &self,
                key: &ItemKey,
                updates: Vec<(String, AttrValue)>,
            ) -> Result<()> {
                self.inner.update_item(key, updates).await
            }
            async fn put_item(&self, row: Row) -> Result<()> {
                self.inner.put_item(row).await
            }
            async fn delete_item(&self, key: &ItemKey) -> Result<()> {
                self.inner.delete_item(key).await
            }
        }

        let token = CancellationToken::new();
        let backend = Arc::new(CancelAfterFirst {
            inner: MemoryBackend::new(),
            token: token.clone(),
        });
        let sks = seed_partition(&backend.inner, "u#a", 40).await;
        let store = RecordStore::with_cancellation(backend.clone(), StoreConfig::default(), token);

        let err = store.batch_delete("u#a", &sks).await.unwrap_err();
        match err {
            StoreError::PartialBatchFailure {
                committed_chunks,
                ref source,
                ..
            } => {
                assert_eq!(committed_chunks, 1);
                assert!(matches!(**source, StoreError::Cancelled));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.inner.len(), 15);
    }

    #[tokio::test]
    async fn test_cancelled_store_rejects_point_calls() {
        let token = CancellationToken::new();
        token.cancel();
        let store = RecordStore::with_cancellation(
            Arc::new(MemoryBackend::new()),
            StoreConfig::default(),
            token,
        );
        let err = store.get_optional("u#a", "info#personal").await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out() {
        struct Stalled;

        #[async_trait]
        impl KvBackend for Stalled {
            async fn get_item(&self, _key: &ItemKey) -> Result<Option<Item>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(None)
            }
            async fn query(&self, _pk: &str, _sk_prefix: &str) -> Result<Vec<Row>> {
                Ok(Vec::new())
            }
            async fn batch_write_item(&self, _requests: Vec<WriteRequest>) -> Result<()> {
                Ok(())
            }
            async fn update_item(
                &self,
                _key: &ItemKey,
                _updates: Vec<(String, AttrValue)>,
            ) -> Result<()> {
                Ok(())
            }
            async fn put_item(&self, _row: Row) -> Result<()> {
                Ok(())
            }
            async fn delete_item(&self, _key: &ItemKey) -> Result<()> {
                Ok(())
            }
        }

        let store = RecordStore::new(
            Arc::new(Stalled),
            StoreConfig {
                timeout: Duration::from_millis(250),
                ..StoreConfig::default()
            },
        );
        let err = store.get_optional("u#a", "info#personal").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { timeout_ms: 250 }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_update_set_writes_null_marker_when_emptied() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        let key = ItemKey::personal("a");

        let set = store
            .update_set(&key.pk, &key.sk, "subscriptions", &["s1".to_string()], &[])
            .await
            .unwrap();
        assert_eq!(set.len(), 1);

        let set = store
            .update_set(&key.pk, &key.sk, "subscriptions", &[], &["s1".to_string()])
            .await
            .unwrap();
        assert!(set.is_null());
        assert_eq!(backend.raw_attr(&key, "subscriptions"), Some(AttrValue::Null));
    }

    #[tokio::test]
    async fn test_update_set_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        let add = vec!["x".to_string()];

        store.update_set("u#a", "info#personal", "subscriptions", &add, &[]).await.unwrap();
        let again = store
            .update_set("u#a", "info#personal", "subscriptions", &add, &[])
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn test_update_set_does_not_create_row_for_null() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        let set = store
            .update_set("u#a", "info#personal", "subscriptions", &[], &["x".to_string()])
            .await
            .unwrap();
        assert!(set.is_null());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_update_set_rejects_non_set_attribute() {
        let backend = Arc::new(MemoryBackend::new());
        let key = ItemKey::personal("a");
        backend
            .put_item(Row::new(key.clone()).with_attr("subscriptions", AttrValue::S("oops".into())))
            .await
            .unwrap();
        let store = store_with(backend);
        let err = store
            .update_set(&key.pk, &key.sk, "subscriptions", &["x".to_string()], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_update_map_entries() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        let key = ItemKey::new("u#a", "info#interestedSections");

        let mut upserts = BTreeMap::new();
        upserts.insert("k1".to_string(), AttrValue::N(10));
        upserts.insert("k2".to_string(), AttrValue::N(20));
        let map = store
            .update_map_entries(&key.pk, &key.sk, "sections", upserts, &[])
            .await
            .unwrap();
        assert_eq!(map.len(), 2);

        let map = store
            .update_map_entries(
                &key.pk,
                &key.sk,
                "sections",
                BTreeMap::new(),
                &["k1".to_string(), "k2".to_string()],
            )
            .await
            .unwrap();
        assert!(map.is_empty());
        assert_eq!(backend.raw_attr(&key, "sections"), Some(AttrValue::Null));
        assert!(store.read_map(&key.pk, &key.sk, "sections").await.unwrap().is_empty());
    }
}
