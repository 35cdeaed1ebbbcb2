//! Key-value backend abstraction.
//!
//! This trait abstracts over the table backend, allowing the services to
//! run against an in-memory table in tests and DynamoDB in production.

use async_trait::async_trait;

use crate::attr::{AttrValue, Item, Row};
use crate::error::Result;
use crate::key::ItemKey;

/// Maximum number of requests a single `batch_write_item` call accepts.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// A single request in a batch write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    /// Insert or replace a whole row.
    Put(Row),
    /// Delete a row. Succeeds even if the row does not exist.
    Delete(ItemKey),
}

impl WriteRequest {
    /// Address of the row this request touches.
    pub fn key(&self) -> &ItemKey {
        match self {
            WriteRequest::Put(row) => &row.key,
            WriteRequest::Delete(key) => key,
        }
    }
}

/// Table operations the record store relies on.
///
/// Implementations provide per-item atomicity only; nothing here spans
/// multiple items transactionally.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Gets a row's attributes. Returns `None` if the row doesn't exist.
    async fn get_item(&self, key: &ItemKey) -> Result<Option<Item>>;

    /// Returns every row in partition `pk` whose sort key begins with
    /// `sk_prefix`, ascending by sort key. An empty prefix matches all rows.
    async fn query(&self, pk: &str, sk_prefix: &str) -> Result<Vec<Row>>;

    /// Applies up to [`MAX_BATCH_WRITE_ITEMS`] puts and deletes.
    async fn batch_write_item(&self, requests: Vec<WriteRequest>) -> Result<()>;

    /// Sets the given attributes, creating the row if it doesn't exist.
    async fn update_item(&self, key: &ItemKey, updates: Vec<(String, AttrValue)>) -> Result<()>;

    /// Inserts or replaces a row.
    async fn put_item(&self, row: Row) -> Result<()>;

    /// Deletes a row. Returns Ok(()) even if the row didn't exist.
    async fn delete_item(&self, key: &ItemKey) -> Result<()>;
}
