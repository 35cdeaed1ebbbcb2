//! DynamoDB table backend.
//!
//! The table has a string partition key `pk` and a string sort key `sk`;
//! every other attribute is converted to and from [`AttrValue`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{
    AttributeValue, DeleteRequest, PutRequest, WriteRequest as DynamoWriteRequest,
};
use aws_sdk_dynamodb::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::attr::{AttrValue, Item, Row};
use crate::backend::{KvBackend, WriteRequest, MAX_BATCH_WRITE_ITEMS};
use crate::error::{Result, StoreError};
use crate::key::ItemKey;

const ATTR_PK: &str = "pk";
const ATTR_SK: &str = "sk";

// Error codes DynamoDB uses for conditions that clear up on their own.
const TRANSIENT_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
    "InternalServerError",
    "ServiceUnavailable",
];

/// Connection settings for [`DynamoDbBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamoDbConfig {
    /// Table name.
    pub table_name: String,
    /// Region override; the SDK default chain applies when unset.
    pub region: Option<String>,
    /// Endpoint override, e.g. DynamoDB Local.
    pub endpoint: Option<String>,
}

/// [`KvBackend`] backed by a DynamoDB table.
#[derive(Clone)]
pub struct DynamoDbBackend {
    client: Client,
    table_name: String,
}

impl std::fmt::Debug for DynamoDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbBackend")
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl DynamoDbBackend {
    /// Builds a client from a shared SDK config plus the table overrides.
    pub fn new(sdk_config: &aws_config::SdkConfig, config: DynamoDbConfig) -> Self {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);
        if let Some(region) = config.region {
            builder = builder.region(aws_sdk_dynamodb::config::Region::new(region));
        }
        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Self {
            client: Client::from_conf(builder.build()),
            table_name: config.table_name,
        }
    }

    /// Loads the SDK config from the environment and builds the backend.
    pub async fn from_env(config: DynamoDbConfig) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(&sdk_config, config)
    }

    /// Wraps a pre-built client.
    pub fn from_client(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    fn key_attrs(key: &ItemKey) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (ATTR_PK.to_string(), AttributeValue::S(key.pk.clone())),
            (ATTR_SK.to_string(), AttributeValue::S(key.sk.clone())),
        ])
    }

    fn row_to_item(row: Row) -> HashMap<String, AttributeValue> {
        let mut item = Self::key_attrs(&row.key);
        for (name, value) in row.attrs {
            item.insert(name, to_dynamo(value));
        }
        item
    }

    fn item_to_attrs(item: &HashMap<String, AttributeValue>) -> Result<Item> {
        item.iter()
            .filter(|(name, _)| name.as_str() != ATTR_PK && name.as_str() != ATTR_SK)
            .map(|(name, value)| Ok((name.clone(), from_dynamo(value)?)))
            .collect()
    }

    fn item_to_row(item: &HashMap<String, AttributeValue>) -> Result<Row> {
        let string_attr = |name: &str| {
            item.get(name)
                .and_then(|v| v.as_s().ok())
                .cloned()
                .ok_or_else(|| StoreError::backend(format!("item without string {} attribute", name)))
        };
        Ok(Row {
            key: ItemKey::new(string_attr(ATTR_PK)?, string_attr(ATTR_SK)?),
            attrs: Self::item_to_attrs(item)?,
        })
    }

    fn to_write_request(request: WriteRequest) -> Result<DynamoWriteRequest> {
        let builder = DynamoWriteRequest::builder();
        let built = match request {
            WriteRequest::Put(row) => builder.put_request(
                PutRequest::builder()
                    .set_item(Some(Self::row_to_item(row)))
                    .build()
                    .map_err(|e| StoreError::backend(e.to_string()))?,
            ),
            WriteRequest::Delete(key) => builder.delete_request(
                DeleteRequest::builder()
                    .set_key(Some(Self::key_attrs(&key)))
                    .build()
                    .map_err(|e| StoreError::backend(e.to_string()))?,
            ),
        };
        Ok(built.build())
    }
}

/// Converts an attribute into its DynamoDB representation.
pub fn to_dynamo(value: AttrValue) -> AttributeValue {
    match value {
        AttrValue::S(s) => AttributeValue::S(s),
        AttrValue::N(n) => AttributeValue::N(n.to_string()),
        AttrValue::Bool(b) => AttributeValue::Bool(b),
        AttrValue::Ss(set) => AttributeValue::Ss(set.into_iter().collect()),
        AttrValue::M(map) => {
            AttributeValue::M(map.into_iter().map(|(k, v)| (k, to_dynamo(v))).collect())
        }
        AttrValue::Null => AttributeValue::Null(true),
    }
}

/// Converts a DynamoDB attribute, rejecting types the application never writes.
pub fn from_dynamo(value: &AttributeValue) -> Result<AttrValue> {
    match value {
        AttributeValue::S(s) => Ok(AttrValue::S(s.clone())),
        AttributeValue::N(n) => n
            .parse::<i64>()
            .map(AttrValue::N)
            .map_err(|e| StoreError::backend(format!("non-integer number {:?}: {}", n, e))),
        AttributeValue::Bool(b) => Ok(AttrValue::Bool(*b)),
        AttributeValue::Ss(values) => Ok(AttrValue::Ss(values.iter().cloned().collect::<BTreeSet<_>>())),
        AttributeValue::M(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), from_dynamo(v)?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(AttrValue::M),
        AttributeValue::Null(_) => Ok(AttrValue::Null),
        other => Err(StoreError::backend(format!(
            "unsupported attribute type {:?}",
            other
        ))),
    }
}

fn classify<E, R>(op: &'static str, err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let transient = match &err {
        SdkError::ServiceError(service_err) => service_err
            .err()
            .code()
            .is_some_and(|code| TRANSIENT_CODES.contains(&code)),
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        _ => false,
    };
    let msg = format!("{}: {}", op, DisplayErrorContext(&err));
    if transient {
        warn!(op, "transient DynamoDB failure: {}", msg);
        StoreError::unavailable(msg)
    } else {
        StoreError::backend(msg)
    }
}

#[async_trait]
impl KvBackend for DynamoDbBackend {
    async fn get_item(&self, key: &ItemKey) -> Result<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key_attrs(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| classify("get_item", e))?;
        output.item().map(Self::item_to_attrs).transpose()
    }

    async fn query(&self, pk: &str, sk_prefix: &str) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;
        loop {
            let mut request = self
                .client
                .query()
                .table_name(&self.table_name)
                .expression_attribute_values(":pk", AttributeValue::S(pk.to_string()))
                .set_exclusive_start_key(start_key.take());
            request = if sk_prefix.is_empty() {
                request.key_condition_expression("pk = :pk")
            } else {
                request
                    .key_condition_expression("pk = :pk AND begins_with(sk, :prefix)")
                    .expression_attribute_values(":prefix", AttributeValue::S(sk_prefix.to_string()))
            };

            let output = request.send().await.map_err(|e| classify("query", e))?;
            for item in output.items() {
                rows.push(Self::item_to_row(item)?);
            }
            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }
        debug!(pk, sk_prefix, rows = rows.len(), "dynamodb query");
        Ok(rows)
    }

    async fn batch_write_item(&self, requests: Vec<WriteRequest>) -> Result<()> {
        if requests.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(StoreError::BatchTooLarge {
                len: requests.len(),
                max: MAX_BATCH_WRITE_ITEMS,
            });
        }
        if requests.is_empty() {
            return Ok(());
        }
        let write_requests = requests
            .into_iter()
            .map(Self::to_write_request)
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .client
            .batch_write_item()
            .request_items(&self.table_name, write_requests)
            .send()
            .await
            .map_err(|e| classify("batch_write_item", e))?;

        // Puts and deletes are idempotent, so the caller may resubmit the chunk.
        let unprocessed = output
            .unprocessed_items()
            .and_then(|items| items.get(&self.table_name))
            .map_or(0, Vec::len);
        if unprocessed > 0 {
            return Err(StoreError::unavailable(format!(
                "{} batch requests left unprocessed",
                unprocessed
            )));
        }
        Ok(())
    }

    async fn update_item(&self, key: &ItemKey, updates: Vec<(String, AttrValue)>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut clauses = Vec::with_capacity(updates.len());
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key_attrs(key)));
        for (i, (name, value)) in updates.into_iter().enumerate() {
            clauses.push(format!("#a{i} = :v{i}"));
            request = request
                .expression_attribute_names(format!("#a{i}"), name)
                .expression_attribute_values(format!(":v{i}"), to_dynamo(value));
        }
        request
            .update_expression(format!("SET {}", clauses.join(", ")))
            .send()
            .await
            .map_err(|e| classify("update_item", e))?;
        Ok(())
    }

    async fn put_item(&self, row: Row) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::row_to_item(row)))
            .send()
            .await
            .map_err(|e| classify("put_item", e))?;
        Ok(())
    }

    async fn delete_item(&self, key: &ItemKey) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key_attrs(key)))
            .send()
            .await
            .map_err(|e| classify("delete_item", e))?;
        Ok(())
    }
}
