//! Error types for the storage subsystem.

use thiserror::Error;

/// Errors that can occur while encoding records or talking to the backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed row does not exist.
    #[error("item not found: pk={pk} sk={sk}")]
    NotFound {
        /// Partition key of the missing row.
        pk: String,
        /// Sort key of the missing row.
        sk: String,
    },

    /// A stored composite string did not match its tag pattern.
    #[error("malformed {scheme} encoding: {value:?}")]
    MalformedEncoding {
        /// Encoding scheme that failed to parse.
        scheme: &'static str,
        /// The raw stored value.
        value: String,
    },

    /// A field value cannot be encoded without breaking the tag grammar.
    #[error("invalid value for field {field}: {reason}")]
    InvalidField {
        /// Name of the rejected field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// An attribute holds a different value type than the caller expects.
    #[error("attribute {attribute} on pk={pk} sk={sk} is not a {expected}")]
    TypeMismatch {
        /// Partition key of the row.
        pk: String,
        /// Sort key of the row.
        sk: String,
        /// Attribute name.
        attribute: String,
        /// Expected attribute type.
        expected: &'static str,
    },

    /// A single backend batch call was handed more requests than allowed.
    #[error("batch of {len} requests exceeds backend limit of {max}")]
    BatchTooLarge {
        /// Number of requests in the rejected batch.
        len: usize,
        /// Backend limit.
        max: usize,
    },

    /// A chunk of a multi-chunk write failed after earlier chunks committed.
    ///
    /// Committed chunks are not rolled back.
    #[error(
        "batch chunk {failed_chunk} of {total_chunks} failed after {committed_items} items in {committed_chunks} chunks committed"
    )]
    PartialBatchFailure {
        /// Number of chunks that committed before the failure.
        committed_chunks: usize,
        /// Number of requests contained in the committed chunks.
        committed_items: usize,
        /// Zero-based index of the failed chunk.
        failed_chunk: usize,
        /// Total number of chunks the request list was split into.
        total_chunks: usize,
        /// Underlying failure of the chunk.
        #[source]
        source: Box<StoreError>,
    },

    /// Transient backend failure (throttling, network, 5xx).
    #[error("backend unavailable: {msg}")]
    BackendUnavailable {
        /// Error message from the backend.
        msg: String,
    },

    /// Permanent backend failure (validation, permissions, lock poisoning).
    #[error("backend error: {msg}")]
    Backend {
        /// Error message from the backend.
        msg: String,
    },

    /// A backend call did not complete within the configured timeout.
    #[error("backend call timed out after {timeout_ms} ms")]
    Timeout {
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Returns true when retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::BackendUnavailable { .. } | StoreError::Timeout { .. } => true,
            StoreError::PartialBatchFailure { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Builds a [`StoreError::Backend`] from any displayable message.
    pub fn backend(msg: impl Into<String>) -> Self {
        StoreError::Backend { msg: msg.into() }
    }

    /// Builds a [`StoreError::BackendUnavailable`] from any displayable message.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        StoreError::BackendUnavailable { msg: msg.into() }
    }
}

/// Result alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
