#![warn(missing_docs)]

//! Schedule Helper storage subsystem: single-table key codec, tagged record
//! encodings, key-value backends and the chunking record store.

pub mod attr;
pub mod backend;
pub mod codec;
#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod error;
pub mod key;
pub mod memory;
pub mod store;

pub use attr::{AttrValue, Item, NonEmptySet, Row, SetAttr};
pub use backend::{KvBackend, WriteRequest, MAX_BATCH_WRITE_ITEMS};
pub use codec::{
    CourseTaken, Emphasis, EncodedRecord, InterestedSection, NameIndexUser, TaggedEncoding,
};
pub use error::{Result, StoreError};
pub use key::{ItemKey, RequestDirection, SortKeyKind};
pub use memory::MemoryBackend;
pub use store::{BatchReport, RecordStore, StoreConfig};
