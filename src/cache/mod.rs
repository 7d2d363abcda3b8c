//! Persistence side of the sync cache.
//!
//! This module provides:
//! - The [`KeyedStore`] abstraction plus SQLite, in-memory and no-op stores
//! - Deterministic cache keys for request descriptors
//! - The [`RecordIndex`], an ordered history of stored records used for
//!   pruning and clearing

mod index;
mod key;
mod memory;
mod storage;
mod traits;

pub use index::{IndexEntry, RecordIndex};
pub use key::{derive_key, is_record_key, record_key, RECORDS_LIST_KEY, RECORD_KEY_PREFIX};
pub use memory::MemoryStore;
pub use storage::{NoopStore, SqliteStore};
pub use traits::{CacheRecord, KeyedStore, Reply, ReplySource, SyncMeta};
