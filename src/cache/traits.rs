//! Core traits and types for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sync::RequestParams;

/// Asynchronous key-value store the cache persists into.
///
/// Values are opaque JSON documents. `set` under an existing key overwrites it.
#[async_trait]
pub trait KeyedStore: Send + Sync {
  /// Read the value stored under `key`, `None` when absent.
  async fn get(&self, key: &str) -> Result<Option<Value>>;

  /// Store `value` under `key`, replacing any previous value.
  async fn set(&self, key: &str, value: &Value) -> Result<()>;

  /// Remove `key`. Removing an absent key is not an error.
  async fn remove(&self, key: &str) -> Result<()>;

  /// List every key currently held by the store.
  async fn keys(&self) -> Result<Vec<String>>;
}

/// Sync bookkeeping attached to every stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
  /// Storage key of the record
  pub key: String,
  /// When the record was written from a network response
  pub synced: DateTime<Utc>,
  /// Whether a refresh is in flight for this record
  pub syncing: bool,
}

/// A persisted network response for one derived key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
  #[serde(rename = "__sync")]
  pub sync: SyncMeta,
  /// Response body with transport fields stripped
  pub body: Value,
  /// Request that produced this record, kept for inspection
  pub params: RequestParams,
}

impl CacheRecord {
  /// Build a freshly synced record.
  pub fn new(key: impl Into<String>, body: Value, params: RequestParams) -> Self {
    Self {
      sync: SyncMeta {
        key: key.into(),
        synced: Utc::now(),
        syncing: false,
      },
      body,
      params,
    }
  }
}

/// One delivery to the caller of a synced request.
#[derive(Debug, Clone)]
pub struct Reply<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: ReplySource,
  /// When the data was synced (if from cache)
  pub synced_at: Option<DateTime<Utc>>,
}

impl<T> Reply<T> {
  /// Create a reply from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: ReplySource::Network,
      synced_at: None,
    }
  }

  /// Create an optimistic reply from a stored record.
  pub fn from_cache(data: T, synced_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: ReplySource::Cache,
      synced_at: Some(synced_at),
    }
  }

  pub fn is_cached(&self) -> bool {
    self.source == ReplySource::Cache
  }
}

/// Indicates where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
  /// Previously stored record, delivered before the network answered
  Cache,
  /// Fresh data from network
  Network,
}
