//! Ordered history of the cache records that exist in the store.
//!
//! The whole history lives under a single reserved key ([`RECORDS_LIST_KEY`])
//! as a list of `{key, mark}` entries, most recently touched first. Pruning and
//! clearing walk this list instead of the store's own key listing.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::key::{is_record_key, RECORDS_LIST_KEY};
use super::traits::KeyedStore;
use crate::error::{self, ErrorKind};

/// One tracked cache record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
  /// Store key of the record
  pub key: String,
  /// When the record was last written
  #[serde(rename = "mark", with = "chrono::serde::ts_milliseconds")]
  pub mark_time: DateTime<Utc>,
}

impl IndexEntry {
  /// Time elapsed since the record was last written.
  pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
    now - self.mark_time
  }
}

/// Record history persisted in a [`KeyedStore`].
///
/// Every mutation is a read-modify-write of the single index key, so the
/// index serializes its own writers. Two processes sharing one store can
/// still overwrite each other's index; the last write wins.
pub struct RecordIndex<S: KeyedStore> {
  store: Arc<S>,
  writer: Mutex<()>,
}

impl<S: KeyedStore> RecordIndex<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      writer: Mutex::new(()),
    }
  }

  /// All entries, most recently touched first.
  pub async fn get_all(&self) -> Result<Vec<IndexEntry>> {
    decode(self.store.get(RECORDS_LIST_KEY).await?)
  }

  /// Add `key` at the head of the index, dropping any older entry for it.
  pub async fn upsert(&self, key: &str) -> Result<Vec<IndexEntry>> {
    self.upsert_at(key, Utc::now()).await
  }

  pub(crate) async fn upsert_at(
    &self,
    key: &str,
    mark_time: DateTime<Utc>,
  ) -> Result<Vec<IndexEntry>> {
    let _writer = self.writer.lock().await;

    let mut entries = self.load_without(key).await?;
    debug!(key, "adding record to index");
    entries.insert(
      0,
      IndexEntry {
        key: key.to_string(),
        mark_time,
      },
    );

    self.persist(&entries).await?;
    Ok(entries)
  }

  /// Drop the entry for `key`. The list is written back even if `key` was
  /// not tracked.
  pub async fn remove(&self, key: &str) -> Result<Vec<IndexEntry>> {
    let _writer = self.writer.lock().await;

    let entries = self.load_without(key).await?;
    self.persist(&entries).await?;
    Ok(entries)
  }

  /// Delete every record last written more than `max_age` ago.
  ///
  /// Returns the number of records removed. An entry whose record could not
  /// be deleted stays in the index so a later prune retries it.
  pub async fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
    self.prune_older_than_at(max_age, Utc::now()).await
  }

  pub(crate) async fn prune_older_than_at(
    &self,
    max_age: Duration,
    now: DateTime<Utc>,
  ) -> Result<usize> {
    let max_age = chrono::Duration::from_std(max_age)
      .map_err(|e| eyre!("Lifetime {:?} out of range: {}", max_age, e))?;

    let _writer = self.writer.lock().await;
    debug!(
      max_age_secs = max_age.num_seconds(),
      "pruning records older than lifetime"
    );

    let entries = self.get_all().await?;
    if entries.is_empty() {
      debug!("no records found");
      return Ok(0);
    }

    let total = entries.len();
    let mut kept = Vec::with_capacity(total);
    for entry in entries {
      let age = entry.age(now);
      if age <= max_age {
        kept.push(entry);
        continue;
      }

      debug!(key = %entry.key, age_hours = age.num_hours(), "record too old, removing");
      if let Err(e) = self.store.remove(&entry.key).await {
        error::warn(
          ErrorKind::StoreWrite,
          &e.wrap_err(format!("Failed to prune {}", entry.key)),
        );
        kept.push(entry);
      }
    }

    let removed = total - kept.len();
    if removed == 0 {
      debug!("no records to prune");
    } else {
      debug!(removed, "updating {}", RECORDS_LIST_KEY);
      self.persist(&kept).await?;
    }

    Ok(removed)
  }

  /// Remove every cache record in the store along with the index itself.
  ///
  /// Works from the store's key listing so untracked records are swept too.
  /// Keys that don't look like cache records are left alone. Failures on
  /// individual records are logged and don't stop the sweep.
  pub async fn clear_all(&self) -> Result<usize> {
    let _writer = self.writer.lock().await;

    let keys = self
      .store
      .keys()
      .await
      .wrap_err("Failed to list store keys")?;
    let record_keys: Vec<String> = keys.into_iter().filter(|k| is_record_key(k)).collect();

    if record_keys.is_empty() {
      debug!("no records to remove");
    } else {
      debug!(count = record_keys.len(), "removing records");
    }

    let results = join_all(record_keys.iter().map(|key| self.store.remove(key))).await;

    let mut removed = 0;
    for (key, result) in record_keys.iter().zip(results) {
      match result {
        Ok(()) => {
          debug!(key = %key, "record removed");
          removed += 1;
        }
        Err(e) => error::warn(
          ErrorKind::StoreWrite,
          &e.wrap_err(format!("Failed to remove {}", key)),
        ),
      }
    }

    self
      .store
      .remove(RECORDS_LIST_KEY)
      .await
      .wrap_err_with(|| format!("Failed to remove {}", RECORDS_LIST_KEY))?;
    debug!("{} has been removed as well", RECORDS_LIST_KEY);

    Ok(removed)
  }

  /// Load the index minus `key`. A malformed index is discarded rather than
  /// blocking every future write.
  async fn load_without(&self, key: &str) -> Result<Vec<IndexEntry>> {
    let stored = self.store.get(RECORDS_LIST_KEY).await?;
    let entries = decode(stored).unwrap_or_else(|e| {
      error::warn(ErrorKind::SchemaMismatch, &e);
      Vec::new()
    });

    Ok(
      entries
        .into_iter()
        .filter(|entry| {
          if entry.key == key {
            debug!(key, "already indexed, replacing");
          }
          entry.key != key
        })
        .collect(),
    )
  }

  async fn persist(&self, entries: &[IndexEntry]) -> Result<()> {
    let value = serde_json::to_value(entries)
      .map_err(|e| eyre!("Failed to serialize {}: {}", RECORDS_LIST_KEY, e))?;
    self.store.set(RECORDS_LIST_KEY, &value).await
  }
}

fn decode(stored: Option<Value>) -> Result<Vec<IndexEntry>> {
  match stored {
    None | Some(Value::Null) => Ok(Vec::new()),
    Some(value) => {
      serde_json::from_value(value).map_err(|e| eyre!("Malformed {}: {}", RECORDS_LIST_KEY, e))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use async_trait::async_trait;
  use serde_json::json;

  const HOUR: Duration = Duration::from_secs(3600);

  fn index() -> (Arc<MemoryStore>, RecordIndex<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let index = RecordIndex::new(Arc::clone(&store));
    (store, index)
  }

  fn keys(entries: &[IndexEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.key.as_str()).collect()
  }

  /// Memory store that refuses to delete one key.
  struct StuckKeyStore {
    inner: MemoryStore,
    stuck: &'static str,
  }

  #[async_trait]
  impl KeyedStore for StuckKeyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
      self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
      self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
      if key == self.stuck {
        return Err(eyre!("remove {} refused", key));
      }
      self.inner.remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
      self.inner.keys().await
    }
  }

  async fn stuck_index(
    stuck: &'static str,
    records: &[&str],
  ) -> (Arc<StuckKeyStore>, RecordIndex<StuckKeyStore>) {
    let store = Arc::new(StuckKeyStore {
      inner: MemoryStore::new(),
      stuck,
    });
    let index = RecordIndex::new(Arc::clone(&store));
    let marked = Utc::now() - chrono::Duration::hours(50);
    for key in records {
      store.set(key, &json!({"body": key})).await.unwrap();
      index.upsert_at(key, marked).await.unwrap();
    }
    (store, index)
  }

  #[tokio::test]
  async fn test_empty_index_is_empty_list() {
    let (_, index) = index();
    assert!(index.get_all().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_upsert_moves_key_to_head_once() {
    let (_, index) = index();

    index.upsert("sync-record-a").await.unwrap();
    index.upsert("sync-record-b").await.unwrap();
    let entries = index.upsert("sync-record-a").await.unwrap();

    assert_eq!(keys(&entries), vec!["sync-record-a", "sync-record-b"]);
    assert_eq!(index.get_all().await.unwrap(), entries);
  }

  #[tokio::test]
  async fn test_upsert_refreshes_mark_time() {
    let (_, index) = index();
    let earlier = Utc::now() - chrono::Duration::hours(5);

    index.upsert_at("sync-record-a", earlier).await.unwrap();
    let later = Utc::now();
    index.upsert_at("sync-record-a", later).await.unwrap();

    let entries = index.get_all().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
      entries[0].mark_time.timestamp_millis(),
      later.timestamp_millis()
    );
  }

  #[tokio::test]
  async fn test_remove_missing_key_still_persists() {
    let (store, index) = index();

    let entries = index.remove("sync-record-none").await.unwrap();

    assert!(entries.is_empty());
    assert_eq!(store.get(RECORDS_LIST_KEY).await.unwrap(), Some(json!([])));
  }

  #[tokio::test]
  async fn test_entries_serialize_with_millisecond_marks() {
    let (store, index) = index();
    let mark = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();

    index.upsert_at("sync-record-a", mark).await.unwrap();

    assert_eq!(
      store.get(RECORDS_LIST_KEY).await.unwrap(),
      Some(json!([{"key": "sync-record-a", "mark": 1_700_000_000_123i64}]))
    );
  }

  #[tokio::test]
  async fn test_prune_boundary() {
    let (store, index) = index();
    let now = Utc::now();

    for key in ["sync-record-fresh", "sync-record-stale"] {
      store.set(key, &json!({"body": key})).await.unwrap();
    }
    index
      .upsert_at("sync-record-stale", now - chrono::Duration::hours(49))
      .await
      .unwrap();
    index
      .upsert_at("sync-record-fresh", now - chrono::Duration::hours(47))
      .await
      .unwrap();

    let removed = index.prune_older_than_at(48 * HOUR, now).await.unwrap();

    assert_eq!(removed, 1);
    assert_eq!(keys(&index.get_all().await.unwrap()), vec!["sync-record-fresh"]);
    assert!(store.get("sync-record-stale").await.unwrap().is_none());
    assert!(store.get("sync-record-fresh").await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_prune_keeps_entry_when_record_delete_fails() {
    let (store, index) = stuck_index("sync-record-b", &["sync-record-a", "sync-record-b"]).await;

    let removed = index.prune_older_than(48 * HOUR).await.unwrap();

    assert_eq!(removed, 1);
    assert_eq!(keys(&index.get_all().await.unwrap()), vec!["sync-record-b"]);
    assert!(store.get("sync-record-a").await.unwrap().is_none());
    assert!(store.get("sync-record-b").await.unwrap().is_some());

    // Still stuck, still tracked
    assert_eq!(index.prune_older_than(48 * HOUR).await.unwrap(), 0);
    assert_eq!(keys(&index.get_all().await.unwrap()), vec!["sync-record-b"]);
  }

  #[tokio::test]
  async fn test_clear_all_carries_on_past_failed_delete() {
    let (store, index) = stuck_index(
      "sync-record-b",
      &["sync-record-a", "sync-record-b", "sync-record-c"],
    )
    .await;

    let removed = index.clear_all().await.unwrap();

    assert_eq!(removed, 2);
    assert_eq!(store.keys().await.unwrap(), vec!["sync-record-b".to_string()]);
  }

  #[tokio::test]
  async fn test_prune_without_changes_leaves_index_untouched() {
    let (store, index) = index();
    index.upsert("sync-record-a").await.unwrap();
    let before = store.get(RECORDS_LIST_KEY).await.unwrap();

    assert_eq!(index.prune_older_than(48 * HOUR).await.unwrap(), 0);
    assert_eq!(store.get(RECORDS_LIST_KEY).await.unwrap(), before);
  }

  #[tokio::test]
  async fn test_prune_and_clear_tolerate_missing_index() {
    let (_, index) = index();

    assert_eq!(index.prune_older_than(HOUR).await.unwrap(), 0);
    assert_eq!(index.clear_all().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_clear_all_only_touches_cache_keys() {
    let (store, index) = index();
    store.set("sync-record-abc", &json!(1)).await.unwrap();
    store.set("sync-record-def", &json!(2)).await.unwrap();
    store.set("user-settings", &json!({"theme": "dark"})).await.unwrap();
    index.upsert("sync-record-abc").await.unwrap();

    let removed = index.clear_all().await.unwrap();

    assert_eq!(removed, 2);
    assert_eq!(store.keys().await.unwrap(), vec!["user-settings".to_string()]);
  }

  #[tokio::test]
  async fn test_malformed_index_is_reset_on_write() {
    let (store, index) = index();
    store
      .set(RECORDS_LIST_KEY, &json!({"not": "a list"}))
      .await
      .unwrap();

    assert!(index.get_all().await.is_err());

    let entries = index.upsert("sync-record-a").await.unwrap();
    assert_eq!(keys(&entries), vec!["sync-record-a"]);
  }

  #[tokio::test]
  async fn test_concurrent_upserts_are_all_kept() {
    let (_, index) = index();
    let index = Arc::new(index);

    let tasks: Vec<_> = (0..16)
      .map(|i| {
        let index = Arc::clone(&index);
        tokio::spawn(async move { index.upsert(&format!("sync-record-{}", i)).await })
      })
      .collect();
    for task in tasks {
      task.await.unwrap().unwrap();
    }

    assert_eq!(index.get_all().await.unwrap().len(), 16);
  }
}
