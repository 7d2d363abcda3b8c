//! In-process [`KeyedStore`], used for tests and short-lived sessions.

use async_trait::async_trait;
use color_eyre::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::traits::KeyedStore;

#[derive(Default)]
pub struct MemoryStore {
  entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of keys currently stored.
  pub async fn len(&self) -> usize {
    self.entries.read().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.entries.read().await.is_empty()
  }
}

#[async_trait]
impl KeyedStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.entries.read().await.get(key).cloned())
  }

  async fn set(&self, key: &str, value: &Value) -> Result<()> {
    self
      .entries
      .write()
      .await
      .insert(key.to_string(), value.clone());
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<()> {
    self.entries.write().await.remove(key);
    Ok(())
  }

  async fn keys(&self) -> Result<Vec<String>> {
    Ok(self.entries.read().await.keys().cloned().collect())
  }
}
