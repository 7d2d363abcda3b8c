//! Sync engine: optimistic local replies followed by a network refresh.
//!
//! A whitelisted request goes through these stages, strictly in order:
//!
//! 1. derive the record key and look up the stored record
//! 2. if found, hand the stored body to the caller (optimistic reply)
//! 3. send the request over the network
//! 4. hand the fresh body to the caller
//! 5. store the fresh body and mark it in the record index
//!
//! Store failures along the way are logged and never reach the caller. Only a
//! network failure does, exactly once.

use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::params::RequestParams;
use super::whitelist::Whitelist;
use crate::cache::{record_key, CacheRecord, IndexEntry, KeyedStore, RecordIndex, Reply};
use crate::error::{self, ErrorKind};

/// Records older than this are pruned by default (two days).
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Response field holding transport headers; never persisted.
pub const HEADERS_FIELD: &str = "_headers";

/// The network side of a request.
pub trait RequestHandler: Send + Sync {
  fn send(&self, params: RequestParams) -> BoxFuture<'_, Result<Value>>;
}

impl<F, Fut> RequestHandler for F
where
  F: Fn(RequestParams) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value>> + Send + 'static,
{
  fn send(&self, params: RequestParams) -> BoxFuture<'_, Result<Value>> {
    Box::pin(self(params))
  }
}

/// Owns the record store, the record index and the whitelist.
///
/// Construct one per store and share it (it is cheap to clone) with every
/// component that issues requests.
pub struct SyncEngine<S: KeyedStore> {
  store: Arc<S>,
  index: Arc<RecordIndex<S>>,
  whitelist: Arc<dyn Whitelist>,
  /// How long a record lives before `prune_expired` removes it
  lifetime: Duration,
}

impl<S: KeyedStore> SyncEngine<S> {
  /// Create a new engine over the given store.
  pub fn new(store: S, whitelist: impl Whitelist + 'static) -> Self {
    let store = Arc::new(store);
    Self {
      index: Arc::new(RecordIndex::new(Arc::clone(&store))),
      store,
      whitelist: Arc::new(whitelist),
      lifetime: DEFAULT_LIFETIME,
    }
  }

  /// Set the lifetime used by [`SyncEngine::prune_expired`].
  pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
    self.lifetime = lifetime;
    self
  }

  pub fn lifetime(&self) -> Duration {
    self.lifetime
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn index(&self) -> &RecordIndex<S> {
    &self.index
  }

  /// Put the cache in front of `handler`.
  pub fn wrap<H: RequestHandler>(&self, handler: H) -> SyncHandler<S, H> {
    SyncHandler {
      engine: self.clone(),
      handler,
    }
  }

  pub fn is_whitelisted(&self, params: &RequestParams) -> bool {
    self.whitelist.is_whitelisted(params)
  }

  /// Read the raw stored record for `key`.
  pub async fn retrieve_record(&self, key: &str) -> Result<Option<Value>> {
    debug!(key, "getting stored record");
    self.store.get(key).await
  }

  /// Add or overwrite the record for `key`, marking it in the index first.
  pub async fn store_record(&self, key: &str, record: &CacheRecord) -> Result<()> {
    debug!(key, "storing record");
    let value =
      serde_json::to_value(record).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;

    self.index.upsert(key).await?;
    self.store.set(key, &value).await
  }

  /// Delete the record for `key` together with its index entry.
  pub async fn remove_record(&self, key: &str) -> Result<()> {
    debug!(key, "removing record");
    self.index.remove(key).await?;
    self.store.remove(key).await
  }

  /// Delete every record last written more than `lifetime` ago.
  pub async fn prune_records_from(&self, lifetime: Duration) -> Result<usize> {
    self.index.prune_older_than(lifetime).await
  }

  /// Prune with the engine's configured lifetime.
  pub async fn prune_expired(&self) -> Result<usize> {
    self.prune_records_from(self.lifetime).await
  }

  /// Remove every cache record and the index.
  pub async fn clear_all(&self) -> Result<usize> {
    self.index.clear_all().await
  }

  /// Index entries, most recently written first.
  pub async fn records(&self) -> Result<Vec<IndexEntry>> {
    self.index.get_all().await
  }

  /// Look up the stored record for `key`; a read failure counts as a miss.
  async fn lookup(&self, key: &str) -> Option<Value> {
    match self.retrieve_record(key).await {
      Ok(Some(value)) => Some(value),
      Ok(None) => None,
      Err(e) => {
        error::warn(
          ErrorKind::StoreRead,
          &e.wrap_err(format!("Failed to read {}", key)),
        );
        None
      }
    }
  }
}

impl<S: KeyedStore> Clone for SyncEngine<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      index: Arc::clone(&self.index),
      whitelist: Arc::clone(&self.whitelist),
      lifetime: self.lifetime,
    }
  }
}

/// A request handler with the sync cache in front of it.
pub struct SyncHandler<S: KeyedStore, H> {
  engine: SyncEngine<S>,
  handler: H,
}

impl<S: KeyedStore, H: RequestHandler> SyncHandler<S, H> {
  pub fn engine(&self) -> &SyncEngine<S> {
    &self.engine
  }

  /// Run one request through the cache.
  ///
  /// `on_cached` gets the stored body, if there is one that still decodes
  /// into `T`, before the network is hit. Returning an error from it marks
  /// the stored record as unusable and deletes it. `on_fresh` gets the
  /// network body. Requests that are not whitelisted, and proxy requests, go
  /// straight to the network and only ever see `on_fresh`.
  ///
  /// Returns an error only when the network request fails or its body does
  /// not decode into `T`; nothing is cached in that case.
  pub async fn request<T, C, F>(
    &self,
    params: RequestParams,
    on_cached: C,
    on_fresh: F,
  ) -> Result<()>
  where
    T: DeserializeOwned,
    C: FnOnce(Reply<T>) -> Result<()>,
    F: FnOnce(Reply<T>),
  {
    if params.is_proxy_request() {
      debug!("skip - proxy request detected");
      return self.bypass(params, on_fresh).await;
    }

    if !self.engine.is_whitelisted(&params) {
      debug!(path = %params.path, "not whitelisted, skipping cache");
      return self.bypass(params, on_fresh).await;
    }

    let key = record_key(&params);
    debug!(key = %key, path = %params.path, "starting to get resource");

    match self.engine.lookup(&key).await {
      Some(stored) => {
        debug!(key = %key, "stored record found, replying optimistically");
        let delivered = decode_record::<T>(stored).and_then(|(data, synced)| {
          on_cached(Reply::from_cache(data, synced)).wrap_err("Cached reply was rejected")
        });

        if let Err(e) = delivered {
          error::warn(
            ErrorKind::SchemaMismatch,
            &e.wrap_err(format!("Dropping unusable record {}", key)),
          );
          if let Err(e) = self.engine.remove_record(&key).await {
            error::warn(ErrorKind::StoreWrite, &e);
          }
        }
      }
      None => debug!(method = %params.method, path = %params.path, "no stored record"),
    }

    let response = self.send(params.clone()).await?;
    let data = decode_fresh::<T>(&response, &params)?;
    debug!(key = %key, "second reply from network");
    on_fresh(Reply::from_network(data));

    let record = CacheRecord::new(key.clone(), strip_transport(response), params);
    if let Err(e) = self.engine.store_record(&key, &record).await {
      error::warn(
        ErrorKind::StoreWrite,
        &e.wrap_err(format!("Failed to cache {}", key)),
      );
    }

    Ok(())
  }

  /// Run a request and collect its replies: the optimistic one (if any)
  /// followed by the fresh one.
  pub async fn fetch(&self, params: RequestParams) -> Result<Vec<Reply<Value>>> {
    let mut cached = None;
    let mut fresh = None;

    self
      .request(
        params,
        |reply| {
          cached = Some(reply);
          Ok(())
        },
        |reply| fresh = Some(reply),
      )
      .await?;

    Ok(cached.into_iter().chain(fresh).collect())
  }

  async fn bypass<T, F>(&self, params: RequestParams, on_fresh: F) -> Result<()>
  where
    T: DeserializeOwned,
    F: FnOnce(Reply<T>),
  {
    let response = self.send(params.clone()).await?;
    let data = decode_fresh::<T>(&response, &params)?;
    on_fresh(Reply::from_network(data));
    Ok(())
  }

  async fn send(&self, params: RequestParams) -> Result<Value> {
    let (method, path) = (params.method.clone(), params.path.clone());

    self.handler.send(params).await.map_err(|e| {
      let e = e.wrap_err(format!("{} {} failed", method, path));
      error::warn(ErrorKind::Network, &e);
      e
    })
  }
}

fn decode_record<T: DeserializeOwned>(
  stored: Value,
) -> Result<(T, chrono::DateTime<chrono::Utc>)> {
  let record: CacheRecord =
    serde_json::from_value(stored).map_err(|e| eyre!("Malformed cache record: {}", e))?;
  let data = serde_json::from_value(record.body)
    .map_err(|e| eyre!("Stored body doesn't match the expected shape: {}", e))?;
  Ok((data, record.sync.synced))
}

fn decode_fresh<T: DeserializeOwned>(response: &Value, params: &RequestParams) -> Result<T> {
  T::deserialize(response).map_err(|e| {
    eyre!(
      "Unexpected response for {} {}: {}",
      params.method,
      params.path,
      e
    )
  })
}

/// Remove transport-only fields from a response before it is stored.
fn strip_transport(mut response: Value) -> Value {
  if let Some(fields) = response.as_object_mut() {
    fields.remove(HEADERS_FIELD);
  }
  response
}
