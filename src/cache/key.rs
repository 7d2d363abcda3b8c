//! Cache key derivation for request descriptors.

use once_cell::sync::Lazy;
use regex::Regex;
use sha1::{Digest, Sha1};

use crate::sync::RequestParams;

/// Store key holding the record index.
pub const RECORDS_LIST_KEY: &str = "records-list";

/// Prefix shared by every cache-record store key.
pub const RECORD_KEY_PREFIX: &str = "sync-record-";

static RECORD_KEY_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"^sync-record-\w+$").expect("record key pattern is valid")
});

/// Derive the cache key for a request.
///
/// The canonical form is `{api_version}-{method}-{path}[-{query}]`. Only those
/// four fields take part, so extra metadata never changes the key. With
/// `hash` set the canonical string is reduced to a SHA-1 hex digest; without
/// it the canonical string is returned as-is for inspection.
pub fn derive_key(params: &RequestParams, hash: bool) -> String {
  let mut key = format!(
    "{}-{}-{}",
    params.api_version.as_deref().unwrap_or(""),
    params.method,
    params.path
  );

  if let Some(query) = params.query.as_deref().filter(|q| !q.is_empty()) {
    key.push('-');
    key.push_str(query);
  }

  if !hash {
    return key;
  }

  let mut hasher = Sha1::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

/// Store key under which the record for `params` lives.
pub fn record_key(params: &RequestParams) -> String {
  format!("{}{}", RECORD_KEY_PREFIX, derive_key(params, true))
}

/// Whether `key` names a cache record (as opposed to the index or foreign data).
pub fn is_record_key(key: &str) -> bool {
  RECORD_KEY_RE.is_match(key)
}
