//! Request descriptors as handed to the sync handler.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Proxy flags attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaApi {
  /// Set on proxy connection requests, which never go through the cache
  #[serde(default)]
  pub access_all_users_blogs: bool,
}

/// Describes one API request.
///
/// Only `api_version`, `method`, `path` and `query` identify the request for
/// caching purposes. Anything else the caller attaches is carried along in
/// `extra` and forwarded to the network handler untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParams {
  pub method: String,
  pub path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub api_version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub query: Option<String>,
  #[serde(default, rename = "metaAPI", skip_serializing_if = "Option::is_none")]
  pub meta_api: Option<MetaApi>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl RequestParams {
  pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
    Self {
      method: method.into(),
      path: path.into(),
      api_version: None,
      query: None,
      meta_api: None,
      extra: Map::new(),
    }
  }

  pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
    self.api_version = Some(api_version.into());
    self
  }

  pub fn with_query(mut self, query: impl Into<String>) -> Self {
    self.query = Some(query.into());
    self
  }

  /// Attach an arbitrary metadata field.
  pub fn with_extra(mut self, name: impl Into<String>, value: Value) -> Self {
    self.extra.insert(name.into(), value);
    self
  }

  /// Mark this as a proxy connection request.
  pub fn as_proxy_request(mut self) -> Self {
    self.meta_api = Some(MetaApi {
      access_all_users_blogs: true,
    });
    self
  }

  pub fn is_proxy_request(&self) -> bool {
    self
      .meta_api
      .as_ref()
      .is_some_and(|meta| meta.access_all_users_blogs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_deserialize_wire_names() {
    let params: RequestParams = serde_json::from_value(json!({
      "method": "GET",
      "path": "/me/sites",
      "apiVersion": "1.2",
      "query": "site_visibility=all",
      "metaAPI": {"accessAllUsersBlogs": true},
      "token": "secret"
    }))
    .unwrap();

    assert_eq!(params.api_version.as_deref(), Some("1.2"));
    assert_eq!(params.query.as_deref(), Some("site_visibility=all"));
    assert!(params.is_proxy_request());
    assert_eq!(params.extra.get("token"), Some(&json!("secret")));
  }

  #[test]
  fn test_serialize_skips_absent_fields() {
    let params = RequestParams::new("GET", "/me");
    assert_eq!(
      serde_json::to_value(&params).unwrap(),
      json!({"method": "GET", "path": "/me"})
    );
  }

  #[test]
  fn test_plain_request_is_not_proxy() {
    assert!(!RequestParams::new("GET", "/me").is_proxy_request());
    assert!(RequestParams::new("GET", "/me")
      .as_proxy_request()
      .is_proxy_request());
  }
}
