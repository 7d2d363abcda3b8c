use crate::config::{ApiConfig, Config};
use crate::sync::{RequestHandler, RequestParams, HEADERS_FIELD};
use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::{Map, Value};
use url::Url;

/// REST API client used as the network side of the sync handler
#[derive(Clone)]
pub struct HttpHandler {
  client: reqwest::Client,
  base_url: Url,
  default_api_version: String,
  token: Option<String>,
}

impl HttpHandler {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;

    let client = reqwest::Client::builder()
      .user_agent(concat!("syncache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      default_api_version: config.api_version.clone(),
      token: Config::get_api_token(),
    })
  }

  /// URL the given request is sent to.
  pub fn endpoint(&self, params: &RequestParams) -> Url {
    endpoint_url(&self.base_url, &self.default_api_version, params)
  }

  /// Perform the request and return its JSON body, with the response
  /// headers attached under `_headers`.
  pub async fn execute(&self, params: RequestParams) -> Result<Value> {
    let url = self.endpoint(&params);
    let method = Method::from_bytes(params.method.to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", params.method, e))?;

    let mut request = self.client.request(method.clone(), url.clone());
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }
    if let Some(body) = params.extra.get("body") {
      let data =
        serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;
      request = request.header(CONTENT_TYPE, "application/json").body(data);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let status = response.status();
    let headers: Map<String, Value> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
      })
      .collect();

    let bytes = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", url, e))?;

    if !status.is_success() {
      return Err(eyre!(
        "{} {} returned {}: {}",
        method,
        params.path,
        status,
        String::from_utf8_lossy(&bytes)
      ));
    }

    let mut body: Value = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes)
        .map_err(|e| eyre!("Failed to parse response from {}: {}", url, e))?
    };

    if let Some(fields) = body.as_object_mut() {
      fields.insert(HEADERS_FIELD.to_string(), Value::Object(headers));
    }

    Ok(body)
  }
}

impl RequestHandler for HttpHandler {
  fn send(&self, params: RequestParams) -> BoxFuture<'_, Result<Value>> {
    Box::pin(self.execute(params))
  }
}

/// Build the URL for a request: `{base}/rest/v{version}{path}?{query}`
fn endpoint_url(base_url: &Url, default_api_version: &str, params: &RequestParams) -> Url {
  let version = params.api_version.as_deref().unwrap_or(default_api_version);

  let mut url = base_url.clone();
  let path = format!(
    "{}/rest/v{}/{}",
    url.path().trim_end_matches('/'),
    version,
    params.path.trim_start_matches('/')
  );
  url.set_path(&path);
  url.set_query(params.query.as_deref().filter(|q| !q.is_empty()));
  url
}

#[cfg(test)]
mod tests {
  use super::*;

  fn endpoint(base_url: &str, params: &RequestParams) -> String {
    let base_url = Url::parse(base_url).unwrap();
    endpoint_url(&base_url, "1.1", params).to_string()
  }

  #[test]
  fn test_endpoint_uses_default_version() {
    let url = endpoint(
      "https://public-api.wordpress.com",
      &RequestParams::new("GET", "/me"),
    );
    assert_eq!(url, "https://public-api.wordpress.com/rest/v1.1/me");
  }

  #[test]
  fn test_endpoint_with_version_and_query() {
    let params = RequestParams::new("GET", "/me/sites")
      .with_api_version("1.2")
      .with_query("site_visibility=all");
    assert_eq!(
      endpoint("https://example.com/", &params),
      "https://example.com/rest/v1.2/me/sites?site_visibility=all"
    );
  }

  #[test]
  fn test_endpoint_keeps_base_path() {
    let url = endpoint(
      "http://localhost:8080/proxy",
      &RequestParams::new("GET", "sites"),
    );
    assert_eq!(url, "http://localhost:8080/proxy/rest/v1.1/sites");
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    let config = ApiConfig {
      base_url: "not a url".to_string(),
      api_version: "1.1".to_string(),
    };
    assert!(HttpHandler::new(&config).is_err());
  }
}
