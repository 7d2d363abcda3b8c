//! Predicates deciding which requests take part in caching.

use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use serde::Deserialize;

use super::params::RequestParams;

/// Decides whether a request is eligible for caching.
///
/// Must be pure: the engine may call it at any point of a request.
pub trait Whitelist: Send + Sync {
  fn is_whitelisted(&self, params: &RequestParams) -> bool;
}

impl<F> Whitelist for F
where
  F: Fn(&RequestParams) -> bool + Send + Sync,
{
  fn is_whitelisted(&self, params: &RequestParams) -> bool {
    self(params)
  }
}

/// Caches every request.
pub struct AllowAll;

impl Whitelist for AllowAll {
  fn is_whitelisted(&self, _params: &RequestParams) -> bool {
    true
  }
}

/// One whitelist entry as written in the config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhitelistRule {
  /// HTTP method to match (any method when omitted)
  #[serde(default)]
  pub method: Option<String>,
  /// Regular expression the whole request path must match
  pub path: String,
}

struct CompiledRule {
  method: Option<String>,
  path: Regex,
}

/// Whitelist built from configured rules. A request is eligible when any rule
/// matches it; no rules means nothing is cached.
pub struct RuleWhitelist {
  rules: Vec<CompiledRule>,
}

impl RuleWhitelist {
  pub fn new(rules: &[WhitelistRule]) -> Result<Self> {
    let rules = rules
      .iter()
      .map(|rule| {
        let path = Regex::new(&format!("^(?:{})$", rule.path))
          .map_err(|e| eyre!("Invalid whitelist path pattern '{}': {}", rule.path, e))?;
        Ok(CompiledRule {
          method: rule.method.as_ref().map(|m| m.to_uppercase()),
          path,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self { rules })
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }
}

impl Whitelist for RuleWhitelist {
  fn is_whitelisted(&self, params: &RequestParams) -> bool {
    self.rules.iter().any(|rule| {
      let method_ok = rule
        .method
        .as_deref()
        .map_or(true, |m| m.eq_ignore_ascii_case(&params.method));
      method_ok && rule.path.is_match(&params.path)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rule(method: Option<&str>, path: &str) -> WhitelistRule {
    WhitelistRule {
      method: method.map(String::from),
      path: path.to_string(),
    }
  }

  #[test]
  fn test_empty_rules_whitelist_nothing() {
    let whitelist = RuleWhitelist::new(&[]).unwrap();
    assert!(whitelist.is_empty());
    assert!(!whitelist.is_whitelisted(&RequestParams::new("GET", "/me")));
  }

  #[test]
  fn test_method_is_case_insensitive() {
    let whitelist = RuleWhitelist::new(&[rule(Some("get"), "/me")]).unwrap();

    assert!(whitelist.is_whitelisted(&RequestParams::new("GET", "/me")));
    assert!(!whitelist.is_whitelisted(&RequestParams::new("POST", "/me")));
  }

  #[test]
  fn test_path_must_match_entirely() {
    let whitelist = RuleWhitelist::new(&[rule(None, r"/sites/\d+/posts")]).unwrap();

    assert!(whitelist.is_whitelisted(&RequestParams::new("GET", "/sites/42/posts")));
    assert!(!whitelist.is_whitelisted(&RequestParams::new("GET", "/sites/42/posts/7")));
    assert!(!whitelist.is_whitelisted(&RequestParams::new("GET", "/v2/sites/42/posts")));
  }

  #[test]
  fn test_invalid_pattern_is_rejected() {
    assert!(RuleWhitelist::new(&[rule(None, "/me(")]).is_err());
  }

  #[test]
  fn test_closure_whitelist() {
    let only_get = |params: &RequestParams| params.method == "GET";
    assert!(only_get.is_whitelisted(&RequestParams::new("GET", "/anything")));
    assert!(AllowAll.is_whitelisted(&RequestParams::new("DELETE", "/anything")));
  }
}
