use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::SqliteStore;
use crate::error::ErrorKind;
use crate::sync::{RuleWhitelist, WhitelistRule, DEFAULT_LIFETIME};

/// Settings are strict: an unknown key anywhere in the file fails loading
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Requests eligible for caching; none when empty
  #[serde(default)]
  pub whitelist: Vec<WhitelistRule>,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
  pub base_url: String,
  /// Version used for requests that don't name one
  pub api_version: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "https://public-api.wordpress.com".to_string(),
      api_version: "1.1".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
  /// When false nothing is read from or written to the store
  pub enabled: bool,
  /// Records older than this are pruned (e.g. "48h", "2d", or milliseconds)
  #[serde(deserialize_with = "deserialize_lifetime")]
  pub lifetime: Duration,
  /// Database location (defaults to $XDG_DATA_HOME/syncache/cache.db)
  pub db_path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      lifetime: DEFAULT_LIFETIME,
      db_path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
  /// `tracing` filter directive; RUST_LOG takes precedence
  pub filter: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: "info".to_string(),
      file: None,
    }
  }
}

fn deserialize_lifetime<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Lifetime {
    Millis(u64),
    Text(String),
  }

  match Lifetime::deserialize(deserializer)? {
    Lifetime::Millis(ms) => Ok(Duration::from_millis(ms)),
    Lifetime::Text(text) => parse_lifetime(&text).map_err(serde::de::Error::custom),
  }
}

/// Parse a lifetime such as `500ms`, `30s`, `15m`, `48h`, `2d`, `1w` or
/// `2 days`. A bare number is taken as milliseconds.
pub fn parse_lifetime(input: &str) -> Result<Duration> {
  let input = input.trim();
  let split = input
    .find(|c: char| !c.is_ascii_digit() && c != '.')
    .unwrap_or(input.len());
  let (number, unit) = input.split_at(split);

  let value: f64 = number
    .parse()
    .map_err(|_| eyre!("Invalid lifetime '{}'", input))?;

  let unit_ms: f64 = match unit.trim().to_lowercase().as_str() {
    "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
    "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
    "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
    "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
    "d" | "day" | "days" => 86_400_000.0,
    "w" | "week" | "weeks" => 604_800_000.0,
    other => return Err(eyre!("Unknown lifetime unit '{}' in '{}'", other, input)),
  };

  Ok(Duration::from_millis((value * unit_ms).round() as u64))
}

/// Config files tried when none is given, in order: `./syncache.yaml`, then
/// `$XDG_CONFIG_HOME/syncache/config.yaml`.
fn candidate_paths() -> Vec<PathBuf> {
  let user = dirs::config_dir().map(|dir| dir.join("syncache").join("config.yaml"));
  std::iter::once(PathBuf::from("syncache.yaml"))
    .chain(user)
    .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./syncache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/syncache/config.yaml
  ///
  /// Defaults apply when no file is found. Every failure is fatal and
  /// carries [`ErrorKind::Configuration`] as its outermost context.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if !p.exists() => Err(eyre!("Config file not found: {}", p.display())),
      Some(p) => Ok(Some(p.to_path_buf())),
      None => Ok(candidate_paths().into_iter().find(|p| p.exists())),
    };

    path
      .and_then(|found| match found {
        Some(p) => Self::load_from_path(&p),
        None => Ok(Self::default()),
      })
      .wrap_err(ErrorKind::Configuration)
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    // Compile once here so a bad pattern fails at startup
    RuleWhitelist::new(&config.whitelist)?;
    Ok(config)
  }

  /// Build the whitelist described by the `whitelist` section.
  pub fn whitelist(&self) -> Result<RuleWhitelist> {
    RuleWhitelist::new(&self.whitelist)
  }

  /// Location of the cache database.
  pub fn db_path(&self) -> Result<PathBuf> {
    match &self.cache.db_path {
      Some(path) => Ok(path.clone()),
      None => SqliteStore::default_path(),
    }
  }

  /// Get the API token from the environment.
  ///
  /// Checks SYNCACHE_TOKEN. Requests go out unauthenticated without it.
  pub fn get_api_token() -> Option<String> {
    std::env::var("SYNCACHE_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }
}
