use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::Result;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use syncache::api::HttpHandler;
use syncache::cache::{derive_key, KeyedStore, NoopStore, Reply, ReplySource, SqliteStore};
use syncache::config::{self, Config};
use syncache::logging;
use syncache::sync::{RequestParams, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "syncache")]
#[command(about = "Optimistic local cache in front of a REST API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/syncache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run a request through the cache, printing the cached reply then the fresh one
  Fetch(RequestArgs),
  /// Print the cache key derived for a request
  Key {
    #[command(flatten)]
    request: RequestArgs,
    /// Print the canonical string instead of its digest
    #[arg(long)]
    raw: bool,
  },
  /// List tracked records, most recently written first
  Records,
  /// Remove records older than the lifetime
  Prune {
    /// Lifetime such as 48h or 2d (default: from config)
    #[arg(short, long, value_parser = parse_lifetime_arg)]
    lifetime: Option<Duration>,
  },
  /// Remove every cache record and the index
  Clear,
}

#[derive(ClapArgs, Debug)]
struct RequestArgs {
  /// API path, e.g. /me
  path: String,

  /// HTTP method
  #[arg(short = 'X', long, default_value = "GET")]
  method: String,

  /// API version (default: from config)
  #[arg(long)]
  api_version: Option<String>,

  /// Raw query string
  #[arg(short, long)]
  query: Option<String>,
}

impl RequestArgs {
  fn into_params(self, config: &Config) -> RequestParams {
    let mut params = RequestParams::new(self.method.to_uppercase(), self.path)
      .with_api_version(self.api_version.unwrap_or_else(|| config.api.api_version.clone()));
    params.query = self.query;
    params
  }
}

fn parse_lifetime_arg(s: &str) -> Result<Duration, String> {
  config::parse_lifetime(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let whitelist = config.whitelist()?;
  if !config.cache.enabled {
    info!("caching disabled, using no-op store");
    let engine = SyncEngine::new(NoopStore, whitelist);
    return run(args.command, &config, engine).await;
  }

  let store = SqliteStore::open_at(&config.db_path()?)?;
  let engine = SyncEngine::new(store, whitelist).with_lifetime(config.cache.lifetime);
  run(args.command, &config, engine).await
}

async fn run<S: KeyedStore>(
  command: Command,
  config: &Config,
  engine: SyncEngine<S>,
) -> Result<()> {
  match command {
    Command::Fetch(request) => {
      let handler = engine.wrap(HttpHandler::new(&config.api)?);
      handler
        .request::<Value, _, _>(
          request.into_params(config),
          |reply| {
            print_reply(&reply);
            Ok(())
          },
          |reply| print_reply(&reply),
        )
        .await?;
    }
    Command::Key { request, raw } => {
      println!("{}", derive_key(&request.into_params(config), !raw));
    }
    Command::Records => {
      let now = Utc::now();
      let entries = engine.records().await?;
      if entries.is_empty() {
        println!("No records stored");
      }
      for entry in entries {
        println!("{}  {}", entry.key, format_age(entry.age(now)));
      }
    }
    Command::Prune { lifetime } => {
      let lifetime = lifetime.unwrap_or(engine.lifetime());
      let removed = engine.prune_records_from(lifetime).await?;
      println!("Pruned {} record(s)", removed);
    }
    Command::Clear => {
      let removed = engine.clear_all().await?;
      println!("Removed {} record(s)", removed);
    }
  }

  Ok(())
}

fn print_reply(reply: &Reply<Value>) {
  match (reply.source, reply.synced_at) {
    (ReplySource::Cache, Some(synced)) => println!("# cached, synced {}", synced.to_rfc3339()),
    (ReplySource::Cache, None) => println!("# cached"),
    (ReplySource::Network, _) => println!("# fresh"),
  }
  let body =
    serde_json::to_string_pretty(&reply.data).unwrap_or_else(|_| reply.data.to_string());
  println!("{}", body);
}

fn format_age(age: chrono::Duration) -> String {
  let minutes = age.num_minutes();
  match (minutes / (60 * 24), (minutes / 60) % 24, minutes % 60) {
    (0, 0, m) => format!("{}m ago", m),
    (0, h, m) => format!("{}h {}m ago", h, m),
    (d, h, _) => format!("{}d {}h ago", d, h),
  }
}
