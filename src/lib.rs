//! Optimistic read-through/write-back cache for remote data APIs.
//!
//! A [`SyncHandler`](sync::SyncHandler) answers each eligible request twice:
//! first with the last stored response, straight from the local store, then
//! with the fresh network response, which also overwrites the stored copy.
//! A [`RecordIndex`](cache::RecordIndex) remembers which records exist and
//! when they were written so old ones can be pruned.
//!
//! ```ignore
//! let engine = SyncEngine::new(SqliteStore::open()?, config.whitelist()?);
//! let handler = engine.wrap(HttpHandler::new(&config.api)?);
//!
//! handler
//!   .request::<Me, _, _>(
//!     RequestParams::new("GET", "/me").with_api_version("1.1"),
//!     |cached| render(cached.data),
//!     |fresh| { render(fresh.data); },
//!   )
//!   .await?;
//!
//! engine.prune_expired().await?;
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod sync;
