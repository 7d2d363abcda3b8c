//! Request side of the sync cache: descriptors, whitelisting and the engine
//! that replies from the store first and from the network second.

mod engine;
mod params;
mod whitelist;

pub use engine::{
  RequestHandler, SyncEngine, SyncHandler, DEFAULT_LIFETIME, HEADERS_FIELD,
};
pub use params::{MetaApi, RequestParams};
pub use whitelist::{AllowAll, RuleWhitelist, Whitelist, WhitelistRule};
