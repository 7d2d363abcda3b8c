//! Network side: the HTTP request handler behind the sync cache.

mod client;

pub use client::HttpHandler;
