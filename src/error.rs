//! Failure taxonomy and the warning channel.
//!
//! Storage failures never reach the caller of a request. They are classified
//! here and reported through [`warn`], which emits a structured `tracing`
//! event so the pipeline can carry on.

use std::fmt;

use color_eyre::Report;

/// Classification of the failures the sync engine can run into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Reading a record from the store failed; treated as a cache miss.
  StoreRead,
  /// Writing a record or the index failed; the write is abandoned.
  StoreWrite,
  /// A stored record no longer matches the shape the caller expects.
  SchemaMismatch,
  /// The network handler reported a failure; surfaced to the caller.
  Network,
  /// Invalid or unknown configuration; fatal at load time. Attached as
  /// context to the error returned by `Config::load`.
  Configuration,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::StoreRead => "store_read",
      ErrorKind::StoreWrite => "store_write",
      ErrorKind::SchemaMismatch => "schema_mismatch",
      ErrorKind::Network => "network",
      ErrorKind::Configuration => "configuration",
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Report a contained failure on the warning channel.
pub fn warn(kind: ErrorKind, err: &Report) {
  tracing::warn!(kind = kind.as_str(), "{:#}", err);
}
