//! Error types for the sensor data cache.
//!
//! Only [`ValidationError`] ever reaches a caller directly. Fetch failures are
//! recorded into cache entries as text, and persistence failures are logged
//! and recovered from inside the store.

use std::time::Duration;

/// A malformed cache key: unknown building, metric or resource kind, or a
/// historical series request without a point id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
  #[error("unknown building {0:?}, expected one of WATT, COOPER, ASC, SIKES, FIKE")]
  UnknownBuilding(String),

  #[error("unknown sensor {0:?}, expected one of TEMP, HUMIDITY")]
  UnknownMetric(String),

  #[error("unknown endpoint {0:?}, expected one of live, hist, XREF, PXREF")]
  UnknownKind(String),

  #[error("historical data requires a point id")]
  MissingPoint,
}

/// Failure of the fetch collaborator.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  /// The data API answered with an explicit error envelope.
  #[error("{0}")]
  Api(String),

  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("server responded with {0}")]
  Status(reqwest::StatusCode),

  #[error("malformed response: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  #[error("invalid request url: {0}")]
  Url(#[from] url::ParseError),
}

/// Failure to load or save a store snapshot.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
  #[error("snapshot could not be parsed: {0}")]
  Corrupt(#[from] serde_json::Error),

  #[error("snapshot storage failed: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to prepare snapshot directory: {0}")]
  Io(#[from] std::io::Error),

  #[error("invalid snapshot timestamp {0:?}")]
  Timestamp(String),

  #[error("could not determine data directory")]
  NoDataDir,

  #[error("storage lock poisoned")]
  LockPoisoned,
}
