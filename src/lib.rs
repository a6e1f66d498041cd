//! Cached client for campus building comfort data.
//!
//! Live and historical temperature/humidity readings plus room
//! cross-references are fetched from the data API through [`cache::DataCache`],
//! which reuses entries younger than a caller-supplied age, keeps at most one
//! fetch per key in flight and persists the whole cache between sessions.

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod sensors;
