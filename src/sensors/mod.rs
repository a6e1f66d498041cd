pub mod api_types;
pub mod client;
pub mod keys;
pub mod types;

pub use client::SensorClient;
pub use keys::{Building, CacheKey, Metric, Parameters, PointId, ResourceKind};
pub use types::{HistSeries, LiveReading, PartialXref, Payload, RoomXref};
