use serde::{Deserialize, Serialize};

use super::api_types::deserialize_point_id;
use super::keys::{Building, PointId, ResourceKind};

/// Current reading for one room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveReading {
  #[serde(rename = "PointSliceID", deserialize_with = "deserialize_point_id")]
  pub point_slice_id: PointId,
  #[serde(rename = "Alias")]
  pub alias: String,
  #[serde(rename = "UTCDateTime")]
  pub utc_date_time: String,
  #[serde(rename = "ETDateTime")]
  pub et_date_time: String,
  #[serde(rename = "ActualValue")]
  pub actual_value: f64,
}

/// Hourly averages, oldest first. Hours without readings are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistSeries {
  pub labels: Vec<u32>,
  pub data: Vec<Option<f64>>,
}

/// Room cross-reference record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoomXref {
  #[serde(rename = "PointSliceID", deserialize_with = "deserialize_point_id")]
  pub point_slice_id: PointId,
  pub room: String,
  pub room_type: String,
  #[serde(rename = "BLG")]
  pub building: Building,
  pub floor: String,
  pub reading_type: String,
  pub alias: String,
}

/// Partial cross-reference record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialXref {
  #[serde(rename = "PointSliceID")]
  pub point_slice_id: String,
  #[serde(rename = "Alias")]
  pub alias: String,
  pub in_xref: bool,
}

/// Fetched data, tagged by the kind of resource it was fetched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
  #[serde(rename = "live")]
  Live(Vec<LiveReading>),
  #[serde(rename = "hist")]
  Hist(HistSeries),
  #[serde(rename = "XREF")]
  Xref(Vec<RoomXref>),
  #[serde(rename = "PXREF")]
  Pxref(Vec<PartialXref>),
}

impl Payload {
  /// Decode the `data` field of an API response for the given kind.
  pub fn decode(kind: ResourceKind, data: serde_json::Value) -> serde_json::Result<Self> {
    Ok(match kind {
      ResourceKind::Live => Payload::Live(serde_json::from_value(data)?),
      ResourceKind::Hist => Payload::Hist(serde_json::from_value(data)?),
      ResourceKind::Xref => Payload::Xref(serde_json::from_value(data)?),
      ResourceKind::Pxref => Payload::Pxref(serde_json::from_value(data)?),
    })
  }

  pub fn kind(&self) -> ResourceKind {
    match self {
      Payload::Live(_) => ResourceKind::Live,
      Payload::Hist(_) => ResourceKind::Hist,
      Payload::Xref(_) => ResourceKind::Xref,
      Payload::Pxref(_) => ResourceKind::Pxref,
    }
  }

  /// Number of records (rooms, hours) carried.
  pub fn record_count(&self) -> usize {
    match self {
      Payload::Live(readings) => readings.len(),
      Payload::Hist(series) => series.data.len(),
      Payload::Xref(rooms) => rooms.len(),
      Payload::Pxref(rooms) => rooms.len(),
    }
  }
}
