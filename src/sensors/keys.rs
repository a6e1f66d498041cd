//! Key space for cached sensor resources.
//!
//! A [`CacheKey`] addresses exactly one cache entry. Raw request
//! [`Parameters`] are resolved into keys here, so nothing malformed ever
//! reaches the store or the network.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Numeric sensor/room id used to address a historical series.
pub type PointId = i64;

/// Campus building with sensor coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Building {
  Watt,
  Cooper,
  Asc,
  Sikes,
  Fike,
}

impl Building {
  pub const ALL: [Building; 5] = [
    Building::Watt,
    Building::Cooper,
    Building::Asc,
    Building::Sikes,
    Building::Fike,
  ];

  /// Identifier used by the data API.
  pub fn code(self) -> &'static str {
    match self {
      Building::Watt => "WATT",
      Building::Cooper => "COOPER",
      Building::Asc => "ASC",
      Building::Sikes => "SIKES",
      Building::Fike => "FIKE",
    }
  }

  pub fn display_name(self) -> &'static str {
    match self {
      Building::Watt => "Watt Innovation Center",
      Building::Cooper => "Cooper Library",
      Building::Asc => "Academic Success Center",
      Building::Sikes => "Sikes Hall",
      Building::Fike => "Fike Recreation Center",
    }
  }
}

impl FromStr for Building {
  type Err = ValidationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Building::ALL
      .into_iter()
      .find(|b| b.code() == s)
      .ok_or_else(|| ValidationError::UnknownBuilding(s.to_string()))
  }
}

impl fmt::Display for Building {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.code())
  }
}

/// Measured quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Metric {
  Temp,
  Humidity,
}

impl Metric {
  pub const ALL: [Metric; 2] = [Metric::Temp, Metric::Humidity];

  pub fn code(self) -> &'static str {
    match self {
      Metric::Temp => "TEMP",
      Metric::Humidity => "HUMIDITY",
    }
  }
}

impl FromStr for Metric {
  type Err = ValidationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Metric::ALL
      .into_iter()
      .find(|m| m.code() == s)
      .ok_or_else(|| ValidationError::UnknownMetric(s.to_string()))
  }
}

impl fmt::Display for Metric {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.code())
  }
}

/// Category of fetchable data, named as the data API names its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
  /// Current reading per room
  #[serde(rename = "live")]
  Live,
  /// Hourly history for one point
  #[serde(rename = "hist")]
  Hist,
  /// Room cross-reference list
  #[serde(rename = "XREF")]
  Xref,
  /// Partial cross-reference list
  #[serde(rename = "PXREF")]
  Pxref,
}

impl ResourceKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ResourceKind::Live => "live",
      ResourceKind::Hist => "hist",
      ResourceKind::Xref => "XREF",
      ResourceKind::Pxref => "PXREF",
    }
  }
}

impl FromStr for ResourceKind {
  type Err = ValidationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "live" => Ok(ResourceKind::Live),
      "hist" => Ok(ResourceKind::Hist),
      "XREF" => Ok(ResourceKind::Xref),
      "PXREF" => Ok(ResourceKind::Pxref),
      other => Err(ValidationError::UnknownKind(other.to_string())),
    }
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Unvalidated request parameters, shaped like the data API's query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
  pub building: String,
  pub sensor: String,
  /// Point id, only meaningful for historical data
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<PointId>,
}

impl Parameters {
  pub fn new(building: impl Into<String>, sensor: impl Into<String>) -> Self {
    Self {
      building: building.into(),
      sensor: sensor.into(),
      id: None,
    }
  }

  pub fn with_id(mut self, id: PointId) -> Self {
    self.id = Some(id);
    self
  }
}

/// Address of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKey {
  Live {
    building: Building,
    metric: Metric,
  },
  Hist {
    building: Building,
    metric: Metric,
    point: PointId,
  },
  Xref {
    building: Building,
    metric: Metric,
  },
  Pxref {
    building: Building,
    metric: Metric,
  },
}

impl CacheKey {
  /// Resolve raw parameters into a key.
  ///
  /// The point id is required for [`ResourceKind::Hist`] and ignored for every
  /// other kind.
  pub fn resolve(kind: ResourceKind, parameters: &Parameters) -> Result<Self, ValidationError> {
    let building: Building = parameters.building.parse()?;
    let metric: Metric = parameters.sensor.parse()?;

    Ok(match kind {
      ResourceKind::Live => CacheKey::Live { building, metric },
      ResourceKind::Xref => CacheKey::Xref { building, metric },
      ResourceKind::Pxref => CacheKey::Pxref { building, metric },
      ResourceKind::Hist => CacheKey::Hist {
        building,
        metric,
        point: parameters.id.ok_or(ValidationError::MissingPoint)?,
      },
    })
  }

  /// Every key with a fixed slot in the store (all kinds except history).
  pub fn fixed_slots() -> impl Iterator<Item = CacheKey> {
    Building::ALL.into_iter().flat_map(|building| {
      Metric::ALL.into_iter().flat_map(move |metric| {
        [
          CacheKey::Live { building, metric },
          CacheKey::Xref { building, metric },
          CacheKey::Pxref { building, metric },
        ]
      })
    })
  }

  pub fn kind(&self) -> ResourceKind {
    match self {
      CacheKey::Live { .. } => ResourceKind::Live,
      CacheKey::Hist { .. } => ResourceKind::Hist,
      CacheKey::Xref { .. } => ResourceKind::Xref,
      CacheKey::Pxref { .. } => ResourceKind::Pxref,
    }
  }

  pub fn building(&self) -> Building {
    match *self {
      CacheKey::Live { building, .. }
      | CacheKey::Hist { building, .. }
      | CacheKey::Xref { building, .. }
      | CacheKey::Pxref { building, .. } => building,
    }
  }

  pub fn metric(&self) -> Metric {
    match *self {
      CacheKey::Live { metric, .. }
      | CacheKey::Hist { metric, .. }
      | CacheKey::Xref { metric, .. }
      | CacheKey::Pxref { metric, .. } => metric,
    }
  }

  pub fn point(&self) -> Option<PointId> {
    match *self {
      CacheKey::Hist { point, .. } => Some(point),
      _ => None,
    }
  }

  /// The parameters this key is requested with.
  pub fn parameters(&self) -> Parameters {
    Parameters {
      building: self.building().code().to_string(),
      sensor: self.metric().code().to_string(),
      id: self.point(),
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}/{}", self.kind(), self.building(), self.metric())?;
    if let Some(point) = self.point() {
      write!(f, "/{}", point)?;
    }
    Ok(())
  }
}
