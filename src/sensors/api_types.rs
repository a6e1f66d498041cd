//! Serde types matching the data API's wire format.

use serde::{Deserialize, Deserializer};

use super::keys::PointId;

// ============================================================================
// Response envelope
// ============================================================================

/// Every data API response is wrapped in this envelope, whatever the HTTP status.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiResponse<T> {
  Ok { data: T },
  Err { error_message: String },
}

impl<T> ApiResponse<T> {
  /// Unwrap the envelope, yielding the API's error message on failure.
  pub fn into_result(self) -> Result<T, String> {
    match self {
      ApiResponse::Ok { data } => Ok(data),
      ApiResponse::Err { error_message } => Err(error_message),
    }
  }
}

// ============================================================================
// Field helpers
// ============================================================================

/// Point ids come back as numbers from some tables and as numeric strings
/// from others.
pub fn deserialize_point_id<'de, D>(deserializer: D) -> Result<PointId, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum NumberOrString {
    Number(PointId),
    String(String),
  }

  match NumberOrString::deserialize(deserializer)? {
    NumberOrString::Number(n) => Ok(n),
    NumberOrString::String(s) => s
      .trim()
      .parse()
      .map_err(|_| serde::de::Error::custom(format!("invalid point id {:?}", s))),
  }
}
