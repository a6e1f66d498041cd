use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

use crate::cache::Fetcher;
use crate::config::Config;
use crate::error::FetchError;
use crate::sensors::api_types::ApiResponse;
use crate::sensors::{CacheKey, Payload};

/// Client for the building data API (`/api/data/<endpoint>`).
#[derive(Clone)]
pub struct SensorClient {
  http: reqwest::Client,
  base_url: Url,
}

impl SensorClient {
  pub fn new(config: &Config) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Self::with_client(http, &config.api.base_url)
  }

  fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self> {
    let mut base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API base URL {}: {}", base_url, e))?;

    // Endpoint paths are joined relative to the base
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    Ok(Self { http, base_url })
  }

  /// URL requesting the resource `key` addresses.
  pub fn endpoint_url(&self, key: &CacheKey) -> Result<Url, url::ParseError> {
    let mut url = self
      .base_url
      .join(&format!("api/data/{}", key.kind().as_str()))?;

    let parameters = key.parameters();
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("building", &parameters.building);
      query.append_pair("sensor", &parameters.sensor);
      if let Some(id) = parameters.id {
        query.append_pair("id", &id.to_string());
      }
    }

    Ok(url)
  }

  /// Fetch the resource `key` addresses.
  pub async fn get(&self, key: CacheKey) -> Result<Payload, FetchError> {
    let url = self.endpoint_url(&key)?;
    debug!(%url, "Requesting sensor data");

    let response = self.http.get(url).send().await?;
    let status = response.status();
    let body = response.bytes().await?;

    let data = match serde_json::from_slice::<ApiResponse<serde_json::Value>>(&body) {
      Ok(envelope) => envelope.into_result().map_err(FetchError::Api)?,
      Err(_) if !status.is_success() => return Err(FetchError::Status(status)),
      Err(e) => return Err(FetchError::Decode(e)),
    };

    Ok(Payload::decode(key.kind(), data)?)
  }
}

impl Fetcher for SensorClient {
  fn fetch(&self, key: CacheKey) -> BoxFuture<'_, Result<Payload, FetchError>> {
    self.get(key).boxed()
  }
}
