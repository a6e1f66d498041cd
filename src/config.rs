use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Root of the site serving `/api/data/<endpoint>`
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Per-request HTTP timeout
  #[serde(default = "default_request_timeout")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      timeout_secs: default_request_timeout(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Entries younger than this are served without a request
  #[serde(default = "default_max_age")]
  pub max_age_secs: u64,
  /// Upper bound on a single fetch, after which the entry records a timeout
  #[serde(default = "default_fetch_timeout")]
  pub fetch_timeout_secs: u64,
  /// Persist the cache between runs
  #[serde(default = "default_true")]
  pub persist: bool,
  /// Snapshot database location (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_age_secs: default_max_age(),
      fetch_timeout_secs: default_fetch_timeout(),
      persist: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// `tracing_subscriber::EnvFilter` directive, overridden by RUST_LOG
  #[serde(default = "default_log_filter")]
  pub filter: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: default_log_filter(),
      file: None,
    }
  }
}

fn default_base_url() -> String {
  "http://localhost:3000".to_string()
}

fn default_request_timeout() -> u64 {
  10
}

fn default_max_age() -> u64 {
  60
}

fn default_fetch_timeout() -> u64 {
  30
}

fn default_true() -> bool {
  true
}

fn default_log_filter() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./comfort.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/comfort/config.yaml
  ///
  /// Without any file the defaults apply. `COMFORT_API_URL` overrides the
  /// API base URL either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var("COMFORT_API_URL") {
      config.api.base_url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("comfort.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("comfort").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }
}
