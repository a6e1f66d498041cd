use chrono::{Duration, Local};
use clap::{Args, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use comfort::cache::{
  CacheStore, DataCache, Entry, NoopStorage, SnapshotStorage, SqliteStorage, SNAPSHOT_SLOT,
};
use comfort::config::{Config, LogConfig};
use comfort::event::{Event, EventHandler};
use comfort::sensors::{
  Building, CacheKey, Metric, Parameters, Payload, PointId, ResourceKind, SensorClient,
};

type Cache = DataCache<SensorClient, Arc<dyn SnapshotStorage>>;

#[derive(Parser, Debug)]
#[command(name = "comfort")]
#[command(about = "Cached client for campus building comfort sensor data")]
#[command(version)]
struct Cli {
  /// Path to config file (default: $XDG_CONFIG_HOME/comfort/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a resource unless a fresh copy is cached, then print its entry
  Fetch {
    #[command(flatten)]
    target: Target,

    /// Reuse cached data younger than this many seconds
    #[arg(long)]
    max_age: Option<u64>,
  },

  /// Print the cached entry for a resource without touching the network
  Show {
    #[command(flatten)]
    target: Target,
  },

  /// Keep a resource fresh and print every change to it
  Watch {
    #[command(flatten)]
    target: Target,

    /// Seconds between refreshes
    #[arg(long, default_value_t = 30)]
    interval: u64,
  },

  /// List known buildings and sensors
  Buildings,

  /// Show where the cache is persisted and what it holds
  Status,

  /// Forget every cached entry
  Clear,
}

#[derive(Args, Debug)]
struct Target {
  /// Endpoint: live, hist, XREF or PXREF
  kind: ResourceKind,

  /// Building code, e.g. WATT
  #[arg(short, long)]
  building: String,

  /// Sensor: TEMP or HUMIDITY
  #[arg(short, long)]
  sensor: String,

  /// Point id, required for hist
  #[arg(long)]
  id: Option<PointId>,
}

impl Target {
  fn parameters(&self) -> Parameters {
    Parameters {
      building: self.building.clone(),
      sensor: self.sensor.clone(),
      id: self.id,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let cli = Cli::parse();
  let config = Config::load(cli.config.as_deref())?;
  let _log_guard = init_logging(&config.log)?;

  match cli.command {
    Command::Fetch { target, max_age } => {
      let cache = open_cache(&config)?;
      let max_age = seconds(max_age.unwrap_or(config.cache.max_age_secs))?;
      let parameters = target.parameters();

      cache.ensure_data(target.kind, &parameters, max_age).await?;

      let entry = cache.read_data(target.kind, &parameters)?;
      print_entry(&entry)?;
      if let Some(error) = entry.error() {
        return Err(eyre!("{}", error));
      }
    }

    Command::Show { target } => {
      let store = CacheStore::hydrate(open_storage(&config)?);
      let key = CacheKey::resolve(target.kind, &target.parameters())?;
      print_entry(&store.read(&key))?;
    }

    Command::Watch { target, interval } => {
      let cache = open_cache(&config)?;
      let key = CacheKey::resolve(target.kind, &target.parameters())?;
      watch(cache, key, interval).await?;
    }

    Command::Buildings => {
      for building in Building::ALL {
        println!("{:<8} {}", building.code(), building.display_name());
      }
      let metrics: Vec<&str> = Metric::ALL.iter().map(|m| m.code()).collect();
      println!("\nSensors: {}", metrics.join(", "));
    }

    Command::Status => status(&config)?,

    Command::Clear => {
      let store = CacheStore::hydrate(open_storage(&config)?);
      store.reset();
      println!("Cache cleared");
    }
  }

  Ok(())
}

fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.filter))
    .map_err(|e| eyre!("Invalid log filter {:?}: {}", config.filter, e))?;
  let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

  match &config.file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path {}", path.display()))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      subscriber.with_writer(writer).with_ansi(false).init();
      Ok(Some(guard))
    }
    None => {
      subscriber.with_writer(std::io::stderr).init();
      Ok(None)
    }
  }
}

fn open_storage(config: &Config) -> Result<Arc<dyn SnapshotStorage>> {
  if !config.cache.persist {
    return Ok(Arc::new(NoopStorage));
  }
  Ok(Arc::new(open_sqlite(config)?))
}

fn open_sqlite(config: &Config) -> Result<SqliteStorage> {
  let storage = match &config.cache.path {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };
  Ok(storage)
}

fn open_cache(config: &Config) -> Result<Cache> {
  let store = CacheStore::hydrate(open_storage(config)?);
  let client = SensorClient::new(config)?;
  let fetch_timeout = std::time::Duration::from_secs(config.cache.fetch_timeout_secs);

  Ok(DataCache::new(store, client).with_fetch_timeout(fetch_timeout))
}

fn seconds(secs: u64) -> Result<Duration> {
  i64::try_from(secs)
    .ok()
    .and_then(Duration::try_seconds)
    .ok_or_else(|| eyre!("Duration of {} seconds is out of range", secs))
}

async fn watch(cache: Cache, key: CacheKey, interval: u64) -> Result<()> {
  let mut events = EventHandler::new(std::time::Duration::from_secs(interval), cache.subscribe());
  info!(%key, interval, "Watching");

  loop {
    let event = tokio::select! {
      event = events.next() => event,
      _ = tokio::signal::ctrl_c() => None,
    };

    match event {
      Some(Event::Tick) => {
        let cache = cache.clone();
        tokio::spawn(async move { cache.refresh(key).await });
      }
      Some(Event::Changed(changed)) if changed == key => {
        let entry = cache.store().read(&key);
        println!("{} {}", Local::now().format("%H:%M:%S"), describe(&key, &entry));
      }
      Some(Event::Changed(_)) => {}
      None => return Ok(()),
    }
  }
}

fn status(config: &Config) -> Result<()> {
  if !config.cache.persist {
    println!("Persistence disabled");
    return Ok(());
  }

  let store = CacheStore::hydrate(open_sqlite(config)?);
  if let Some(path) = store.storage().path() {
    println!("Snapshot: {}", path.display());
  }
  match store.storage().saved_at(SNAPSHOT_SLOT)? {
    Some(saved_at) => println!("Last saved: {}", saved_at.with_timezone(&Local)),
    None => println!("Last saved: never"),
  }

  let snapshot = store.snapshot();
  let entries: Vec<Entry> = snapshot.keys().map(|key| store.read(&key)).collect();
  let loaded = entries.iter().filter(|e| e.is_loaded()).count();
  let failed = entries.iter().filter(|e| e.error().is_some()).count();
  println!("Entries: {} ({} loaded, {} failed)", entries.len(), loaded, failed);

  Ok(())
}

fn describe(key: &CacheKey, entry: &Entry) -> String {
  match entry {
    Entry::Unloaded { loading: true, .. } => format!("{}: loading", key),
    Entry::Unloaded {
      error: Some(error), ..
    } => format!("{}: error: {}", key, error),
    Entry::Unloaded { .. } => format!("{}: not loaded", key),
    Entry::Loaded { data, .. } => {
      let mut line = format!("{}: {} records", key, data.record_count());
      if let Payload::Live(readings) = data {
        for reading in readings {
          line.push_str(&format!("\n  {:<12} {:>6.1}", reading.alias, reading.actual_value));
        }
      }
      line
    }
  }
}

fn print_entry(entry: &Entry) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(entry)?);
  Ok(())
}
