use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::sensors::CacheKey;

/// Events driving a refresh loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// A cache entry was written
  Changed(CacheKey),
  /// Periodic tick for refreshing data
  Tick,
}

/// Event handler that merges cache change notifications with a tick timer
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate.
  ///
  /// The first tick fires immediately.
  pub fn new(tick_rate: Duration, mut changes: broadcast::Receiver<CacheKey>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut ticks = tokio::time::interval(tick_rate);
      loop {
        let event = tokio::select! {
          changed = changes.recv() => match changed {
            Ok(key) => Event::Changed(key),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
              warn!(missed, "Dropped cache change notifications");
              continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
          },
          _ = ticks.tick() => Event::Tick,
        };

        if tx.send(event).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
