//! Follow a run's log as it grows.
//!
//! Wakes on debounced filesystem notifications for the run directory (with a
//! slow poll as a backstop) and forwards each non-empty or reset tail delta.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::event_store::{tail_file, TailRead};

/// Follower settings
#[derive(Debug, Clone)]
pub struct FollowConfig {
    /// Debounce window for change notifications
    pub debounce: Duration,

    /// Re-read interval when no notification arrives
    pub poll_interval: Duration,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Streams tail deltas of one log file
pub struct RunFollower {
    events_path: PathBuf,
    config: FollowConfig,
}

impl RunFollower {
    pub fn new(events_path: impl Into<PathBuf>) -> Self {
        Self {
            events_path: events_path.into(),
            config: FollowConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FollowConfig) -> Self {
        self.config = config;
        self
    }

    /// Start following from `cursor`.
    ///
    /// The first delta is read immediately. Runs until the handle is stopped
    /// or the receiver is dropped.
    pub fn follow(&self, cursor: u64) -> (mpsc::Receiver<TailRead>, FollowHandle) {
        let (delta_tx, delta_rx) = mpsc::channel::<TailRead>(64);
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);

        let events_path = self.events_path.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = run_follower(events_path, config, cursor, delta_tx, stop_rx).await {
                tracing::error!("Follower error: {:#}", e);
            }
        });

        (delta_rx, FollowHandle { stop_tx, task })
    }
}

/// Handle to stop a follower
pub struct FollowHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl FollowHandle {
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

async fn run_follower(
    events_path: PathBuf,
    config: FollowConfig,
    mut cursor: u64,
    delta_tx: mpsc::Sender<TailRead>,
    mut stop_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<DebounceEventResult>();

    let mut debouncer = new_debouncer(config.debounce, move |result: DebounceEventResult| {
        let _ = notify_tx.send(result);
    })?;

    // The run directory may not exist yet; polling still picks it up
    let watched = events_path.parent().map(PathBuf::from);
    match &watched {
        Some(dir) if dir.is_dir() => {
            debouncer.watcher().watch(dir, RecursiveMode::NonRecursive)?;
            info!("Following {}", events_path.display());
        }
        _ => warn!("{} not found, polling only", events_path.display()),
    }

    let mut poll = tokio::time::interval(config.poll_interval);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                debug!("Follower stopping");
                break;
            }
            notification = notify_rx.recv() => {
                match notification {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!("Watch error: {:?}", e),
                    None => break,
                }
            }
            _ = poll.tick() => {}
        }

        let delta = tail_file(&events_path, cursor).await?;
        cursor = delta.cursor;

        if delta.events.is_empty() && !delta.reset {
            continue;
        }

        if delta.reset {
            debug!(cursor, "Log shrank, resetting");
        }

        if delta_tx.send(delta).await.is_err() {
            break;
        }
    }

    Ok(())
}
