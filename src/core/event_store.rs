//! Append-only event store with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL), one file per run at
//! `<runs_root>/<run_id>/events.jsonl`. The orchestrator is the only writer;
//! any number of observers read through [`RunsRoot`] using byte cursors.
//!
//! Readers never lock. They only consume bytes up to the last newline they
//! can see, so a line that is still being written is picked up by the next
//! tail call instead of being split across two.

use std::collections::{HashMap, HashSet};
use std::io::{SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::domain::{Artifact, ArtifactKind, RunEvent, RunSummary, ValidationError};

/// File name of the per-run log
pub const EVENTS_FILE: &str = "events.jsonl";

/// Directory name for per-run artifacts
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Errors raised by the event log
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid event: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid run id: {0:?}")]
    InvalidRunId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of a cursor-based tail read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailRead {
    /// Events from complete lines in `[cursor, returned cursor)`
    pub events: Vec<RunEvent>,

    /// Next cursor; always on a line boundary
    pub cursor: u64,

    /// True when the file shrank below the caller's cursor
    pub reset: bool,
}

/// Writer side of a single run's log plus its artifacts directory
pub struct EventStore {
    /// Run this store belongs to
    run_id: String,

    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Path to artifacts directory
    artifacts_dir: PathBuf,

    /// Base that artifact paths in events are made relative to
    project_root: PathBuf,

    /// Ids already present in the log
    seen_ids: Mutex<HashSet<String>>,

    /// Artifact name -> digest of the last content written
    digests: Mutex<HashMap<String, String>>,
}

impl EventStore {
    /// Create or open the event store for a run under `runs_root`
    pub async fn open(runs_root: &Path, run_id: &str) -> Result<Self, LogError> {
        validate_run_id(run_id)?;

        let run_dir = runs_root.join(run_id);
        let artifacts_dir = run_dir.join(ARTIFACTS_DIR);
        fs::create_dir_all(&artifacts_dir).await?;

        let project_root = runs_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| runs_root.to_path_buf());

        let store = Self {
            run_id: run_id.to_string(),
            events_path: run_dir.join(EVENTS_FILE),
            run_dir,
            artifacts_dir,
            project_root,
            seen_ids: Mutex::new(HashSet::new()),
            digests: Mutex::new(HashMap::new()),
        };

        // Reopening an existing run keeps id uniqueness across sessions
        let existing = store.read_all().await?;
        lock(&store.seen_ids).extend(existing.into_iter().map(|e| e.id));

        Ok(store)
    }

    /// The run this store writes to
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Get the run directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Get the artifacts directory
    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Append an event to the log.
    ///
    /// The event is validated first; on failure nothing is written. On
    /// success exactly one newline-terminated line is written with a single
    /// write call under an exclusive lock.
    pub async fn append(&self, event: &RunEvent) -> Result<(), LogError> {
        event.validate()?;

        if event.run_id != self.run_id {
            return Err(ValidationError::RunMismatch {
                expected: self.run_id.clone(),
                found: event.run_id.clone(),
            }
            .into());
        }

        if lock(&self.seen_ids).contains(&event.id) {
            return Err(ValidationError::DuplicateId(event.id.clone()).into());
        }

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let path = self.events_path.clone();
        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .map_err(std::io::Error::other)??;

        lock(&self.seen_ids).insert(event.id.clone());
        debug!(run_id = %self.run_id, event_type = event.event_type().as_str(), "event appended");

        Ok(())
    }

    /// Replay all parseable events in file order
    pub async fn read_all(&self) -> Result<Vec<RunEvent>, LogError> {
        read_events(&self.events_path).await
    }

    /// Read complete events after `cursor`
    pub async fn tail(&self, cursor: u64) -> Result<TailRead, LogError> {
        tail_file(&self.events_path, cursor).await
    }

    /// Store an artifact atomically.
    ///
    /// Writing the same name with identical content again leaves the file
    /// untouched and reports `changed: false`.
    pub async fn store_artifact(
        &self,
        kind: ArtifactKind,
        name: &str,
        content: &[u8],
    ) -> Result<Artifact> {
        let path = self.artifacts_dir.join(name);
        let digest = content_digest(content);

        let unchanged = lock(&self.digests).get(name) == Some(&digest) && path.exists();
        if unchanged {
            debug!(artifact = name, "artifact unchanged, skipping write");
            return Ok(Artifact {
                kind,
                name: name.to_string(),
                path,
                digest,
                changed: false,
            });
        }

        let dir = self.artifacts_dir.clone();
        let target = path.clone();
        let bytes = content.to_vec();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)
                .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
            tmp.write_all(&bytes).context("Failed to write artifact")?;
            tmp.persist(&target)
                .with_context(|| format!("Failed to persist artifact: {}", target.display()))?;
            Ok(())
        })
        .await
        .context("Artifact writer task failed")??;

        lock(&self.digests).insert(name.to_string(), digest.clone());

        Ok(Artifact {
            kind,
            name: name.to_string(),
            path,
            digest,
            changed: true,
        })
    }

    /// Path of an artifact as recorded in events (relative to the project)
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.project_root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }
}

/// Read-only view over every run under a runs directory
#[derive(Debug, Clone)]
pub struct RunsRoot {
    root: PathBuf,
}

impl RunsRoot {
    /// Observe runs under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Observe `<project>/runs`
    pub fn for_project(project: &Path) -> Self {
        Self::new(project.join("runs"))
    }

    /// The runs directory
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Log path of a run
    pub fn events_path(&self, run_id: &str) -> Result<PathBuf, LogError> {
        validate_run_id(run_id)?;
        Ok(self.root.join(run_id).join(EVENTS_FILE))
    }

    /// List run ids (directories under the root), sorted
    pub async fn list_runs(&self) -> Result<Vec<String>, LogError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    runs.push(name.to_string());
                }
            }
        }

        runs.sort();
        Ok(runs)
    }

    /// Replay a run's log
    pub async fn read_events(&self, run_id: &str) -> Result<Vec<RunEvent>, LogError> {
        read_events(&self.events_path(run_id)?).await
    }

    /// Tail a run's log from `cursor`
    pub async fn tail(&self, run_id: &str, cursor: u64) -> Result<TailRead, LogError> {
        tail_file(&self.events_path(run_id)?, cursor).await
    }

    /// Cheap change detector over all runs' logs.
    ///
    /// Sorted `runId:size:mtimeMs` tuples joined with `|`. Equal strings mean
    /// no log was created, removed, resized or touched.
    pub async fn fingerprint(&self) -> Result<String, LogError> {
        let mut parts = Vec::new();

        for run_id in self.list_runs().await? {
            let path = self.root.join(&run_id).join(EVENTS_FILE);
            let metadata = match fs::metadata(&path).await {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let mtime_ms = metadata
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            parts.push(format!("{}:{}:{}", run_id, metadata.len(), mtime_ms));
        }

        parts.sort();
        Ok(parts.join("|"))
    }

    /// Summaries of every run with at least one event, newest first
    pub async fn summaries(&self) -> Result<Vec<RunSummary>, LogError> {
        let mut summaries = Vec::new();

        for run_id in self.list_runs().await? {
            let events = self.read_events(&run_id).await?;
            if let Some(summary) = RunSummary::from_events(&run_id, &events) {
                summaries.push(summary);
            }
        }

        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }
}

/// Read every parseable event of a log file; a missing file is empty
pub async fn read_events(path: &Path) -> Result<Vec<RunEvent>, LogError> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(parse_lines(&bytes))
}

/// Read complete lines in `[cursor, size)` of a log file
pub async fn tail_file(path: &Path, cursor: u64) -> Result<TailRead, LogError> {
    let size = match fs::metadata(path).await {
        Ok(m) => m.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(TailRead {
                events: Vec::new(),
                cursor: 0,
                reset: cursor > 0,
            });
        }
        Err(e) => return Err(e.into()),
    };

    let (start, reset) = if cursor > size {
        (0, true)
    } else {
        (cursor, false)
    };

    if start == size {
        return Ok(TailRead {
            events: Vec::new(),
            cursor: size,
            reset,
        });
    }

    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::with_capacity((size - start) as usize);
    file.take(size - start).read_to_end(&mut buf).await?;

    // Bytes after the last newline belong to a line still being written
    let consumable = buf
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);

    if reset {
        warn!(path = %path.display(), cursor, size, "log shrank below cursor, resetting");
    }

    Ok(TailRead {
        events: parse_lines(&buf[..consumable]),
        cursor: start + consumable as u64,
        reset,
    })
}

/// Parse JSONL bytes leniently, skipping blank and malformed lines
fn parse_lines(bytes: &[u8]) -> Vec<RunEvent> {
    bytes
        .split(|b| *b == b'\n')
        .filter_map(|raw| {
            let line = match std::str::from_utf8(raw) {
                Ok(line) => line.trim(),
                Err(e) => {
                    debug!(error = %e, "skipping log line with invalid UTF-8");
                    return None;
                }
            };
            if line.is_empty() {
                return None;
            }
            match serde_json::from_str::<RunEvent>(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    debug!(error = %e, "skipping unparseable log line");
                    None
                }
            }
        })
        .collect()
}

/// Write one line with a single write call under an exclusive lock
fn append_line(path: &Path, line: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    file.lock_exclusive()?;
    let result = file.write_all(line).and_then(|_| file.flush());
    // Lock is released when file is dropped
    result
}

/// Run ids become directory names
fn validate_run_id(run_id: &str) -> Result<(), LogError> {
    let bad = run_id.is_empty()
        || run_id == "."
        || run_id == ".."
        || run_id.contains(['/', '\\'])
        || run_id.contains('\0');
    if bad {
        return Err(LogError::InvalidRunId(run_id.to_string()));
    }
    Ok(())
}

/// Hex SHA-256 of artifact content
pub fn content_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
