//! Diagnostic checkpoints.
//!
//! Every strategy attempt and condition evaluation is recorded whether it
//! passes or not, so a failed run can be inspected without replaying it.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub const CHECKPOINT_FILE: &str = "debug_checkpoints.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub ts: DateTime<Utc>,
    pub step_index: usize,
    pub step_type: String,
    pub checkpoint: String,
    pub data: Value,
}

/// Append-only destination for checkpoints.
pub trait CheckpointSink: Send + Sync {
    fn record(&self, checkpoint: Checkpoint);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCheckpointSink;

impl CheckpointSink for NullCheckpointSink {
    fn record(&self, _checkpoint: Checkpoint) {}
}

/// Keeps checkpoints in memory.
#[derive(Debug, Default)]
pub struct MemoryCheckpointSink {
    entries: Mutex<Vec<Checkpoint>>,
}

impl MemoryCheckpointSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Checkpoint> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Names of recorded checkpoints, in order.
    pub fn names(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|c| c.checkpoint)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.entries()
            .iter()
            .filter(|c| c.checkpoint == name)
            .count()
    }
}

impl CheckpointSink for MemoryCheckpointSink {
    fn record(&self, checkpoint: Checkpoint) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(checkpoint);
        }
    }
}

/// Appends one JSON object per line to `debug_checkpoints.jsonl`.
///
/// Write failures are logged and otherwise ignored; diagnostics never fail
/// a step.
pub struct JsonlCheckpointSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlCheckpointSink {
    pub fn in_dir(work_dir: &Path) -> Self {
        Self::at(work_dir.join(CHECKPOINT_FILE))
    }

    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "checkpoint writer poisoned"))?;
        if guard.is_none() {
            *guard = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?,
            );
        }
        match guard.as_mut() {
            Some(file) => writeln!(file, "{line}"),
            None => Ok(()),
        }
    }
}

impl CheckpointSink for JsonlCheckpointSink {
    fn record(&self, checkpoint: Checkpoint) {
        let line = match serde_json::to_string(&checkpoint) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to serialise checkpoint");
                return;
            }
        };
        if let Err(err) = self.append(&line) {
            warn!(path = %self.path.display(), error = %err, "failed to write checkpoint");
        }
    }
}

/// Sink bound to one step.
#[derive(Clone)]
pub struct StepCheckpoints {
    sink: Arc<dyn CheckpointSink>,
    step_index: usize,
    step_type: String,
}

impl StepCheckpoints {
    pub fn new(sink: Arc<dyn CheckpointSink>, step_index: usize, step_type: impl Into<String>) -> Self {
        Self {
            sink,
            step_index,
            step_type: step_type.into(),
        }
    }

    /// Not bound to any run, for standalone transactions.
    pub fn detached() -> Self {
        Self::new(Arc::new(NullCheckpointSink), 0, "")
    }

    pub fn emit(&self, checkpoint: &str, data: Value) {
        self.sink.record(Checkpoint {
            ts: Utc::now(),
            step_index: self.step_index,
            step_type: self.step_type.clone(),
            checkpoint: checkpoint.to_string(),
            data,
        });
    }
}
