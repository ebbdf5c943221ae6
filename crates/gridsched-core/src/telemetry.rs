//! Optimizer decision stream.
//!
//! Publishing is fire-and-forget: a failing sink logs and drops the event,
//! it never fails the optimizer pass.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::optimizer::OptimizerDecision;

pub trait TelemetrySink: Send + Sync {
    fn publish(&self, decision: &OptimizerDecision);
}

/// Drops every event (telemetry disabled).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn publish(&self, _decision: &OptimizerDecision) {}
}

/// Appends one JSON object per decision to a file.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open `path` for appending (creates parent dir if needed).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open telemetry file: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, decision: &OptimizerDecision) -> Result<()> {
        let mut line = serde_json::to_vec(decision).context("serialize decision")?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(&line)?;
        Ok(())
    }
}

impl TelemetrySink for JsonLinesSink {
    fn publish(&self, decision: &OptimizerDecision) {
        if let Err(e) = self.write_line(decision) {
            tracing::warn!(
                path = %self.path.display(),
                link = %decision.link,
                "dropping optimizer event: {:#}",
                e
            );
        }
    }
}
