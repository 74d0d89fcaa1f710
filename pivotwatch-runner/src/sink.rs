//! Signal sinks: an append-only JSONL file and an in-memory collector.

use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use pivotwatch_core::domain::Signal;

use crate::provider::{SignalSink, SinkError};

/// One JSON signal per line. Partial writes only ever cost the last line.
#[derive(Debug, Clone)]
pub struct JsonlSignalSink {
    path: PathBuf,
}

impl JsonlSignalSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every signal in the file, skipping lines that do not parse.
    pub fn read_all(&self) -> io::Result<Vec<Signal>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut signals = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(signal) = serde_json::from_str::<Signal>(&line) {
                signals.push(signal);
            }
        }
        Ok(signals)
    }
}

#[async_trait]
impl SignalSink for JsonlSignalSink {
    async fn publish(&self, signal: &Signal) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_string(signal).map_err(|e| SinkError::Failed(e.to_string()))?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %self.path.display(), "signal appended");
        Ok(())
    }
}

/// Collects signals in memory. Used by replays and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    signals: Mutex<Vec<Signal>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.signals.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SignalSink for MemorySink {
    async fn publish(&self, signal: &Signal) -> Result<(), SinkError> {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(signal.clone());
        Ok(())
    }
}
