//! File-backed reference hooks: newline-delimited JSON in and out.
//!
//! A record's absolute position is its zero-based line number, so a
//! file read in a later run yields the same positions and checkpoint
//! ranges keep applying. Blank lines keep their position but are never
//! emitted.

use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use tidemark_types::blob::{Blob, Location};
use tidemark_types::checkpoint::ProcessedRange;
use tidemark_types::error::DeliveryError;

use super::{next_contiguous_page, SinkHook, SourceHook};

const DEFAULT_PAGE_SIZE: usize = 500;

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
struct JsonlSourceConfig {
    path: PathBuf,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

/// Reads newline-delimited JSON from a file, one record per line.
pub struct JsonlSource {
    location: Location,
    path: PathBuf,
    page_size: usize,
    pending: Option<VecDeque<(i64, serde_json::Value)>>,
}

impl JsonlSource {
    /// Build from a `{ "path": ..., "page_size": ... }` config block.
    ///
    /// # Errors
    ///
    /// Returns an error if the config block does not match the expected
    /// shape.
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: JsonlSourceConfig =
            serde_json::from_value(config.clone()).context("invalid jsonl source config")?;
        Ok(Self::new(config.path, config.page_size))
    }

    #[must_use]
    pub fn new(path: impl Into<PathBuf>, page_size: usize) -> Self {
        let path = path.into();
        let location = Location::new(path.to_string_lossy().into_owned());
        Self {
            location,
            path,
            page_size: page_size.max(1),
            pending: None,
        }
    }
}

#[async_trait]
impl SourceHook for JsonlSource {
    fn location(&self) -> &Location {
        &self.location
    }

    async fn check(&self) -> Result<()> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("jsonl source not readable: {}", self.path.display()))?;
        if !meta.is_file() {
            anyhow::bail!("jsonl source is not a file: {}", self.path.display());
        }
        Ok(())
    }

    async fn open(&mut self, excluded: &[ProcessedRange]) -> Result<()> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading jsonl source {}", self.path.display()))?;

        let mut pending = VecDeque::new();
        for (line_no, line) in content.lines().enumerate() {
            let position = line_no as i64;
            if line.trim().is_empty() {
                continue;
            }
            if excluded.iter().any(|range| range.contains(position)) {
                continue;
            }
            let event: serde_json::Value = serde_json::from_str(line).with_context(|| {
                format!("invalid JSON on line {} of {}", line_no + 1, self.path.display())
            })?;
            pending.push_back((position, event));
        }

        tracing::debug!(
            location = self.location.as_str(),
            pending = pending.len(),
            "Opened jsonl source"
        );
        self.pending = Some(pending);
        Ok(())
    }

    async fn next_blob(&mut self) -> Result<Option<Blob>> {
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| anyhow!("jsonl source was not opened"))?;
        Ok(next_contiguous_page(pending, self.page_size)
            .map(|(start, events)| Blob::new(self.location.clone(), events).at_position(start)))
    }
}

#[derive(Debug, Deserialize)]
struct JsonlSinkConfig {
    path: PathBuf,
}

/// Appends delivered events to a file, one JSON document per line.
///
/// Appending is all-or-nothing per blob, so failures are always
/// transport-wide rather than per-record.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Build from a `{ "path": ... }` config block.
    ///
    /// # Errors
    ///
    /// Returns an error if the config block does not match the expected
    /// shape.
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: JsonlSinkConfig =
            serde_json::from_value(config.clone()).context("invalid jsonl sink config")?;
        Ok(Self::new(config.path))
    }

    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SinkHook for JsonlSink {
    async fn check(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::metadata(parent)
                .await
                .with_context(|| format!("jsonl sink directory missing: {}", parent.display()))?;
        }
        Ok(())
    }

    async fn send(&mut self, blob: &mut Blob) -> Result<(), DeliveryError> {
        let mut lines = String::new();
        for event in blob.events() {
            match serde_json::to_string(event) {
                Ok(line) => {
                    lines.push_str(&line);
                    lines.push('\n');
                }
                Err(e) => {
                    return Err(DeliveryError::invalid_payload(format!(
                        "unserializable event: {e}"
                    )))
                }
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| DeliveryError::unknown(format!("open {}: {e}", self.path.display())))?;
        file.write_all(lines.as_bytes())
            .await
            .map_err(|e| DeliveryError::unknown(format!("append {}: {e}", self.path.display())))?;

        blob.push_report(json!({
            "appended": blob.num_rows(),
            "path": self.path.display().to_string(),
        }));
        Ok(())
    }
}
