//! In-memory hooks for tests and local experiments.
//!
//! The source serves a fixed event list; the sink records deliveries
//! into a shared log and can be scripted to reject specific positions
//! or to fail whole send attempts. Cloning either hook is cheap and a
//! sink clone shares the original's delivery log, which is how tests
//! observe deliveries after the sink is boxed into the engine.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use tidemark_types::blob::{Blob, Location};
use tidemark_types::checkpoint::ProcessedRange;
use tidemark_types::error::{DeliveryError, ErrorCode};

use super::{next_contiguous_page, SinkHook, SourceHook};

const DEFAULT_PAGE_SIZE: usize = 100;

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_location() -> String {
    "memory".to_string()
}

fn default_reject_code() -> i64 {
    ErrorCode::SinkRejected.as_i64()
}

fn default_fail_code() -> i64 {
    ErrorCode::TransientNetwork.as_i64()
}

/// Missing or null config blocks mean "all defaults".
fn config_or_empty(config: &serde_json::Value) -> serde_json::Value {
    if config.is_null() {
        json!({})
    } else {
        config.clone()
    }
}

#[derive(Debug, Deserialize)]
struct MemorySourceConfig {
    #[serde(default = "default_location")]
    location: String,
    #[serde(default)]
    position: i64,
    #[serde(default = "default_page_size")]
    page_size: usize,
    #[serde(default)]
    events: Vec<serde_json::Value>,
}

/// Serves a fixed list of events. The first event sits at `position`;
/// each later event occupies the next absolute position.
#[derive(Clone)]
pub struct MemorySource {
    location: Location,
    base_position: i64,
    page_size: usize,
    events: Vec<serde_json::Value>,
    pending: Option<VecDeque<(i64, serde_json::Value)>>,
}

impl MemorySource {
    /// # Errors
    ///
    /// Returns an error if the config block does not match the expected
    /// shape.
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: MemorySourceConfig = serde_json::from_value(config_or_empty(config))
            .context("invalid memory source config")?;
        Ok(Self::new(config.location, config.position, config.events)
            .with_page_size(config.page_size))
    }

    #[must_use]
    pub fn new(
        location: impl Into<Location>,
        position: i64,
        events: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            location: location.into(),
            base_position: position,
            page_size: DEFAULT_PAGE_SIZE,
            events,
            pending: None,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl SourceHook for MemorySource {
    fn location(&self) -> &Location {
        &self.location
    }

    async fn open(&mut self, excluded: &[ProcessedRange]) -> Result<()> {
        let pending = self
            .events
            .iter()
            .enumerate()
            .map(|(index, event)| (self.base_position + index as i64, event.clone()))
            .filter(|(position, _)| !excluded.iter().any(|range| range.contains(*position)))
            .collect();
        self.pending = Some(pending);
        Ok(())
    }

    async fn next_blob(&mut self) -> Result<Option<Blob>> {
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| anyhow!("memory source was not opened"))?;
        Ok(next_contiguous_page(pending, self.page_size)
            .map(|(start, events)| Blob::new(self.location.clone(), events).at_position(start)))
    }
}

#[derive(Debug, Deserialize)]
struct MemorySinkConfig {
    #[serde(default)]
    reject_positions: Vec<i64>,
    #[serde(default = "default_reject_code")]
    reject_code: i64,
    #[serde(default)]
    fail_sends: usize,
    #[serde(default = "default_fail_code")]
    fail_code: i64,
}

/// One delivered event: location, absolute position, payload.
pub type Delivery = (Location, i64, serde_json::Value);

/// Records deliveries in memory. Rejections and transport failures are
/// scripted up front.
#[derive(Clone)]
pub struct MemorySink {
    log: Arc<Mutex<Vec<Delivery>>>,
    reject_positions: HashSet<i64>,
    reject_code: ErrorCode,
    fail_sends: usize,
    fail_code: ErrorCode,
    sends: usize,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            reject_positions: HashSet::new(),
            reject_code: ErrorCode::SinkRejected,
            fail_sends: 0,
            fail_code: ErrorCode::TransientNetwork,
            sends: 0,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the config block does not match the expected
    /// shape.
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: MemorySinkConfig = serde_json::from_value(config_or_empty(config))
            .context("invalid memory sink config")?;
        Ok(Self::new()
            .rejecting(config.reject_positions, ErrorCode::from_i64(config.reject_code))
            .failing_first(config.fail_sends, ErrorCode::from_i64(config.fail_code)))
    }

    /// Reject these absolute positions record by record.
    #[must_use]
    pub fn rejecting(mut self, positions: impl IntoIterator<Item = i64>, code: ErrorCode) -> Self {
        self.reject_positions = positions.into_iter().collect();
        self.reject_code = code;
        self
    }

    /// Fail the first `sends` send attempts as a whole.
    #[must_use]
    pub fn failing_first(mut self, sends: usize, code: ErrorCode) -> Self {
        self.fail_sends = sends;
        self.fail_code = code;
        self
    }

    /// Shared handle to the delivery log. Stays valid after the sink is
    /// boxed into the engine.
    #[must_use]
    pub fn log(&self) -> Arc<Mutex<Vec<Delivery>>> {
        Arc::clone(&self.log)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SinkHook for MemorySink {
    async fn send(&mut self, blob: &mut Blob) -> Result<(), DeliveryError> {
        self.sends += 1;
        if self.sends <= self.fail_sends {
            return Err(DeliveryError {
                code: self.fail_code,
                message: format!("scripted transport failure on send {}", self.sends),
                retryable: self.fail_code.is_retriable(),
            });
        }

        let mut rejected = Vec::new();
        {
            let mut log = self
                .log
                .lock()
                .map_err(|_| DeliveryError::unknown("delivery log poisoned"))?;
            for (index, event) in blob.events().iter().enumerate() {
                let position = blob.absolute_position(index);
                if self.reject_positions.contains(&position) {
                    rejected.push(index);
                } else {
                    log.push((blob.location().clone(), position, event.clone()));
                }
            }
        }

        let delivered = blob.events().len() - rejected.len();
        let rejected_count = rejected.len();
        for index in rejected {
            blob.mark_failed(index, self.reject_code);
        }
        blob.push_report(json!({
            "delivered": delivered,
            "rejected": rejected_count,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_source_pages_from_base_position() {
        let mut source =
            MemorySource::new("mem", 100, vec![json!(1), json!(2), json!(3)]).with_page_size(2);
        source.open(&[]).await.unwrap();

        let blob = source.next_blob().await.unwrap().unwrap();
        assert_eq!(blob.position(), 100);
        assert_eq!(blob.num_rows(), 2);

        let blob = source.next_blob().await.unwrap().unwrap();
        assert_eq!(blob.position(), 102);
        assert_eq!(blob.num_rows(), 1);

        assert!(source.next_blob().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_source_honors_excluded_ranges() {
        let mut source = MemorySource::new("mem", 100, vec![json!(1), json!(2), json!(3)]);
        source
            .open(&[ProcessedRange::new("mem", 100, 102)])
            .await
            .unwrap();

        let blob = source.next_blob().await.unwrap().unwrap();
        assert_eq!(blob.position(), 102);
        assert_eq!(blob.num_rows(), 1);
        assert!(source.next_blob().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sink_rejects_scripted_positions() {
        let mut sink = MemorySink::new().rejecting([101], ErrorCode::AuthDenied);
        let log = sink.log();

        let mut blob = Blob::new("L", vec![json!("a"), json!("b")]).at_position(100);
        sink.send(&mut blob).await.unwrap();

        assert_eq!(blob.failed_events().len(), 1);
        assert_eq!(blob.failed_events()[0].absolute_position, 101);
        assert_eq!(blob.failed_events()[0].error_code, ErrorCode::AuthDenied);

        let deliveries = log.lock().unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].1, 100);

        assert_eq!(blob.reports()[0]["delivered"], 1);
        assert_eq!(blob.reports()[0]["rejected"], 1);
    }

    #[tokio::test]
    async fn test_sink_fails_first_sends_then_recovers() {
        let mut sink = MemorySink::new().failing_first(1, ErrorCode::Timeout);

        let mut blob = Blob::new("L", vec![json!(1)]);
        let err = sink.send(&mut blob).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);

        let mut blob = Blob::new("L", vec![json!(1)]);
        assert!(sink.send(&mut blob).await.is_ok());
    }

    #[tokio::test]
    async fn test_sink_clone_shares_the_log() {
        let sink = MemorySink::new();
        let log = sink.log();
        let mut clone = sink.clone();

        let mut blob = Blob::new("L", vec![json!(1)]);
        clone.send(&mut blob).await.unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_from_config_parses_numeric_codes() {
        let sink = MemorySink::from_config(&json!({
            "reject_positions": [5, 6],
            "reject_code": 5,
            "fail_sends": 2,
            "fail_code": 2,
        }))
        .unwrap();
        assert_eq!(sink.reject_code, ErrorCode::AuthDenied);
        assert_eq!(sink.fail_code, ErrorCode::Timeout);
        assert_eq!(sink.fail_sends, 2);

        let defaults = MemorySink::from_config(&serde_json::Value::Null).unwrap();
        assert!(defaults.reject_positions.is_empty());
    }

    #[test]
    fn test_source_from_config() {
        let source = MemorySource::from_config(&json!({
            "location": "inline",
            "position": 10,
            "events": [{"id": 1}, {"id": 2}],
        }))
        .unwrap();
        assert_eq!(source.location().as_str(), "inline");
        assert_eq!(source.base_position, 10);
        assert_eq!(source.events.len(), 2);
    }
}
