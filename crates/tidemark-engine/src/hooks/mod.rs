//! Source and sink hook traits plus the registry that builds them.
//!
//! A source hook pages records out of an external system as blobs; a
//! sink hook attempts delivery of a blob's events and annotates the
//! ones that fail. Hooks are registered under a tag and built from the
//! `use` / `config` pair in the run config.

use std::collections::{HashMap, VecDeque};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use tidemark_types::blob::{Blob, Location};
use tidemark_types::checkpoint::ProcessedRange;
use tidemark_types::error::DeliveryError;

pub mod jsonl;
pub mod memory;

/// Paginated reader over one source location.
#[async_trait]
pub trait SourceHook: Send + Sync {
    /// The location this hook reads. Must be stable across runs so that
    /// checkpoint rows keep matching the source.
    fn location(&self) -> &Location;

    /// Cheap reachability probe.
    async fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Prepare for reading, skipping every position inside `excluded`.
    async fn open(&mut self, excluded: &[ProcessedRange]) -> Result<()>;

    /// Next page of records, or `None` when the source is exhausted.
    ///
    /// Returned blobs must carry positionally contiguous events so that
    /// `position + index` is each event's absolute position.
    async fn next_blob(&mut self) -> Result<Option<Blob>>;
}

/// Delivers blobs to an external system.
#[async_trait]
pub trait SinkHook: Send + Sync {
    /// Cheap reachability probe.
    async fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Attempt delivery of every event in the blob.
    ///
    /// Individual rejections are annotated via [`Blob::mark_failed`]
    /// and are not an `Err`. `Err` means the attempt failed as a whole
    /// (transport down, auth refused) before per-record outcomes were
    /// known.
    async fn send(&mut self, blob: &mut Blob) -> Result<(), DeliveryError>;
}

/// Send a blob through the sink, converting a transport-wide failure
/// into per-record annotations. Delivery failures never abort the run
/// and never leave the blob unannotated.
pub(crate) async fn dispatch_send(sink: &mut dyn SinkHook, blob: &mut Blob) {
    if let Err(err) = sink.send(blob).await {
        tracing::warn!(
            location = blob.location().as_str(),
            position = blob.position(),
            code = err.code.as_i64(),
            error = %err,
            "Sink send failed as a whole; marking every event failed"
        );
        blob.mark_all_failed(err.code);
    }
}

/// Pop the next positionally contiguous page, up to `page_size` events.
/// Shared by the built-in hooks; splits at position gaps left by
/// excluded ranges.
pub(crate) fn next_contiguous_page(
    pending: &mut VecDeque<(i64, serde_json::Value)>,
    page_size: usize,
) -> Option<(i64, Vec<serde_json::Value>)> {
    let &(start, _) = pending.front()?;
    let mut events = Vec::new();
    while events.len() < page_size {
        let contiguous = pending
            .front()
            .is_some_and(|&(position, _)| position == start + events.len() as i64);
        if !contiguous {
            break;
        }
        if let Some((_, event)) = pending.pop_front() {
            events.push(event);
        }
    }
    Some((start, events))
}

/// Factory building a source hook from its JSON config block.
pub type SourceFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn SourceHook>> + Send + Sync>;

/// Factory building a sink hook from its JSON config block.
pub type SinkFactory = Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn SinkHook>> + Send + Sync>;

/// Tagged hook factories, looked up by the `use` field of the run config.
pub struct HookRegistry {
    sources: HashMap<String, SourceFactory>,
    sinks: HashMap<String, SinkFactory>,
}

impl HookRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            sinks: HashMap::new(),
        }
    }

    /// Registry with the built-in `jsonl` and `memory` hooks.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_source(
            "jsonl",
            Box::new(|config| Ok(Box::new(jsonl::JsonlSource::from_config(config)?))),
        );
        registry.register_sink(
            "jsonl",
            Box::new(|config| Ok(Box::new(jsonl::JsonlSink::from_config(config)?))),
        );
        registry.register_source(
            "memory",
            Box::new(|config| Ok(Box::new(memory::MemorySource::from_config(config)?))),
        );
        registry.register_sink(
            "memory",
            Box::new(|config| Ok(Box::new(memory::MemorySink::from_config(config)?))),
        );
        registry
    }

    pub fn register_source(&mut self, tag: impl Into<String>, factory: SourceFactory) {
        self.sources.insert(tag.into(), factory);
    }

    pub fn register_sink(&mut self, tag: impl Into<String>, factory: SinkFactory) {
        self.sinks.insert(tag.into(), factory);
    }

    /// Build the source hook registered under `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if no source is registered under `tag` or the
    /// factory rejects the config block.
    pub fn build_source(
        &self,
        tag: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn SourceHook>> {
        let factory = self.sources.get(tag).ok_or_else(|| {
            anyhow!(
                "unknown source hook '{tag}' (registered: {})",
                known_tags(&self.sources)
            )
        })?;
        factory(config)
    }

    /// Build the sink hook registered under `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if no sink is registered under `tag` or the
    /// factory rejects the config block.
    pub fn build_sink(&self, tag: &str, config: &serde_json::Value) -> Result<Box<dyn SinkHook>> {
        let factory = self.sinks.get(tag).ok_or_else(|| {
            anyhow!(
                "unknown sink hook '{tag}' (registered: {})",
                known_tags(&self.sinks)
            )
        })?;
        factory(config)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn known_tags<T>(map: &HashMap<String, T>) -> String {
    if map.is_empty() {
        return "none".to_string();
    }
    let mut tags: Vec<&str> = map.keys().map(String::as_str).collect();
    tags.sort_unstable();
    tags.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidemark_types::error::ErrorCode;

    fn pending(positions: &[i64]) -> VecDeque<(i64, serde_json::Value)> {
        positions.iter().map(|&p| (p, json!({"p": p}))).collect()
    }

    #[test]
    fn test_page_respects_page_size() {
        let mut queue = pending(&[0, 1, 2, 3, 4]);
        let (start, events) = next_contiguous_page(&mut queue, 2).unwrap();
        assert_eq!(start, 0);
        assert_eq!(events.len(), 2);
        let (start, events) = next_contiguous_page(&mut queue, 2).unwrap();
        assert_eq!(start, 2);
        assert_eq!(events.len(), 2);
        let (start, events) = next_contiguous_page(&mut queue, 2).unwrap();
        assert_eq!(start, 4);
        assert_eq!(events.len(), 1);
        assert!(next_contiguous_page(&mut queue, 2).is_none());
    }

    #[test]
    fn test_page_splits_at_position_gap() {
        let mut queue = pending(&[10, 11, 14, 15]);
        let (start, events) = next_contiguous_page(&mut queue, 10).unwrap();
        assert_eq!(start, 10);
        assert_eq!(events.len(), 2);
        let (start, events) = next_contiguous_page(&mut queue, 10).unwrap();
        assert_eq!(start, 14);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_unknown_source_tag_lists_registered() {
        let registry = HookRegistry::builtin();
        let err = registry
            .build_source("kafka", &serde_json::Value::Null)
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("unknown source hook 'kafka'"));
        assert!(err.contains("jsonl"));
        assert!(err.contains("memory"));
    }

    #[test]
    fn test_builtin_builds_memory_hooks() {
        let registry = HookRegistry::builtin();
        let source = registry.build_source("memory", &json!({"events": [{"id": 1}]}));
        assert!(source.is_ok());
        let sink = registry.build_sink("memory", &serde_json::Value::Null);
        assert!(sink.is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_send_marks_every_event_on_transport_failure() {
        let mut sink = memory::MemorySink::new().failing_first(1, ErrorCode::AuthDenied);
        let mut blob = Blob::new("L", vec![json!({"id": "a"}), json!({"id": "b"})])
            .at_position(100);

        dispatch_send(&mut sink, &mut blob).await;

        assert_eq!(blob.failed_events().len(), 2);
        assert!(blob
            .failed_events()
            .iter()
            .all(|f| f.error_code == ErrorCode::AuthDenied));
        assert_eq!(blob.failed_events()[0].absolute_position, 100);
        assert_eq!(blob.failed_events()[1].absolute_position, 101);
    }

    #[tokio::test]
    async fn test_dispatch_send_leaves_per_record_annotations_alone() {
        let mut sink = memory::MemorySink::new().rejecting([101], ErrorCode::SinkRejected);
        let mut blob = Blob::new("L", vec![json!({"id": "a"}), json!({"id": "b"})])
            .at_position(100);

        dispatch_send(&mut sink, &mut blob).await;

        assert_eq!(blob.failed_events().len(), 1);
        assert_eq!(blob.failed_events()[0].absolute_position, 101);
        assert_eq!(blob.failed_events()[0].error_code, ErrorCode::SinkRejected);
    }
}
