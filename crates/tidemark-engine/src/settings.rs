//! Layered resolution of per-run settings.
//!
//! Every setting is looked up twice: first under the run-scoped key
//! `"{run_id}.{key}"`, then under the bare `"{key}"`. A value that is
//! present but unparsable falls back to the built-in default rather
//! than failing the run.

use std::collections::BTreeMap;

/// Resolved view over a flat string-to-string settings map.
#[derive(Debug, Clone)]
pub struct RunSettings {
    run_id: String,
    values: BTreeMap<String, String>,
}

impl RunSettings {
    #[must_use]
    pub fn new(run_id: impl Into<String>, values: BTreeMap<String, String>) -> Self {
        Self {
            run_id: run_id.into(),
            values,
        }
    }

    fn raw(&self, key: &str) -> Option<&str> {
        let scoped = format!("{}.{key}", self.run_id);
        self.values
            .get(&scoped)
            .or_else(|| self.values.get(key))
            .map(String::as_str)
    }

    #[must_use]
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.raw(key).and_then(parse_bool).unwrap_or(default)
    }

    #[must_use]
    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        self.raw(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Replay previously failed events before reading new data. Default true.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        self.bool_or("is_retry", true)
    }

    /// Read and deliver new data from the source. Default true.
    #[must_use]
    pub fn is_run(&self) -> bool {
        self.bool_or("is_run", true)
    }

    /// Record processed ranges and failed events in the checkpoint store.
    /// Default true.
    #[must_use]
    pub fn enable_monitoring(&self) -> bool {
        self.bool_or("enable_monitoring", true)
    }

    /// Collect sink reports into the run result. Default false.
    #[must_use]
    pub fn return_report(&self) -> bool {
        self.bool_or("return_report", false)
    }

    /// Sweep expired checkpoint rows before the run. Default false.
    #[must_use]
    pub fn enable_cleanup(&self) -> bool {
        self.bool_or("enable_cleanup", false)
    }

    /// Retention horizon for the sweep, in days. Default 50.
    #[must_use]
    pub fn days_to_live(&self) -> i64 {
        self.i64_or("days_to_live", 50)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
