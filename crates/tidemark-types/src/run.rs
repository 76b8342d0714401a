//! Run bookkeeping: identity, status, and counters for one pipeline run.

use serde::{Deserialize, Serialize};

use crate::checkpoint::Timestamp;

/// Identifier of a configured pipeline. Doubles as the prefix for per-run
/// setting overrides (`"{run_id}.{key}"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for RunId {
    fn from(s: S) -> Self {
        Self::new(s)
    }
}

/// Terminal and in-flight states of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub blobs_processed: u64,
    pub events_delivered: u64,
    pub events_failed: u64,
    pub error_message: Option<String>,
}

/// One row of run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Store-assigned attempt id, unique per recorded run.
    pub attempt: i64,
    pub run_id: RunId,
    /// Phases the run enabled, e.g. `"retry+normal"`.
    pub mode: String,
    pub status: RunStatus,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub stats: RunStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_display_and_from() {
        let id = RunId::new("nightly-loads");
        assert_eq!(id.as_str(), "nightly-loads");
        assert_eq!(id.to_string(), "nightly-loads");
        assert_eq!(RunId::from("x"), RunId::new("x"));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("bogus"), None);
    }

    #[test]
    fn stats_default_is_zeroed() {
        let stats = RunStats::default();
        assert_eq!(stats.blobs_processed, 0);
        assert_eq!(stats.events_failed, 0);
        assert!(stats.error_message.is_none());
    }
}
