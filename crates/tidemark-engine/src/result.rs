//! Pipeline run result types.

use tidemark_types::checkpoint::PruneStats;
use tidemark_types::run::RunStats;

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    /// Which phases ran: "retry+normal", "retry", "normal", or "none".
    pub mode: String,
    pub stats: RunStats,
    /// Sweep counts when `enable_cleanup` was set and the sweep succeeded.
    pub pruned: Option<PruneStats>,
    /// Sink reports, collected when `return_report` is set.
    pub reports: Option<Vec<serde_json::Value>>,
    pub duration_secs: f64,
}

/// Result of a pipeline check.
#[derive(Debug)]
pub struct CheckReport {
    pub source: CheckStatus,
    pub sink: CheckStatus,
    pub store: CheckStatus,
}

impl CheckReport {
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.source.ok && self.sink.ok && self.store.ok
    }
}

/// Outcome of checking one component.
#[derive(Debug)]
pub struct CheckStatus {
    pub ok: bool,
    pub message: String,
}

impl CheckStatus {
    pub fn passed(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}
