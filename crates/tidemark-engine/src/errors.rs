//! Pipeline error model.

use tidemark_state::StateError;

/// Categorized pipeline error.
///
/// `Config` covers bad run options detected before any blob is
/// processed. `State` wraps checkpoint store failures, which always
/// abort the run so delivery and bookkeeping cannot drift apart.
/// `Infrastructure` wraps everything else that is fatal: source read
/// errors, hook construction failures, runtime task failures.
///
/// Per-record delivery failures are not errors at this level; they are
/// annotated on the blob and persisted as failed event records.
#[derive(Debug)]
pub enum PipelineError {
    /// Invalid run options.
    Config(String),
    /// Checkpoint store failure.
    State(StateError),
    /// Source, hook construction, or runtime failure.
    Infrastructure(anyhow::Error),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::State(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<StateError> for PipelineError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_display() {
        let err = PipelineError::config("store.connection is required");
        assert_eq!(
            err.to_string(),
            "configuration error: store.connection is required"
        );
    }

    #[test]
    fn test_state_display_carries_backend_message() {
        let err: PipelineError = StateError::backend_msg("database is locked").into();
        assert!(matches!(err, PipelineError::State(_)));
        assert!(err.to_string().contains("database is locked"));
    }

    #[test]
    fn test_from_anyhow() {
        let err: PipelineError = anyhow::anyhow!("source read failed").into();
        assert!(matches!(err, PipelineError::Infrastructure(_)));
        assert!(err.to_string().contains("source read failed"));
    }
}
