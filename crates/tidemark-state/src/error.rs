//! Error type shared by all checkpoint store backends.

use std::io;

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Backend-specific failure (SQL error, connection loss, bad row data).
    #[error("checkpoint store error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// A range write lost the race against a concurrent run for the same
    /// location. The enclosing transaction was rolled back.
    #[error("overlapping range write for location '{location}': [{start}, {end})")]
    RangeConflict {
        location: String,
        start: i64,
        end: i64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A store mutex was poisoned by a panicked thread.
    #[error("checkpoint store lock poisoned")]
    LockPoisoned,
}

impl StateError {
    pub fn backend<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn backend_context<E>(context: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            message: format!("{context}: {source}"),
            source: Some(Box::new(source)),
        }
    }

    pub fn backend_msg(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }
}
