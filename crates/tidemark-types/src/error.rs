//! Delivery failure taxonomy.
//!
//! Every failed record carries a numeric [`ErrorCode`] persisted alongside it
//! in the checkpoint store. Retriable versus non-retriable matters only for
//! operator visibility: the store replays both identically until a retry
//! succeeds or retention prunes the record.

use serde::{Deserialize, Serialize};

/// Numeric cause code attached to a failed record.
///
/// Codes are stable integers because the store persists them; unknown values
/// read back from an older or newer store collapse to [`ErrorCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ErrorCode {
    Unknown,
    TransientNetwork,
    Timeout,
    RateLimited,
    SinkRejected,
    AuthDenied,
    InvalidPayload,
}

impl ErrorCode {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::TransientNetwork => 1,
            Self::Timeout => 2,
            Self::RateLimited => 3,
            Self::SinkRejected => 4,
            Self::AuthDenied => 5,
            Self::InvalidPayload => 6,
        }
    }

    #[must_use]
    pub fn from_i64(code: i64) -> Self {
        match code {
            1 => Self::TransientNetwork,
            2 => Self::Timeout,
            3 => Self::RateLimited,
            4 => Self::SinkRejected,
            5 => Self::AuthDenied,
            6 => Self::InvalidPayload,
            _ => Self::Unknown,
        }
    }

    /// Whether a later retry of the same record is expected to succeed.
    #[must_use]
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::Unknown | Self::TransientNetwork | Self::Timeout | Self::RateLimited
        )
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        Self::from_i64(code)
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.as_i64()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::TransientNetwork => "transient_network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::SinkRejected => "sink_rejected",
            Self::AuthDenied => "auth_denied",
            Self::InvalidPayload => "invalid_payload",
        };
        f.write_str(name)
    }
}

/// A sink-side delivery failure.
///
/// Returned by sink hooks for transport-wide failures, in which case the
/// engine marks every record of the blob failed with this error's code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct DeliveryError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl DeliveryError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.is_retriable(),
        }
    }

    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    #[must_use]
    pub fn transient_network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransientNetwork, message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimited, message)
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SinkRejected, message)
    }

    #[must_use]
    pub fn auth_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthDenied, message)
    }

    #[must_use]
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPayload, message)
    }
}
