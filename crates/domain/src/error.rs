//! Error taxonomy shared across all coworker crates.
//!
//! Every error that can reach a client maps onto a stable `(code, source)`
//! pair carried by the wire `error` event. Internal helpers (`Io`, `Json`)
//! fold into `internal_error` at the boundary.

use serde::{Deserialize, Serialize};

/// Stable error codes surfaced on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Busy,
    ValidationFailed,
    PermissionDenied,
    CredentialsMissingOrExpired,
    ProviderError,
    InternalError,
    TurnAborted,
    StepLimitReached,
    SessionDisposed,
}

/// Which subsystem produced the error.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    #[error("session")]
    Session,
    #[error("permissions")]
    Permissions,
    #[error("provider")]
    Provider,
    #[error("transport")]
    Transport,
    #[error("tool")]
    Tool,
    #[error("mcp")]
    Mcp,
}

/// Shared error type used across all coworker crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session is busy — a turn is already in progress")]
    Busy,

    #[error("session disposed: {0}")]
    SessionDisposed(String),

    #[error("turn aborted")]
    TurnAborted,

    #[error("step limit reached after {steps} steps")]
    StepLimitReached { steps: u32 },

    #[error("validation: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("credentials: {0}")]
    Credentials(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// An upstream error that already carries its wire classification.
    /// `code` and `source` pass through to the client verbatim.
    #[error("{message}")]
    Surfaced {
        code: ErrorCode,
        source: ErrorSource,
        message: String,
    },

    #[error("MCP: {0}")]
    Mcp(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Map onto the wire-stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Busy => ErrorCode::Busy,
            Error::SessionDisposed(_) => ErrorCode::SessionDisposed,
            Error::TurnAborted => ErrorCode::TurnAborted,
            Error::StepLimitReached { .. } => ErrorCode::StepLimitReached,
            Error::Validation(_) => ErrorCode::ValidationFailed,
            Error::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Error::Credentials(_) => ErrorCode::CredentialsMissingOrExpired,
            Error::Provider { .. } => ErrorCode::ProviderError,
            Error::Surfaced { code, .. } => *code,
            Error::Io(_) | Error::Json(_) | Error::Mcp(_) | Error::Transport(_) | Error::Internal(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Which subsystem this error is attributed to on the wire.
    pub fn source_kind(&self) -> ErrorSource {
        match self {
            Error::Busy | Error::SessionDisposed(_) | Error::TurnAborted | Error::StepLimitReached { .. } => {
                ErrorSource::Session
            }
            Error::PermissionDenied(_) => ErrorSource::Permissions,
            Error::Credentials(_) | Error::Provider { .. } => ErrorSource::Provider,
            Error::Surfaced { source, .. } => *source,
            Error::Transport(_) => ErrorSource::Transport,
            Error::Validation(_) => ErrorSource::Tool,
            Error::Mcp(_) => ErrorSource::Mcp,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => ErrorSource::Session,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
