//! Domain error taxonomy shared by the runtime and the HTTP surface.
//!
//! Every error kind here maps to exactly one HTTP status and one snake_case
//! error code; the mapping lives on the error itself so the proxy layer
//! never has to guess.

use thiserror::Error;

/// Errors produced by configuration loading and validation.
#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("model '{model}' path does not exist: {path}")]
    ModelPathMissing { model: String, path: String },

    #[error("duplicate port {port} used by both '{first}' and '{second}'")]
    DuplicatePort {
        port: u16,
        first: String,
        second: String,
    },

    #[error("port {port} is already bound by another process")]
    PortConflict { port: u16 },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors produced while driving or querying a model's lifecycle.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("model '{0}' is not configured")]
    ModelNotFound(String),

    #[error("failed to start model '{model}': {reason}")]
    StartFailure { model: String, reason: String },

    #[error("queue for model '{model}' is full")]
    QueueFull { model: String, retry_after_secs: u64 },

    #[error("request to model '{model}' timed out waiting in queue")]
    QueueTimeout { model: String },

    #[error("backend for model '{model}' is unreachable: {reason}")]
    BackendTransport { model: String, reason: String },

    #[error("no capacity to start model '{model}': all running models are preloaded or pinned")]
    AdmissionDenied { model: String },

    #[error("request for model '{0}' was cancelled by the client")]
    ClientCancelled(String),

    #[error("admin operation is not applicable: {0}")]
    NoOp(String),
}

/// Stable machine-readable category used in the `type` field of an error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Invalid,
    NotFound,
    Unavailable,
    Timeout,
    Upstream,
    Internal,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid_request_error",
            Self::NotFound => "not_found_error",
            Self::Unavailable => "service_unavailable_error",
            Self::Timeout => "timeout_error",
            Self::Upstream => "upstream_error",
            Self::Internal => "internal_error",
        }
    }
}

impl GatewayError {
    /// Stable snake_case code for the `code` field of the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(ConfigError::DuplicatePort { .. }) => "duplicate_port",
            Self::Config(ConfigError::PortConflict { .. }) => "port_conflict",
            Self::Config(ConfigError::ModelPathMissing { .. }) => "model_path_missing",
            Self::Config(ConfigError::Unreadable { .. }) => "config_unreadable",
            Self::Config(ConfigError::Malformed { .. }) => "config_malformed",
            Self::Config(ConfigError::InvalidValue { .. }) => "config_invalid_value",
            Self::ModelNotFound(_) => "model_not_found",
            Self::StartFailure { .. } => "start_failed",
            Self::QueueFull { .. } => "queue_full",
            Self::QueueTimeout { .. } => "queue_timeout",
            Self::BackendTransport { .. } => "backend_unreachable",
            Self::AdmissionDenied { .. } => "no_capacity",
            Self::ClientCancelled(_) => "client_cancelled",
            Self::NoOp(_) => "no_op",
        }
    }

    /// HTTP status code this error should be surfaced as.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 400,
            Self::ModelNotFound(_) => 404,
            Self::StartFailure { .. } => 503,
            Self::QueueFull { .. } => 503,
            Self::QueueTimeout { .. } => 504,
            Self::BackendTransport { .. } => 502,
            Self::AdmissionDenied { .. } => 503,
            Self::ClientCancelled(_) => 499,
            Self::NoOp(_) => 200,
        }
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Invalid,
            Self::ModelNotFound(_) => ErrorCategory::NotFound,
            Self::StartFailure { .. } | Self::AdmissionDenied { .. } | Self::QueueFull { .. } => {
                ErrorCategory::Unavailable
            }
            Self::QueueTimeout { .. } => ErrorCategory::Timeout,
            Self::BackendTransport { .. } => ErrorCategory::Upstream,
            Self::ClientCancelled(_) | Self::NoOp(_) => ErrorCategory::Internal,
        }
    }

    /// `Retry-After` header value in seconds, when applicable.
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::QueueFull { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
