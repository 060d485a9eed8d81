use thiserror::Error;

use crate::http_client::HttpError;

/// Argument validation errors raised before any request is sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("field '{field}' must be a non-empty string")]
    EmptyString { field: &'static str },
    #[error("field '{field}' must be a positive integer")]
    NonPositive { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    Negative { field: &'static str },
    #[error("field '{field}' must be a non-empty list")]
    EmptyList { field: &'static str },
    #[error("invalid {field} '{value}', expected one of {allowed}")]
    InvalidChoice {
        field: &'static str,
        value: String,
        allowed: String,
    },
    #[error("file not found: {path}")]
    FileNotFound { path: String },
    #[error("{0}")]
    Other(String),
}

/// SQL Server (Data Bridge) failures.
#[derive(Debug, Error)]
pub enum DataBridgeError {
    #[error("databridge configuration error: {0}")]
    Config(String),
    #[error("databridge connection error: {0}")]
    Connection(String),
    #[error("databridge query error: {0}")]
    Query(String),
}

/// Top-level error type for every client operation.
#[derive(Debug, Error)]
pub enum IrpError {
    #[error("{message}")]
    Api { message: String },

    #[error("request error: {0}")]
    Transport(#[from] HttpError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{message}")]
    Workflow { message: String },

    #[error("{message}")]
    Job { message: String },

    #[error("{message}")]
    ReferenceData { message: String },

    #[error("{message}")]
    File { message: String },

    #[error(transparent)]
    DataBridge(#[from] DataBridgeError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IrpError {
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    pub fn workflow(message: impl Into<String>) -> Self {
        Self::Workflow {
            message: message.into(),
        }
    }

    pub fn job(message: impl Into<String>) -> Self {
        Self::Job {
            message: message.into(),
        }
    }

    pub fn reference_data(message: impl Into<String>) -> Self {
        Self::ReferenceData {
            message: message.into(),
        }
    }

    pub fn file(message: impl Into<String>) -> Self {
        Self::File {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::Other(message.into()))
    }

    /// Stable machine-readable category, e.g. `irp.api`.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Api { .. } => "irp.api",
            Self::Transport(_) => "irp.transport",
            Self::Validation(_) => "irp.validation",
            Self::Workflow { .. } => "irp.workflow",
            Self::Job { .. } => "irp.job",
            Self::ReferenceData { .. } => "irp.reference_data",
            Self::File { .. } => "irp.file",
            Self::DataBridge(DataBridgeError::Config(_)) => "irp.databridge.config",
            Self::DataBridge(DataBridgeError::Connection(_)) => "irp.databridge.connection",
            Self::DataBridge(DataBridgeError::Query(_)) => "irp.databridge.query",
            Self::Serialization(_) => "irp.serialization",
            Self::Io(_) => "irp.io",
        }
    }

    /// Reclassify a malformed-response error as missing reference data.
    pub fn into_reference_data(self) -> Self {
        match self {
            Self::Api { message } => Self::reference_data(message),
            other => other,
        }
    }

    /// Prefix the message with context, keeping the category.
    pub fn context(self, prefix: impl std::fmt::Display) -> Self {
        match self {
            Self::Api { message } => Self::api(format!("{prefix}: {message}")),
            Self::Workflow { message } => Self::workflow(format!("{prefix}: {message}")),
            Self::Job { message } => Self::job(format!("{prefix}: {message}")),
            Self::ReferenceData { message } => {
                Self::reference_data(format!("{prefix}: {message}"))
            }
            Self::File { message } => Self::file(format!("{prefix}: {message}")),
            Self::Transport(error) => Self::api(format!("{prefix}: request error: {error}")),
            other => other,
        }
    }
}

/// Shorthand result type for `irp-core`.
pub type Result<T> = std::result::Result<T, IrpError>;
