use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DramError {
    #[error("invalid parameter `{field}`: {message}")]
    InvalidParameter { field: String, message: String },

    #[error("invalid object reference: {0}")]
    InvalidObjectRef(String),

    #[error("unsupported input object type: {0}")]
    UnsupportedInput(String),

    #[error("unknown job method: {0}")]
    UnknownMethod(String),

    #[error("missing deployment config; pass --config or set KB_DEPLOYMENT_CONFIG")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    #[error("{service} request failed: {message}")]
    ServiceHttp { service: String, message: String },

    #[error("{service} returned status {status}: {message}")]
    ServiceStatus {
        service: String,
        status: u16,
        message: String,
    },

    #[error("{service} error: {message}")]
    ServiceError { service: String, message: String },

    #[error("DRAM database file not found: {0}")]
    MissingDatabase(PathBuf),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("DRAM failed: {0}")]
    ToolchainFailed(String),

    #[error("expected DRAM output missing: {0}")]
    MissingOutput(PathBuf),

    #[error("annotation table has no `{0}` column")]
    MissingColumn(String),

    #[error("failed to read annotation table: {0}")]
    AnnotationParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("{0}")]
    Postcondition(String),
}

impl DramError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        DramError::InvalidParameter {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
