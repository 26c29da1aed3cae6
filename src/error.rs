//! Stage-level failures that abort a pipeline run.
//!
//! Per-value casting problems never surface here; they are counted inside the
//! typing report. Structural oddities are recorded as issue strings. What is
//! left are the conditions that make a run impossible to finish: unreadable or
//! unsupported input, and failures to persist artifacts.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Unreadable file, unsupported source type, empty content or bad encoding.
    #[error("{0}")]
    Ingestion(String),

    /// Disk or encoder failure while writing or reading stored artifacts.
    #[error("{0}")]
    Storage(String),

    /// Invalid or unreadable pipeline configuration.
    #[error("{0}")]
    Config(String),
}

impl PipelineError {
    pub fn ingestion(message: impl Into<String>) -> Self {
        Self::Ingestion(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Kind tag recorded as `error_type` in a failed report.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Ingestion(_) => "IngestionError",
            Self::Storage(_) => "StorageError",
            Self::Config(_) => "ConfigError",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
