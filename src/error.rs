use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("input catalog unavailable at {path}: {reason}")]
    #[diagnostic(help("the input catalog is a JSON object keyed by journal title"))]
    InputUnavailable { path: PathBuf, reason: String },

    #[error("output catalog at {path} is not valid JSON: {reason}")]
    CatalogCorrupt { path: PathBuf, reason: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid journal title: {0:?}")]
    InvalidTargetName(String),

    #[error("invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("filesystem error: {0}")]
    Persistence(String),

    #[error("checkpoint could not be written: {0}")]
    #[diagnostic(help("resuming from this run may skip or repeat titles"))]
    CheckpointWrite(String),
}

impl HarvestError {
    /// Errors produced by the network layer, as opposed to local I/O or setup.
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            HarvestError::Http { .. }
                | HarvestError::HttpStatus { .. }
                | HarvestError::InvalidUrl { .. }
        )
    }
}
