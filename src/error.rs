//! Error taxonomy shared by the store, fetcher, process runner and lifecycle
//! manager.  The HTTP layer maps each variant onto a status code in
//! [`crate::http::handler::AppError`].

use std::path::PathBuf;

/// Convenience alias used throughout the extract subsystem.
pub type ExtractResult<T> = Result<T, ExtractError>;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The extract (or its config record) does not exist.
    #[error("extract {id} not found")]
    NotFound { id: String },

    /// A non-empty directory already exists for this id.
    #[error("extract {id} already exists")]
    AlreadyExists { id: String },

    /// The request or persisted config cannot drive the requested operation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A remote fetch failed or produced no content.
    #[error("failed to fetch {url}: {reason}")]
    UpstreamFetchFailed { url: String, reason: String },

    /// An external tool exited non-zero or did not finish in time.
    #[error("{tool} failed: {reason}")]
    ExternalToolFailed { tool: String, reason: String },

    /// The persisted config record could not be decoded.
    #[error("config for extract {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    /// The extract exists but a file it should contain is absent.
    #[error("extract {id} has no {file} yet")]
    ArtifactMissing { id: String, file: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short, stable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::UpstreamFetchFailed { .. } => "upstream_fetch_failed",
            Self::ExternalToolFailed { .. } => "external_tool_failed",
            Self::Corrupt { .. } => "corrupt",
            Self::ArtifactMissing { .. } => "artifact_missing",
            Self::Io { .. } => "io",
        }
    }
}
