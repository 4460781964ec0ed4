//! Error types for agora-sync.

use std::path::PathBuf;

use thiserror::Error;

use agora_core::{ConfigError, StoreError};

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    TransportUnreachable,
    CloneFailure,
    NotFound,
    ParseError,
    PushRejected,
    UnsupportedOperation,
    ContractViolation,
    PassInProgress,
    Internal,
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Unknown or unsupported transport, invalid tuning. Raised before any I/O.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Bad path or URL, or the medium refused access.
    #[error("transport unreachable at {location}: {reason}")]
    Unreachable { location: String, reason: String },

    /// The shallow clone could not complete.
    #[error("clone of {url} (branch {branch}) failed: {stderr}")]
    CloneFailed {
        url: String,
        branch: String,
        stderr: String,
    },

    #[error("artifact '{slug}' not found")]
    NotFound { slug: String },

    #[error("failed to parse artifact '{slug}': {reason}")]
    Parse { slug: String, reason: String },

    /// Remote refused the push (typically non-fast-forward).
    #[error("push of '{slug}' rejected: {reason}")]
    PushRejected { slug: String, reason: String },

    #[error("{operation} is unsupported on this transport; {redirect}")]
    Unsupported {
        operation: &'static str,
        redirect: &'static str,
    },

    /// A transport method other than `connect` was called while disconnected.
    #[error("{operation} called on a disconnected transport")]
    NotConnected { operation: &'static str },

    /// `connect` was called on a transport that is already connected.
    #[error("connect called on a transport that is already connected to {location}")]
    AlreadyConnected { location: String },

    /// Another pass against the same remote is still running.
    #[error("a sync pass against {remote} is already in progress")]
    PassInProgress { remote: String },

    /// A git subcommand other than clone/push failed.
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    /// Local workspace failure not covered by a more specific variant.
    #[error("store error: {0}")]
    Store(StoreError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sync state JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::Unreachable { .. } => ErrorKind::TransportUnreachable,
            SyncError::CloneFailed { .. } => ErrorKind::CloneFailure,
            SyncError::NotFound { .. } => ErrorKind::NotFound,
            SyncError::Parse { .. } => ErrorKind::ParseError,
            SyncError::PushRejected { .. } => ErrorKind::PushRejected,
            SyncError::Unsupported { .. } => ErrorKind::UnsupportedOperation,
            SyncError::NotConnected { .. } | SyncError::AlreadyConnected { .. } => {
                ErrorKind::ContractViolation
            }
            SyncError::PassInProgress { .. } => ErrorKind::PassInProgress,
            SyncError::Git { .. }
            | SyncError::Store(_)
            | SyncError::Io { .. }
            | SyncError::Json(_)
            | SyncError::Task(_) => ErrorKind::Internal,
        }
    }

    /// Scoped to a single artifact; the pass carries on and reports it.
    pub fn is_per_artifact(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::ParseError | ErrorKind::PushRejected
        )
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unreachable { path } => SyncError::Unreachable {
                location: path.display().to_string(),
                reason: "workspace root does not exist".to_string(),
            },
            StoreError::NotFound { slug } => SyncError::NotFound { slug },
            StoreError::ArtifactParse { slug, source } => SyncError::Parse {
                slug,
                reason: source.to_string(),
            },
            other => SyncError::Store(other),
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
