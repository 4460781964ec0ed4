//! Error types for agora-core.

use std::path::PathBuf;

use thiserror::Error;

/// Why an artifact document could not be split into frontmatter + body.
#[derive(Debug, Error)]
pub enum ArtifactParseError {
    /// The document does not start with a `---` fence line.
    #[error("missing opening frontmatter fence")]
    MissingOpeningFence,

    /// The frontmatter block is never closed by a `---` line.
    #[error("missing closing frontmatter fence")]
    MissingClosingFence,

    /// The frontmatter YAML is malformed or lacks required keys.
    #[error("invalid frontmatter: {0}")]
    Frontmatter(#[source] serde_yaml::Error),
}

/// Configuration problems. Always raised before any I/O against a remote.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The remote descriptor names a transport this build does not know.
    #[error("unknown transport kind '{0}'; expected: local-fs, git-remote, http")]
    UnknownTransport(String),

    /// The transport kind is recognised but has no implementation yet.
    #[error("transport '{0}' is not yet implemented")]
    NotImplemented(String),

    /// No remote with this name in `remotes`.
    #[error("no remote named '{0}' is configured")]
    UnknownRemote(String),

    /// A remote descriptor was missing its `url`.
    #[error("remote descriptor has an empty url")]
    EmptyUrl,

    /// A tuning value is outside its permitted range.
    #[error("invalid config value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// YAML serialization error (save path).
    #[error("config serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Underlying I/O failure while reading or writing the config file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// All errors that can arise from workspace store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The workspace root does not exist or is not a directory.
    #[error("workspace root unreachable at {path}")]
    Unreachable { path: PathBuf },

    /// Slug would not map to a file inside `artifacts/`.
    #[error("invalid artifact slug '{slug}': {reason}")]
    InvalidSlug { slug: String, reason: &'static str },

    /// No `artifacts/<slug>.md` exists.
    #[error("artifact '{slug}' not found")]
    NotFound { slug: String },

    /// The artifact file exists but cannot be decomposed.
    #[error("failed to parse artifact '{slug}': {source}")]
    ArtifactParse {
        slug: String,
        #[source]
        source: ArtifactParseError,
    },

    /// A write would lower the stored version of an artifact.
    #[error("refusing to write '{slug}' at version {attempted}; stored version is {current}")]
    VersionRegression {
        slug: String,
        current: u64,
        attempted: u64,
    },

    /// A line of the signal log is not a valid JSON signal.
    #[error("malformed signal at {path}:{line}: {source}")]
    SignalLog {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (signal log, reputation state).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
