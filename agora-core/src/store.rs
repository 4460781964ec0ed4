//! Local Store Adapter: the on-disk workspace layout.
//!
//! # Storage layout
//!
//! ```text
//! <root>/
//!   artifacts/
//!     <slug>.md                 (frontmatter + body)
//!   reputation/
//!     signals.jsonl             (append-only, one JSON signal per line)
//!     dimensions.json           (aggregated reputation state)
//!   .agora/
//!     config.yaml
//!     sync-state.json
//! ```
//!
//! Every call goes straight to the filesystem; nothing is cached. Writes use
//! the `<path>.agora.tmp` + rename protocol so readers never see a torn file.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::artifact::Artifact;
use crate::error::{io_err, StoreError};
use crate::types::{ArtifactFilter, ExportedSignalBatch, RemoteArtifactManifest, Signal, Slug};

pub const ARTIFACTS_DIR: &str = "artifacts";
pub const REPUTATION_DIR: &str = "reputation";
pub const SIGNALS_FILE: &str = "signals.jsonl";
pub const DIMENSIONS_FILE: &str = "dimensions.json";
pub const STATE_DIR: &str = ".agora";

const ARTIFACT_EXT: &str = "md";

/// An artifact file that exists but could not be decomposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableArtifact {
    pub slug: Slug,
    pub reason: String,
}

/// Result of [`WorkspaceStore::scan_artifacts`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactScan {
    /// Sorted by slug.
    pub manifests: Vec<RemoteArtifactManifest>,
    /// Sorted by slug. Only the filter's slug prefix applies here.
    pub unreadable: Vec<UnreadableArtifact>,
}

/// Handle on one workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    /// Bind to an existing workspace root.
    ///
    /// Returns `StoreError::Unreachable` if `root` is missing or not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => Ok(Self { root }),
            Ok(_) => Err(StoreError::Unreachable { path: root }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::Unreachable { path: root })
            }
            Err(err) => Err(io_err(root, err)),
        }
    }

    /// Create the workspace layout under `root` (idempotent) and bind to it.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [
            root.join(ARTIFACTS_DIR),
            root.join(REPUTATION_DIR),
            root.join(STATE_DIR),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }

    /// `<root>/artifacts/<slug>.md`. Pure, no I/O.
    pub fn artifact_path(&self, slug: &Slug) -> PathBuf {
        self.artifacts_dir()
            .join(format!("{}.{ARTIFACT_EXT}", slug.0))
    }

    pub fn signals_path(&self) -> PathBuf {
        self.root.join(REPUTATION_DIR).join(SIGNALS_FILE)
    }

    pub fn dimensions_path(&self) -> PathBuf {
        self.root.join(REPUTATION_DIR).join(DIMENSIONS_FILE)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    /// Enumerate artifacts matching `filter`, sorted by slug.
    ///
    /// Files that fail to parse are skipped with a warning; use
    /// [`scan_artifacts`](Self::scan_artifacts) to learn which.
    pub fn list_manifests(
        &self,
        filter: Option<&ArtifactFilter>,
    ) -> Result<Vec<RemoteArtifactManifest>, StoreError> {
        Ok(self.scan_artifacts(filter)?.manifests)
    }

    /// Enumerate artifacts matching `filter`, and name the files that do not
    /// parse instead of dropping them silently.
    pub fn scan_artifacts(&self, filter: Option<&ArtifactFilter>) -> Result<ArtifactScan, StoreError> {
        let dir = self.artifacts_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ArtifactScan::default()),
            Err(err) => return Err(io_err(&dir, err)),
        };
        let prefix = filter.and_then(|f| f.slug_prefix.as_deref());

        let mut scan = ArtifactScan::default();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let slug = Slug::from(stem);
            if slug.validate().is_err() {
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            let artifact = match Artifact::parse(raw) {
                Ok(artifact) => artifact,
                Err(err) => {
                    tracing::warn!(slug = %slug, error = %err, "skipping unparseable artifact");
                    if prefix.map_or(true, |p| slug.0.starts_with(p)) {
                        scan.unreadable.push(UnreadableArtifact {
                            slug,
                            reason: err.to_string(),
                        });
                    }
                    continue;
                }
            };
            let manifest = artifact.manifest(&slug);
            if filter.map_or(true, |f| f.matches(&manifest)) {
                scan.manifests.push(manifest);
            }
        }
        scan.manifests.sort_by(|a, b| a.slug.cmp(&b.slug));
        scan.unreadable.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(scan)
    }

    /// Read and decompose `artifacts/<slug>.md`.
    pub fn read_artifact(&self, slug: &Slug) -> Result<Artifact, StoreError> {
        slug.validate()?;
        let path = self.artifact_path(slug);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    slug: slug.0.clone(),
                })
            }
            Err(err) => return Err(io_err(&path, err)),
        };
        Artifact::parse(raw).map_err(|source| StoreError::ArtifactParse {
            slug: slug.0.clone(),
            source,
        })
    }

    /// Atomically write `raw` to `artifacts/<slug>.md`, verbatim.
    ///
    /// The document must parse and must not carry a lower `version` than the
    /// stored copy.
    pub fn write_artifact(&self, slug: &Slug, raw: &str) -> Result<PathBuf, StoreError> {
        slug.validate()?;
        let incoming = Artifact::parse(raw).map_err(|source| StoreError::ArtifactParse {
            slug: slug.0.clone(),
            source,
        })?;

        match self.read_artifact(slug) {
            Ok(current) if current.version() > incoming.version() => {
                return Err(StoreError::VersionRegression {
                    slug: slug.0.clone(),
                    current: current.version(),
                    attempted: incoming.version(),
                });
            }
            Ok(_) | Err(StoreError::NotFound { .. }) | Err(StoreError::ArtifactParse { .. }) => {}
            Err(err) => return Err(err),
        }

        let path = self.artifact_path(slug);
        atomic_write(&path, raw.as_bytes())?;
        tracing::debug!(slug = %slug, version = incoming.version(), "artifact written");
        Ok(path)
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    /// Signals with `timestamp > since` (all when `since` is `None`), ascending.
    pub fn read_signals_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<ExportedSignalBatch, StoreError> {
        let mut signals: Vec<Signal> = self
            .read_signal_log()?
            .into_iter()
            .filter(|s| since.map_or(true, |cursor| s.timestamp > cursor))
            .collect();
        signals.sort_by_key(|s| s.timestamp);
        Ok(ExportedSignalBatch { since, signals })
    }

    /// Append the batch's signals that are not already in the log.
    ///
    /// Returns the number of signals appended.
    pub fn write_signals(&self, batch: &ExportedSignalBatch) -> Result<usize, StoreError> {
        let existing = self.read_signal_log()?;
        let mut fresh: Vec<&Signal> = Vec::new();
        for signal in &batch.signals {
            let seen = existing.iter().any(|s| s.same_observation(signal))
                || fresh.iter().any(|s| s.same_observation(signal));
            if !seen {
                fresh.push(signal);
            }
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        let path = self.signals_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let mut buf = String::new();
        for signal in &fresh {
            buf.push_str(&serde_json::to_string(signal)?);
            buf.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.write_all(buf.as_bytes())
            .map_err(|e| io_err(&path, e))?;
        file.sync_all().map_err(|e| io_err(&path, e))?;
        Ok(fresh.len())
    }

    fn read_signal_log(&self) -> Result<Vec<Signal>, StoreError> {
        let path = self.signals_path();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(io_err(&path, err)),
        };
        let mut signals = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let signal = serde_json::from_str(line).map_err(|source| StoreError::SignalLog {
                path: path.clone(),
                line: idx + 1,
                source,
            })?;
            signals.push(signal);
        }
        Ok(signals)
    }
}

/// Write `bytes` to `<path>.agora.tmp`, then rename over `path`.
///
/// Creates parent directories. The temp file is removed if the rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = PathBuf::from(format!("{}.agora.tmp", path.display()));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
