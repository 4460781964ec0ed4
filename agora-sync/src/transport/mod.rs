//! Transport contract shared by every replication medium.
//!
//! | Variant       | Medium                                   |
//! |---------------|------------------------------------------|
//! | [`LocalTransport`] | direct filesystem, via `WorkspaceStore` |
//! | [`GitRemoteTransport`] | throwaway shallow clone + commit/push |
//!
//! Reads take `&self` and may run concurrently. Writes take `&mut self`, so a
//! single owner serializes them.

pub mod git;
pub mod local;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use agora_core::{
    Artifact, ArtifactFilter, ArtifactScan, ExportedSignalBatch, RemoteArtifactManifest, Slug,
    SyncRemote, TransportKind,
};

use crate::error::SyncError;

pub use git::GitRemoteTransport;
pub use local::LocalTransport;

/// Handshake result of [`Transport::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWorkspaceInfo {
    pub kind: TransportKind,
    /// Directory all subsequent calls are scoped to (clone root for git).
    pub root: PathBuf,
    pub branch: Option<String>,
    /// Commit checked out by the clone.
    pub head: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn connect(&mut self, remote: &SyncRemote) -> Result<RemoteWorkspaceInfo, SyncError>;

    async fn list_artifacts(
        &self,
        filter: Option<&ArtifactFilter>,
    ) -> Result<Vec<RemoteArtifactManifest>, SyncError>;

    /// [`list_artifacts`](Self::list_artifacts) plus the artifacts on the
    /// medium that could not be parsed. Media that cannot tell report none.
    async fn scan_artifacts(&self, filter: Option<&ArtifactFilter>) -> Result<ArtifactScan, SyncError> {
        Ok(ArtifactScan {
            manifests: self.list_artifacts(filter).await?,
            unreadable: Vec::new(),
        })
    }

    async fn read_artifact(&self, slug: &Slug) -> Result<Artifact, SyncError>;

    async fn write_artifact(&mut self, slug: &Slug, raw: &str) -> Result<(), SyncError>;

    async fn read_signals_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<ExportedSignalBatch, SyncError>;

    async fn write_signals(&mut self, batch: &ExportedSignalBatch) -> Result<(), SyncError>;

    /// Release every resource. Idempotent; safe after a failed `connect`.
    async fn disconnect(&mut self) -> Result<(), SyncError>;
}
