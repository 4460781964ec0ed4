//! Local transport: the reference implementation every other transport
//! delegates to. Direct filesystem access through [`WorkspaceStore`], run on
//! the blocking pool.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use agora_core::{
    Artifact, ArtifactFilter, ArtifactScan, ExportedSignalBatch, RemoteArtifactManifest, Slug,
    SyncRemote, TransportKind, WorkspaceStore,
};

use super::{RemoteWorkspaceInfo, Transport};
use crate::error::SyncError;

#[derive(Debug, Default)]
pub struct LocalTransport {
    store: Option<WorkspaceStore>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root of the connected workspace, if any.
    pub fn root(&self) -> Option<&Path> {
        self.store.as_ref().map(WorkspaceStore::root)
    }

    fn store(&self, operation: &'static str) -> Result<WorkspaceStore, SyncError> {
        self.store
            .clone()
            .ok_or(SyncError::NotConnected { operation })
    }
}

/// Run a filesystem call on the blocking pool.
pub(crate) async fn blocking<T, E, F>(f: F) -> Result<T, SyncError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<SyncError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?.map_err(Into::into)
}

#[async_trait]
impl Transport for LocalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LocalFs
    }

    async fn connect(&mut self, remote: &SyncRemote) -> Result<RemoteWorkspaceInfo, SyncError> {
        let root = remote.url.clone();
        let store = blocking(move || WorkspaceStore::open(root)).await?;
        let info = RemoteWorkspaceInfo {
            kind: TransportKind::LocalFs,
            root: store.root().to_path_buf(),
            branch: None,
            head: None,
        };
        tracing::debug!(root = %info.root.display(), "local transport connected");
        self.store = Some(store);
        Ok(info)
    }

    async fn list_artifacts(
        &self,
        filter: Option<&ArtifactFilter>,
    ) -> Result<Vec<RemoteArtifactManifest>, SyncError> {
        let store = self.store("list_artifacts")?;
        let filter = filter.cloned();
        blocking(move || store.list_manifests(filter.as_ref())).await
    }

    async fn scan_artifacts(&self, filter: Option<&ArtifactFilter>) -> Result<ArtifactScan, SyncError> {
        let store = self.store("scan_artifacts")?;
        let filter = filter.cloned();
        blocking(move || store.scan_artifacts(filter.as_ref())).await
    }

    async fn read_artifact(&self, slug: &Slug) -> Result<Artifact, SyncError> {
        let store = self.store("read_artifact")?;
        let slug = slug.clone();
        blocking(move || store.read_artifact(&slug)).await
    }

    async fn write_artifact(&mut self, slug: &Slug, raw: &str) -> Result<(), SyncError> {
        let store = self.store("write_artifact")?;
        let slug = slug.clone();
        let raw = raw.to_string();
        blocking(move || store.write_artifact(&slug, &raw)).await?;
        Ok(())
    }

    async fn read_signals_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<ExportedSignalBatch, SyncError> {
        let store = self.store("read_signals_since")?;
        blocking(move || store.read_signals_since(since)).await
    }

    async fn write_signals(&mut self, batch: &ExportedSignalBatch) -> Result<(), SyncError> {
        let store = self.store("write_signals")?;
        let batch = batch.clone();
        let appended = blocking(move || store.write_signals(&batch)).await?;
        tracing::debug!(appended, "signals written");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SyncError> {
        self.store = None;
        Ok(())
    }
}
