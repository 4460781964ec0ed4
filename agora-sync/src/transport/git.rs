//! Git-Remote transport.
//!
//! ## Lifecycle
//!
//! ```text
//! disconnected ──connect──▶ cloning ──▶ connected ──disconnect──▶ disconnected
//!                              │                       ▲
//!                              └──── clone failure ────┘
//! ```
//!
//! `connect` shallow-clones one branch (`--depth 1`) into a fresh temp
//! directory and connects an owned [`LocalTransport`] to it; every read is
//! delegated there. `write_artifact` writes into the clone, then stages,
//! commits and pushes exactly that path. The clone directory is held by a
//! [`TempDir`] guard, so it is removed on disconnect, on drop, and when a
//! `connect` future is cancelled mid-clone.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio::process::Command;

use agora_core::store::ARTIFACTS_DIR;
use agora_core::{
    AgentId, Artifact, ArtifactFilter, ArtifactScan, ExportedSignalBatch, RemoteArtifactManifest,
    Slug, SyncRemote, TransportKind,
};

use super::{LocalTransport, RemoteWorkspaceInfo, Transport};
use crate::error::{io_err, SyncError};

const CLONE_PREFIX: &str = "agora-clone-";

pub struct GitRemoteTransport {
    identity: AgentId,
    clone_parent: Option<PathBuf>,
    state: GitState,
}

enum GitState {
    Disconnected,
    Connected(Box<Connection>),
}

struct Connection {
    // Field order matters: the local transport is dropped before the clone.
    local: LocalTransport,
    clone: TempDir,
    url: String,
    branch: String,
}

impl GitRemoteTransport {
    /// `identity` authors the sync commits.
    pub fn new(identity: AgentId) -> Self {
        Self {
            identity,
            clone_parent: None,
            state: GitState::Disconnected,
        }
    }

    /// Create clones under `dir` instead of the system temp directory.
    pub fn with_clone_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.clone_parent = Some(dir.into());
        self
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, GitState::Connected(_))
    }

    /// Working tree of the current clone, while connected.
    pub fn clone_root(&self) -> Option<&Path> {
        match &self.state {
            GitState::Connected(conn) => Some(conn.clone.path()),
            GitState::Disconnected => None,
        }
    }

    fn connection(&self, operation: &'static str) -> Result<&Connection, SyncError> {
        match &self.state {
            GitState::Connected(conn) => Ok(conn),
            GitState::Disconnected => Err(SyncError::NotConnected { operation }),
        }
    }

    fn connection_mut(&mut self, operation: &'static str) -> Result<&mut Connection, SyncError> {
        match &mut self.state {
            GitState::Connected(conn) => Ok(conn),
            GitState::Disconnected => Err(SyncError::NotConnected { operation }),
        }
    }

    fn make_clone_dir(&self) -> Result<TempDir, SyncError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(CLONE_PREFIX);
        match &self.clone_parent {
            Some(parent) => builder.tempdir_in(parent).map_err(|e| io_err(parent, e)),
            None => builder.tempdir().map_err(|e| io_err(std::env::temp_dir(), e)),
        }
    }

    fn git(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-c")
            .arg(format!("user.name={}", self.identity))
            .arg("-c")
            .arg(format!("user.email={}@agora.invalid", self.identity))
            .args(["-c", "commit.gpgsign=false"])
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_LITERAL_PATHSPECS", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn run_checked(&self, dir: &Path, args: &[&str]) -> Result<Output, SyncError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        tracing::debug!(dir = %dir.display(), ?args, "git");
        let output = self
            .git(Some(dir))
            .args(args)
            .output()
            .await
            .map_err(|e| io_err(dir, e))?;
        if !output.status.success() {
            return Err(SyncError::Git {
                command,
                stderr: stderr_of(&output),
            });
        }
        Ok(output)
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[async_trait]
impl Transport for GitRemoteTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::GitRemote
    }

    async fn connect(&mut self, remote: &SyncRemote) -> Result<RemoteWorkspaceInfo, SyncError> {
        if let GitState::Connected(conn) = &self.state {
            return Err(SyncError::AlreadyConnected {
                location: conn.url.clone(),
            });
        }

        let branch = remote.branch().to_string();
        let clone = self.make_clone_dir()?;
        tracing::info!(url = %remote.url, branch = %branch, "cloning remote");

        let output = self
            .git(None)
            .args(["clone", "--depth", "1", "--single-branch", "--branch"])
            .arg(&branch)
            .arg("--")
            .arg(&remote.url)
            .arg(clone.path())
            .output()
            .await
            .map_err(|e| SyncError::CloneFailed {
                url: remote.url.clone(),
                branch: branch.clone(),
                stderr: format!("failed to run git: {e}"),
            })?;
        if !output.status.success() {
            // `clone` drops here and removes the partial directory.
            return Err(SyncError::CloneFailed {
                url: remote.url.clone(),
                branch,
                stderr: stderr_of(&output),
            });
        }

        let head = self
            .run_checked(clone.path(), &["rev-parse", "HEAD"])
            .await?;
        let head = String::from_utf8_lossy(&head.stdout).trim().to_string();

        let mut local = LocalTransport::new();
        local
            .connect(&SyncRemote::local(clone.path().display().to_string()))
            .await?;

        let info = RemoteWorkspaceInfo {
            kind: TransportKind::GitRemote,
            root: clone.path().to_path_buf(),
            branch: Some(branch.clone()),
            head: Some(head),
        };
        self.state = GitState::Connected(Box::new(Connection {
            local,
            clone,
            url: remote.url.clone(),
            branch,
        }));
        Ok(info)
    }

    async fn list_artifacts(
        &self,
        filter: Option<&ArtifactFilter>,
    ) -> Result<Vec<RemoteArtifactManifest>, SyncError> {
        self.connection("list_artifacts")?
            .local
            .list_artifacts(filter)
            .await
    }

    async fn scan_artifacts(&self, filter: Option<&ArtifactFilter>) -> Result<ArtifactScan, SyncError> {
        self.connection("scan_artifacts")?
            .local
            .scan_artifacts(filter)
            .await
    }

    async fn read_artifact(&self, slug: &Slug) -> Result<Artifact, SyncError> {
        self.connection("read_artifact")?
            .local
            .read_artifact(slug)
            .await
    }

    async fn write_artifact(&mut self, slug: &Slug, raw: &str) -> Result<(), SyncError> {
        let conn = self.connection_mut("write_artifact")?;
        conn.local.write_artifact(slug, raw).await?;

        let dir = conn.clone.path().to_path_buf();
        let branch = conn.branch.clone();
        let path = format!("{ARTIFACTS_DIR}/{}.md", slug);

        self.run_checked(&dir, &["add", "--", path.as_str()]).await?;

        let staged = self
            .git(Some(&dir))
            .args(["diff", "--cached", "--quiet", "--", path.as_str()])
            .output()
            .await
            .map_err(|e| io_err(&dir, e))?;
        match staged.status.code() {
            Some(0) => {
                tracing::debug!(slug = %slug, "artifact unchanged in clone; nothing to push");
                return Ok(());
            }
            Some(1) => {}
            _ => {
                return Err(SyncError::Git {
                    command: "diff".to_string(),
                    stderr: stderr_of(&staged),
                })
            }
        }

        let message = format!("sync: update artifact {slug}");
        self.run_checked(&dir, &["commit", "-m", message.as_str(), "--", path.as_str()])
            .await?;

        let refspec = format!("HEAD:refs/heads/{branch}");
        let pushed = self
            .git(Some(&dir))
            .args(["push", "origin", refspec.as_str()])
            .output()
            .await
            .map_err(|e| io_err(&dir, e))?;
        if !pushed.status.success() {
            return Err(SyncError::PushRejected {
                slug: slug.to_string(),
                reason: stderr_of(&pushed),
            });
        }
        tracing::info!(slug = %slug, branch = %branch, "artifact pushed");
        Ok(())
    }

    async fn read_signals_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<ExportedSignalBatch, SyncError> {
        self.connection("read_signals_since")?
            .local
            .read_signals_since(since)
            .await
    }

    async fn write_signals(&mut self, _batch: &ExportedSignalBatch) -> Result<(), SyncError> {
        Err(SyncError::Unsupported {
            operation: "write_signals",
            redirect: "import signal batches through SignalImporter, which applies decay and EWMA",
        })
    }

    async fn disconnect(&mut self) -> Result<(), SyncError> {
        let state = std::mem::replace(&mut self.state, GitState::Disconnected);
        let GitState::Connected(conn) = state else {
            return Ok(());
        };
        let Connection {
            mut local, clone, ..
        } = *conn;
        local.disconnect().await?;
        let path = clone.path().to_path_buf();
        clone.close().map_err(|e| io_err(&path, e))?;
        tracing::debug!(dir = %path.display(), "clone removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use agora_core::Signal;

    fn batch() -> ExportedSignalBatch {
        ExportedSignalBatch {
            since: None,
            signals: vec![Signal {
                source: AgentId::from("peer"),
                dimension: "accuracy".into(),
                domain: None,
                score: 0.9,
                timestamp: Utc::now(),
                evidence: None,
                message: None,
            }],
        }
    }

    #[tokio::test]
    async fn write_signals_is_always_unsupported() {
        let mut transport = GitRemoteTransport::new(AgentId::from("agora"));
        for b in [ExportedSignalBatch::default(), batch()] {
            let err = transport.write_signals(&b).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
            assert!(err.to_string().contains("SignalImporter"));
        }
    }

    #[tokio::test]
    async fn reads_while_disconnected_violate_contract() {
        let transport = GitRemoteTransport::new(AgentId::from("agora"));
        let err = transport.read_artifact(&Slug::from("x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
        let err = transport.read_signals_since(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_a_noop() {
        let mut transport = GitRemoteTransport::new(AgentId::from("agora"));
        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }
}
