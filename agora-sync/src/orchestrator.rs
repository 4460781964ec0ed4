//! Sync orchestrator: one logical pass against one remote.
//!
//! ```text
//! connect → list remote → plan against local → pull / merge → push
//!         → import signals → save state → advance cursor → disconnect
//! ```
//!
//! `disconnect` runs on every exit path of [`SyncOrchestrator::run_with`];
//! the first error from the pass is surfaced after cleanup.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;

use agora_core::{
    config, AgentId, Artifact, ArtifactFilter, ConfigError, ProvenanceAction, ProvenanceEntry,
    RemoteArtifactManifest, Slug, SyncConfig, SyncRemote, TieBreakPolicy, WorkspaceStore,
};

use crate::error::{ErrorKind, SyncError};
use crate::factory::create_transport;
use crate::importer::{ImportReport, ReputationState, SignalImporter};
use crate::state;
use crate::transport::local::blocking;
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Plan and report only: no artifact writes, no state saves, no cursor move.
    pub dry_run: bool,
}

/// Per-slug decisions for one pass. Every listed slug appears in exactly one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    /// Remote is newer, or absent locally.
    pub pulls: Vec<Slug>,
    /// Local is newer, or absent remotely.
    pub pushes: Vec<Slug>,
    /// Equal versions, different bodies, resolved toward the remote.
    pub merges: Vec<Slug>,
    pub unchanged: Vec<Slug>,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.pulls.is_empty() && self.pushes.is_empty() && self.merges.is_empty()
    }
}

/// Compare local and remote manifests. Pure; output lists are sorted by slug.
pub fn plan(
    local: &[RemoteArtifactManifest],
    remote: &[RemoteArtifactManifest],
    tie_break: TieBreakPolicy,
) -> SyncPlan {
    let mut sides: BTreeMap<&Slug, (Option<&RemoteArtifactManifest>, Option<&RemoteArtifactManifest>)> =
        BTreeMap::new();
    for m in local {
        sides.entry(&m.slug).or_default().0 = Some(m);
    }
    for m in remote {
        sides.entry(&m.slug).or_default().1 = Some(m);
    }

    let mut plan = SyncPlan::default();
    for (slug, pair) in sides {
        let slug = slug.clone();
        match pair {
            (Some(_), None) => plan.pushes.push(slug),
            (None, Some(_)) => plan.pulls.push(slug),
            (Some(l), Some(r)) if r.version > l.version => plan.pulls.push(slug),
            (Some(l), Some(r)) if l.version > r.version => plan.pushes.push(slug),
            (Some(l), Some(r)) if l.content_hash == r.content_hash => plan.unchanged.push(slug),
            (Some(_), Some(_)) => match tie_break {
                TieBreakPolicy::RemoteWins => plan.merges.push(slug),
                TieBreakPolicy::LocalWins => plan.pushes.push(slug),
            },
            (None, None) => {}
        }
    }
    plan
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

/// A failure scoped to one artifact; the pass carried on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDiagnostic {
    pub slug: Slug,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// [`SyncRemote::key`] of the remote.
    pub remote: String,
    /// Remote commit observed at connect (git only).
    pub head: Option<String>,
    pub plan: SyncPlan,
    pub pulled: Vec<Slug>,
    pub pushed: Vec<Slug>,
    pub merged: Vec<Slug>,
    /// Pushes dropped because the remote caught up during a retry.
    pub superseded: Vec<Slug>,
    pub push_retries: u32,
    pub diagnostics: Vec<ArtifactDiagnostic>,
    pub signals: ImportReport,
    /// Cursor stored after the pass.
    pub cursor: Option<DateTime<Utc>>,
    pub dry_run: bool,
}

impl SyncReport {
    fn new(remote: &SyncRemote, dry_run: bool) -> Self {
        Self {
            remote: remote.key(),
            head: None,
            plan: SyncPlan::default(),
            pulled: Vec::new(),
            pushed: Vec::new(),
            merged: Vec::new(),
            superseded: Vec::new(),
            push_retries: 0,
            diagnostics: Vec::new(),
            signals: ImportReport::default(),
            cursor: None,
            dry_run,
        }
    }

    fn diagnose(&mut self, slug: &Slug, err: &SyncError) {
        tracing::warn!(remote = %self.remote, slug = %slug, error = %err, "artifact skipped");
        self.diagnostics.push(ArtifactDiagnostic {
            slug: slug.clone(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

enum PushOutcome {
    Pushed,
    Superseded,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives sync passes for one local workspace.
///
/// Clones share the set of in-flight remotes, so at most one pass per remote
/// key runs at a time across all clones.
#[derive(Debug, Clone)]
pub struct SyncOrchestrator {
    local: WorkspaceStore,
    config: SyncConfig,
    active: Arc<Mutex<HashSet<String>>>,
}

/// Releases a remote key when the pass ends, including on cancellation.
struct PassGuard {
    active: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl SyncOrchestrator {
    pub fn new(local: WorkspaceStore, config: SyncConfig) -> Self {
        Self {
            local,
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Open the workspace at `root` with its `.agora/config.yaml`.
    pub fn open_at(root: &Path) -> Result<Self, SyncError> {
        let local = WorkspaceStore::open(root)?;
        let config = config::load_at(root)?;
        Ok(Self::new(local, config))
    }

    pub fn local(&self) -> &WorkspaceStore {
        &self.local
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Resolve a configured remote by name and run a pass against it.
    pub async fn run_named(&self, name: &str, options: SyncOptions) -> Result<SyncReport, SyncError> {
        let remote = self
            .config
            .remote(name)
            .ok_or_else(|| ConfigError::UnknownRemote(name.to_string()))??;
        self.run(&remote, options).await
    }

    /// Build the remote's transport and run a pass.
    pub async fn run(&self, remote: &SyncRemote, options: SyncOptions) -> Result<SyncReport, SyncError> {
        let mut transport = create_transport(remote, &self.config.agent)?;
        self.run_with(transport.as_mut(), remote, options).await
    }

    /// Run a pass over a caller-supplied, disconnected transport.
    pub async fn run_with(
        &self,
        transport: &mut dyn Transport,
        remote: &SyncRemote,
        options: SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let _guard = self.claim(remote)?;
        let mut report = SyncReport::new(remote, options.dry_run);
        tracing::info!(remote = %report.remote, dry_run = options.dry_run, "sync pass started");

        let outcome = self.pass(transport, remote, options, &mut report).await;
        let cleanup = transport.disconnect().await;

        match (outcome, cleanup) {
            (Err(err), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    tracing::warn!(remote = %report.remote, error = %cleanup_err, "disconnect failed after pass error");
                }
                tracing::warn!(remote = %report.remote, error = %err, "sync pass failed");
                Err(err)
            }
            (Ok(()), Err(cleanup_err)) => Err(cleanup_err),
            (Ok(()), Ok(())) => {
                tracing::info!(
                    remote = %report.remote,
                    pulled = report.pulled.len(),
                    pushed = report.pushed.len(),
                    merged = report.merged.len(),
                    diagnostics = report.diagnostics.len(),
                    signals = report.signals.applied,
                    "sync pass finished"
                );
                Ok(report)
            }
        }
    }

    fn claim(&self, remote: &SyncRemote) -> Result<PassGuard, SyncError> {
        let key = remote.key();
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key.clone()) {
            return Err(SyncError::PassInProgress { remote: key });
        }
        Ok(PassGuard {
            active: Arc::clone(&self.active),
            key,
        })
    }

    async fn pass(
        &self,
        transport: &mut dyn Transport,
        remote: &SyncRemote,
        options: SyncOptions,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let info = transport.connect(remote).await?;
        report.head = info.head;

        let remote_scan = transport.scan_artifacts(None).await?;
        let store = self.local.clone();
        let local_manifests = blocking(move || store.list_manifests(None)).await?;
        report.plan = plan(&local_manifests, &remote_scan.manifests, self.config.tie_break);
        // A remote copy that does not parse is reported, never overwritten.
        for bad in remote_scan.unreadable {
            report.plan.pushes.retain(|slug| slug != &bad.slug);
            let err = SyncError::Parse {
                slug: bad.slug.to_string(),
                reason: bad.reason,
            };
            report.diagnose(&bad.slug, &err);
        }
        tracing::info!(
            remote = %report.remote,
            pulls = report.plan.pulls.len(),
            pushes = report.plan.pushes.len(),
            merges = report.plan.merges.len(),
            unchanged = report.plan.unchanged.len(),
            "sync plan"
        );

        if !options.dry_run {
            let local_hashes: BTreeMap<&Slug, &str> = local_manifests
                .iter()
                .map(|m| (&m.slug, m.content_hash.as_str()))
                .collect();
            self.pull(&*transport, remote, &local_hashes, report).await?;
            self.push_all(transport, remote, report).await?;
        }

        self.import_signals(&*transport, remote, options, report).await
    }

    /// Apply pulls and merges. Bodies are read concurrently, written in order.
    async fn pull(
        &self,
        transport: &dyn Transport,
        remote: &SyncRemote,
        local_hashes: &BTreeMap<&Slug, &str>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let incoming: Vec<Slug> = report
            .plan
            .pulls
            .iter()
            .chain(report.plan.merges.iter())
            .cloned()
            .collect();
        let reads = join_all(incoming.iter().map(|slug| transport.read_artifact(slug))).await;

        for (slug, read) in incoming.into_iter().zip(reads) {
            let prior_hash = if report.plan.merges.contains(&slug) {
                local_hashes.get(&slug).map(|h| h.to_string())
            } else {
                None
            };
            let applied = match read {
                Ok(artifact) => {
                    self.apply_incoming(&slug, artifact, remote, prior_hash.as_deref())
                        .await
                }
                Err(err) => Err(err),
            };
            match applied {
                Ok(version) => {
                    tracing::info!(remote = %report.remote, slug = %slug, version, merged = prior_hash.is_some(), "artifact pulled");
                    if prior_hash.is_some() {
                        report.merged.push(slug);
                    } else {
                        report.pulled.push(slug);
                    }
                }
                Err(err) if err.is_per_artifact() => report.diagnose(&slug, &err),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Stamp a remote copy with provenance and write it locally. Local
    /// provenance entries the remote copy lacks are carried over.
    async fn apply_incoming(
        &self,
        slug: &Slug,
        artifact: Artifact,
        remote: &SyncRemote,
        prior_hash: Option<&str>,
    ) -> Result<u64, SyncError> {
        let entry = match prior_hash {
            None => self.entry(ProvenanceAction::Synced),
            Some(prior) => self
                .entry(ProvenanceAction::Merged)
                .with_message(format!("remote copy replaced local content {prior}")),
        }
        .with_sync_source(remote.url.clone());

        let store = self.local.clone();
        let owned = slug.clone();
        let history = match blocking(move || store.read_artifact(&owned)).await {
            Ok(local) => local.frontmatter.provenance,
            Err(SyncError::NotFound { .. }) => Vec::new(),
            Err(SyncError::Parse { reason, .. }) => {
                tracing::warn!(slug = %slug, error = %reason, "local copy unreadable; remote copy replaces it");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let stamped = stamp(slug, &artifact, &history, entry)?;
        let version = stamped.version();
        let store = self.local.clone();
        let slug = slug.clone();
        blocking(move || store.write_artifact(&slug, &stamped.raw)).await?;
        Ok(version)
    }

    async fn push_all(
        &self,
        transport: &mut dyn Transport,
        remote: &SyncRemote,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for slug in report.plan.pushes.clone() {
            match self.push_one(transport, remote, &slug, report).await {
                Ok(PushOutcome::Pushed) => report.pushed.push(slug),
                Ok(PushOutcome::Superseded) => report.superseded.push(slug),
                Err(err) if err.is_per_artifact() => report.diagnose(&slug, &err),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Write one local artifact to the remote.
    ///
    /// A rejected push is retried at most `max_push_retries` times against a
    /// fresh connection, and dropped if the remote has meanwhile reached the
    /// local version.
    async fn push_one(
        &self,
        transport: &mut dyn Transport,
        remote: &SyncRemote,
        slug: &Slug,
        report: &mut SyncReport,
    ) -> Result<PushOutcome, SyncError> {
        let store = self.local.clone();
        let owned = slug.clone();
        let artifact = blocking(move || store.read_artifact(&owned)).await?;
        let entry = self
            .entry(ProvenanceAction::Synced)
            .with_sync_source(self.local.root().display().to_string());
        let outgoing = stamp(slug, &artifact, &[], entry)?;

        let mut attempts = 0;
        loop {
            let err = match transport.write_artifact(slug, &outgoing.raw).await {
                Ok(()) => {
                    tracing::info!(remote = %report.remote, slug = %slug, version = outgoing.version(), "artifact pushed");
                    return Ok(PushOutcome::Pushed);
                }
                Err(err) => err,
            };
            if err.kind() != ErrorKind::PushRejected || attempts >= self.config.max_push_retries {
                return Err(err);
            }
            attempts += 1;
            report.push_retries += 1;
            tracing::warn!(remote = %report.remote, slug = %slug, attempt = attempts, error = %err, "push rejected; refreshing remote");

            transport.disconnect().await?;
            report.head = transport.connect(remote).await?.head;
            let filter = ArtifactFilter::slug_prefix(slug.as_str());
            let current = transport
                .list_artifacts(Some(&filter))
                .await?
                .into_iter()
                .find(|m| &m.slug == slug);
            if current.is_some_and(|m| m.version >= outgoing.version()) {
                tracing::info!(remote = %report.remote, slug = %slug, "remote caught up; push dropped");
                return Ok(PushOutcome::Superseded);
            }
        }
    }

    /// Read signals past the stored cursor and fold them in. The cursor is
    /// saved only after the reputation state.
    async fn import_signals(
        &self,
        transport: &dyn Transport,
        remote: &SyncRemote,
        options: SyncOptions,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let root = self.local.root().to_path_buf();
        let mut sync_state = blocking(move || state::load_at(&root)).await?;
        let cursor = sync_state.cursor(remote);
        let batch = transport.read_signals_since(cursor).await?;

        let store = self.local.clone();
        let mut reputation = blocking(move || ReputationState::load(&store)).await?;
        let importer = SignalImporter::new(self.config.reputation_params());
        report.signals = importer.import(&mut reputation, &batch);

        if options.dry_run {
            report.cursor = cursor;
            return Ok(());
        }

        let store = self.local.clone();
        blocking(move || reputation.save(&store)).await?;

        sync_state.record_pass(remote, report.signals.max_timestamp, Utc::now());
        report.cursor = sync_state.cursor(remote);
        let root = self.local.root().to_path_buf();
        blocking(move || state::save_at(&root, &sync_state)).await?;
        Ok(())
    }

    fn entry(&self, action: ProvenanceAction) -> ProvenanceEntry {
        ProvenanceEntry::new(self.agent().clone(), action, Utc::now())
    }

    fn agent(&self) -> &AgentId {
        &self.config.agent
    }
}

fn stamp(
    slug: &Slug,
    artifact: &Artifact,
    history: &[ProvenanceEntry],
    entry: ProvenanceEntry,
) -> Result<Artifact, SyncError> {
    artifact
        .with_provenance_from(history, entry)
        .map_err(|e| SyncError::Parse {
            slug: slug.to_string(),
            reason: e.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
