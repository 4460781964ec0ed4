//! Full sync passes between two on-disk workspaces over the local transport.

use std::path::Path;

use agora_core::artifact::hash_body;
use agora_core::{
    AgentId, Artifact, ArtifactFilter, ExportedSignalBatch, Frontmatter, ProvenanceAction,
    ProvenanceEntry, RemoteArtifactManifest, Signal, Slug, SyncConfig, SyncRemote, TransportKind,
    WorkspaceStore,
};
use agora_sync::{
    create_transport_from, state, ErrorKind, LocalTransport, RemoteWorkspaceInfo,
    ReputationState, SyncError, SyncOptions, SyncOrchestrator, Transport,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn workspace() -> (TempDir, WorkspaceStore) {
    let tmp = TempDir::new().expect("tempdir");
    let store = WorkspaceStore::init(tmp.path()).expect("init");
    (tmp, store)
}

fn put(store: &WorkspaceStore, slug: &str, version: u64, body: &str) {
    let artifact = Artifact::new(Frontmatter::new(version), body).expect("render");
    store
        .write_artifact(&Slug::from(slug), &artifact.raw)
        .expect("write");
}

fn put_with_history(
    store: &WorkspaceStore,
    slug: &str,
    version: u64,
    body: &str,
    history: &[ProvenanceEntry],
) {
    let mut frontmatter = Frontmatter::new(version);
    frontmatter.provenance = history.to_vec();
    let artifact = Artifact::new(frontmatter, body).expect("render");
    store
        .write_artifact(&Slug::from(slug), &artifact.raw)
        .expect("write");
}

fn edit(agent: &str, action: ProvenanceAction, minute: u32) -> ProvenanceEntry {
    ProvenanceEntry::new(AgentId::from(agent), action, at(minute))
}

fn get(store: &WorkspaceStore, slug: &str) -> Artifact {
    store.read_artifact(&Slug::from(slug)).expect("read")
}

fn remote_for(root: &Path) -> SyncRemote {
    SyncRemote::local(root.display().to_string())
}

fn orchestrator(store: &WorkspaceStore) -> SyncOrchestrator {
    SyncOrchestrator::new(store.clone(), SyncConfig::default())
}

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
}

fn signal(dimension: &str, score: f64, timestamp: DateTime<Utc>) -> Signal {
    Signal {
        source: AgentId::from("reviewer"),
        dimension: dimension.into(),
        domain: None,
        score,
        timestamp,
        evidence: None,
        message: None,
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn newer_remote_version_is_pulled() {
    init_tracing();
    let (_l, local) = workspace();
    let (r, remote) = workspace();
    put(&local, "artifact:plan", 2, "old plan\n");
    put(&remote, "artifact:plan", 3, "new plan\n");
    let remote_raw = get(&remote, "artifact:plan").raw;

    let report = orchestrator(&local)
        .run(&remote_for(r.path()), SyncOptions::default())
        .await
        .expect("pass");

    assert_eq!(report.pulled, vec![Slug::from("artifact:plan")]);
    assert!(report.pushed.is_empty());
    let pulled = get(&local, "artifact:plan");
    assert_eq!(pulled.version(), 3);
    assert_eq!(pulled.content, "new plan\n");
    let last = pulled.frontmatter.provenance.last().expect("provenance");
    assert_eq!(last.action, ProvenanceAction::Synced);
    assert_eq!(last.sync_source.as_deref(), Some(r.path().display().to_string().as_str()));
    assert_eq!(get(&remote, "artifact:plan").raw, remote_raw);
}

#[tokio::test]
async fn newer_local_version_is_pushed_exactly_once() {
    init_tracing();
    let (_l, local) = workspace();
    let (r, remote) = workspace();
    put(&local, "notes", 3, "local edit\n");
    put(&remote, "notes", 2, "stale\n");
    let orch = orchestrator(&local);
    let target = remote_for(r.path());

    let first = orch.run(&target, SyncOptions::default()).await.expect("first pass");
    assert_eq!(first.pushed, vec![Slug::from("notes")]);
    let pushed = get(&remote, "notes");
    assert_eq!(pushed.version(), 3);
    assert_eq!(pushed.content, "local edit\n");

    let second = orch.run(&target, SyncOptions::default()).await.expect("second pass");
    assert!(second.pushed.is_empty());
    assert!(second.plan.is_noop());
    assert_eq!(second.plan.unchanged, vec![Slug::from("notes")]);
}

#[tokio::test]
async fn equal_versions_with_different_bodies_resolve_to_remote() {
    init_tracing();
    let (_l, local) = workspace();
    let (r, remote) = workspace();
    put(&local, "design", 2, "local take\n");
    put(&remote, "design", 2, "remote take\n");
    let orch = orchestrator(&local);
    let target = remote_for(r.path());

    let report = orch.run(&target, SyncOptions::default()).await.expect("pass");
    assert_eq!(report.merged, vec![Slug::from("design")]);

    let merged = get(&local, "design");
    assert_eq!(merged.version(), 2);
    assert_eq!(merged.content, "remote take\n");
    let merges: Vec<_> = merged
        .frontmatter
        .provenance
        .iter()
        .filter(|p| p.action == ProvenanceAction::Merged)
        .collect();
    assert_eq!(merges.len(), 1);
    let message = merges[0].message.as_deref().unwrap_or_default();
    assert!(message.contains(&hash_body("local take\n")));

    let again = orch.run(&target, SyncOptions::default()).await.expect("second pass");
    assert!(again.plan.is_noop());
}

#[tokio::test]
async fn incoming_copies_keep_local_provenance() {
    let (_l, local) = workspace();
    let (r, remote) = workspace();
    let created = edit("alice", ProvenanceAction::Created, 0);
    let ours = edit("local-editor", ProvenanceAction::Updated, 10);
    let theirs = edit("remote-editor", ProvenanceAction::Updated, 11);
    put_with_history(&local, "design", 2, "local take\n", &[created.clone(), ours.clone()]);
    put_with_history(&remote, "design", 2, "remote take\n", &[created.clone(), theirs.clone()]);
    put_with_history(&local, "roadmap", 1, "draft\n", &[created.clone(), ours.clone()]);
    put_with_history(&remote, "roadmap", 2, "final\n", &[created.clone(), theirs.clone()]);

    let report = orchestrator(&local)
        .run(&remote_for(r.path()), SyncOptions::default())
        .await
        .expect("pass");
    assert_eq!(report.merged, vec![Slug::from("design")]);
    assert_eq!(report.pulled, vec![Slug::from("roadmap")]);

    for (slug, action) in [("design", ProvenanceAction::Merged), ("roadmap", ProvenanceAction::Synced)] {
        let history = get(&local, slug).frontmatter.provenance;
        for kept in [&created, &ours, &theirs] {
            assert!(history.contains(kept), "{slug} lost {}", kept.agent);
        }
        assert_eq!(history.iter().filter(|p| **p == created).count(), 1, "{slug}");
        assert_eq!(history.last().map(|p| p.action), Some(action), "{slug}");
    }
}

#[tokio::test]
async fn one_sided_artifacts_flow_both_ways() {
    let (_l, local) = workspace();
    let (r, remote) = workspace();
    put(&local, "mine", 1, "a\n");
    put(&remote, "theirs", 4, "b\n");

    let report = orchestrator(&local)
        .run(&remote_for(r.path()), SyncOptions::default())
        .await
        .expect("pass");

    assert_eq!(report.pushed, vec![Slug::from("mine")]);
    assert_eq!(report.pulled, vec![Slug::from("theirs")]);
    assert_eq!(get(&local, "theirs").version(), 4);
    assert_eq!(get(&remote, "mine").version(), 1);
}

#[tokio::test]
async fn versions_never_decrease_on_either_side() {
    let (_l, local) = workspace();
    let (r, remote) = workspace();
    put(&local, "a", 5, "x\n");
    put(&remote, "a", 1, "y\n");
    put(&local, "b", 1, "x\n");
    put(&remote, "b", 9, "y\n");

    orchestrator(&local)
        .run(&remote_for(r.path()), SyncOptions::default())
        .await
        .expect("pass");

    for slug in ["a", "b"] {
        let l = get(&local, slug).version();
        let rv = get(&remote, slug).version();
        assert_eq!(l, rv, "{slug} converged");
    }
    assert_eq!(get(&local, "a").version(), 5);
    assert_eq!(get(&local, "b").version(), 9);
}

#[tokio::test]
async fn dry_run_reports_plan_without_writing() {
    let (l, local) = workspace();
    let (r, remote) = workspace();
    put(&local, "doc", 1, "v1\n");
    put(&remote, "doc", 2, "v2\n");
    remote
        .write_signals(&ExportedSignalBatch {
            since: None,
            signals: vec![signal("accuracy", 0.9, at(1))],
        })
        .expect("signals");

    let report = orchestrator(&local)
        .run(&remote_for(r.path()), SyncOptions { dry_run: true })
        .await
        .expect("pass");

    assert!(report.dry_run);
    assert_eq!(report.plan.pulls, vec![Slug::from("doc")]);
    assert!(report.pulled.is_empty());
    assert_eq!(report.signals.applied, 1);
    assert_eq!(get(&local, "doc").version(), 1);
    assert!(!state::store_path_at(l.path()).exists());
    assert!(!local.dimensions_path().exists());
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signals_are_imported_and_cursor_advances() {
    let (l, local) = workspace();
    let (r, remote) = workspace();
    remote
        .write_signals(&ExportedSignalBatch {
            since: None,
            signals: vec![signal("accuracy", 0.8, at(1)), signal("accuracy", 0.6, at(2))],
        })
        .expect("signals");
    let orch = orchestrator(&local);
    let target = remote_for(r.path());

    let first = orch.run(&target, SyncOptions::default()).await.expect("first");
    assert_eq!(first.signals.applied, 2);
    assert_eq!(first.cursor, Some(at(2)));
    let saved = state::load_at(l.path()).expect("state");
    assert_eq!(saved.cursor(&target), Some(at(2)));

    let second = orch.run(&target, SyncOptions::default()).await.expect("second");
    assert_eq!(second.signals.applied, 0);
    assert_eq!(second.cursor, Some(at(2)));

    let reputation = ReputationState::load(&local).expect("reputation");
    assert_eq!(reputation.get("accuracy").expect("dimension").sample_size, 2);
}

#[tokio::test]
async fn reimport_after_lost_cursor_does_not_double_count() {
    let (l, local) = workspace();
    let (r, remote) = workspace();
    remote
        .write_signals(&ExportedSignalBatch {
            since: None,
            signals: vec![signal("speed", 0.3, at(5))],
        })
        .expect("signals");
    let orch = orchestrator(&local);
    let target = remote_for(r.path());

    orch.run(&target, SyncOptions::default()).await.expect("first");
    let before = ReputationState::load(&local).expect("reputation");
    std::fs::remove_file(state::store_path_at(l.path())).expect("drop cursor");

    let again = orch.run(&target, SyncOptions::default()).await.expect("second");
    assert_eq!(again.signals.applied, 0);
    assert_eq!(again.signals.duplicates, 1);
    assert_eq!(ReputationState::load(&local).expect("reputation"), before);
}

#[tokio::test]
async fn signals_newer_than_cursor_are_picked_up() {
    let (_l, local) = workspace();
    let (r, remote) = workspace();
    let orch = orchestrator(&local);
    let target = remote_for(r.path());
    remote
        .write_signals(&ExportedSignalBatch {
            since: None,
            signals: vec![signal("accuracy", 0.8, at(1))],
        })
        .expect("signals");
    orch.run(&target, SyncOptions::default()).await.expect("first");

    remote
        .write_signals(&ExportedSignalBatch {
            since: None,
            signals: vec![signal("accuracy", 0.2, at(1) + Duration::minutes(30))],
        })
        .expect("more signals");
    let second = orch.run(&target, SyncOptions::default()).await.expect("second");
    assert_eq!(second.signals.applied, 1);
    assert_eq!(second.cursor, Some(at(1) + Duration::minutes(30)));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_local_remote_fails_the_pass() {
    let (_l, local) = workspace();
    let missing = TempDir::new().unwrap().path().join("gone");
    let err = orchestrator(&local)
        .run(&SyncRemote::local(missing.display().to_string()), SyncOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportUnreachable);
}

/// Local transport that cannot read one slug, as if it vanished mid-pass.
struct LosesOne {
    inner: LocalTransport,
    lost: Slug,
}

#[async_trait]
impl Transport for LosesOne {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }
    async fn connect(&mut self, remote: &SyncRemote) -> Result<RemoteWorkspaceInfo, SyncError> {
        self.inner.connect(remote).await
    }
    async fn list_artifacts(
        &self,
        filter: Option<&ArtifactFilter>,
    ) -> Result<Vec<RemoteArtifactManifest>, SyncError> {
        self.inner.list_artifacts(filter).await
    }
    async fn read_artifact(&self, slug: &Slug) -> Result<Artifact, SyncError> {
        if *slug == self.lost {
            return Err(SyncError::NotFound { slug: slug.to_string() });
        }
        self.inner.read_artifact(slug).await
    }
    async fn write_artifact(&mut self, slug: &Slug, raw: &str) -> Result<(), SyncError> {
        self.inner.write_artifact(slug, raw).await
    }
    async fn read_signals_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<ExportedSignalBatch, SyncError> {
        self.inner.read_signals_since(since).await
    }
    async fn write_signals(&mut self, batch: &ExportedSignalBatch) -> Result<(), SyncError> {
        self.inner.write_signals(batch).await
    }
    async fn disconnect(&mut self) -> Result<(), SyncError> {
        self.inner.disconnect().await
    }
}

#[tokio::test]
async fn failed_read_of_one_artifact_does_not_abort_the_pass() {
    init_tracing();
    let (_l, local) = workspace();
    let (r, remote) = workspace();
    for slug in ["alpha", "beta", "gamma"] {
        put(&remote, slug, 1, "remote\n");
    }
    let mut transport = LosesOne {
        inner: LocalTransport::new(),
        lost: Slug::from("beta"),
    };

    let report = orchestrator(&local)
        .run_with(&mut transport, &remote_for(r.path()), SyncOptions::default())
        .await
        .expect("pass");

    assert_eq!(report.pulled, vec![Slug::from("alpha"), Slug::from("gamma")]);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].slug, Slug::from("beta"));
    assert_eq!(report.diagnostics[0].kind, ErrorKind::NotFound);
    assert!(local.read_artifact(&Slug::from("beta")).is_err());
    assert!(report.cursor.is_none());
}

#[tokio::test]
async fn unparseable_remote_artifact_is_reported_and_left_alone() {
    let (_l, local) = workspace();
    let (r, remote) = workspace();
    put(&local, "broken", 1, "fine here\n");
    put(&local, "other", 1, "x\n");
    let torn = "---\nversion: 3\n";
    std::fs::write(remote.artifact_path(&Slug::from("broken")), torn).expect("corrupt");

    let report = orchestrator(&local)
        .run(&remote_for(r.path()), SyncOptions::default())
        .await
        .expect("pass");

    assert_eq!(report.pushed, vec![Slug::from("other")]);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].slug, Slug::from("broken"));
    assert_eq!(report.diagnostics[0].kind, ErrorKind::ParseError);
    assert_eq!(
        std::fs::read_to_string(remote.artifact_path(&Slug::from("broken"))).expect("read"),
        torn
    );
}

#[tokio::test]
async fn configured_http_remote_is_a_config_error() {
    let (l, _local) = workspace();
    std::fs::write(
        l.path().join(".agora/config.yaml"),
        "remotes:\n  upstream:\n    transport: http\n    url: https://example.com/ws\n  typo:\n    transport: smoke-signals\n    url: /tmp/x\n",
    )
    .expect("config");
    let orch = SyncOrchestrator::open_at(l.path()).expect("open");

    for name in ["upstream", "typo", "missing"] {
        let err = orch.run_named(name, SyncOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config, "remote {name}");
    }
}

#[tokio::test]
async fn local_transport_roundtrips_through_factory() {
    let (r, _remote) = workspace();
    let descriptor = agora_core::RemoteDescriptor {
        transport: "local-fs".into(),
        url: r.path().display().to_string(),
        branch: None,
    };
    let (remote, mut transport) =
        create_transport_from(&descriptor, &AgentId::from("agora")).expect("factory");
    transport.connect(&remote).await.expect("connect");

    let slug = Slug::from("hello");
    let raw = Artifact::new(Frontmatter::new(1), "hi\n").unwrap().raw;
    transport.write_artifact(&slug, &raw).await.expect("write");
    assert_eq!(transport.read_artifact(&slug).await.expect("read").raw, raw);
    transport.disconnect().await.expect("disconnect");
}
