//! Agora core library: domain types, artifact codec, workspace store,
//! reputation math, configuration, errors.
//!
//! - [`types`]: newtypes, remotes, manifests, signals
//! - [`artifact`]: frontmatter documents and provenance
//! - [`store`]: [`WorkspaceStore`], the on-disk layout
//! - [`reputation`]: decay / EWMA / confidence
//! - [`config`]: `.agora/config.yaml`
//! - [`error`]: [`StoreError`], [`ConfigError`], [`ArtifactParseError`]

pub mod artifact;
pub mod config;
pub mod error;
pub mod reputation;
pub mod store;
pub mod types;

pub use artifact::{Artifact, Frontmatter, ProvenanceAction, ProvenanceEntry};
pub use config::{SyncConfig, TieBreakPolicy};
pub use error::{ArtifactParseError, ConfigError, StoreError};
pub use reputation::ReputationParams;
pub use store::{ArtifactScan, UnreadableArtifact, WorkspaceStore};
pub use types::{
    AgentId, ArtifactFilter, ExportedSignalBatch, RemoteArtifactManifest, RemoteDescriptor,
    ReputationDimension, Signal, Slug, SyncRemote, TransportKind,
};
