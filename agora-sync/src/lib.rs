//! # agora-sync
//!
//! Workspace synchronization engine: replicates versioned artifacts and
//! reputation signal logs between agent workspaces over interchangeable
//! transports.
//!
//! Call [`SyncOrchestrator::run`] for one pass against a remote, or
//! [`create_transport`] to drive a [`Transport`] directly.

pub mod error;
pub mod factory;
pub mod importer;
pub mod orchestrator;
pub mod state;
pub mod transport;

pub use error::{ErrorKind, SyncError};
pub use factory::{create_transport, create_transport_from};
pub use importer::{ImportReport, ReputationState, SignalImporter};
pub use orchestrator::{plan, ArtifactDiagnostic, SyncOptions, SyncOrchestrator, SyncPlan, SyncReport};
pub use transport::{GitRemoteTransport, LocalTransport, RemoteWorkspaceInfo, Transport};
