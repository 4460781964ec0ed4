//! Domain types shared by the store and the sync engine.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, StoreError};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of an artifact; maps to `artifacts/<slug>.md`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slug(pub String);

impl Slug {
    /// Reject slugs that would escape the `artifacts/` directory.
    pub fn validate(&self) -> Result<(), StoreError> {
        let reason = if self.0.is_empty() {
            Some("empty")
        } else if self.0.contains('/') || self.0.contains('\\') {
            Some("contains a path separator")
        } else if self.0.contains('\0') {
            Some("contains NUL")
        } else if self.0.starts_with('.') {
            Some("starts with '.'")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(StoreError::InvalidSlug {
                slug: self.0.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Slug {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Slug {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed agent identifier (provenance author, signal source).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Remotes
// ---------------------------------------------------------------------------

/// Replication medium behind a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    LocalFs,
    GitRemote,
    /// Reserved; accepted syntactically, rejected by the transport factory.
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::LocalFs => write!(f, "local-fs"),
            TransportKind::GitRemote => write!(f, "git-remote"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local-fs" => Ok(Self::LocalFs),
            "git-remote" => Ok(Self::GitRemote),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::UnknownTransport(other.to_string())),
        }
    }
}

/// Remote descriptor as written in config files and handed over by callers.
///
/// `transport` stays a plain string so an unknown kind surfaces as a
/// [`ConfigError`] rather than a YAML decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    pub transport: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Validated remote. Immutable once a sync pass starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncRemote {
    pub kind: TransportKind,
    /// Filesystem path (local-fs) or git URL (git-remote).
    pub url: String,
    pub branch: Option<String>,
}

impl SyncRemote {
    pub const DEFAULT_BRANCH: &'static str = "main";

    pub fn local(path: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::LocalFs,
            url: path.into(),
            branch: None,
        }
    }

    pub fn git(url: impl Into<String>, branch: Option<String>) -> Self {
        Self {
            kind: TransportKind::GitRemote,
            url: url.into(),
            branch,
        }
    }

    /// Configured branch, or `main`.
    pub fn branch(&self) -> &str {
        self.branch.as_deref().unwrap_or(Self::DEFAULT_BRANCH)
    }

    /// Stable identity used for cursor storage and pass exclusivity.
    pub fn key(&self) -> String {
        format!("{}:{}#{}", self.kind, self.url, self.branch())
    }
}

impl TryFrom<RemoteDescriptor> for SyncRemote {
    type Error = ConfigError;

    fn try_from(desc: RemoteDescriptor) -> Result<Self, Self::Error> {
        let kind = desc.transport.parse::<TransportKind>()?;
        if desc.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        Ok(Self {
            kind,
            url: desc.url,
            branch: desc.branch.filter(|b| !b.trim().is_empty()),
        })
    }
}

impl From<&SyncRemote> for RemoteDescriptor {
    fn from(remote: &SyncRemote) -> Self {
        Self {
            transport: remote.kind.to_string(),
            url: remote.url.clone(),
            branch: remote.branch.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Manifests and filters
// ---------------------------------------------------------------------------

/// Lightweight descriptor of one artifact; never carries the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteArtifactManifest {
    pub slug: Slug,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// SHA-256 hex of the body (LF-normalised).
    pub content_hash: String,
    /// Size of the full serialized document in bytes.
    pub size: u64,
}

/// Optional narrowing for `list_artifacts`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactFilter {
    /// Every listed tag must be present on the artifact.
    pub tags: Vec<String>,
    pub slug_prefix: Option<String>,
    pub modified_since: Option<DateTime<Utc>>,
}

impl ArtifactFilter {
    pub fn slug_prefix(prefix: impl Into<String>) -> Self {
        Self {
            slug_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, manifest: &RemoteArtifactManifest) -> bool {
        if let Some(prefix) = &self.slug_prefix {
            if !manifest.slug.0.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !self.tags.iter().all(|t| manifest.tags.contains(t)) {
            return false;
        }
        match (self.modified_since, manifest.updated) {
            (Some(since), Some(updated)) => updated >= since,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Reputation signals
// ---------------------------------------------------------------------------

/// One immutable reputation observation along a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub source: AgentId,
    pub dimension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Signal {
    /// Key of the reputation dimension this signal folds into.
    pub fn dimension_key(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{}/{}", self.dimension, domain),
            None => self.dimension.clone(),
        }
    }

    /// Two signals describe the same observation (used for log de-duplication).
    pub fn same_observation(&self, other: &Signal) -> bool {
        self.source == other.source
            && self.dimension == other.dimension
            && self.domain == other.domain
            && self.timestamp == other.timestamp
            && self.score.to_bits() == other.score.to_bits()
    }

    /// Identity string used to recognise an observation that was already imported.
    pub fn observation_key(&self) -> String {
        format!(
            "{}|{}|{}|{:016x}",
            self.source,
            self.dimension_key(),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.score.to_bits()
        )
    }
}

/// Signals with timestamps strictly after `since`, ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportedSignalBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signals: Vec<Signal>,
}

impl ExportedSignalBatch {
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn max_timestamp(&self) -> Option<DateTime<Utc>> {
        self.signals.iter().map(|s| s.timestamp).max()
    }
}

/// Aggregated reputation along one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationDimension {
    /// In `[0, 1]`, rounded to 3 decimals.
    pub score: f64,
    /// In `[0, 1]`, rounded to 2 decimals.
    pub confidence: f64,
    pub sample_size: u64,
    pub last_signal: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(slug: &str, tags: &[&str], updated: Option<DateTime<Utc>>) -> RemoteArtifactManifest {
        RemoteArtifactManifest {
            slug: Slug::from(slug),
            version: 1,
            updated,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            content_hash: String::new(),
            size: 0,
        }
    }

    #[test]
    fn slug_validation_rejects_escapes() {
        assert!(Slug::from("artifact:plan").validate().is_ok());
        assert!(Slug::from("").validate().is_err());
        assert!(Slug::from("../etc").validate().is_err());
        assert!(Slug::from("a/b").validate().is_err());
        assert!(Slug::from(".hidden").validate().is_err());
    }

    #[test]
    fn transport_kind_parses_known_and_rejects_unknown() {
        assert_eq!("local-fs".parse::<TransportKind>().unwrap(), TransportKind::LocalFs);
        assert_eq!("GIT-REMOTE".parse::<TransportKind>().unwrap(), TransportKind::GitRemote);
        assert_eq!("http".parse::<TransportKind>().unwrap(), TransportKind::Http);
        assert!(matches!(
            "s3".parse::<TransportKind>(),
            Err(ConfigError::UnknownTransport(k)) if k == "s3"
        ));
    }

    #[test]
    fn remote_branch_defaults_to_main() {
        let remote = SyncRemote::git("https://example.com/kb.git", None);
        assert_eq!(remote.branch(), "main");
        assert_eq!(remote.key(), "git-remote:https://example.com/kb.git#main");
    }

    #[test]
    fn descriptor_with_blank_branch_falls_back_to_default() {
        let remote = SyncRemote::try_from(RemoteDescriptor {
            transport: "git-remote".into(),
            url: "/srv/kb.git".into(),
            branch: Some("  ".into()),
        })
        .unwrap();
        assert_eq!(remote.branch(), "main");
    }

    #[test]
    fn descriptor_with_empty_url_is_config_error() {
        let err = SyncRemote::try_from(RemoteDescriptor {
            transport: "local-fs".into(),
            url: "".into(),
            branch: None,
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyUrl));
    }

    #[test]
    fn filter_requires_all_tags_and_prefix() {
        let m = manifest("artifact:plan", &["ops", "q3"], None);
        let mut filter = ArtifactFilter::slug_prefix("artifact:");
        assert!(filter.matches(&m));
        filter.tags = vec!["ops".into(), "q4".into()];
        assert!(!filter.matches(&m));
    }

    #[test]
    fn filter_modified_since_excludes_undated() {
        let now = Utc::now();
        let filter = ArtifactFilter {
            modified_since: Some(now),
            ..ArtifactFilter::default()
        };
        assert!(!filter.matches(&manifest("a", &[], None)));
        assert!(filter.matches(&manifest("a", &[], Some(now))));
    }

    #[test]
    fn dimension_key_includes_domain() {
        let signal = Signal {
            source: AgentId::from("reviewer"),
            dimension: "accuracy".into(),
            domain: Some("rust".into()),
            score: 0.9,
            timestamp: Utc::now(),
            evidence: None,
            message: None,
        };
        assert_eq!(signal.dimension_key(), "accuracy/rust");
    }

    #[test]
    fn observation_key_separates_sources_at_the_same_instant() {
        let at = Utc::now();
        let alice = Signal {
            source: AgentId::from("alice"),
            dimension: "accuracy".into(),
            domain: None,
            score: 0.9,
            timestamp: at,
            evidence: None,
            message: None,
        };
        let bob = Signal {
            source: AgentId::from("bob"),
            ..alice.clone()
        };
        let annotated = Signal {
            message: Some("same reading, new note".into()),
            ..alice.clone()
        };
        assert_ne!(alice.observation_key(), bob.observation_key());
        assert_eq!(alice.observation_key(), annotated.observation_key());
        assert!(alice.same_observation(&annotated));
    }
}
