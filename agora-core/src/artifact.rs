//! Artifact documents: YAML frontmatter fenced by `---` lines, then a body.
//!
//! ```text
//! ---
//! version: 3
//! provenance:
//! - agent: planner
//!   action: created
//!   timestamp: 2026-01-02T03:04:05Z
//! ---
//! # Body
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ArtifactParseError;
use crate::types::{AgentId, RemoteArtifactManifest, Slug};

const FENCE: &str = "---";

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// What was done to an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvenanceAction {
    Created,
    Updated,
    Merged,
    Synced,
}

impl fmt::Display for ProvenanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvenanceAction::Created => write!(f, "created"),
            ProvenanceAction::Updated => write!(f, "updated"),
            ProvenanceAction::Merged => write!(f, "merged"),
            ProvenanceAction::Synced => write!(f, "synced"),
        }
    }
}

/// One immutable record in an artifact's provenance log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub agent: AgentId,
    pub action: ProvenanceAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_source: Option<String>,
}

impl ProvenanceEntry {
    pub fn new(agent: AgentId, action: ProvenanceAction, timestamp: DateTime<Utc>) -> Self {
        Self {
            agent,
            action,
            timestamp,
            message: None,
            confidence: None,
            sync_source: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_sync_source(mut self, source: impl Into<String>) -> Self {
        self.sync_source = Some(source.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Frontmatter
// ---------------------------------------------------------------------------

/// Typed view over the frontmatter mapping. Unknown keys survive in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provenance: Vec<ProvenanceEntry>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Frontmatter {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            updated: None,
            tags: vec![],
            provenance: vec![],
            extra: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// Read/write payload at the transport boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub frontmatter: Frontmatter,
    pub content: String,
    /// Full serialized form, exactly as stored.
    pub raw: String,
}

impl Artifact {
    /// Render a new document from its parts.
    pub fn new(frontmatter: Frontmatter, content: impl Into<String>) -> Result<Self, serde_yaml::Error> {
        let content = content.into();
        let raw = render(&frontmatter, &content)?;
        Ok(Self {
            frontmatter,
            content,
            raw,
        })
    }

    /// Decompose a serialized document. `raw` is kept verbatim.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ArtifactParseError> {
        let raw = raw.into();
        let (yaml, content) = split(&raw)?;
        let frontmatter: Frontmatter =
            serde_yaml::from_str(yaml).map_err(ArtifactParseError::Frontmatter)?;
        let content = content.to_string();
        Ok(Self {
            frontmatter,
            content,
            raw,
        })
    }

    pub fn version(&self) -> u64 {
        self.frontmatter.version
    }

    /// Copy of this artifact with `entry` appended to its provenance log.
    pub fn with_provenance(&self, entry: ProvenanceEntry) -> Result<Self, serde_yaml::Error> {
        self.with_provenance_from(&[], entry)
    }

    /// Copy of this artifact that also carries every entry of `prior` it
    /// lacks, followed by `entry`. Existing entries keep their order.
    pub fn with_provenance_from(
        &self,
        prior: &[ProvenanceEntry],
        entry: ProvenanceEntry,
    ) -> Result<Self, serde_yaml::Error> {
        let mut frontmatter = self.frontmatter.clone();
        for old in prior {
            if !frontmatter.provenance.contains(old) {
                frontmatter.provenance.push(old.clone());
            }
        }
        frontmatter.provenance.push(entry);
        Self::new(frontmatter, self.content.clone())
    }

    /// SHA-256 hex of the body. Frontmatter does not participate.
    pub fn content_hash(&self) -> String {
        hash_body(&self.content)
    }

    pub fn manifest(&self, slug: &Slug) -> RemoteArtifactManifest {
        RemoteArtifactManifest {
            slug: slug.clone(),
            version: self.frontmatter.version,
            updated: self.frontmatter.updated,
            tags: self.frontmatter.tags.clone(),
            content_hash: self.content_hash(),
            size: self.raw.len() as u64,
        }
    }
}

/// Line endings are normalised so CRLF and LF bodies hash identically.
pub fn hash_body(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

fn render(frontmatter: &Frontmatter, content: &str) -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(frontmatter)?;
    Ok(format!("{FENCE}\n{yaml}{FENCE}\n{content}"))
}

fn split(raw: &str) -> Result<(&str, &str), ArtifactParseError> {
    let rest = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
        .ok_or(ArtifactParseError::MissingOpeningFence)?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(&['\r', '\n'][..]) == FENCE {
            return Ok((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    Err(ArtifactParseError::MissingClosingFence)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
