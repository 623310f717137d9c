//! Evidence artifact records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What an artifact contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Screenshot,
    HtmlDump,
    StructuredLog,
    Trace,
    Video,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Screenshot => write!(f, "screenshot"),
            Self::HtmlDump => write!(f, "html"),
            Self::StructuredLog => write!(f, "log"),
            Self::Trace => write!(f, "trace"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// A diagnostic file produced during a run. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceArtifact {
    pub kind: ArtifactKind,
    pub label: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Bytes written; zero for a failed capture.
    pub bytes: u64,
    /// False when the capture failed and nothing usable exists at `path`.
    pub captured: bool,
}

impl EvidenceArtifact {
    pub(crate) fn written(kind: ArtifactKind, label: &str, path: &Path, bytes: u64) -> Self {
        Self {
            kind,
            label: label.to_string(),
            path: path.to_path_buf(),
            created_at: Utc::now(),
            bytes,
            captured: true,
        }
    }

    /// The record returned when a capture failed.
    pub(crate) fn missing(kind: ArtifactKind, label: &str, path: &Path) -> Self {
        Self {
            kind,
            label: label.to_string(),
            path: path.to_path_buf(),
            created_at: Utc::now(),
            bytes: 0,
            captured: false,
        }
    }
}
