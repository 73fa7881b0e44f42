//! Artifact references produced by stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What kind of file an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Tabular Redash extract.
    Extract,
    /// Tabular data exported from a report page.
    Data,
    /// Rendered image of a report page.
    Image,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extract => write!(f, "extract"),
            Self::Data => write!(f, "data"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// A file written by a stage.
///
/// Artifacts are passed downstream by reference only; their bytes never
/// travel in a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// The kind of file.
    pub kind: ArtifactKind,
    /// Logical name (query or page).
    pub name: String,
    /// Location on local storage.
    pub path: PathBuf,
    /// Size in bytes when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    /// Note delivered alongside the reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Artifact {
    /// Creates a new artifact reference.
    #[must_use]
    pub fn new(kind: ArtifactKind, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            name: name.into(),
            path: path.into(),
            bytes: None,
            message: None,
        }
    }

    /// Records the file size.
    #[must_use]
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    /// Attaches a note for recipients.
    #[must_use]
    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message.filter(|m| !m.trim().is_empty());
        self
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_creation() {
        let artifact = Artifact::new(ArtifactKind::Extract, "orders", "/data/orders.csv").with_bytes(42);

        assert_eq!(artifact.kind, ArtifactKind::Extract);
        assert_eq!(artifact.name, "orders");
        assert_eq!(artifact.path(), Path::new("/data/orders.csv"));
        assert_eq!(artifact.bytes, Some(42));
    }

    #[test]
    fn test_artifact_serialization_omits_unknown_size() {
        let artifact = Artifact::new(ArtifactKind::Image, "Summary", "/data/summary.png");
        let json = serde_json::to_value(&artifact).unwrap();

        assert_eq!(json["kind"], "image");
        assert!(json.get("bytes").is_none());
        assert!(json.get("message").is_none());
    }

    #[test]
    fn test_blank_message_is_dropped() {
        let artifact = Artifact::new(ArtifactKind::Image, "Summary", "/data/summary.png")
            .with_message(Some("  ".into()));
        assert_eq!(artifact.message, None);

        let artifact = artifact.with_message(Some("Daily hub overview".into()));
        assert_eq!(artifact.message.as_deref(), Some("Daily hub overview"));
    }
}
