//! Canvas undo/redo history memory estimation.
//!
//! The editor owns the history; this module only reads it, estimates what it
//! costs, and pushes that figure into the [`crate::resources::ResourceManager`].

pub mod raw_image;
mod sync;
mod tracker;

pub use sync::CanvasSync;
pub use tracker::{CanvasMemoryTracker, HistorySummary};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One undo/redo step with optional before/after raw image blobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasHistoryEntry {
    pub operation: String,
    #[serde(default, with = "base64_blob", skip_serializing_if = "Option::is_none")]
    pub before: Option<Vec<u8>>,
    #[serde(default, with = "base64_blob", skip_serializing_if = "Option::is_none")]
    pub after: Option<Vec<u8>>,
}

impl CanvasHistoryEntry {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            before: None,
            after: None,
        }
    }

    pub fn with_before(mut self, blob: Vec<u8>) -> Self {
        self.before = Some(blob);
        self
    }

    pub fn with_after(mut self, blob: Vec<u8>) -> Self {
        self.after = Some(blob);
        self
    }
}

/// Anything exposing ordered undo and redo sequences.
pub trait CanvasHistory {
    fn undo_history(&self) -> &[CanvasHistoryEntry];
    fn redo_history(&self) -> &[CanvasHistoryEntry];
}

/// Owned history, as exported by the editor (JSON, blobs base64-encoded).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanvasScene {
    #[serde(default)]
    pub undo: Vec<CanvasHistoryEntry>,
    #[serde(default)]
    pub redo: Vec<CanvasHistoryEntry>,
}

impl CanvasScene {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read canvas history {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse canvas history {}", path.display()))
    }
}

impl CanvasHistory for CanvasScene {
    fn undo_history(&self) -> &[CanvasHistoryEntry] {
        &self.undo
    }

    fn redo_history(&self) -> &[CanvasHistoryEntry] {
        &self.redo
    }
}

mod base64_blob {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(blob: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match blob {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_image::encode_raw_image;

    #[test]
    fn scene_json_roundtrips_blobs() {
        let scene = CanvasScene {
            undo: vec![
                CanvasHistoryEntry::new("brush").with_before(encode_raw_image(1, 1, &[1, 2, 3, 4])),
            ],
            redo: vec![],
        };

        let json = serde_json::to_string(&scene).unwrap();
        assert!(json.contains("UkFXSU1H")); // base64 of the "RAWIMG" tag prefix
        let parsed: CanvasScene = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.undo, scene.undo);
        assert!(parsed.undo[0].after.is_none());
    }

    #[test]
    fn load_reads_file_with_missing_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history.json");
        fs::write(&path, r#"{"undo": [{"operation": "fill"}]}"#).unwrap();

        let scene = CanvasScene::load(&path).unwrap();
        assert_eq!(scene.undo_history().len(), 1);
        assert!(scene.redo_history().is_empty());
    }

    #[test]
    fn load_rejects_invalid_base64() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history.json");
        fs::write(&path, r#"{"undo": [{"operation": "fill", "before": "!!!"}]}"#).unwrap();

        assert!(CanvasScene::load(&path).is_err());
    }
}
