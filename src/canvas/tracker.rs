//! Undo/redo history memory estimation.
//!
//! Sizes come from the raw blob headers, so nothing is decoded into pixels.

use serde::Serialize;
use tracing::debug;

use super::raw_image::decoded_size;
use super::{CanvasHistory, CanvasHistoryEntry};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Stateless estimator of undo/redo history memory.
///
/// The same byte count is reported for VRAM and RAM: a displayed canvas image
/// lives both as a GPU texture and as a host-side undo buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanvasMemoryTracker;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub undo_entries: usize,
    pub redo_entries: usize,
    pub entry_count: usize,
    pub vram_gb: f64,
    pub vram_mb: f64,
    pub ram_gb: f64,
}

impl CanvasMemoryTracker {
    pub fn new() -> Self {
        Self
    }

    /// `(vram_gb, ram_gb)` for every blob in both histories.
    pub fn estimate_history_memory<H: CanvasHistory + ?Sized>(&self, scene: &H) -> (f64, f64) {
        let bytes: u64 = scene
            .undo_history()
            .iter()
            .chain(scene.redo_history())
            .map(entry_bytes)
            .fold(0u64, u64::saturating_add);

        let gb = bytes as f64 / BYTES_PER_GB;
        (gb, gb)
    }

    pub fn get_history_summary<H: CanvasHistory + ?Sized>(&self, scene: &H) -> HistorySummary {
        let (vram_gb, ram_gb) = self.estimate_history_memory(scene);
        let undo_entries = scene.undo_history().len();
        let redo_entries = scene.redo_history().len();
        HistorySummary {
            undo_entries,
            redo_entries,
            entry_count: undo_entries + redo_entries,
            vram_gb,
            vram_mb: vram_gb * 1024.0,
            ram_gb,
        }
    }
}

/// Decoded size of the entry's blobs. Undecodable blobs count as zero.
fn entry_bytes(entry: &CanvasHistoryEntry) -> u64 {
    [&entry.before, &entry.after]
        .into_iter()
        .flatten()
        .map(|blob| match decoded_size(blob) {
            Ok(size) => size,
            Err(e) => {
                debug!("Skipping canvas blob in '{}' entry: {}", entry.operation, e);
                0
            }
        })
        .fold(0u64, u64::saturating_add)
}
