//! Pushes canvas history estimates into the resource manager on significant change.

use tracing::debug;

use super::{CanvasHistory, CanvasMemoryTracker};
use crate::resources::ResourceManager;

/// Remembers the last pushed figure so small edits don't churn the manager.
#[derive(Debug, Clone)]
pub struct CanvasSync {
    tracker: CanvasMemoryTracker,
    threshold_gb: f64,
    last_pushed: Option<(f64, f64)>,
}

impl CanvasSync {
    pub fn new(push_threshold_mb: f64) -> Self {
        Self {
            tracker: CanvasMemoryTracker::new(),
            threshold_gb: push_threshold_mb.max(0.0) / 1024.0,
            last_pushed: None,
        }
    }

    pub fn last_pushed(&self) -> Option<(f64, f64)> {
        self.last_pushed
    }

    /// Estimate and push if the change since the last push exceeds the
    /// threshold. Returns whether a push happened.
    pub fn push_if_changed<H: CanvasHistory + ?Sized>(
        &mut self,
        manager: &ResourceManager,
        scene: &H,
    ) -> bool {
        let (vram_gb, ram_gb) = self.tracker.estimate_history_memory(scene);

        if let Some((last_vram, last_ram)) = self.last_pushed {
            let delta = (vram_gb - last_vram).abs().max((ram_gb - last_ram).abs());
            if delta < self.threshold_gb {
                debug!("Canvas history changed by {:.4} GB; below push threshold", delta);
                return false;
            }
        }

        self.push(manager, vram_gb, ram_gb);
        true
    }

    /// Estimate and push unconditionally.
    pub fn force_push<H: CanvasHistory + ?Sized>(&mut self, manager: &ResourceManager, scene: &H) {
        let (vram_gb, ram_gb) = self.tracker.estimate_history_memory(scene);
        self.push(manager, vram_gb, ram_gb);
    }

    fn push(&mut self, manager: &ResourceManager, vram_gb: f64, ram_gb: f64) {
        manager.update_canvas_history_allocation(vram_gb, ram_gb);
        self.last_pushed = Some((vram_gb, ram_gb));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::raw_image::encode_raw_image;
    use crate::canvas::{CanvasHistoryEntry, CanvasScene};
    use crate::resources::{DeviceCapacity, SystemReserve};

    fn manager() -> ResourceManager {
        ResourceManager::new(
            DeviceCapacity {
                total_vram_gb: 24.0,
                total_ram_gb: 64.0,
                external_apps_vram_gb: 0.0,
            },
            SystemReserve::default(),
        )
    }

    fn scene_with(pixels_side: u32) -> CanvasScene {
        let side = pixels_side as usize;
        CanvasScene {
            undo: vec![CanvasHistoryEntry::new("brush").with_before(encode_raw_image(
                pixels_side,
                pixels_side,
                &vec![0u8; side * side * 4],
            ))],
            redo: vec![],
        }
    }

    #[test]
    fn first_push_always_happens() {
        let rm = manager();
        let mut sync = CanvasSync::new(64.0);
        assert!(sync.push_if_changed(&rm, &CanvasScene::default()));
        assert_eq!(sync.last_pushed(), Some((0.0, 0.0)));
    }

    #[test]
    fn small_change_is_skipped_large_change_is_pushed() {
        let rm = manager();
        let mut sync = CanvasSync::new(1.0);
        sync.force_push(&rm, &CanvasScene::default());

        // 256x256 RGBA = 0.25 MB, below the 1 MB threshold
        assert!(!sync.push_if_changed(&rm, &scene_with(256)));
        assert_eq!(rm.get_memory_allocation_breakdown().canvas_history_vram_gb, 0.0);

        // 1024x1024 RGBA = 4 MB
        assert!(sync.push_if_changed(&rm, &scene_with(1024)));
        let breakdown = rm.get_memory_allocation_breakdown();
        assert_eq!(breakdown.canvas_history_vram_gb, 4.0 / 1024.0);
        assert_eq!(breakdown.canvas_history_ram_gb, 4.0 / 1024.0);
    }
}
