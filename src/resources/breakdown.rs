//! Device capacity input and the memory allocation snapshot.

use serde::{Deserialize, Serialize};

use super::model::MemoryFootprint;

/// Raw capacity figures supplied by a probe or by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceCapacity {
    pub total_vram_gb: f64,
    pub total_ram_gb: f64,
    /// VRAM held by other processes on the same GPU.
    #[serde(default)]
    pub external_apps_vram_gb: f64,
}

/// Fixed headroom never offered for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemReserve {
    pub vram_gb: f64,
    pub ram_gb: f64,
}

/// How available memory is currently partitioned. Recomputed on every query.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MemoryAllocationBreakdown {
    pub models_vram_gb: f64,
    pub models_ram_gb: f64,
    pub canvas_history_vram_gb: f64,
    pub canvas_history_ram_gb: f64,
    pub system_reserve_vram_gb: f64,
    pub system_reserve_ram_gb: f64,
    pub external_apps_vram_gb: f64,
    pub total_vram_gb: f64,
    pub total_ram_gb: f64,
    pub total_available_vram_gb: f64,
    pub total_available_ram_gb: f64,
}

impl MemoryAllocationBreakdown {
    pub(crate) fn compute(
        capacity: &DeviceCapacity,
        reserve: &SystemReserve,
        models: MemoryFootprint,
        canvas: MemoryFootprint,
    ) -> Self {
        let available = available_budget(capacity, reserve);
        Self {
            models_vram_gb: models.vram_gb,
            models_ram_gb: models.ram_gb,
            canvas_history_vram_gb: canvas.vram_gb,
            canvas_history_ram_gb: canvas.ram_gb,
            system_reserve_vram_gb: reserve.vram_gb,
            system_reserve_ram_gb: reserve.ram_gb,
            external_apps_vram_gb: capacity.external_apps_vram_gb,
            total_vram_gb: capacity.total_vram_gb,
            total_ram_gb: capacity.total_ram_gb,
            total_available_vram_gb: available.vram_gb,
            total_available_ram_gb: available.ram_gb,
        }
    }

    pub fn used_vram_gb(&self) -> f64 {
        self.models_vram_gb + self.canvas_history_vram_gb
    }

    pub fn used_ram_gb(&self) -> f64 {
        self.models_ram_gb + self.canvas_history_ram_gb
    }

    /// Headroom left for new loads (never negative).
    pub fn free_vram_gb(&self) -> f64 {
        (self.total_available_vram_gb - self.used_vram_gb()).max(0.0)
    }

    pub fn free_ram_gb(&self) -> f64 {
        (self.total_available_ram_gb - self.used_ram_gb()).max(0.0)
    }
}

/// Capacity minus reserve and external usage, floored at zero.
pub(crate) fn available_budget(
    capacity: &DeviceCapacity,
    reserve: &SystemReserve,
) -> MemoryFootprint {
    MemoryFootprint {
        vram_gb: (capacity.total_vram_gb - reserve.vram_gb - capacity.external_apps_vram_gb)
            .max(0.0),
        ram_gb: (capacity.total_ram_gb - reserve.ram_gb).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_subtracts_reserve_and_external() {
        let capacity = DeviceCapacity {
            total_vram_gb: 24.0,
            total_ram_gb: 64.0,
            external_apps_vram_gb: 3.0,
        };
        let reserve = SystemReserve {
            vram_gb: 1.0,
            ram_gb: 2.0,
        };
        let available = available_budget(&capacity, &reserve);
        assert_eq!(available.vram_gb, 20.0);
        assert_eq!(available.ram_gb, 62.0);
    }

    #[test]
    fn available_never_negative() {
        let capacity = DeviceCapacity {
            total_vram_gb: 2.0,
            total_ram_gb: 1.0,
            external_apps_vram_gb: 4.0,
        };
        let reserve = SystemReserve {
            vram_gb: 1.0,
            ram_gb: 2.0,
        };
        let available = available_budget(&capacity, &reserve);
        assert_eq!(available, MemoryFootprint::ZERO);
    }

    #[test]
    fn free_figures_include_canvas() {
        let capacity = DeviceCapacity {
            total_vram_gb: 10.0,
            total_ram_gb: 10.0,
            external_apps_vram_gb: 0.0,
        };
        let breakdown = MemoryAllocationBreakdown::compute(
            &capacity,
            &SystemReserve::default(),
            MemoryFootprint::new(4.0, 2.0),
            MemoryFootprint::new(1.0, 1.0),
        );
        assert_eq!(breakdown.free_vram_gb(), 5.0);
        assert_eq!(breakdown.free_ram_gb(), 7.0);
    }
}
