//! Least-recently-used eviction planning for auto-swap.

use std::collections::HashMap;

use super::model::{ManagedModel, MemoryFootprint};

/// Eviction plan that covers a shortfall.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EvictionPlan {
    pub victims: Vec<String>,
    pub freed: MemoryFootprint,
}

/// Pick evictable models, oldest first, until `shortfall` is covered.
///
/// Returns `Err` with everything that could possibly be freed when even
/// evicting all candidates is not enough. Nothing is mutated here; the caller
/// commits the plan under the same write guard it planned under.
pub(crate) fn plan_eviction(
    models: &HashMap<String, ManagedModel>,
    requester: &str,
    shortfall: MemoryFootprint,
) -> Result<EvictionPlan, MemoryFootprint> {
    let mut candidates: Vec<&ManagedModel> = models
        .values()
        .filter(|m| m.id != requester && m.can_unload())
        .collect();
    candidates.sort_by_key(|m| m.last_used);

    let mut plan = EvictionPlan {
        victims: Vec::new(),
        freed: MemoryFootprint::ZERO,
    };

    for candidate in candidates {
        if shortfall.fits_within(&plan.freed) {
            break;
        }
        plan.freed += candidate.accounted();
        plan.victims.push(candidate.id.clone());
    }

    if shortfall.fits_within(&plan.freed) {
        Ok(plan)
    } else {
        Err(plan.freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::model::{ModelState, ModelType};

    fn loaded(id: &str, vram: f64, last_used: u64) -> ManagedModel {
        let mut model = ManagedModel::new(id, ModelType::LanguageModel);
        model.state = ModelState::Loaded;
        model.footprint = MemoryFootprint::new(vram, 0.5);
        model.last_used = last_used;
        model
    }

    fn registry(models: Vec<ManagedModel>) -> HashMap<String, ManagedModel> {
        models.into_iter().map(|m| (m.id.clone(), m)).collect()
    }

    #[test]
    fn evicts_oldest_first_and_stops_when_covered() {
        let models = registry(vec![
            loaded("new", 4.0, 30),
            loaded("old", 4.0, 1),
            loaded("mid", 4.0, 12),
        ]);

        let plan = plan_eviction(&models, "req", MemoryFootprint::new(3.0, 0.0)).unwrap();
        assert_eq!(plan.victims, vec!["old".to_string()]);

        let plan = plan_eviction(&models, "req", MemoryFootprint::new(6.0, 0.0)).unwrap();
        assert_eq!(plan.victims, vec!["old".to_string(), "mid".to_string()]);
    }

    #[test]
    fn skips_busy_pinned_and_requester() {
        let mut busy = loaded("busy", 8.0, 1);
        busy.state = ModelState::Busy;
        let mut pinned = loaded("pinned", 8.0, 2);
        pinned.pinned = true;
        let models = registry(vec![busy, pinned, loaded("req", 8.0, 3), loaded("ok", 2.0, 9)]);

        let freed = plan_eviction(&models, "req", MemoryFootprint::new(5.0, 0.0)).unwrap_err();
        assert_eq!(freed.vram_gb, 2.0);
    }

    #[test]
    fn nothing_to_evict_is_shortfall() {
        let models = HashMap::new();
        let freed = plan_eviction(&models, "req", MemoryFootprint::new(1.0, 0.0)).unwrap_err();
        assert_eq!(freed, MemoryFootprint::ZERO);
    }
}
