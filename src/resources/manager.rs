//! The shared model registry and its admission logic.
//!
//! One `ResourceManager` is cloned into every worker thread (LLM, diffusion,
//! speech, vision). All mutations go through a single write guard that is held
//! only for bookkeeping, never across the caller's actual load/unload work.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::breakdown::{DeviceCapacity, MemoryAllocationBreakdown, SystemReserve, available_budget};
use super::eviction::plan_eviction;
use super::model::{
    ActiveModel, LoadDecision, ManagedModel, MemoryFootprint, ModelState, ModelType,
    OperationDecision, OperationKind,
};
use super::probe::CapacityProbe;
use crate::config::Config;

/// Default reservation per model category when the caller gives no estimate.
pub fn default_estimate(model_type: ModelType) -> MemoryFootprint {
    match model_type {
        ModelType::LanguageModel => MemoryFootprint::new(6.0, 2.0),
        ModelType::DiffusionImage => MemoryFootprint::new(7.0, 4.0),
        ModelType::SpeechToText => MemoryFootprint::new(1.5, 1.0),
        ModelType::TextToSpeech => MemoryFootprint::new(1.0, 1.0),
        ModelType::Vision => MemoryFootprint::new(2.0, 1.0),
    }
}

struct Registry {
    models: HashMap<String, ManagedModel>,
    canvas: MemoryFootprint,
    capacity: DeviceCapacity,
    clock: u64,
}

impl Registry {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn models_total(&self) -> MemoryFootprint {
        self.models
            .values()
            .fold(MemoryFootprint::ZERO, |acc, m| acc + m.accounted())
    }

    fn used(&self) -> MemoryFootprint {
        self.models_total() + self.canvas
    }

    fn get_or_create(&mut self, id: &str, model_type: ModelType) -> &mut ManagedModel {
        self.models
            .entry(id.to_string())
            .or_insert_with(|| ManagedModel::new(id, model_type))
    }
}

/// Shared GPU/RAM budget and model lifecycle registry.
///
/// Cheap to clone; every clone sees the same registry. Admission, eviction and
/// reservation for one request happen under a single write guard.
#[derive(Clone)]
pub struct ResourceManager {
    inner: Arc<RwLock<Registry>>,
    reserve: SystemReserve,
    estimates: Arc<HashMap<ModelType, MemoryFootprint>>,
}

impl ResourceManager {
    pub fn new(capacity: DeviceCapacity, reserve: SystemReserve) -> Self {
        let estimates = ModelType::ALL
            .iter()
            .map(|ty| (*ty, default_estimate(*ty)))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(Registry {
                models: HashMap::new(),
                canvas: MemoryFootprint::ZERO,
                capacity,
                clock: 0,
            })),
            reserve,
            estimates: Arc::new(estimates),
        }
    }

    /// Build from the `[budget]` and `[estimates]` config sections.
    ///
    /// `capacity` is passed separately because a zero `total_ram_gb` in the
    /// config means the caller probes the host first.
    pub fn from_config(config: &Config, capacity: DeviceCapacity) -> Self {
        let reserve = SystemReserve {
            vram_gb: config.budget.system_reserve_vram_gb,
            ram_gb: config.budget.system_reserve_ram_gb,
        };
        let mut manager = Self::new(capacity, reserve);
        manager.estimates = Arc::new(
            ModelType::ALL
                .iter()
                .map(|ty| (*ty, config.estimates.for_type(*ty)))
                .collect(),
        );
        manager
    }

    /// Replace the per-category reservation estimates.
    pub fn with_estimates(mut self, estimates: HashMap<ModelType, MemoryFootprint>) -> Self {
        let mut merged = (*self.estimates).clone();
        merged.extend(estimates.into_iter().map(|(ty, fp)| (ty, fp.sanitized())));
        self.estimates = Arc::new(merged);
        self
    }

    pub fn estimate_for(&self, model_type: ModelType) -> MemoryFootprint {
        self.estimates
            .get(&model_type)
            .copied()
            .unwrap_or_else(|| default_estimate(model_type))
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("Resource registry lock poisoned; continuing with last state");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("Resource registry lock poisoned; continuing with last state");
            poisoned.into_inner()
        })
    }

    // ── Admission ──

    /// Ask whether `id` may be loaded, reserving the category estimate on approval.
    pub fn prepare_model_loading(
        &self,
        id: &str,
        model_type: ModelType,
        auto_swap: bool,
    ) -> LoadDecision {
        let estimate = self.estimate_for(model_type);
        self.prepare_model_loading_with_estimate(id, model_type, auto_swap, estimate)
    }

    /// Like [`Self::prepare_model_loading`] with a caller-supplied footprint.
    ///
    /// Check, eviction and reservation all happen under one write guard, so
    /// two callers can never both be granted the same headroom.
    pub fn prepare_model_loading_with_estimate(
        &self,
        id: &str,
        model_type: ModelType,
        auto_swap: bool,
        estimate: MemoryFootprint,
    ) -> LoadDecision {
        let estimate = estimate.sanitized();
        let mut registry = self.write();
        let now = registry.tick();

        if let Some(existing) = registry.models.get_mut(id) {
            match existing.state {
                ModelState::Loading => {
                    return LoadDecision::deny(format!("Model {} is already being loaded", id));
                }
                ModelState::Loaded | ModelState::Busy => {
                    existing.touch(now);
                    debug!("Model {} already resident ({})", id, existing.state);
                    return LoadDecision::approve(format!("Model {} is already resident", id));
                }
                ModelState::Unloaded => {}
            }
        }

        let available = available_budget(&registry.capacity, &self.reserve);
        let needed = registry.used() + estimate;
        let mut evicted = Vec::new();

        if !needed.fits_within(&available) {
            let shortfall = MemoryFootprint {
                vram_gb: (needed.vram_gb - available.vram_gb).max(0.0),
                ram_gb: (needed.ram_gb - available.ram_gb).max(0.0),
            };

            if !auto_swap {
                info!(
                    "Denied load of {} ({}): short {:.2} GB VRAM / {:.2} GB RAM",
                    id, model_type, shortfall.vram_gb, shortfall.ram_gb
                );
                return LoadDecision::deny(format!(
                    "Insufficient memory for {}: needs {:.2} GB VRAM / {:.2} GB RAM, \
                     short by {:.2} GB VRAM / {:.2} GB RAM",
                    id, estimate.vram_gb, estimate.ram_gb, shortfall.vram_gb, shortfall.ram_gb
                ));
            }

            match plan_eviction(&registry.models, id, shortfall) {
                Ok(plan) => {
                    for victim in &plan.victims {
                        if let Some(model) = registry.models.remove(victim) {
                            info!(
                                "Auto-swap evicted {} ({}) freeing {:.2} GB VRAM / {:.2} GB RAM for {}",
                                model.id,
                                model.model_type,
                                model.footprint.vram_gb,
                                model.footprint.ram_gb,
                                id
                            );
                        }
                    }
                    evicted = plan.victims;
                }
                Err(freeable) => {
                    info!(
                        "Denied load of {} ({}): eviction could free only {:.2} GB VRAM / {:.2} GB RAM",
                        id, model_type, freeable.vram_gb, freeable.ram_gb
                    );
                    return LoadDecision::deny(format!(
                        "Insufficient memory for {} even after auto-swap: short by {:.2} GB VRAM / \
                         {:.2} GB RAM, evictable models free only {:.2} GB VRAM / {:.2} GB RAM",
                        id,
                        shortfall.vram_gb,
                        shortfall.ram_gb,
                        freeable.vram_gb,
                        freeable.ram_gb
                    ));
                }
            }
        }

        let entry = registry.get_or_create(id, model_type);
        entry.model_type = model_type;
        entry.state = ModelState::Loading;
        entry.footprint = estimate;
        entry.loaded_at = None;
        entry.touch(now);

        info!(
            "Approved load of {} ({}), reserved {:.2} GB VRAM / {:.2} GB RAM",
            id, model_type, estimate.vram_gb, estimate.ram_gb
        );

        let reason = if evicted.is_empty() {
            "Sufficient memory available".to_string()
        } else {
            format!("Approved after evicting {}", evicted.join(", "))
        };
        LoadDecision {
            can_load: true,
            reason,
            evicted,
        }
    }

    // ── Transitions ──

    /// Loading → Loaded, keeping the reserved footprint.
    pub fn model_loaded(&self, id: &str) -> ModelState {
        self.mark_loaded(id, None)
    }

    /// Loading → Loaded, recording a measured footprint.
    pub fn model_loaded_with_usage(&self, id: &str, usage: MemoryFootprint) -> ModelState {
        self.mark_loaded(id, Some(usage))
    }

    fn mark_loaded(&self, id: &str, usage: Option<MemoryFootprint>) -> ModelState {
        let usage = usage.map(MemoryFootprint::sanitized);
        let mut registry = self.write();
        let now = registry.tick();
        let Some(model) = registry.models.get_mut(id) else {
            warn!("model_loaded for unregistered model {}; ignoring", id);
            return ModelState::Unloaded;
        };

        match model.state {
            ModelState::Loading => {
                if let Some(usage) = usage {
                    model.footprint = usage;
                }
                model.state = ModelState::Loaded;
                model.loaded_at = Some(Utc::now());
                model.touch(now);
                info!(
                    "Model {} loaded ({:.2} GB VRAM / {:.2} GB RAM)",
                    id, model.footprint.vram_gb, model.footprint.ram_gb
                );
            }
            ModelState::Loaded | ModelState::Busy => {
                if let Some(usage) = usage {
                    model.footprint = usage;
                }
                debug!("model_loaded for {} which is already {}", id, model.state);
            }
            ModelState::Unloaded => {
                warn!("model_loaded for {} which was never put into loading", id);
            }
        }
        model.state
    }

    /// Loaded → Busy. Opens the exclusive-use window.
    pub fn model_busy(&self, id: &str) -> ModelState {
        let mut registry = self.write();
        let now = registry.tick();
        let Some(model) = registry.models.get_mut(id) else {
            warn!("model_busy for unregistered model {}; ignoring", id);
            return ModelState::Unloaded;
        };

        match model.state {
            ModelState::Loaded => {
                model.state = ModelState::Busy;
                model.touch(now);
                debug!("Model {} busy", id);
            }
            ModelState::Busy => debug!("model_busy for {} which is already busy", id),
            state => warn!("model_busy for {} in state {}; ignoring", id, state),
        }
        model.state
    }

    /// Busy → Loaded. Closes the exclusive-use window.
    pub fn model_ready(&self, id: &str) -> ModelState {
        let mut registry = self.write();
        let now = registry.tick();
        let Some(model) = registry.models.get_mut(id) else {
            warn!("model_ready for unregistered model {}; ignoring", id);
            return ModelState::Unloaded;
        };

        match model.state {
            ModelState::Busy => {
                model.state = ModelState::Loaded;
                model.touch(now);
                debug!("Model {} ready", id);
            }
            ModelState::Loaded => debug!("model_ready for {} which is not busy", id),
            state => warn!("model_ready for {} in state {}; ignoring", id, state),
        }
        model.state
    }

    /// Release everything accounted to `id`. Idempotent.
    pub fn cleanup_model(&self, id: &str, model_type: ModelType) {
        let mut registry = self.write();
        match registry.models.remove(id) {
            Some(model) => {
                if model.model_type != model_type {
                    warn!(
                        "cleanup_model for {} as {} but it was registered as {}",
                        id, model_type, model.model_type
                    );
                }
                info!(
                    "Model {} unloaded from {} (released {:.2} GB VRAM / {:.2} GB RAM)",
                    id,
                    model.state,
                    model.accounted().vram_gb,
                    model.accounted().ram_gb
                );
            }
            None => debug!("cleanup_model for {} which is not registered", id),
        }
    }

    /// Exempt a registered model from auto-swap. Returns false for unknown ids.
    pub fn set_pinned(&self, id: &str, pinned: bool) -> bool {
        let mut registry = self.write();
        match registry.models.get_mut(id) {
            Some(model) => {
                model.pinned = pinned;
                debug!("Model {} pinned = {}", id, pinned);
                true
            }
            None => {
                warn!("set_pinned for unregistered model {}; ignoring", id);
                false
            }
        }
    }

    // ── Canvas and device inputs ──

    /// Overwrite the canvas undo/redo history figures.
    pub fn update_canvas_history_allocation(&self, vram_gb: f64, ram_gb: f64) {
        let mut registry = self.write();
        registry.canvas = MemoryFootprint::new(vram_gb, ram_gb);
        debug!(
            "Canvas history allocation: {:.3} GB VRAM / {:.3} GB RAM",
            registry.canvas.vram_gb, registry.canvas.ram_gb
        );
    }

    pub fn update_device_capacity(&self, capacity: DeviceCapacity) {
        let mut registry = self.write();
        registry.capacity = capacity;
        debug!(
            "Device capacity: {:.2} GB VRAM ({:.2} GB external) / {:.2} GB RAM",
            capacity.total_vram_gb, capacity.external_apps_vram_gb, capacity.total_ram_gb
        );
    }

    /// Pull fresh figures from a probe. A failing probe leaves the old capacity.
    pub fn refresh_capacity(&self, probe: &dyn CapacityProbe) -> bool {
        match probe.probe() {
            Ok(capacity) => {
                self.update_device_capacity(capacity);
                true
            }
            Err(e) => {
                warn!("Capacity probe failed, keeping previous figures: {:#}", e);
                false
            }
        }
    }

    pub fn device_capacity(&self) -> DeviceCapacity {
        self.read().capacity
    }

    // ── Queries ──

    /// Never creates an entry; unknown ids are Unloaded.
    pub fn get_model_state(&self, id: &str) -> ModelState {
        self.read()
            .models
            .get(id)
            .map(|m| m.state)
            .unwrap_or(ModelState::Unloaded)
    }

    pub fn model_info(&self, id: &str) -> Option<ActiveModel> {
        self.read()
            .models
            .get(id)
            .filter(|m| m.state != ModelState::Unloaded)
            .map(ManagedModel::snapshot)
    }

    /// Every resident model, sorted by id.
    pub fn get_active_models(&self) -> Vec<ActiveModel> {
        let registry = self.read();
        let mut active: Vec<ActiveModel> = registry
            .models
            .values()
            .filter(|m| m.state != ModelState::Unloaded)
            .map(ManagedModel::snapshot)
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    pub fn get_memory_allocation_breakdown(&self) -> MemoryAllocationBreakdown {
        let registry = self.read();
        MemoryAllocationBreakdown::compute(
            &registry.capacity,
            &self.reserve,
            registry.models_total(),
            registry.canvas,
        )
    }

    /// Whether starting `operation` on `model_id` right now is safe.
    pub fn can_perform_operation(
        &self,
        operation: OperationKind,
        model_id: &str,
    ) -> OperationDecision {
        let registry = self.read();

        let target_state = registry
            .models
            .get(model_id)
            .map(|m| m.state)
            .unwrap_or(ModelState::Unloaded);

        if target_state == ModelState::Loading {
            return OperationDecision {
                allowed: false,
                reason: format!("Model {} is still loading", model_id),
            };
        }

        let mut others: Vec<&ManagedModel> = registry
            .models
            .values()
            .filter(|m| m.id != model_id)
            .collect();
        others.sort_by(|a, b| a.id.cmp(&b.id));

        if let Some(loading) = others.iter().find(|m| m.state == ModelState::Loading) {
            return OperationDecision {
                allowed: false,
                reason: format!(
                    "GPU contention: model {} ({}) is loading",
                    loading.id, loading.model_type
                ),
            };
        }

        if target_state == ModelState::Busy {
            return OperationDecision {
                allowed: false,
                reason: format!("Model {} is busy", model_id),
            };
        }

        if operation.is_gpu_heavy()
            && let Some(busy) = others.iter().find(|m| m.state == ModelState::Busy)
        {
            return OperationDecision {
                allowed: false,
                reason: format!(
                    "GPU contention: model {} ({}) is busy, {} must wait",
                    busy.id, busy.model_type, operation
                ),
            };
        }

        OperationDecision {
            allowed: true,
            reason: "No contending GPU work".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::probe::MockCapacityProbe;

    fn manager(vram: f64, ram: f64) -> ResourceManager {
        ResourceManager::new(
            DeviceCapacity {
                total_vram_gb: vram,
                total_ram_gb: ram,
                external_apps_vram_gb: 0.0,
            },
            SystemReserve::default(),
        )
    }

    #[test]
    fn unknown_model_is_unloaded_and_not_created() {
        let rm = manager(24.0, 64.0);
        assert_eq!(rm.get_model_state("ghost"), ModelState::Unloaded);
        assert!(rm.get_active_models().is_empty());
        assert!(rm.model_info("ghost").is_none());
    }

    #[test]
    fn approval_reserves_estimate() {
        let rm = manager(24.0, 64.0);
        let decision = rm.prepare_model_loading("m1", ModelType::LanguageModel, false);
        assert!(decision.can_load, "{}", decision.reason);
        assert_eq!(rm.get_model_state("m1"), ModelState::Loading);

        let breakdown = rm.get_memory_allocation_breakdown();
        assert_eq!(breakdown.models_vram_gb, 6.0);
        assert_eq!(breakdown.models_ram_gb, 2.0);
    }

    #[test]
    fn measured_usage_replaces_reservation() {
        let rm = manager(24.0, 64.0);
        rm.prepare_model_loading("m1", ModelType::Vision, false);
        rm.model_loaded_with_usage("m1", MemoryFootprint::new(3.5, 0.25));

        let info = rm.model_info("m1").unwrap();
        assert_eq!(info.vram_allocated_gb, 3.5);
        assert_eq!(info.ram_allocated_gb, 0.25);
        assert!(info.loaded_at.is_some());
    }

    #[test]
    fn denies_without_auto_swap() {
        let rm = manager(8.0, 64.0);
        assert!(rm.prepare_model_loading("a", ModelType::LanguageModel, false).can_load);
        rm.model_loaded("a");

        let decision = rm.prepare_model_loading("b", ModelType::LanguageModel, false);
        assert!(!decision.can_load);
        assert!(decision.reason.contains("Insufficient memory"), "{}", decision.reason);
        assert!(decision.evicted.is_empty());
        assert_eq!(rm.get_model_state("a"), ModelState::Loaded);
        assert_eq!(rm.get_model_state("b"), ModelState::Unloaded);
    }

    #[test]
    fn auto_swap_evicts_least_recently_used() {
        let rm = manager(14.0, 64.0);
        rm.prepare_model_loading("old", ModelType::Vision, false);
        rm.model_loaded("old");
        rm.prepare_model_loading("recent", ModelType::Vision, false);
        rm.model_loaded("recent");
        rm.prepare_model_loading("llm", ModelType::LanguageModel, false);
        rm.model_loaded("llm");
        // Touch "recent" and "llm" again so "old" is the LRU entry.
        rm.model_busy("recent");
        rm.model_ready("recent");
        rm.model_busy("llm");
        rm.model_ready("llm");

        // 10 GB used of 14; a 7 GB diffusion model needs 3 more.
        let decision = rm.prepare_model_loading("sd", ModelType::DiffusionImage, true);
        assert!(decision.can_load, "{}", decision.reason);
        assert_eq!(decision.evicted, vec!["old".to_string(), "recent".to_string()]);
        assert_eq!(rm.get_model_state("old"), ModelState::Unloaded);
        assert_eq!(rm.get_model_state("llm"), ModelState::Loaded);
        assert_eq!(rm.get_model_state("sd"), ModelState::Loading);
    }

    #[test]
    fn auto_swap_never_evicts_busy_or_pinned() {
        let rm = manager(14.0, 64.0);
        rm.prepare_model_loading("busy", ModelType::LanguageModel, false);
        rm.model_loaded("busy");
        rm.model_busy("busy");
        rm.prepare_model_loading("pinned", ModelType::LanguageModel, false);
        rm.model_loaded("pinned");
        assert!(rm.set_pinned("pinned", true));

        let decision = rm.prepare_model_loading("sd", ModelType::DiffusionImage, true);
        assert!(!decision.can_load);
        assert!(decision.reason.contains("even after auto-swap"), "{}", decision.reason);
        assert_eq!(rm.get_model_state("busy"), ModelState::Busy);
        assert_eq!(rm.get_model_state("pinned"), ModelState::Loaded);
        assert_eq!(rm.get_active_models().len(), 2);
    }

    #[test]
    fn failed_eviction_plan_evicts_nothing() {
        let rm = manager(10.0, 64.0);
        rm.prepare_model_loading("small", ModelType::TextToSpeech, false);
        rm.model_loaded("small");

        let decision = rm.prepare_model_loading_with_estimate(
            "huge",
            ModelType::DiffusionImage,
            true,
            MemoryFootprint::new(20.0, 1.0),
        );
        assert!(!decision.can_load);
        assert_eq!(rm.get_model_state("small"), ModelState::Loaded);
    }

    #[test]
    fn duplicate_prepare_while_loading_is_denied() {
        let rm = manager(24.0, 64.0);
        assert!(rm.prepare_model_loading("m", ModelType::Vision, false).can_load);
        let again = rm.prepare_model_loading("m", ModelType::Vision, false);
        assert!(!again.can_load);
        assert!(again.reason.contains("already being loaded"));
    }

    #[test]
    fn prepare_for_resident_model_does_not_double_reserve() {
        let rm = manager(24.0, 64.0);
        rm.prepare_model_loading("m", ModelType::Vision, false);
        rm.model_loaded("m");
        let again = rm.prepare_model_loading("m", ModelType::Vision, false);
        assert!(again.can_load);
        assert_eq!(rm.get_memory_allocation_breakdown().models_vram_gb, 2.0);
    }

    #[test]
    fn contract_violations_are_ignored() {
        let rm = manager(24.0, 64.0);
        assert_eq!(rm.model_loaded("never"), ModelState::Unloaded);
        assert_eq!(rm.model_busy("never"), ModelState::Unloaded);
        assert_eq!(rm.model_ready("never"), ModelState::Unloaded);
        assert!(rm.get_active_models().is_empty());

        rm.prepare_model_loading("m", ModelType::Vision, false);
        assert_eq!(rm.model_busy("m"), ModelState::Loading);
        assert_eq!(rm.model_ready("m"), ModelState::Loading);
        assert_eq!(rm.model_loaded("m"), ModelState::Loaded);
        assert_eq!(rm.model_ready("m"), ModelState::Loaded);
        assert_eq!(rm.model_loaded("m"), ModelState::Loaded);
    }

    #[test]
    fn busy_model_is_not_unloadable() {
        let rm = manager(24.0, 64.0);
        rm.prepare_model_loading("m", ModelType::Vision, false);
        rm.model_loaded("m");
        assert!(rm.model_info("m").unwrap().can_unload);
        rm.model_busy("m");
        assert!(!rm.model_info("m").unwrap().can_unload);
        rm.model_ready("m");
        assert!(rm.model_info("m").unwrap().can_unload);
    }

    #[test]
    fn set_pinned_on_unknown_model() {
        let rm = manager(24.0, 64.0);
        assert!(!rm.set_pinned("ghost", true));
        assert_eq!(rm.get_model_state("ghost"), ModelState::Unloaded);
    }

    #[test]
    fn canvas_allocation_counts_against_budget() {
        let rm = manager(8.0, 64.0);
        rm.update_canvas_history_allocation(3.0, 3.0);
        let decision = rm.prepare_model_loading("m", ModelType::LanguageModel, false);
        assert!(!decision.can_load);

        rm.update_canvas_history_allocation(0.0, 0.0);
        assert!(rm.prepare_model_loading("m", ModelType::LanguageModel, false).can_load);
    }

    #[test]
    fn reserve_and_external_usage_shrink_budget() {
        let rm = ResourceManager::new(
            DeviceCapacity {
                total_vram_gb: 10.0,
                total_ram_gb: 64.0,
                external_apps_vram_gb: 2.0,
            },
            SystemReserve {
                vram_gb: 1.5,
                ram_gb: 2.0,
            },
        );
        let breakdown = rm.get_memory_allocation_breakdown();
        assert_eq!(breakdown.total_available_vram_gb, 6.5);
        assert_eq!(breakdown.total_available_ram_gb, 62.0);
        assert!(!rm.prepare_model_loading("sd", ModelType::DiffusionImage, false).can_load);
    }

    #[test]
    fn custom_estimates_override_defaults() {
        let rm = manager(24.0, 64.0).with_estimates(HashMap::from([(
            ModelType::SpeechToText,
            MemoryFootprint::new(0.5, 0.5),
        )]));
        assert_eq!(rm.estimate_for(ModelType::SpeechToText).vram_gb, 0.5);
        assert_eq!(rm.estimate_for(ModelType::LanguageModel).vram_gb, 6.0);
    }

    #[test]
    fn operation_blocked_by_other_busy_model_when_gpu_heavy() {
        let rm = manager(24.0, 64.0);
        rm.prepare_model_loading("llm", ModelType::LanguageModel, false);
        rm.model_loaded("llm");
        rm.model_busy("llm");

        let heavy = rm.can_perform_operation(OperationKind::TextToImage, "sd");
        assert!(!heavy.allowed);
        assert!(heavy.reason.contains("llm"));

        let light = rm.can_perform_operation(OperationKind::TextToSpeech, "tts");
        assert!(light.allowed, "{}", light.reason);

        let own = rm.can_perform_operation(OperationKind::TextGeneration, "llm");
        assert!(!own.allowed);
        assert!(own.reason.contains("busy"));
    }

    #[test]
    fn operation_on_loading_target_is_denied() {
        let rm = manager(24.0, 64.0);
        rm.prepare_model_loading("sd", ModelType::DiffusionImage, false);
        let decision = rm.can_perform_operation(OperationKind::TextToImage, "sd");
        assert!(!decision.allowed);
        assert!(decision.reason.contains("still loading"));
    }

    #[test]
    fn refresh_capacity_from_probe() {
        let rm = manager(8.0, 16.0);
        let mut probe = MockCapacityProbe::new();
        probe.expect_probe().times(1).returning(|| {
            Ok(DeviceCapacity {
                total_vram_gb: 24.0,
                total_ram_gb: 128.0,
                external_apps_vram_gb: 1.0,
            })
        });

        assert!(rm.refresh_capacity(&probe));
        let capacity = rm.device_capacity();
        assert_eq!(capacity.total_vram_gb, 24.0);
        assert_eq!(capacity.external_apps_vram_gb, 1.0);
    }

    #[test]
    fn failed_probe_keeps_previous_capacity() {
        let rm = manager(8.0, 16.0);
        let mut probe = MockCapacityProbe::new();
        probe
            .expect_probe()
            .returning(|| Err(anyhow::anyhow!("no GPU driver")));

        assert!(!rm.refresh_capacity(&probe));
        assert_eq!(rm.device_capacity().total_vram_gb, 8.0);
    }

    #[test]
    fn negative_estimate_literal_is_clamped() {
        let rm = manager(8.0, 64.0);
        let decision = rm.prepare_model_loading_with_estimate(
            "neg",
            ModelType::Vision,
            false,
            MemoryFootprint {
                vram_gb: -100.0,
                ram_gb: 0.0,
            },
        );
        assert!(decision.can_load);
        assert_eq!(rm.get_memory_allocation_breakdown().models_vram_gb, 0.0);

        let approvals = (0..5)
            .filter(|i| {
                rm.prepare_model_loading(&format!("sd{}", i), ModelType::DiffusionImage, false)
                    .can_load
            })
            .count();
        assert_eq!(approvals, 1);
        assert_eq!(rm.get_memory_allocation_breakdown().models_vram_gb, 7.0);
    }

    #[test]
    fn nan_usage_literal_is_clamped() {
        let rm = manager(8.0, 64.0);
        rm.prepare_model_loading("v", ModelType::Vision, false);
        rm.model_loaded_with_usage(
            "v",
            MemoryFootprint {
                vram_gb: f64::NAN,
                ram_gb: 0.5,
            },
        );

        let info = rm.model_info("v").unwrap();
        assert_eq!(info.vram_allocated_gb, 0.0);
        assert_eq!(info.ram_allocated_gb, 0.5);

        let decision = rm.prepare_model_loading("tts", ModelType::TextToSpeech, false);
        assert!(decision.can_load, "{}", decision.reason);
    }

    #[test]
    fn custom_estimates_are_clamped() {
        let rm = manager(8.0, 64.0).with_estimates(HashMap::from([(
            ModelType::LanguageModel,
            MemoryFootprint {
                vram_gb: -5.0,
                ram_gb: f64::INFINITY,
            },
        )]));
        assert_eq!(rm.estimate_for(ModelType::LanguageModel), MemoryFootprint::ZERO);
    }

    #[test]
    fn auto_swap_never_evicts_loading_model() {
        let rm = manager(10.0, 64.0);
        assert!(rm.prepare_model_loading("llm", ModelType::LanguageModel, false).can_load);

        let decision = rm.prepare_model_loading("sd", ModelType::DiffusionImage, true);
        assert!(!decision.can_load);
        assert!(decision.evicted.is_empty());
        assert_eq!(rm.get_model_state("llm"), ModelState::Loading);
        assert_eq!(rm.get_model_state("sd"), ModelState::Unloaded);
        assert_eq!(rm.get_memory_allocation_breakdown().models_vram_gb, 6.0);
    }

    #[test]
    fn ram_shortfall_drives_eviction() {
        // Plenty of VRAM; only host RAM is short.
        let rm = manager(24.0, 5.0);
        rm.prepare_model_loading("llm", ModelType::LanguageModel, false);
        rm.model_loaded("llm");

        let denied = rm.prepare_model_loading("sd", ModelType::DiffusionImage, false);
        assert!(!denied.can_load);
        assert!(denied.reason.contains("RAM"), "{}", denied.reason);

        let decision = rm.prepare_model_loading("sd", ModelType::DiffusionImage, true);
        assert!(decision.can_load, "{}", decision.reason);
        assert_eq!(decision.evicted, vec!["llm".to_string()]);
        let breakdown = rm.get_memory_allocation_breakdown();
        assert_eq!(breakdown.models_ram_gb, 4.0);
        assert_eq!(breakdown.models_vram_gb, 7.0);
    }

    #[test]
    fn resident_requester_never_evicts_itself() {
        let rm = manager(8.0, 64.0);
        rm.prepare_model_loading("llm", ModelType::LanguageModel, false);
        rm.model_loaded("llm");

        let decision = rm.prepare_model_loading_with_estimate(
            "llm",
            ModelType::LanguageModel,
            true,
            MemoryFootprint::new(20.0, 1.0),
        );
        assert!(decision.can_load);
        assert!(decision.evicted.is_empty());
        assert_eq!(rm.get_model_state("llm"), ModelState::Loaded);
        assert_eq!(rm.get_memory_allocation_breakdown().models_vram_gb, 6.0);
    }
}
