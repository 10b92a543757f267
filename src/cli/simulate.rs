//! CLI subcommand: `modelgate simulate <plan.toml>`
//!
//! Replays a scripted sequence of worker calls against a fresh manager. Useful
//! for checking whether a set of models fits a card before shipping defaults.
//!
//! ```toml
//! [device]
//! total_vram_gb = 12.0
//! total_ram_gb = 32.0
//!
//! [[steps]]
//! action = "prepare"
//! id = "llama-8b"
//! model_type = "llm"
//! auto_swap = true
//!
//! [[steps]]
//! action = "loaded"
//! id = "llama-8b"
//! ```

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::status::{print_active_models, print_breakdown};
use crate::config::Config;
use crate::resources::{
    ActiveModel, DeviceCapacity, MemoryAllocationBreakdown, MemoryFootprint, ModelType,
    OperationKind, ResourceManager,
};

#[derive(Args)]
pub struct SimulateArgs {
    /// Plan file (TOML)
    pub plan: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
pub struct Plan {
    /// Overrides the configured device capacity
    #[serde(default)]
    pub device: Option<DeviceCapacity>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Prepare {
        id: String,
        model_type: String,
        #[serde(default)]
        auto_swap: bool,
        #[serde(default)]
        vram_gb: Option<f64>,
        #[serde(default)]
        ram_gb: Option<f64>,
    },
    Loaded {
        id: String,
        #[serde(default)]
        vram_gb: Option<f64>,
        #[serde(default)]
        ram_gb: Option<f64>,
    },
    Busy {
        id: String,
    },
    Ready {
        id: String,
    },
    Cleanup {
        id: String,
        model_type: String,
    },
    Pin {
        id: String,
    },
    Unpin {
        id: String,
    },
    Canvas {
        vram_gb: f64,
        ram_gb: f64,
    },
    Check {
        operation: String,
        id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub action: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub steps: Vec<StepReport>,
    pub active_models: Vec<ActiveModel>,
    pub breakdown: MemoryAllocationBreakdown,
}

pub fn run(args: SimulateArgs, config: &Config) -> Result<()> {
    let plan = load_plan(&args.plan)?;
    let manager = match plan.device {
        Some(capacity) => ResourceManager::from_config(config, capacity),
        None => super::build_manager(config),
    };

    let report = replay(&plan, &manager)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for step in &report.steps {
        println!(
            "{:>3}. {:<8} {} {}",
            step.index,
            step.action,
            if step.ok { "ok  " } else { "FAIL" },
            step.detail
        );
    }
    println!();
    print_active_models(&report.active_models);
    println!();
    print_breakdown(&report.breakdown);

    Ok(())
}

pub fn load_plan(path: &Path) -> Result<Plan> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse plan {}", path.display()))
}

/// Run every step against `manager`. Only malformed steps are errors; denied
/// loads and blocked operations are reported as failed steps.
pub fn replay(plan: &Plan, manager: &ResourceManager) -> Result<SimulationReport> {
    let mut steps = Vec::with_capacity(plan.steps.len());

    for (i, step) in plan.steps.iter().enumerate() {
        let index = i + 1;
        let report = run_step(manager, step)
            .with_context(|| format!("Invalid step {} in plan", index))?;
        steps.push(StepReport { index, ..report });
    }

    Ok(SimulationReport {
        steps,
        active_models: manager.get_active_models(),
        breakdown: manager.get_memory_allocation_breakdown(),
    })
}

fn run_step(manager: &ResourceManager, step: &Step) -> Result<StepReport> {
    let report = |action: &str, ok: bool, detail: String| StepReport {
        index: 0,
        action: action.to_string(),
        ok,
        detail,
    };

    Ok(match step {
        Step::Prepare {
            id,
            model_type,
            auto_swap,
            vram_gb,
            ram_gb,
        } => {
            let model_type: ModelType = model_type.parse()?;
            let decision = match (vram_gb, ram_gb) {
                (None, None) => manager.prepare_model_loading(id, model_type, *auto_swap),
                _ => {
                    let default = manager.estimate_for(model_type);
                    let estimate = MemoryFootprint::new(
                        vram_gb.unwrap_or(default.vram_gb),
                        ram_gb.unwrap_or(default.ram_gb),
                    );
                    manager.prepare_model_loading_with_estimate(
                        id,
                        model_type,
                        *auto_swap,
                        estimate,
                    )
                }
            };
            report(
                "prepare",
                decision.can_load,
                format!("{}: {}", id, decision.reason),
            )
        }
        Step::Loaded {
            id,
            vram_gb,
            ram_gb,
        } => {
            let state = match (vram_gb, ram_gb) {
                (None, None) => manager.model_loaded(id),
                _ => manager.model_loaded_with_usage(
                    id,
                    MemoryFootprint::new(vram_gb.unwrap_or(0.0), ram_gb.unwrap_or(0.0)),
                ),
            };
            report("loaded", true, format!("{} -> {}", id, state))
        }
        Step::Busy { id } => report("busy", true, format!("{} -> {}", id, manager.model_busy(id))),
        Step::Ready { id } => {
            report("ready", true, format!("{} -> {}", id, manager.model_ready(id)))
        }
        Step::Cleanup { id, model_type } => {
            manager.cleanup_model(id, model_type.parse()?);
            report("cleanup", true, format!("{} -> unloaded", id))
        }
        Step::Pin { id } => report("pin", manager.set_pinned(id, true), id.clone()),
        Step::Unpin { id } => report("unpin", manager.set_pinned(id, false), id.clone()),
        Step::Canvas { vram_gb, ram_gb } => {
            manager.update_canvas_history_allocation(*vram_gb, *ram_gb);
            report(
                "canvas",
                true,
                format!("{:.3} GB VRAM / {:.3} GB RAM", vram_gb, ram_gb),
            )
        }
        Step::Check { operation, id } => {
            let operation: OperationKind = operation.parse()?;
            let decision = manager.can_perform_operation(operation, id);
            report(
                "check",
                decision.allowed,
                format!("{} on {}: {}", operation, id, decision.reason),
            )
        }
    })
}
