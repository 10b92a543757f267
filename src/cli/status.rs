use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::resources::{ActiveModel, MemoryAllocationBreakdown};

#[derive(Args)]
pub struct StatusArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let manager = super::build_manager(config);
    let breakdown = manager.get_memory_allocation_breakdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&breakdown)?);
    } else {
        print_breakdown(&breakdown);
    }
    Ok(())
}

pub fn print_breakdown(b: &MemoryAllocationBreakdown) {
    println!("Memory Budget");
    println!("-------------");
    println!("                    VRAM (GB)   RAM (GB)");
    println!(
        "Total             {:>10.2} {:>10.2}",
        b.total_vram_gb, b.total_ram_gb
    );
    println!(
        "System reserve    {:>10.2} {:>10.2}",
        b.system_reserve_vram_gb, b.system_reserve_ram_gb
    );
    println!("External apps     {:>10.2} {:>10}", b.external_apps_vram_gb, "-");
    println!(
        "Available         {:>10.2} {:>10.2}",
        b.total_available_vram_gb, b.total_available_ram_gb
    );
    println!(
        "  models          {:>10.2} {:>10.2}",
        b.models_vram_gb, b.models_ram_gb
    );
    println!(
        "  canvas history  {:>10.2} {:>10.2}",
        b.canvas_history_vram_gb, b.canvas_history_ram_gb
    );
    println!(
        "  free            {:>10.2} {:>10.2}",
        b.free_vram_gb(),
        b.free_ram_gb()
    );
}

pub fn print_active_models(models: &[ActiveModel]) {
    if models.is_empty() {
        println!("No active models");
        return;
    }

    println!("Active models:");
    for m in models {
        println!(
            "  {} [{}] {} ({:.2} GB VRAM, {:.2} GB RAM){}{}",
            m.id,
            m.model_type,
            m.state,
            m.vram_allocated_gb,
            m.ram_allocated_gb,
            if m.can_unload { ", evictable" } else { "" },
            if m.pinned { ", pinned" } else { "" }
        );
    }
}
