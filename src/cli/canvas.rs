use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::canvas::{CanvasMemoryTracker, CanvasScene};

#[derive(Args)]
pub struct CanvasArgs {
    /// Undo/redo history export (JSON, blobs base64-encoded)
    pub history: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: CanvasArgs) -> Result<()> {
    let scene = CanvasScene::load(&args.history)?;
    let summary = CanvasMemoryTracker::new().get_history_summary(&scene);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Canvas History");
    println!("--------------");
    println!("Undo entries: {}", summary.undo_entries);
    println!("Redo entries: {}", summary.redo_entries);
    println!("Total entries: {}", summary.entry_count);
    println!(
        "Estimated VRAM: {:.1} MB ({:.3} GB)",
        summary.vram_mb, summary.vram_gb
    );
    println!("Estimated RAM: {:.3} GB", summary.ram_gb);

    Ok(())
}
