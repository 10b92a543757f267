//! modelgate - GPU/RAM budget coordinator for locally hosted models
//!
//! This crate provides:
//! - Resource manager tracking model residency, reservations and LRU auto-swap
//! - Canvas undo/redo history memory estimation
//! - Config, XDG paths and the `modelgate` CLI

pub mod canvas;
pub mod cli;
pub mod config;
pub mod paths;
pub mod resources;

pub use config::Config;
pub use resources::ResourceManager;
