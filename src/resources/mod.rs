//! Model residency and memory budget coordination.
//!
//! Decides, for one process sharing one GPU, which models may be resident,
//! tracks what every consumer (models, canvas history, system reserve,
//! external applications) holds, and evicts idle models to make room.

mod breakdown;
mod eviction;
mod manager;
mod model;
mod probe;

pub use breakdown::{DeviceCapacity, MemoryAllocationBreakdown, SystemReserve};
pub use manager::{ResourceManager, default_estimate};
pub use model::{
    ActiveModel, LoadDecision, MemoryFootprint, ModelState, ModelType, OperationDecision,
    OperationKind,
};
pub use probe::{CapacityProbe, HostMemoryProbe};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Unknown model type: {0}")]
    UnknownModelType(String),
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
}
