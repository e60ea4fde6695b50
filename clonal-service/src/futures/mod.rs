// Futures Module
// Handles to launched tasks and the registry that names them

pub mod handle;
pub mod registry;

// Re-export key types
pub use handle::{
    HandleId, HandleResolver, HandleState, OutputSet, TaskFailure, TaskHandle, TaskStatus,
};
pub use registry::FutureRegistry;
