/// Runtime Execution Layer
///
/// This module drives workflows at runtime:
/// - Placeholder resolution over accumulated execution data
/// - The graph execution engine (sequential cursor walk with per-node
///   persistence)
/// - The periodic trigger sweep and execution dispatcher

// Expression resolver for node configs
pub mod resolver;

// Graph execution engine
pub mod engine;

// Periodic trigger sweep and dispatcher
pub mod scheduler;

pub use engine::ExecutionEngine;
pub use scheduler::TriggerSchedulerService;
