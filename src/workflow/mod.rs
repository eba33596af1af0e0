/// Workflow Management Layer
///
/// This module owns the workflow data model and its persistence:
/// - Type definitions (Workflow, Node, Edge, trigger shapes)
/// - Execution audit records
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap

// Core workflow type definitions
pub mod types;

// Per-run execution audit record
pub mod execution;

// SQLite persistence layer
pub mod storage;

// Hot-reload registry with compile-time graph validation
pub mod registry;

// Re-export commonly used types
pub use execution::{Execution, ExecutionStatus};
pub use registry::{CompiledWorkflow, WorkflowRegistry};
pub use storage::WorkflowStorage;
pub use types::{
    Edge, EdgeLabel, Node, NodeKind, TriggerSpec, TriggerType, Workflow, WorkflowStatus,
};
