/// HTTP API Layer
///
/// Thin request/response mapping over the workflow storage, registry,
/// provider manager and scheduler. Handlers validate at the boundary and
/// translate domain errors into HTTP status codes; all business logic lives
/// in the runtime and signing layers.

// Workflow CRUD and lifecycle endpoints
pub mod workflows;

// Manual execution trigger and audit trail endpoints
pub mod executions;

use std::sync::Arc;

use crate::provider::ProviderManager;
use crate::runtime::TriggerSchedulerService;
use crate::workflow::{WorkflowRegistry, WorkflowStorage};

/// Shared application state injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub storage: WorkflowStorage,
    pub registry: Arc<WorkflowRegistry>,
    pub scheduler: Arc<TriggerSchedulerService>,
    pub provider: Arc<ProviderManager>,
}

pub use executions::create_execution_routes;
pub use workflows::create_workflow_routes;
