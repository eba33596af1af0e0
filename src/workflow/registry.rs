/// Hot-reload workflow registry using ArcSwap
///
/// Keeps compiled workflow definitions in memory behind an atomic pointer
/// swap, so API-side updates never block concurrent executions. Compilation
/// is also the validation boundary: graph structure and trigger config are
/// checked here, at creation/reload time, not during execution.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{GraphError, StorageError};
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{validate_graph, Edge, EdgeLabel, Node, TriggerSpec, Workflow};

/// A workflow compiled into execution-ready form
///
/// Holds the two indices the engine traverses with (node-id map and
/// outgoing-edge map), the validated entry node, and the parsed trigger.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub workflow: Workflow,
    /// The node never targeted by any edge; deterministic tie-break applied
    pub entry_node_id: String,
    pub nodes: HashMap<String, Node>,
    pub edges_by_source: HashMap<String, Vec<Edge>>,
    pub trigger: TriggerSpec,
}

impl CompiledWorkflow {
    /// Validate and index a workflow definition
    pub fn compile(workflow: Workflow) -> Result<Self, GraphError> {
        let entry_node_id = validate_graph(&workflow.nodes, &workflow.edges)?;
        let trigger = TriggerSpec::parse(workflow.trigger_type, &workflow.trigger_config)?;

        let mut nodes = HashMap::new();
        for node in &workflow.nodes {
            nodes.insert(node.id.clone(), node.clone());
        }

        let mut edges_by_source: HashMap<String, Vec<Edge>> = HashMap::new();
        for edge in &workflow.edges {
            edges_by_source
                .entry(edge.source.clone())
                .or_default()
                .push(edge.clone());
        }

        Ok(Self {
            workflow,
            entry_node_id,
            nodes,
            edges_by_source,
            trigger,
        })
    }

    /// First outgoing edge of `source` carrying `label`, in declaration
    /// order. Duplicate labels are undefined behavior; the first one wins.
    pub fn select_edge(&self, source: &str, label: EdgeLabel) -> Option<&Edge> {
        self.edges_by_source
            .get(source)
            .and_then(|edges| edges.iter().find(|e| e.matches(label)))
    }
}

/// Lock-free registry of compiled workflows
#[derive(Debug)]
pub struct WorkflowRegistry {
    workflows: ArcSwap<HashMap<Uuid, Arc<CompiledWorkflow>>>,
    storage: WorkflowStorage,
}

impl WorkflowRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Populate the registry from storage at startup. Workflows that no
    /// longer compile are skipped with an error log rather than taking the
    /// whole process down.
    pub async fn init_from_storage(&self) -> Result<(), StorageError> {
        let stored = self.storage.load_all_workflows().await?;
        let mut compiled = HashMap::new();

        for workflow in stored {
            let id = workflow.id;
            match CompiledWorkflow::compile(workflow) {
                Ok(c) => {
                    compiled.insert(id, Arc::new(c));
                }
                Err(e) => {
                    tracing::error!("❌ Skipping workflow {} at startup: {}", id, e);
                }
            }
        }

        let count = compiled.len();
        self.workflows.store(Arc::new(compiled));
        tracing::info!("📊 Initialized workflow registry with {} workflows", count);
        Ok(())
    }

    /// Reload a single workflow from storage with an atomic pointer swap
    pub async fn reload_workflow(&self, id: Uuid) -> Result<(), StorageError> {
        let workflow = self
            .storage
            .get_workflow(id)
            .await?
            .ok_or_else(|| StorageError::Corrupt(format!("workflow {} not found", id)))?;

        let compiled = CompiledWorkflow::compile(workflow)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        let current = self.workflows.load();
        let mut next = (**current).clone();
        next.insert(id, Arc::new(compiled));
        self.workflows.store(Arc::new(next));

        tracing::info!("🔥 Hot-reloaded workflow: {}", id);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<CompiledWorkflow>> {
        self.workflows.load().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<CompiledWorkflow>> {
        self.workflows.load().values().cloned().collect()
    }

    pub fn remove_workflow(&self, id: Uuid) {
        let current = self.workflows.load();
        let mut next = (**current).clone();
        if next.remove(&id).is_some() {
            self.workflows.store(Arc::new(next));
            tracing::info!("🗑️ Removed workflow from registry: {}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{NodeKind, TriggerType};
    use serde_json::json;

    fn graph_workflow() -> Workflow {
        Workflow::new(
            Uuid::new_v4(),
            "0xsca".to_string(),
            "branching".to_string(),
            TriggerType::TimeSchedule,
            json!({"interval_minutes": 60}),
            vec![
                Node {
                    id: "check".to_string(),
                    kind: NodeKind::Condition,
                    config: json!({"source": "price_feed:ETH-USD", "operator": ">", "value": 10, "chain": "base"}),
                },
                Node {
                    id: "buy".to_string(),
                    kind: NodeKind::Swap,
                    config: json!({}),
                },
                Node {
                    id: "tell".to_string(),
                    kind: NodeKind::Notification,
                    config: json!({"webhook_url": "https://hooks.example/x"}),
                },
            ],
            vec![
                Edge {
                    source: "check".to_string(),
                    target: "buy".to_string(),
                    label: Some(EdgeLabel::OnTrue),
                },
                Edge {
                    source: "check".to_string(),
                    target: "tell".to_string(),
                    label: Some(EdgeLabel::OnFalse),
                },
                Edge {
                    source: "buy".to_string(),
                    target: "tell".to_string(),
                    label: None,
                },
            ],
        )
    }

    #[test]
    fn compile_builds_indices_and_entry() {
        let compiled = CompiledWorkflow::compile(graph_workflow()).unwrap();
        assert_eq!(compiled.entry_node_id, "check");
        assert_eq!(compiled.nodes.len(), 3);
        assert_eq!(compiled.edges_by_source["check"].len(), 2);

        let on_true = compiled.select_edge("check", EdgeLabel::OnTrue).unwrap();
        assert_eq!(on_true.target, "buy");
        let default = compiled.select_edge("buy", EdgeLabel::Default).unwrap();
        assert_eq!(default.target, "tell");
        assert!(compiled.select_edge("tell", EdgeLabel::Default).is_none());
    }

    #[test]
    fn compile_rejects_bad_trigger_config() {
        let mut workflow = graph_workflow();
        workflow.trigger_type = TriggerType::PriceThreshold;
        workflow.trigger_config = json!({"asset": "ETH-USD"});
        assert!(CompiledWorkflow::compile(workflow).is_err());
    }
}
