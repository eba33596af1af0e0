/// Core workflow type definitions
///
/// Defines the workflow graph model (nodes, labeled edges, triggers) and the
/// typed config shapes each node/trigger variant expects. Workflows are
/// stored as JSON columns in SQLite; the opaque config blobs are parsed into
/// their typed shapes once, at the boundary where the engine consumes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::GraphError;

/// Workflow lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Active,
    Triggered,
    Executing,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Triggered => "triggered",
            WorkflowStatus::Executing => "executing",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WorkflowStatus::Pending),
            "active" => Some(WorkflowStatus::Active),
            "triggered" => Some(WorkflowStatus::Triggered),
            "executing" => Some(WorkflowStatus::Executing),
            "completed" => Some(WorkflowStatus::Completed),
            "failed" => Some(WorkflowStatus::Failed),
            "cancelled" => Some(WorkflowStatus::Cancelled),
            "paused" => Some(WorkflowStatus::Paused),
            _ => None,
        }
    }
}

/// Trigger kinds, a closed set
///
/// Dispatch over trigger kinds is an exhaustive match in the evaluator, so
/// adding a kind is a compile-time-checked extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    PriceThreshold,
    TimeSchedule,
    PollingEvent,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::PriceThreshold => "price_threshold",
            TriggerType::TimeSchedule => "time_schedule",
            TriggerType::PollingEvent => "polling_event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "price_threshold" => Some(TriggerType::PriceThreshold),
            "time_schedule" => Some(TriggerType::TimeSchedule),
            "polling_event" => Some(TriggerType::PollingEvent),
            _ => None,
        }
    }
}

/// Node kinds, a closed set
///
/// A node is either a condition check, a transactional onchain action, or a
/// webhook notification. The engine dispatches with an exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Condition,
    Swap,
    Bridge,
    Stake,
    SupplyAsset,
    Notification,
}

impl NodeKind {
    /// Transactional nodes require a quote, a signing grant and an execute
    /// call; condition and notification nodes do not.
    pub fn is_transactional(&self) -> bool {
        matches!(
            self,
            NodeKind::Swap | NodeKind::Bridge | NodeKind::Stake | NodeKind::SupplyAsset
        )
    }
}

/// A single node in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "n1", "swap-1")
    pub id: String,
    /// The kind of node, which determines execution behavior
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Node-specific configuration; parsed into a typed shape at execution
    /// time, after placeholder resolution
    pub config: Value,
}

/// Labels that select among multiple outgoing edges of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    OnTrue,
    OnFalse,
    Default,
}

/// A labeled directed connection between two nodes
///
/// An absent label is equivalent to `default`. Multiple edges from one node
/// sharing the same label is undefined behavior: the engine picks the first
/// match in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Source node ID
    pub source: String,
    /// Target node ID
    pub target: String,
    /// Edge label selecting this edge among the source's outgoing edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<EdgeLabel>,
}

impl Edge {
    pub fn matches(&self, label: EdgeLabel) -> bool {
        self.label.unwrap_or(EdgeLabel::Default) == label
    }
}

/// A user-authored workflow: trigger descriptor plus action graph
///
/// `trigger_config` is immutable user intent; `trigger_state` is the
/// engine-owned poller checkpoint. They live in separate columns so the
/// engine never rewrites user configuration and user edits never corrupt a
/// poller cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Smart contract account the workflow's actions execute against
    pub sca_address: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub trigger_type: TriggerType,
    pub trigger_config: Value,
    /// Engine-owned poller checkpoint (last seen block, last item timestamp)
    pub trigger_state: Value,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub status: WorkflowStatus,
    pub next_check_at: Option<DateTime<Utc>>,
    pub execution_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub max_retries: i32,
    pub current_retry_count: i32,
    pub last_error_message: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Identifier returned by the onchain automation registry
    pub upkeep_id: Option<String>,
    /// Transaction hash from onchain trigger registration
    pub registration_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create a new workflow in the pending state
    pub fn new(
        user_id: Uuid,
        sca_address: String,
        name: String,
        trigger_type: TriggerType,
        trigger_config: Value,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            sca_address,
            name,
            description: None,
            is_active: false,
            trigger_type,
            trigger_config,
            trigger_state: Value::Object(serde_json::Map::new()),
            nodes,
            edges,
            status: WorkflowStatus::Pending,
            next_check_at: None,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            max_retries: 3,
            current_retry_count: 0,
            last_error_message: None,
            last_error_at: None,
            upkeep_id: None,
            registration_tx_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether an execution is currently in flight for this workflow
    pub fn is_running(&self) -> bool {
        matches!(
            self.status,
            WorkflowStatus::Triggered | WorkflowStatus::Executing
        )
    }

    /// Whether the trigger evaluator should consider this workflow at all
    pub fn can_be_triggered(&self) -> bool {
        self.is_active
            && !self.is_running()
            && !matches!(
                self.status,
                WorkflowStatus::Failed | WorkflowStatus::Cancelled
            )
    }

    pub fn can_retry(&self) -> bool {
        self.current_retry_count < self.max_retries
    }
}

/// Validate the workflow graph and determine its entry node
///
/// The entry node is the node that is never the target of any edge. With
/// multiple candidates, the first such node in `nodes` order wins, a
/// deterministic tie-break, recorded here rather than rediscovered at
/// execution time. A graph where every node is targeted (a pure cycle) is
/// rejected outright. Cycles elsewhere in the graph are legal in the data
/// model; the engine bounds traversal by node count, so they cannot loop
/// forever.
pub fn validate_graph(nodes: &[Node], edges: &[Edge]) -> Result<String, GraphError> {
    if nodes.is_empty() {
        return Err(GraphError::Empty);
    }

    let mut ids = HashSet::new();
    for node in nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(GraphError::DuplicateNode(node.id.clone()));
        }
    }

    for edge in edges {
        if !ids.contains(edge.source.as_str()) {
            return Err(GraphError::UnknownNode(edge.source.clone()));
        }
        if !ids.contains(edge.target.as_str()) {
            return Err(GraphError::UnknownNode(edge.target.clone()));
        }
    }

    let targets: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
    let entry = nodes
        .iter()
        .find(|n| !targets.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .ok_or(GraphError::NoEntryNode)?;

    if graph_has_cycle(nodes, edges) {
        tracing::warn!(
            "⚠️ Workflow graph contains a cycle beyond entry node '{}'; traversal is step-bounded",
            entry
        );
    }

    Ok(entry)
}

/// Cycle detection over the node/edge lists using petgraph
fn graph_has_cycle(nodes: &[Node], edges: &[Edge]) -> bool {
    use petgraph::algo::is_cyclic_directed;
    use petgraph::graph::DiGraph;
    use std::collections::HashMap;

    let mut graph = DiGraph::<&str, ()>::new();
    let mut index = HashMap::new();
    for node in nodes {
        index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }
    for edge in edges {
        if let (Some(&s), Some(&t)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) {
            graph.add_edge(s, t, ());
        }
    }
    is_cyclic_directed(&graph)
}

/// Comparison operators for condition nodes and price triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl CompareOp {
    /// Compare two JSON values: numerically when both sides coerce to f64,
    /// otherwise by string equality (ordering operators fail the check).
    pub fn compare(&self, actual: &Value, target: &Value) -> bool {
        if let (Some(a), Some(t)) = (as_f64(actual), as_f64(target)) {
            return match self {
                CompareOp::Gt => a > t,
                CompareOp::Lt => a < t,
                CompareOp::Ge => a >= t,
                CompareOp::Le => a <= t,
                CompareOp::Eq => a == t,
                CompareOp::Ne => a != t,
            };
        }
        let a = value_as_string(actual);
        let t = value_as_string(target);
        match self {
            CompareOp::Eq => a == t,
            CompareOp::Ne => a != t,
            _ => false,
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// --- Typed node config shapes ---
//
// Parsed from the resolved config at the dispatch point, so a malformed
// config fails once with a clear error instead of ad hoc at each field.

/// Condition node config: compare fetched onchain data against a target
///
/// Example: { "source": "price_feed:ETH-USD", "operator": ">", "value": 10, "chain": "base" }
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionConfig {
    pub source: String,
    pub operator: CompareOp,
    pub value: Value,
    pub chain: String,
}

/// Swap node config
#[derive(Debug, Clone, Deserialize)]
pub struct SwapConfig {
    pub from_asset: String,
    pub to_asset: String,
    /// Amount in base units, as a string to avoid JSON float truncation
    pub amount: String,
    pub from_chain: String,
    pub to_chain: String,
    #[serde(default)]
    pub slippage: Option<f64>,
}

/// Bridge node config
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub asset: String,
    pub amount: String,
    pub from_chain: String,
    pub to_chain: String,
}

/// Stake node config
#[derive(Debug, Clone, Deserialize)]
pub struct StakeConfig {
    pub asset: String,
    pub amount: String,
    pub from_chain: String,
    pub staking_pool: String,
}

/// Lending supply node config
#[derive(Debug, Clone, Deserialize)]
pub struct SupplyConfig {
    pub asset: String,
    pub amount: String,
    pub from_chain: String,
    pub lending_pool: String,
}

/// Notification node config: webhook POST with an optional message
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub message: Option<String>,
}

// --- Typed trigger shapes ---

/// Price threshold trigger config
///
/// Example: { "asset": "ETH-USD", "operator": ">", "value": 3000.0, "chain": "base" }
#[derive(Debug, Clone, Deserialize)]
pub struct PriceTriggerConfig {
    pub asset: String,
    pub operator: CompareOp,
    pub value: f64,
    pub chain: String,
}

/// Time schedule trigger config
///
/// A one-shot schedule sets `start_at` only; a recurring schedule also sets
/// `interval_minutes`, which reschedules `next_check_at` after each run.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleTriggerConfig {
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interval_minutes: Option<u64>,
}

/// Polling trigger config, dispatched by source kind
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PollingTriggerConfig {
    /// JSON feed poller keyed on the newest item timestamp
    Feed { feed_url: String },
    /// Chain explorer transaction poller keyed on the last seen block
    ChainLog { address: String, chain: String },
}

/// Fully parsed trigger descriptor, a closed sum over trigger kinds
#[derive(Debug, Clone)]
pub enum TriggerSpec {
    Price(PriceTriggerConfig),
    Schedule(ScheduleTriggerConfig),
    Polling(PollingTriggerConfig),
}

impl TriggerSpec {
    /// Parse a trigger's opaque config into its typed shape. Validated once
    /// at workflow creation and again cheaply wherever a fresh row is loaded.
    pub fn parse(trigger_type: TriggerType, config: &Value) -> Result<Self, GraphError> {
        let parsed = match trigger_type {
            TriggerType::PriceThreshold => serde_json::from_value(config.clone())
                .map(TriggerSpec::Price)
                .map_err(|e| GraphError::Trigger(e.to_string()))?,
            TriggerType::TimeSchedule => serde_json::from_value(config.clone())
                .map(TriggerSpec::Schedule)
                .map_err(|e| GraphError::Trigger(e.to_string()))?,
            TriggerType::PollingEvent => serde_json::from_value(config.clone())
                .map(TriggerSpec::Polling)
                .map_err(|e| GraphError::Trigger(e.to_string()))?,
        };
        Ok(parsed)
    }

    /// Recurring triggers put the workflow back into the active pool after a
    /// successful run instead of completing it.
    pub fn is_recurring(&self) -> bool {
        match self {
            TriggerSpec::Price(_) => false,
            TriggerSpec::Schedule(cfg) => cfg.interval_minutes.is_some(),
            TriggerSpec::Polling(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, kind: NodeKind) -> Node {
        Node {
            id: id.to_string(),
            kind,
            config: json!({}),
        }
    }

    fn edge(source: &str, target: &str, label: Option<EdgeLabel>) -> Edge {
        Edge {
            source: source.to_string(),
            target: target.to_string(),
            label,
        }
    }

    #[test]
    fn entry_node_is_the_untargeted_node() {
        let nodes = vec![node("a", NodeKind::Condition), node("b", NodeKind::Swap)];
        let edges = vec![edge("a", "b", Some(EdgeLabel::OnTrue))];
        assert_eq!(validate_graph(&nodes, &edges).unwrap(), "a");
    }

    #[test]
    fn entry_node_tie_break_is_first_in_declaration_order() {
        let nodes = vec![
            node("x", NodeKind::Notification),
            node("y", NodeKind::Notification),
            node("z", NodeKind::Swap),
        ];
        let edges = vec![edge("x", "z", None)];
        // Both "x" and "y" are untargeted; "x" comes first.
        assert_eq!(validate_graph(&nodes, &edges).unwrap(), "x");
    }

    #[test]
    fn pure_cycle_is_rejected() {
        let nodes = vec![node("a", NodeKind::Swap), node("b", NodeKind::Swap)];
        let edges = vec![edge("a", "b", None), edge("b", "a", None)];
        assert!(matches!(
            validate_graph(&nodes, &edges),
            Err(GraphError::NoEntryNode)
        ));
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let nodes = vec![node("a", NodeKind::Swap)];
        let edges = vec![edge("a", "missing", None)];
        assert!(matches!(
            validate_graph(&nodes, &edges),
            Err(GraphError::UnknownNode(n)) if n == "missing"
        ));
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let nodes = vec![node("a", NodeKind::Swap), node("a", NodeKind::Bridge)];
        assert!(matches!(
            validate_graph(&nodes, &[]),
            Err(GraphError::DuplicateNode(n)) if n == "a"
        ));
    }

    #[test]
    fn compare_op_handles_numbers_and_strings() {
        assert!(CompareOp::Gt.compare(&json!(15.0), &json!(10)));
        assert!(!CompareOp::Gt.compare(&json!(5), &json!(10)));
        assert!(CompareOp::Ge.compare(&json!("42"), &json!(42)));
        assert!(CompareOp::Eq.compare(&json!("healthy"), &json!("healthy")));
        // Ordering over non-numeric strings fails the check rather than guessing
        assert!(!CompareOp::Gt.compare(&json!("abc"), &json!("abd")));
    }

    #[test]
    fn trigger_spec_parses_typed_configs() {
        let spec = TriggerSpec::parse(
            TriggerType::PriceThreshold,
            &json!({"asset": "ETH-USD", "operator": ">", "value": 3000.0, "chain": "base"}),
        )
        .unwrap();
        assert!(matches!(spec, TriggerSpec::Price(ref c) if c.operator == CompareOp::Gt));
        assert!(!spec.is_recurring());

        let spec = TriggerSpec::parse(
            TriggerType::PollingEvent,
            &json!({"source": "chain_log", "address": "0xabc", "chain": "ethereum"}),
        )
        .unwrap();
        assert!(spec.is_recurring());

        let err = TriggerSpec::parse(TriggerType::PriceThreshold, &json!({"asset": "ETH-USD"}));
        assert!(err.is_err());
    }

    #[test]
    fn unlabeled_edge_matches_default() {
        let e = edge("a", "b", None);
        assert!(e.matches(EdgeLabel::Default));
        assert!(!e.matches(EdgeLabel::OnTrue));
    }
}
