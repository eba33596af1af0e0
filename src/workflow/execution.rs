/// Workflow execution audit record
///
/// One `Execution` is created per triggered run of a workflow. The engine
/// mutates it at every node transition and persists it each time, so the
/// cursor and accumulated node outputs survive a crash. Once terminal, the
/// record is immutable and stays queryable as the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Execution lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "executing" => Some(ExecutionStatus::Executing),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            "timeout" => Some(ExecutionStatus::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Executing)
    }
}

/// One run of a workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    /// Cursor into the graph; None once the run is finished
    pub current_node_id: Option<String>,
    /// Outputs of executed nodes, keyed by node id: { "<node_id>": { "output": ... } }
    pub execution_data: Map<String, Value>,
    /// Final result payload, set on completion
    pub result: Option<Value>,
    pub error_message: Option<String>,
    /// Node at which the run failed, for the audit trail
    pub failed_at_node: Option<String>,
    /// Hash of the last onchain transaction sent during this run
    pub transaction_hash: Option<String>,
    pub retry_count: i32,
    /// The execution this one is a retry of, if any
    pub parent_execution_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Start a new run positioned at the graph's entry node
    pub fn begin(workflow_id: Uuid, entry_node_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Executing,
            current_node_id: Some(entry_node_id),
            execution_data: Map::new(),
            result: None,
            error_message: None,
            failed_at_node: None,
            transaction_hash: None,
            retry_count: 0,
            parent_execution_id: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record a node's output under its id in the accumulated execution data
    pub fn record_output(&mut self, node_id: &str, output: Value) {
        self.execution_data
            .insert(node_id.to_string(), json!({ "output": output }));
    }

    /// Move the cursor to the next node, or finish the walk with None
    pub fn advance(&mut self, next_node_id: Option<String>) {
        self.current_node_id = next_node_id;
    }

    /// Mark the run completed, with the accumulated data as result payload
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.current_node_id = None;
        self.completed_at = Some(Utc::now());
        self.result = Some(Value::Object(self.execution_data.clone()));
    }

    /// Mark the run failed at the current cursor position
    pub fn fail(&mut self, message: String) {
        self.status = ExecutionStatus::Failed;
        self.failed_at_node = self.current_node_id.take();
        self.error_message = Some(message.clone());
        self.completed_at = Some(Utc::now());
        self.result = Some(json!({
            "error": message,
            "failed_at_node": self.failed_at_node,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_positions_cursor_at_entry() {
        let wf = Uuid::new_v4();
        let exec = Execution::begin(wf, "n1".to_string());
        assert_eq!(exec.status, ExecutionStatus::Executing);
        assert_eq!(exec.current_node_id.as_deref(), Some("n1"));
        assert!(exec.execution_data.is_empty());
    }

    #[test]
    fn complete_clears_cursor_and_snapshots_data() {
        let mut exec = Execution::begin(Uuid::new_v4(), "n1".to_string());
        exec.record_output("n1", json!({"result": true}));
        exec.advance(None);
        exec.complete();
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert!(exec.current_node_id.is_none());
        let result = exec.result.unwrap();
        assert_eq!(result["n1"]["output"]["result"], json!(true));
    }

    #[test]
    fn fail_records_the_node_the_cursor_was_on() {
        let mut exec = Execution::begin(Uuid::new_v4(), "n1".to_string());
        exec.advance(Some("n2".to_string()));
        exec.fail("quote failed".to_string());
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.failed_at_node.as_deref(), Some("n2"));
        assert!(exec.current_node_id.is_none());
        assert!(exec.status.is_terminal());
    }
}
