/// SQLite persistence layer for workflows, executions and grants
///
/// Workflow graphs and config blobs are stored as JSON columns for
/// flexibility while keeping indexed lookup fields for the scheduler's due
/// query. The execution table is the engine's durability point: it is
/// written when a run starts and after every node transition.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, sqlite::SqliteRow, Row};
use uuid::Uuid;

use crate::error::StorageError;
use crate::signing::SessionKeyGrant;
use crate::workflow::execution::{Execution, ExecutionStatus};
use crate::workflow::types::{Edge, Node, TriggerType, Workflow, WorkflowStatus};

/// SQLite-backed storage for the engine's three aggregates
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the schema. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                sca_address TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                is_active INTEGER NOT NULL DEFAULT 0,
                trigger_type TEXT NOT NULL,
                trigger_config JSON NOT NULL,
                trigger_state JSON NOT NULL DEFAULT '{}',
                nodes JSON NOT NULL,
                edges JSON NOT NULL,
                status TEXT NOT NULL,
                next_check_at TEXT,
                execution_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                current_retry_count INTEGER NOT NULL DEFAULT 0,
                last_error_message TEXT,
                last_error_at TEXT,
                upkeep_id TEXT,
                registration_tx_hash TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                current_node_id TEXT,
                execution_data JSON NOT NULL DEFAULT '{}',
                result JSON,
                error_message TEXT,
                failed_at_node TEXT,
                transaction_hash TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                parent_execution_id TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_key_grants (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                public_address TEXT NOT NULL UNIQUE,
                encrypted_private_key TEXT NOT NULL,
                encryption_context JSON NOT NULL,
                permissions JSON NOT NULL,
                expires_at TEXT NOT NULL,
                description TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status)",
            "CREATE INDEX IF NOT EXISTS idx_workflows_user ON workflows(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_workflows_next_check ON workflows(next_check_at)",
            "CREATE INDEX IF NOT EXISTS idx_executions_workflow ON workflow_executions(workflow_id)",
            "CREATE INDEX IF NOT EXISTS idx_grants_user_expires ON session_key_grants(user_id, expires_at)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        Ok(())
    }

    // --- Workflows ---

    /// Insert or update a workflow row in full
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO workflows (
                id, user_id, sca_address, name, description, is_active,
                trigger_type, trigger_config, trigger_state, nodes, edges,
                status, next_check_at, execution_count, success_count,
                failure_count, max_retries, current_retry_count,
                last_error_message, last_error_at, upkeep_id,
                registration_tx_hash, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                sca_address = excluded.sca_address,
                name = excluded.name,
                description = excluded.description,
                is_active = excluded.is_active,
                trigger_type = excluded.trigger_type,
                trigger_config = excluded.trigger_config,
                trigger_state = excluded.trigger_state,
                nodes = excluded.nodes,
                edges = excluded.edges,
                status = excluded.status,
                next_check_at = excluded.next_check_at,
                execution_count = excluded.execution_count,
                success_count = excluded.success_count,
                failure_count = excluded.failure_count,
                max_retries = excluded.max_retries,
                current_retry_count = excluded.current_retry_count,
                last_error_message = excluded.last_error_message,
                last_error_at = excluded.last_error_at,
                upkeep_id = excluded.upkeep_id,
                registration_tx_hash = excluded.registration_tx_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.user_id.to_string())
        .bind(&workflow.sca_address)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.is_active as i32)
        .bind(workflow.trigger_type.as_str())
        .bind(workflow.trigger_config.to_string())
        .bind(workflow.trigger_state.to_string())
        .bind(to_json(&workflow.nodes)?)
        .bind(to_json(&workflow.edges)?)
        .bind(workflow.status.as_str())
        .bind(workflow.next_check_at.map(|t| t.to_rfc3339()))
        .bind(workflow.execution_count)
        .bind(workflow.success_count)
        .bind(workflow.failure_count)
        .bind(workflow.max_retries)
        .bind(workflow.current_retry_count)
        .bind(&workflow.last_error_message)
        .bind(workflow.last_error_at.map(|t| t.to_rfc3339()))
        .bind(&workflow.upkeep_id)
        .bind(&workflow.registration_tx_hash)
        .bind(workflow.created_at.to_rfc3339())
        .bind(workflow.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StorageError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| workflow_from_row(&r)).transpose()
    }

    pub async fn list_workflows(&self, user_id: Option<Uuid>) -> Result<Vec<Workflow>, StorageError> {
        let rows = match user_id {
            Some(uid) => {
                sqlx::query("SELECT * FROM workflows WHERE user_id = ? ORDER BY updated_at DESC")
                    .bind(uid.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM workflows ORDER BY updated_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(workflow_from_row).collect()
    }

    /// Load every workflow for registry initialization at startup
    pub async fn load_all_workflows(&self) -> Result<Vec<Workflow>, StorageError> {
        let rows = sqlx::query("SELECT * FROM workflows")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(workflow_from_row).collect()
    }

    pub async fn delete_workflow(&self, id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Workflows eligible for a trigger check: active, not running, and due
    pub async fn due_workflows(&self, now: DateTime<Utc>) -> Result<Vec<Workflow>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflows
            WHERE is_active = 1
              AND status = 'active'
              AND (next_check_at IS NULL OR next_check_at <= ?)
            ORDER BY next_check_at
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(workflow_from_row).collect()
    }

    /// Persist only the engine-owned trigger state. User-declared
    /// trigger_config is deliberately untouched here.
    pub async fn update_trigger_state(&self, id: Uuid, state: &Value) -> Result<(), StorageError> {
        sqlx::query("UPDATE workflows SET trigger_state = ?, updated_at = ? WHERE id = ?")
            .bind(state.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark a workflow as triggered, visible to the audit trail between the
    /// sweep and its dispatch
    pub async fn mark_triggered(&self, id: Uuid) -> Result<(), StorageError> {
        sqlx::query("UPDATE workflows SET status = 'triggered', updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomically transition a workflow into the executing state.
    ///
    /// This is the compare-and-set guard for at-most-one in-flight execution
    /// per workflow: only an 'active' or 'triggered' row transitions, a row
    /// already 'executing' does not match and the second dispatcher loses.
    pub async fn try_mark_executing(&self, id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE workflows SET status = 'executing', updated_at = ?
            WHERE id = ? AND status IN ('active', 'triggered')
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // --- Executions ---

    pub async fn insert_execution(&self, execution: &Execution) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions (
                id, workflow_id, status, current_node_id, execution_data,
                result, error_message, failed_at_node, transaction_hash,
                retry_count, parent_execution_id, started_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.status.as_str())
        .bind(&execution.current_node_id)
        .bind(Value::Object(execution.execution_data.clone()).to_string())
        .bind(execution.result.as_ref().map(|v| v.to_string()))
        .bind(&execution.error_message)
        .bind(&execution.failed_at_node)
        .bind(&execution.transaction_hash)
        .bind(execution.retry_count)
        .bind(execution.parent_execution_id.map(|u| u.to_string()))
        .bind(execution.started_at.to_rfc3339())
        .bind(execution.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Per-node durability point: persist the cursor and accumulated data
    pub async fn update_execution(&self, execution: &Execution) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE workflow_executions SET
                status = ?, current_node_id = ?, execution_data = ?,
                result = ?, error_message = ?, failed_at_node = ?,
                transaction_hash = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(execution.status.as_str())
        .bind(&execution.current_node_id)
        .bind(Value::Object(execution.execution_data.clone()).to_string())
        .bind(execution.result.as_ref().map(|v| v.to_string()))
        .bind(&execution.error_message)
        .bind(&execution.failed_at_node)
        .bind(&execution.transaction_hash)
        .bind(execution.completed_at.map(|t| t.to_rfc3339()))
        .bind(execution.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, StorageError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| execution_from_row(&r)).transpose()
    }

    pub async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<Execution>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE workflow_id = ? ORDER BY started_at DESC",
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    // --- Session key grants ---

    pub async fn insert_grant(&self, grant: &SessionKeyGrant) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO session_key_grants (
                id, user_id, public_address, encrypted_private_key,
                encryption_context, permissions, expires_at, description
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(grant.id.to_string())
        .bind(grant.user_id.to_string())
        .bind(&grant.public_address)
        .bind(&grant.encrypted_private_key)
        .bind(to_json(&grant.encryption_context)?)
        .bind(to_json(&grant.permissions)?)
        .bind(grant.expires_at.to_rfc3339())
        .bind(&grant.description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Unexpired grants for a user, newest expiry first
    pub async fn grants_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionKeyGrant>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM session_key_grants
            WHERE user_id = ? AND expires_at > ?
            ORDER BY expires_at DESC
            "#,
        )
        .bind(user_id.to_string())
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(grant_from_row).collect()
    }
}

// --- Row mapping helpers ---

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Corrupt(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::Corrupt(format!("column '{}': {}", column, e)))
}

fn parse_uuid(column: &str, raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Corrupt(format!("column '{}': {}", column, e)))
}

fn parse_ts(column: &str, raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("column '{}': {}", column, e)))
}

fn parse_opt_ts(column: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>, StorageError> {
    raw.map(|s| parse_ts(column, &s)).transpose()
}

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow, StorageError> {
    let trigger_type_raw: String = row.get("trigger_type");
    let trigger_type = TriggerType::parse(&trigger_type_raw)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown trigger_type '{}'", trigger_type_raw)))?;

    let status_raw: String = row.get("status");
    let status = WorkflowStatus::parse(&status_raw)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown workflow status '{}'", status_raw)))?;

    let nodes: Vec<Node> = from_json("nodes", &row.get::<String, _>("nodes"))?;
    let edges: Vec<Edge> = from_json("edges", &row.get::<String, _>("edges"))?;

    Ok(Workflow {
        id: parse_uuid("id", &row.get::<String, _>("id"))?,
        user_id: parse_uuid("user_id", &row.get::<String, _>("user_id"))?,
        sca_address: row.get("sca_address"),
        name: row.get("name"),
        description: row.get("description"),
        is_active: row.get::<i64, _>("is_active") != 0,
        trigger_type,
        trigger_config: from_json("trigger_config", &row.get::<String, _>("trigger_config"))?,
        trigger_state: from_json("trigger_state", &row.get::<String, _>("trigger_state"))?,
        nodes,
        edges,
        status,
        next_check_at: parse_opt_ts("next_check_at", row.get("next_check_at"))?,
        execution_count: row.get("execution_count"),
        success_count: row.get("success_count"),
        failure_count: row.get("failure_count"),
        max_retries: row.get("max_retries"),
        current_retry_count: row.get("current_retry_count"),
        last_error_message: row.get("last_error_message"),
        last_error_at: parse_opt_ts("last_error_at", row.get("last_error_at"))?,
        upkeep_id: row.get("upkeep_id"),
        registration_tx_hash: row.get("registration_tx_hash"),
        created_at: parse_ts("created_at", &row.get::<String, _>("created_at"))?,
        updated_at: parse_ts("updated_at", &row.get::<String, _>("updated_at"))?,
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<Execution, StorageError> {
    let status_raw: String = row.get("status");
    let status = ExecutionStatus::parse(&status_raw)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown execution status '{}'", status_raw)))?;

    let data: Value = from_json("execution_data", &row.get::<String, _>("execution_data"))?;
    let execution_data = match data {
        Value::Object(map) => map,
        other => {
            return Err(StorageError::Corrupt(format!(
                "execution_data is not an object: {}",
                other
            )))
        }
    };

    Ok(Execution {
        id: parse_uuid("id", &row.get::<String, _>("id"))?,
        workflow_id: parse_uuid("workflow_id", &row.get::<String, _>("workflow_id"))?,
        status,
        current_node_id: row.get("current_node_id"),
        execution_data,
        result: row
            .get::<Option<String>, _>("result")
            .map(|s| from_json("result", &s))
            .transpose()?,
        error_message: row.get("error_message"),
        failed_at_node: row.get("failed_at_node"),
        transaction_hash: row.get("transaction_hash"),
        retry_count: row.get("retry_count"),
        parent_execution_id: row
            .get::<Option<String>, _>("parent_execution_id")
            .map(|s| parse_uuid("parent_execution_id", &s))
            .transpose()?,
        started_at: parse_ts("started_at", &row.get::<String, _>("started_at"))?,
        completed_at: parse_opt_ts("completed_at", row.get("completed_at"))?,
    })
}

fn grant_from_row(row: &SqliteRow) -> Result<SessionKeyGrant, StorageError> {
    Ok(SessionKeyGrant {
        id: parse_uuid("id", &row.get::<String, _>("id"))?,
        user_id: parse_uuid("user_id", &row.get::<String, _>("user_id"))?,
        public_address: row.get("public_address"),
        encrypted_private_key: row.get("encrypted_private_key"),
        encryption_context: from_json(
            "encryption_context",
            &row.get::<String, _>("encryption_context"),
        )?,
        permissions: from_json("permissions", &row.get::<String, _>("permissions"))?,
        expires_at: parse_ts("expires_at", &row.get::<String, _>("expires_at"))?,
        description: row.get("description"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::{GrantPermissions, SpendLimits};
    use crate::workflow::types::{NodeKind, TriggerType};
    use chrono::Duration;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_storage() -> WorkflowStorage {
        // A pooled ":memory:" database gets a fresh DB per connection, so
        // the pool must be pinned to a single connection in tests.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = WorkflowStorage::new(pool);
        storage.init_schema().await.unwrap();
        storage
    }

    fn sample_workflow() -> Workflow {
        Workflow::new(
            Uuid::new_v4(),
            "0xsca".to_string(),
            "dca into eth".to_string(),
            TriggerType::PriceThreshold,
            json!({"asset": "ETH-USD", "operator": "<", "value": 2500.0, "chain": "base"}),
            vec![Node {
                id: "n1".to_string(),
                kind: NodeKind::Swap,
                config: json!({"from_asset": "USDC", "to_asset": "ETH", "amount": "100",
                               "from_chain": "base", "to_chain": "base"}),
            }],
            vec![],
        )
    }

    #[tokio::test]
    async fn workflow_roundtrip() {
        let storage = test_storage().await;
        let mut workflow = sample_workflow();
        workflow.is_active = true;
        workflow.status = WorkflowStatus::Active;
        storage.save_workflow(&workflow).await.unwrap();

        let loaded = storage.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, workflow.name);
        assert_eq!(loaded.trigger_type, TriggerType::PriceThreshold);
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.nodes[0].kind, NodeKind::Swap);
        assert_eq!(loaded.status, WorkflowStatus::Active);
        assert!(loaded.is_active);
    }

    #[tokio::test]
    async fn cas_guard_rejects_second_dispatch() {
        let storage = test_storage().await;
        let mut workflow = sample_workflow();
        workflow.is_active = true;
        workflow.status = WorkflowStatus::Active;
        storage.save_workflow(&workflow).await.unwrap();

        assert!(storage.try_mark_executing(workflow.id).await.unwrap());
        // Second dispatch must lose: the row is already 'executing'.
        assert!(!storage.try_mark_executing(workflow.id).await.unwrap());

        let loaded = storage.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Executing);
    }

    #[tokio::test]
    async fn due_query_skips_inactive_running_and_future_workflows() {
        let storage = test_storage().await;
        let now = Utc::now();

        let mut due = sample_workflow();
        due.is_active = true;
        due.status = WorkflowStatus::Active;
        storage.save_workflow(&due).await.unwrap();

        let mut inactive = sample_workflow();
        inactive.status = WorkflowStatus::Active;
        storage.save_workflow(&inactive).await.unwrap();

        let mut running = sample_workflow();
        running.is_active = true;
        running.status = WorkflowStatus::Executing;
        storage.save_workflow(&running).await.unwrap();

        let mut future = sample_workflow();
        future.is_active = true;
        future.status = WorkflowStatus::Active;
        future.next_check_at = Some(now + Duration::hours(1));
        storage.save_workflow(&future).await.unwrap();

        let found = storage.due_workflows(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[tokio::test]
    async fn trigger_state_update_preserves_user_config() {
        let storage = test_storage().await;
        let mut workflow = sample_workflow();
        workflow.trigger_config = json!({"source": "chain_log", "address": "0xabc", "chain": "ethereum"});
        storage.save_workflow(&workflow).await.unwrap();

        storage
            .update_trigger_state(workflow.id, &json!({"last_checked_block": 19000000}))
            .await
            .unwrap();

        let loaded = storage.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.trigger_state["last_checked_block"], json!(19000000));
        assert_eq!(loaded.trigger_config["address"], json!("0xabc"));
    }

    #[tokio::test]
    async fn execution_roundtrip_with_node_transitions() {
        let storage = test_storage().await;
        let workflow = sample_workflow();
        storage.save_workflow(&workflow).await.unwrap();

        let mut execution = Execution::begin(workflow.id, "n1".to_string());
        storage.insert_execution(&execution).await.unwrap();

        execution.record_output("n1", json!({"tx_hash": "0xdead"}));
        execution.transaction_hash = Some("0xdead".to_string());
        execution.advance(None);
        execution.complete();
        storage.update_execution(&execution).await.unwrap();

        let loaded = storage.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert!(loaded.current_node_id.is_none());
        assert_eq!(loaded.execution_data["n1"]["output"]["tx_hash"], json!("0xdead"));
        assert_eq!(loaded.transaction_hash.as_deref(), Some("0xdead"));

        let listed = storage.list_executions(workflow.id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn grants_query_filters_expired() {
        let storage = test_storage().await;
        let user_id = Uuid::new_v4();

        let valid = SessionKeyGrant {
            id: Uuid::new_v4(),
            user_id,
            public_address: "0xaaa".to_string(),
            encrypted_private_key: "ZGV2LWtleQ==".to_string(),
            encryption_context: Default::default(),
            permissions: GrantPermissions {
                allowed_targets: vec!["0xtarget".to_string()],
                spend_limits: Some(SpendLimits {
                    max_spend_per_tx: Some(1_000),
                    max_spend_per_day: None,
                }),
            },
            expires_at: Utc::now() + Duration::hours(12),
            description: None,
        };
        let expired = SessionKeyGrant {
            id: Uuid::new_v4(),
            public_address: "0xbbb".to_string(),
            expires_at: Utc::now() - Duration::hours(1),
            ..valid.clone()
        };
        storage.insert_grant(&valid).await.unwrap();
        storage.insert_grant(&expired).await.unwrap();

        let found = storage.grants_for_user(user_id, Utc::now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].public_address, "0xaaa");
    }
}
