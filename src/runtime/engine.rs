/// Graph execution engine
///
/// Walks a workflow's node graph from its entry node, executing each node
/// and following labeled edges until no outgoing edge applies. Node
/// execution within a run is strictly sequential because later nodes may
/// reference earlier outputs through the expression resolver. The execution
/// record is persisted when the run starts and after every node transition,
/// so a crash leaves a resumable cursor plus all accumulated outputs.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{EngineError, GrantError, ProviderError};
use crate::provider::types::{
    BridgeQuoteRequest, ExecuteRequest, StakeQuoteRequest, SupplyQuoteRequest, SwapQuoteRequest,
    TransactionResult,
};
use crate::provider::ProviderManager;
use crate::runtime::resolver::resolve_config;
use crate::signing::GrantResolver;
use crate::workflow::execution::Execution;
use crate::workflow::registry::CompiledWorkflow;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{
    BridgeConfig, ConditionConfig, EdgeLabel, Node, NodeKind, NotificationConfig, StakeConfig,
    SupplyConfig, SwapConfig, Workflow,
};

/// Default slippage when a swap config does not set one, in percent
const DEFAULT_SLIPPAGE: f64 = 0.5;

/// A fetched quote reduced to what signing and permission checks need
struct QuotedAction {
    quote_id: String,
    target_contract: String,
    /// Spend value in base units, checked against grant limits
    value: u128,
    degraded: bool,
    quote_json: Value,
}

/// Drives workflow graphs to completion, one sequential task per run
pub struct ExecutionEngine {
    storage: WorkflowStorage,
    provider: Arc<ProviderManager>,
    grants: Arc<GrantResolver>,
    http: reqwest::Client,
}

impl ExecutionEngine {
    pub fn new(
        storage: WorkflowStorage,
        provider: Arc<ProviderManager>,
        grants: Arc<GrantResolver>,
    ) -> Self {
        Self {
            storage,
            provider,
            grants,
            http: reqwest::Client::new(),
        }
    }

    /// Execute one triggered run of a workflow.
    ///
    /// The caller guarantees the workflow is not already running (the
    /// dispatcher's compare-and-set). On any node failure the execution is
    /// marked failed with the node id it died at, persisted, and the error
    /// re-raised for the caller's retry bookkeeping.
    pub async fn execute(&self, workflow: &Workflow) -> Result<Execution, EngineError> {
        let compiled = CompiledWorkflow::compile(workflow.clone())
            .map_err(|e| EngineError::Structural(e.to_string()))?;

        tracing::info!(
            "🚀 Starting execution of workflow {} from node '{}'",
            workflow.id,
            compiled.entry_node_id
        );

        let mut execution = Execution::begin(workflow.id, compiled.entry_node_id.clone());
        self.storage.insert_execution(&execution).await?;

        match self.run_graph(workflow, &compiled, &mut execution).await {
            Ok(()) => {
                execution.complete();
                self.storage.update_execution(&execution).await?;
                tracing::info!("🎉 Execution {} completed", execution.id);
                Ok(execution)
            }
            Err(e) => {
                tracing::error!(
                    "❌ Execution {} failed at node {:?}: {}",
                    execution.id,
                    execution.current_node_id,
                    e
                );
                execution.fail(e.to_string());
                self.storage.update_execution(&execution).await?;
                Err(e)
            }
        }
    }

    /// The traversal loop: resolve, dispatch, record, persist, advance
    async fn run_graph(
        &self,
        workflow: &Workflow,
        compiled: &CompiledWorkflow,
        execution: &mut Execution,
    ) -> Result<(), EngineError> {
        let mut steps = 0usize;

        while let Some(node_id) = execution.current_node_id.clone() {
            steps += 1;
            if steps > compiled.nodes.len() {
                return Err(EngineError::Structural(format!(
                    "traversal exceeded {} nodes; cycle along the executed path",
                    compiled.nodes.len()
                )));
            }

            let node = compiled.nodes.get(&node_id).ok_or_else(|| {
                EngineError::Structural(format!(
                    "node '{}' not found in workflow definition",
                    node_id
                ))
            })?;

            tracing::info!("📍 Executing node '{}' ({:?})", node.id, node.kind);
            let resolved = resolve_config(&node.config, &execution.execution_data)?;

            let (output, next) = self
                .execute_node(workflow, compiled, node, &resolved, execution)
                .await?;

            execution.record_output(&node_id, output);
            execution.advance(next);
            self.storage.update_execution(execution).await?;
        }

        Ok(())
    }

    /// Dispatch one node by kind, returning its output and the next node id
    async fn execute_node(
        &self,
        workflow: &Workflow,
        compiled: &CompiledWorkflow,
        node: &Node,
        resolved: &Value,
        execution: &mut Execution,
    ) -> Result<(Value, Option<String>), EngineError> {
        match node.kind {
            NodeKind::Condition => {
                let cfg: ConditionConfig = parse_config(node, resolved)?;
                let data = self.provider.onchain_data(&cfg.source, &cfg.chain).await?;
                let result = cfg.operator.compare(&data.value, &cfg.value);
                tracing::info!(
                    "🔎 Condition '{}': {} {:?} {} -> {}",
                    node.id,
                    data.value,
                    cfg.operator,
                    cfg.value,
                    result
                );

                let label = if result {
                    EdgeLabel::OnTrue
                } else {
                    EdgeLabel::OnFalse
                };
                // No edge for this outcome is a valid "do nothing" endpoint.
                let next = compiled
                    .select_edge(&node.id, label)
                    .map(|e| e.target.clone());

                let output = json!({
                    "result": result,
                    "actual": data.value,
                    "provider": data.provider,
                });
                Ok((output, next))
            }

            NodeKind::Notification => {
                let cfg: NotificationConfig = parse_config(node, resolved)?;
                let message = cfg
                    .message
                    .unwrap_or_else(|| format!("Workflow '{}' has been executed.", workflow.name));

                let response = self
                    .http
                    .post(&cfg.webhook_url)
                    .json(&json!({ "content": message }))
                    .send()
                    .await
                    .map_err(|e| EngineError::Notification(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(EngineError::Notification(format!(
                        "webhook answered {}",
                        response.status()
                    )));
                }
                tracing::info!("📣 Notification sent for node '{}'", node.id);

                let next = compiled
                    .select_edge(&node.id, EdgeLabel::Default)
                    .map(|e| e.target.clone());
                Ok((json!({ "delivered": true }), next))
            }

            NodeKind::Swap | NodeKind::Bridge | NodeKind::Stake | NodeKind::SupplyAsset => {
                let quoted = self.quote_action(workflow, node, resolved).await?;

                let (tx, quoted) = match self.sign_and_execute(workflow, node.kind, &quoted).await {
                    // The quote went stale between fetch and execute: fetch
                    // a fresh one and retry exactly once within this run.
                    Err(EngineError::Provider(ProviderError::QuoteExpired { .. })) => {
                        tracing::info!(
                            "⌛ Quote expired mid-run for node '{}'; re-fetching once",
                            node.id
                        );
                        let fresh = self.quote_action(workflow, node, resolved).await?;
                        let tx = self.sign_and_execute(workflow, node.kind, &fresh).await?;
                        (tx, fresh)
                    }
                    other => (other?, quoted),
                };

                execution.transaction_hash = Some(tx.transaction_hash.clone());

                let next = compiled
                    .select_edge(&node.id, EdgeLabel::Default)
                    .map(|e| e.target.clone());

                let output = json!({
                    "tx_hash": tx.transaction_hash,
                    "status": tx.status.as_str(),
                    "quote": quoted.quote_json,
                    "degraded": quoted.degraded,
                });
                Ok((output, next))
            }
        }
    }

    /// Obtain a quote for a transactional node and derive the signing
    /// target and spend value the grant check needs
    async fn quote_action(
        &self,
        workflow: &Workflow,
        node: &Node,
        resolved: &Value,
    ) -> Result<QuotedAction, EngineError> {
        match node.kind {
            NodeKind::Swap => {
                let cfg: SwapConfig = parse_config(node, resolved)?;
                let req = SwapQuoteRequest {
                    from_asset: cfg.from_asset.clone(),
                    to_asset: cfg.to_asset.clone(),
                    amount: cfg.amount.clone(),
                    from_chain: cfg.from_chain.clone(),
                    to_chain: cfg.to_chain.clone(),
                    sca_address: workflow.sca_address.clone(),
                    slippage: cfg.slippage.unwrap_or(DEFAULT_SLIPPAGE),
                };
                let quote = self.provider.swap_quote(&req).await?;

                let target_contract = quote
                    .route
                    .first()
                    .and_then(|hop| hop.get("toTokenAddress"))
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| cfg.from_asset.clone());

                Ok(QuotedAction {
                    target_contract,
                    value: parse_amount(node, &quote.from_amount)?,
                    degraded: quote.degraded,
                    quote_id: quote.quote_id.clone(),
                    quote_json: serde_json::to_value(&quote).unwrap_or(Value::Null),
                })
            }

            NodeKind::Bridge => {
                let cfg: BridgeConfig = parse_config(node, resolved)?;
                let req = BridgeQuoteRequest {
                    asset: cfg.asset.clone(),
                    amount: cfg.amount.clone(),
                    from_chain: cfg.from_chain.clone(),
                    to_chain: cfg.to_chain.clone(),
                    sca_address: workflow.sca_address.clone(),
                };
                let quote = self.provider.bridge_quote(&req).await?;

                Ok(QuotedAction {
                    target_contract: cfg.asset,
                    value: parse_amount(node, &quote.amount)?,
                    degraded: quote.degraded,
                    quote_id: quote.quote_id.clone(),
                    quote_json: serde_json::to_value(&quote).unwrap_or(Value::Null),
                })
            }

            NodeKind::Stake => {
                let cfg: StakeConfig = parse_config(node, resolved)?;
                let req = StakeQuoteRequest {
                    asset: cfg.asset,
                    amount: cfg.amount,
                    from_chain: cfg.from_chain,
                    staking_pool: cfg.staking_pool,
                    sca_address: workflow.sca_address.clone(),
                };
                let quote = self.provider.staking_quote(&req).await?;

                Ok(QuotedAction {
                    target_contract: quote.staking_pool_address.clone(),
                    value: parse_amount(node, &quote.amount)?,
                    degraded: quote.degraded,
                    quote_id: quote.quote_id.clone(),
                    quote_json: serde_json::to_value(&quote).unwrap_or(Value::Null),
                })
            }

            NodeKind::SupplyAsset => {
                let cfg: SupplyConfig = parse_config(node, resolved)?;
                let req = SupplyQuoteRequest {
                    asset: cfg.asset,
                    amount: cfg.amount,
                    from_chain: cfg.from_chain,
                    lending_pool: cfg.lending_pool,
                    sca_address: workflow.sca_address.clone(),
                };
                let quote = self.provider.lending_quote(&req).await?;

                Ok(QuotedAction {
                    target_contract: quote.lending_pool_address.clone(),
                    value: parse_amount(node, &quote.amount)?,
                    degraded: quote.degraded,
                    quote_id: quote.quote_id.clone(),
                    quote_json: serde_json::to_value(&quote).unwrap_or(Value::Null),
                })
            }

            NodeKind::Condition | NodeKind::Notification => Err(EngineError::Structural(format!(
                "node '{}' is not a transactional node",
                node.id
            ))),
        }
    }

    /// Resolve a grant for the quoted target/value, sign the quote id with
    /// the grant's session key, and execute through the provider.
    ///
    /// The execute path is never reached without a non-null grant.
    async fn sign_and_execute(
        &self,
        workflow: &Workflow,
        kind: NodeKind,
        quoted: &QuotedAction,
    ) -> Result<TransactionResult, EngineError> {
        let grant = self
            .grants
            .find_valid_grant(workflow.user_id, &quoted.target_contract, quoted.value)
            .await?
            .ok_or_else(|| GrantError::NoValidGrant {
                target: quoted.target_contract.clone(),
                value: quoted.value,
            })?;

        let signer = self.grants.signer_for_grant(&grant)?;
        let signature = signer.sign(&quoted.quote_id);
        tracing::info!(
            "🔏 Quote {} signed with session key {}",
            quoted.quote_id,
            grant.public_address
        );

        let req = ExecuteRequest {
            quote_id: quoted.quote_id.clone(),
            user_signature: signature,
            sca_address: workflow.sca_address.clone(),
        };

        let tx = match kind {
            NodeKind::Swap => self.provider.execute_swap(&req).await?,
            NodeKind::Bridge => self.provider.execute_bridge(&req).await?,
            NodeKind::Stake => self.provider.execute_staking(&req).await?,
            NodeKind::SupplyAsset => self.provider.execute_supply(&req).await?,
            NodeKind::Condition | NodeKind::Notification => {
                return Err(EngineError::Structural(
                    "cannot execute a non-transactional node".to_string(),
                ))
            }
        };

        tracing::info!(
            "✅ Action executed: tx {}, status {}",
            tx.transaction_hash,
            tx.status.as_str()
        );
        Ok(tx)
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(
    node: &Node,
    resolved: &Value,
) -> Result<T, EngineError> {
    serde_json::from_value(resolved.clone()).map_err(|e| EngineError::NodeConfig {
        node: node.id.clone(),
        message: e.to_string(),
    })
}

fn parse_amount(node: &Node, amount: &str) -> Result<u128, EngineError> {
    amount.parse().map_err(|_| EngineError::NodeConfig {
        node: node.id.clone(),
        message: format!("amount '{}' is not an integer base-unit value", amount),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolveError;
    use crate::provider::{CircuitBreakerConfig, ProviderManager};
    use crate::signing::{
        DevVault, GrantPermissions, SessionKeyGrant, SessionSigner, SpendLimits,
    };
    use crate::test_support::StubProvider;
    use crate::workflow::execution::ExecutionStatus;
    use crate::workflow::types::{Edge, TriggerType};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use chrono::{Duration, Utc};
    use sqlx::sqlite::SqlitePoolOptions;
    use uuid::Uuid;

    async fn test_storage() -> WorkflowStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = WorkflowStorage::new(pool);
        storage.init_schema().await.unwrap();
        storage
    }

    fn engine_with(storage: WorkflowStorage, stub: Arc<StubProvider>) -> ExecutionEngine {
        let manager = Arc::new(ProviderManager::new(
            stub,
            StubProvider::new(),
            CircuitBreakerConfig::default(),
        ));
        let grants = Arc::new(GrantResolver::new(storage.clone(), Arc::new(DevVault::new())));
        ExecutionEngine::new(storage, manager, grants)
    }

    async fn insert_grant(
        storage: &WorkflowStorage,
        user_id: Uuid,
        targets: Vec<&str>,
        max_per_tx: Option<u128>,
    ) {
        let key = [9u8; 32];
        let signer = SessionSigner::from_key_bytes(key);
        let grant = SessionKeyGrant {
            id: Uuid::new_v4(),
            user_id,
            public_address: signer.address(),
            encrypted_private_key: BASE64.encode(key),
            encryption_context: Default::default(),
            permissions: GrantPermissions {
                allowed_targets: targets.into_iter().map(String::from).collect(),
                spend_limits: max_per_tx.map(|max| SpendLimits {
                    max_spend_per_tx: Some(max),
                    max_spend_per_day: None,
                }),
            },
            expires_at: Utc::now() + Duration::hours(1),
            description: None,
        };
        storage.insert_grant(&grant).await.unwrap();
    }

    fn condition_node(id: &str, operator: &str, value: Value) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Condition,
            config: json!({
                "source": "price_feed:ETH-USD",
                "operator": operator,
                "value": value,
                "chain": "base",
            }),
        }
    }

    fn swap_node(id: &str, amount: &str) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Swap,
            config: json!({
                "from_asset": "USDC",
                "to_asset": "ETH",
                "amount": amount,
                "from_chain": "base",
                "to_chain": "base",
            }),
        }
    }

    fn workflow_with(nodes: Vec<Node>, edges: Vec<Edge>) -> Workflow {
        let mut workflow = Workflow::new(
            Uuid::new_v4(),
            "0xsca".to_string(),
            "test".to_string(),
            TriggerType::PriceThreshold,
            json!({"asset": "ETH-USD", "operator": ">", "value": 1.0, "chain": "base"}),
            nodes,
            edges,
        );
        workflow.is_active = true;
        workflow
    }

    fn on_true(source: &str, target: &str) -> Edge {
        Edge {
            source: source.to_string(),
            target: target.to_string(),
            label: Some(EdgeLabel::OnTrue),
        }
    }

    #[tokio::test]
    async fn condition_true_follows_on_true_edge() {
        let storage = test_storage().await;
        let stub = StubProvider::with_onchain_value(json!(15.0));
        let engine = engine_with(storage.clone(), stub);

        // n1 fires true (15 > 10) and must transition to n2, never n3.
        let workflow = workflow_with(
            vec![
                condition_node("n1", ">", json!(10)),
                condition_node("n2", ">", json!(10)),
                condition_node("n3", "<", json!(10)),
            ],
            vec![
                on_true("n1", "n2"),
                Edge {
                    source: "n1".to_string(),
                    target: "n3".to_string(),
                    label: Some(EdgeLabel::OnFalse),
                },
            ],
        );

        let execution = engine.execute(&workflow).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.execution_data.len(), 2);
        assert_eq!(execution.execution_data["n1"]["output"]["result"], json!(true));
        assert!(execution.execution_data.contains_key("n2"));
        assert!(!execution.execution_data.contains_key("n3"));
    }

    #[tokio::test]
    async fn condition_without_matching_edge_is_a_valid_terminal() {
        let storage = test_storage().await;
        let stub = StubProvider::with_onchain_value(json!(5.0));
        let engine = engine_with(storage.clone(), stub);

        // Condition is false and only an on_true edge exists: terminate
        // cleanly, not an error.
        let workflow = workflow_with(
            vec![
                condition_node("n1", ">", json!(10)),
                condition_node("n2", ">", json!(10)),
            ],
            vec![on_true("n1", "n2")],
        );

        let execution = engine.execute(&workflow).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.execution_data.len(), 1);
        assert_eq!(execution.execution_data["n1"]["output"]["result"], json!(false));
    }

    #[tokio::test]
    async fn swap_over_grant_limit_fails_without_sending() {
        let storage = test_storage().await;
        let stub = StubProvider::new();
        let engine = engine_with(storage.clone(), stub.clone());

        let workflow = workflow_with(vec![swap_node("n1", "1000")], vec![]);
        // Every grant caps per-tx spend below the swap amount.
        insert_grant(&storage, workflow.user_id, vec!["USDC"], Some(100)).await;

        let err = engine.execute(&workflow).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Grant(GrantError::NoValidGrant { .. })
        ));
        // The execute path must never have been reached.
        assert_eq!(stub.execute_calls(), 0);

        let executions = storage.list_executions(workflow.id).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert_eq!(executions[0].failed_at_node.as_deref(), Some("n1"));
        assert!(executions[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("no valid session key grant"));
    }

    #[tokio::test]
    async fn swap_executes_with_valid_grant_and_records_tx() {
        let storage = test_storage().await;
        let stub = StubProvider::new();
        let engine = engine_with(storage.clone(), stub.clone());

        let workflow = workflow_with(vec![swap_node("n1", "100")], vec![]);
        insert_grant(&storage, workflow.user_id, vec!["USDC"], Some(1_000)).await;

        let execution = engine.execute(&workflow).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.transaction_hash.as_deref(), Some("0xstubtx"));
        assert_eq!(
            execution.execution_data["n1"]["output"]["tx_hash"],
            json!("0xstubtx")
        );
        assert_eq!(stub.execute_calls(), 1);
    }

    #[tokio::test]
    async fn unresolved_placeholder_fails_with_named_path() {
        let storage = test_storage().await;
        let engine = engine_with(storage.clone(), StubProvider::new());

        let workflow = workflow_with(
            vec![Node {
                id: "n1".to_string(),
                kind: NodeKind::Notification,
                config: json!({
                    "webhook_url": "https://hooks.invalid/x",
                    "message": "{{nonexistent_node.output.value}}",
                }),
            }],
            vec![],
        );

        let err = engine.execute(&workflow).await.unwrap_err();
        match err {
            EngineError::Resolution(ResolveError::PathNotFound { path, .. }) => {
                assert_eq!(path, "nonexistent_node.output.value");
            }
            other => panic!("expected resolution error, got {:?}", other),
        }

        let executions = storage.list_executions(workflow.id).await.unwrap();
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert_eq!(executions[0].failed_at_node.as_deref(), Some("n1"));
    }

    #[tokio::test]
    async fn upstream_output_feeds_downstream_condition() {
        let storage = test_storage().await;
        let stub = StubProvider::new();
        // The condition will compare the onchain value against n1's tx hash.
        *stub.onchain_value.lock().unwrap() = json!("0xstubtx");
        let engine = engine_with(storage.clone(), stub.clone());

        let workflow = workflow_with(
            vec![
                swap_node("n1", "100"),
                Node {
                    id: "n2".to_string(),
                    kind: NodeKind::Condition,
                    config: json!({
                        "source": "tx:last",
                        "operator": "==",
                        "value": "{{n1.output.tx_hash}}",
                        "chain": "base",
                    }),
                },
            ],
            vec![Edge {
                source: "n1".to_string(),
                target: "n2".to_string(),
                label: None,
            }],
        );
        insert_grant(&storage, workflow.user_id, vec!["USDC"], None).await;

        let execution = engine.execute(&workflow).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        // n2 saw the literal value n1 produced.
        assert_eq!(execution.execution_data["n2"]["output"]["result"], json!(true));
    }

    #[tokio::test]
    async fn expired_quote_is_refetched_once() {
        let storage = test_storage().await;
        let stub = StubProvider::new();
        stub.expire_first_execute
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let engine = engine_with(storage.clone(), stub.clone());

        let workflow = workflow_with(vec![swap_node("n1", "100")], vec![]);
        insert_grant(&storage, workflow.user_id, vec!["USDC"], None).await;

        let execution = engine.execute(&workflow).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        // One quote for the first attempt, a fresh one after expiry.
        assert_eq!(stub.quote_calls(), 2);
        assert_eq!(stub.execute_calls(), 2);
    }

    #[tokio::test]
    async fn runtime_cycle_is_cut_by_the_step_budget() {
        let storage = test_storage().await;
        let stub = StubProvider::with_onchain_value(json!(15.0));
        let engine = engine_with(storage.clone(), stub);

        // n0 -> n1 -> n2 -> n1: entry exists, but the executed path cycles.
        let workflow = workflow_with(
            vec![
                condition_node("n0", ">", json!(10)),
                condition_node("n1", ">", json!(10)),
                condition_node("n2", ">", json!(10)),
            ],
            vec![on_true("n0", "n1"), on_true("n1", "n2"), on_true("n2", "n1")],
        );

        let err = engine.execute(&workflow).await.unwrap_err();
        assert!(matches!(err, EngineError::Structural(ref m) if m.contains("cycle")));
    }
}
