/// Periodic trigger sweep and execution dispatcher
///
/// A tokio-cron-scheduler job runs the sweep on a fixed cadence: evaluate
/// every due workflow's trigger, persist updated poller state (fired or
/// not, since cursors advance on every check), and hand fired workflows to
/// engine. Dispatch is the single writer per workflow: the compare-and-set
/// transition into 'executing' serializes the scheduler's dispatch against
/// concurrent manual triggers, so at most one execution is ever in flight
/// per workflow. Cross-workflow runs are independent tokio tasks.

use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::error::{EngineError, StorageError};
use crate::runtime::engine::ExecutionEngine;
use crate::triggers::TriggerEvaluator;
use crate::workflow::execution::Execution;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{TriggerSpec, Workflow, WorkflowStatus};

/// Periodic poller that feeds the execution engine
pub struct TriggerSchedulerService {
    scheduler: RwLock<JobScheduler>,
    storage: WorkflowStorage,
    evaluator: Arc<TriggerEvaluator>,
    engine: Arc<ExecutionEngine>,
    /// 6-field cron expression for the sweep cadence
    sweep_schedule: String,
    retry_delay_minutes: i64,
}

impl TriggerSchedulerService {
    pub async fn new(
        storage: WorkflowStorage,
        evaluator: Arc<TriggerEvaluator>,
        engine: Arc<ExecutionEngine>,
        sweep_schedule: String,
        retry_delay_minutes: i64,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: RwLock::new(scheduler),
            storage,
            evaluator,
            engine,
            sweep_schedule,
            retry_delay_minutes,
        })
    }

    /// Register the sweep job and start the scheduler
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        tracing::info!(
            "⏰ Starting trigger scheduler (sweep cadence: {})",
            self.sweep_schedule
        );

        let service = Arc::clone(self);
        let job = Job::new_async(self.sweep_schedule.as_str(), move |_uuid, _lock| {
            let service = Arc::clone(&service);
            Box::pin(async move {
                if let Err(e) = service.sweep().await {
                    tracing::error!("❌ Trigger sweep failed: {}", e);
                }
            })
        })?;

        {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?;
            scheduler.start().await?;
        }

        tracing::info!("✅ Trigger scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping trigger scheduler");
        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;
        Ok(())
    }

    /// One sweep: evaluate due workflows and spawn a dispatch task per
    /// fired workflow. Cross-workflow executions run concurrently; the CAS
    /// in dispatch keeps each individual workflow single-writer.
    pub async fn sweep(self: &Arc<Self>) -> Result<Vec<Uuid>, StorageError> {
        let fired = self.evaluate_due_workflows().await?;

        for workflow_id in fired.iter().copied() {
            let service = Arc::clone(self);
            tokio::spawn(async move {
                match service.dispatch(workflow_id).await {
                    Ok(execution) => {
                        tracing::info!(
                            "🎉 Workflow {} execution {} finished",
                            workflow_id,
                            execution.id
                        );
                    }
                    Err(e) => {
                        tracing::error!("❌ Workflow {} execution failed: {}", workflow_id, e);
                    }
                }
            });
        }

        Ok(fired)
    }

    /// Evaluate every due workflow's trigger, persisting updated poller
    /// state and marking fired workflows as triggered. Returns the fired
    /// workflow ids; dispatching them is the caller's business.
    pub async fn evaluate_due_workflows(&self) -> Result<Vec<Uuid>, StorageError> {
        let due = self.storage.due_workflows(Utc::now()).await?;
        if !due.is_empty() {
            tracing::debug!("🔍 Checking {} due workflows", due.len());
        }

        let mut fired = Vec::new();
        for workflow in due {
            if !workflow.can_be_triggered() {
                continue;
            }

            let trigger = match TriggerSpec::parse(workflow.trigger_type, &workflow.trigger_config)
            {
                Ok(trigger) => trigger,
                Err(e) => {
                    tracing::error!("❌ Workflow {} has an invalid trigger: {}", workflow.id, e);
                    continue;
                }
            };

            match self.evaluator.evaluate(&workflow, &trigger).await {
                Ok(decision) => {
                    // Poller cursors advance on every check; dropping this
                    // update would re-fire the same event next sweep.
                    if let Some(state) = &decision.state {
                        if let Err(e) = self.storage.update_trigger_state(workflow.id, state).await
                        {
                            tracing::error!(
                                "❌ Failed to persist trigger state for {}: {}",
                                workflow.id,
                                e
                            );
                            continue;
                        }
                    }

                    if decision.fired {
                        tracing::info!("🎯 Workflow {} ({}) triggered", workflow.id, workflow.name);
                        if let Err(e) = self.storage.mark_triggered(workflow.id).await {
                            tracing::error!("❌ Failed to mark {} triggered: {}", workflow.id, e);
                            continue;
                        }
                        fired.push(workflow.id);
                    }
                }
                Err(e) => {
                    tracing::error!("❌ Trigger check failed for workflow {}: {}", workflow.id, e);
                }
            }
        }

        Ok(fired)
    }

    /// Run one workflow execution end to end: CAS into 'executing', run the
    /// engine, then apply workflow bookkeeping (counters, retry policy,
    /// recurring reschedule).
    pub async fn dispatch(&self, workflow_id: Uuid) -> Result<Execution, EngineError> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or(EngineError::NotFound(workflow_id))?;

        if !self.storage.try_mark_executing(workflow_id).await? {
            return Err(if workflow.is_running() {
                EngineError::AlreadyRunning(workflow_id)
            } else {
                EngineError::NotDispatchable(workflow_id)
            });
        }

        let mut workflow = workflow;
        workflow.status = WorkflowStatus::Executing;

        let result = self.engine.execute(&workflow).await;
        self.finish_run(&mut workflow, &result).await;
        result
    }

    /// Post-run workflow bookkeeping. The execution record itself was
    /// already finalized by the engine.
    async fn finish_run(&self, workflow: &mut Workflow, result: &Result<Execution, EngineError>) {
        workflow.execution_count += 1;
        workflow.updated_at = Utc::now();

        match result {
            Ok(_) => {
                workflow.success_count += 1;
                workflow.current_retry_count = 0;
                workflow.last_error_message = None;

                match TriggerSpec::parse(workflow.trigger_type, &workflow.trigger_config) {
                    Ok(trigger) if trigger.is_recurring() => {
                        workflow.status = WorkflowStatus::Active;
                        if let TriggerSpec::Schedule(cfg) = &trigger {
                            if let Some(minutes) = cfg.interval_minutes {
                                workflow.next_check_at =
                                    Some(Utc::now() + Duration::minutes(minutes as i64));
                                tracing::info!(
                                    "🔁 Workflow {} rescheduled for {}",
                                    workflow.id,
                                    workflow.next_check_at.unwrap()
                                );
                            }
                        }
                    }
                    _ => {
                        workflow.status = WorkflowStatus::Completed;
                        workflow.is_active = false;
                    }
                }
            }
            Err(e) => {
                workflow.failure_count += 1;
                workflow.last_error_message = Some(e.to_string());
                workflow.last_error_at = Some(Utc::now());

                if e.is_retryable() && workflow.can_retry() {
                    workflow.current_retry_count += 1;
                    workflow.status = WorkflowStatus::Active;
                    workflow.next_check_at =
                        Some(Utc::now() + Duration::minutes(self.retry_delay_minutes));
                    tracing::info!(
                        "🔁 Workflow {} retry {}/{} scheduled",
                        workflow.id,
                        workflow.current_retry_count,
                        workflow.max_retries
                    );
                } else {
                    workflow.status = WorkflowStatus::Failed;
                }
            }
        }

        if let Err(e) = self.storage.save_workflow(workflow).await {
            tracing::error!(
                "❌ Failed to persist workflow {} after run: {}",
                workflow.id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CircuitBreakerConfig, ProviderManager};
    use crate::signing::{DevVault, GrantResolver};
    use crate::test_support::StubProvider;
    use crate::triggers::{ChainLogChecker, FeedChecker};
    use crate::workflow::types::{Node, NodeKind, TriggerType};
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::Ordering;

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

    async fn scheduler_with(
        storage: WorkflowStorage,
        primary: Arc<StubProvider>,
        fallback: Arc<StubProvider>,
    ) -> Arc<TriggerSchedulerService> {
        let manager = Arc::new(ProviderManager::new(
            primary,
            fallback,
            CircuitBreakerConfig::default(),
        ));
        let grants = Arc::new(GrantResolver::new(storage.clone(), Arc::new(DevVault::new())));
        let engine = Arc::new(ExecutionEngine::new(
            storage.clone(),
            Arc::clone(&manager),
            grants,
        ));
        let evaluator = Arc::new(TriggerEvaluator::new(
            manager,
            FeedChecker::new(),
            ChainLogChecker::new("https://explorer.invalid/api".to_string(), "k".to_string()),
        ));
        Arc::new(
            TriggerSchedulerService::new(
                storage,
                evaluator,
                engine,
                "*/15 * * * * *".to_string(),
                5,
            )
            .await
            .unwrap(),
        )
    }

    fn price_workflow(nodes: Vec<Node>) -> Workflow {
        let mut workflow = Workflow::new(
            Uuid::new_v4(),
            "0xsca".to_string(),
            "sweep me".to_string(),
            TriggerType::PriceThreshold,
            json!({"asset": "ETH-USD", "operator": ">", "value": 10.0, "chain": "base"}),
            nodes,
            vec![],
        );
        workflow.is_active = true;
        workflow.status = WorkflowStatus::Active;
        workflow
    }

    fn condition_node() -> Node {
        Node {
            id: "n1".to_string(),
            kind: NodeKind::Condition,
            config: json!({
                "source": "price_feed:ETH-USD",
                "operator": ">",
                "value": 10,
                "chain": "base",
            }),
        }
    }

    fn swap_node() -> Node {
        Node {
            id: "n1".to_string(),
            kind: NodeKind::Swap,
            config: json!({
                "from_asset": "USDC",
                "to_asset": "ETH",
                "amount": "100",
                "from_chain": "base",
                "to_chain": "base",
            }),
        }
    }

    #[tokio::test]
    async fn sweep_marks_fired_workflows_triggered() {
        let storage = test_storage().await;
        let scheduler = scheduler_with(
            storage.clone(),
            StubProvider::with_onchain_value(json!(15.0)),
            StubProvider::new(),
        )
        .await;

        let workflow = price_workflow(vec![condition_node()]);
        storage.save_workflow(&workflow).await.unwrap();

        let fired = scheduler.evaluate_due_workflows().await.unwrap();
        assert_eq!(fired, vec![workflow.id]);

        let loaded = storage.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Triggered);
    }

    #[tokio::test]
    async fn sweep_skips_workflows_whose_trigger_holds() {
        let storage = test_storage().await;
        let scheduler = scheduler_with(
            storage.clone(),
            StubProvider::with_onchain_value(json!(5.0)),
            StubProvider::new(),
        )
        .await;

        let workflow = price_workflow(vec![condition_node()]);
        storage.save_workflow(&workflow).await.unwrap();

        let fired = scheduler.evaluate_due_workflows().await.unwrap();
        assert!(fired.is_empty());

        let loaded = storage.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Active);
    }

    #[tokio::test]
    async fn concurrent_dispatch_is_rejected() {
        let storage = test_storage().await;
        let scheduler = scheduler_with(
            storage.clone(),
            StubProvider::with_onchain_value(json!(15.0)),
            StubProvider::new(),
        )
        .await;

        let workflow = price_workflow(vec![condition_node()]);
        storage.save_workflow(&workflow).await.unwrap();

        // First dispatcher claims the workflow.
        assert!(storage.try_mark_executing(workflow.id).await.unwrap());

        // A second dispatch while the first is in flight must be rejected,
        // never creating a second concurrent execution.
        let err = scheduler.dispatch(workflow.id).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyRunning(id) if id == workflow.id));
        assert!(storage.list_executions(workflow.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_one_shot_run_completes_the_workflow() {
        let storage = test_storage().await;
        let scheduler = scheduler_with(
            storage.clone(),
            StubProvider::with_onchain_value(json!(15.0)),
            StubProvider::new(),
        )
        .await;

        let workflow = price_workflow(vec![condition_node()]);
        storage.save_workflow(&workflow).await.unwrap();

        let execution = scheduler.dispatch(workflow.id).await.unwrap();
        assert_eq!(execution.workflow_id, workflow.id);

        let loaded = storage.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Completed);
        assert_eq!(loaded.execution_count, 1);
        assert_eq!(loaded.success_count, 1);
        assert!(!loaded.is_active);
    }

    #[tokio::test]
    async fn recurring_schedule_returns_to_active_with_next_check() {
        let storage = test_storage().await;
        let scheduler = scheduler_with(
            storage.clone(),
            StubProvider::with_onchain_value(json!(15.0)),
            StubProvider::new(),
        )
        .await;

        let mut workflow = price_workflow(vec![condition_node()]);
        workflow.trigger_type = TriggerType::TimeSchedule;
        workflow.trigger_config = json!({"interval_minutes": 60});
        workflow.next_check_at = Some(Utc::now() - Duration::minutes(1));
        storage.save_workflow(&workflow).await.unwrap();

        scheduler.dispatch(workflow.id).await.unwrap();

        let loaded = storage.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Active);
        assert!(loaded.is_active);
        assert!(loaded.next_check_at.unwrap() > Utc::now() + Duration::minutes(30));
    }

    #[tokio::test]
    async fn transient_failure_schedules_a_retry() {
        let storage = test_storage().await;
        let primary = StubProvider::new();
        let fallback = StubProvider::new();
        primary.fail_quotes.store(true, Ordering::SeqCst);
        fallback.fail_quotes.store(true, Ordering::SeqCst);
        let scheduler = scheduler_with(storage.clone(), primary, fallback).await;

        let workflow = price_workflow(vec![swap_node()]);
        storage.save_workflow(&workflow).await.unwrap();

        let err = scheduler.dispatch(workflow.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Provider(_)));

        let loaded = storage.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Active);
        assert_eq!(loaded.current_retry_count, 1);
        assert_eq!(loaded.failure_count, 1);
        assert!(loaded.next_check_at.unwrap() > Utc::now());
        assert!(loaded.last_error_message.is_some());
    }

    #[tokio::test]
    async fn permission_failure_is_terminal() {
        let storage = test_storage().await;
        let scheduler = scheduler_with(storage.clone(), StubProvider::new(), StubProvider::new()).await;

        // No grants exist at all: the grant resolver denies, and a denial
        // is not retried automatically.
        let workflow = price_workflow(vec![swap_node()]);
        storage.save_workflow(&workflow).await.unwrap();

        let err = scheduler.dispatch(workflow.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Grant(_)));

        let loaded = storage.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Failed);
        assert_eq!(loaded.current_retry_count, 0);
    }
}
