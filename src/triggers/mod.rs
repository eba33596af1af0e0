/// Trigger Evaluation Layer
///
/// Polymorphic check over the closed set of trigger kinds: price threshold,
/// time schedule, and polling sources (feed, chain log). The evaluator
/// returns the updated poller state alongside the fired flag; the scheduler
/// persists that state even when nothing fired, because cursors advance on
/// every check and losing one causes duplicate firing on the next poll.

// JSON feed poller
pub mod feed;

// Chain explorer transaction poller
pub mod chainlog;

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::TriggerError;
use crate::provider::ProviderManager;
use crate::workflow::types::{PollingTriggerConfig, TriggerSpec, Workflow};

pub use chainlog::ChainLogChecker;
pub use feed::FeedChecker;

/// Outcome of one trigger check
#[derive(Debug, Clone)]
pub struct TriggerDecision {
    pub fired: bool,
    /// Updated engine-owned trigger state; None when the trigger kind keeps
    /// no cursor. Must be persisted whenever present, fired or not.
    pub state: Option<Value>,
}

/// Evaluates workflow triggers against live data sources
pub struct TriggerEvaluator {
    provider: Arc<ProviderManager>,
    feed: FeedChecker,
    chain_log: ChainLogChecker,
}

impl TriggerEvaluator {
    pub fn new(
        provider: Arc<ProviderManager>,
        feed: FeedChecker,
        chain_log: ChainLogChecker,
    ) -> Self {
        Self {
            provider,
            feed,
            chain_log,
        }
    }

    /// Check whether a workflow's entry condition is currently satisfied
    pub async fn evaluate(
        &self,
        workflow: &Workflow,
        trigger: &TriggerSpec,
    ) -> Result<TriggerDecision, TriggerError> {
        match trigger {
            TriggerSpec::Price(cfg) => {
                let data = self
                    .provider
                    .onchain_data(&format!("price_feed:{}", cfg.asset), &cfg.chain)
                    .await?;
                let fired = cfg.operator.compare(&data.value, &json!(cfg.value));
                tracing::debug!(
                    "📈 Price check for workflow {}: {} vs {} -> {}",
                    workflow.id,
                    data.value,
                    cfg.value,
                    fired
                );
                Ok(TriggerDecision { fired, state: None })
            }

            TriggerSpec::Schedule(_) => match workflow.next_check_at {
                Some(due_at) => {
                    let fired = Utc::now() >= due_at;
                    Ok(TriggerDecision { fired, state: None })
                }
                None => {
                    tracing::warn!(
                        "⏰ Schedule trigger for workflow {} has no next_check_at set",
                        workflow.id
                    );
                    Ok(TriggerDecision {
                        fired: false,
                        state: None,
                    })
                }
            },

            TriggerSpec::Polling(cfg) => {
                let (fired, state) = match cfg {
                    PollingTriggerConfig::Feed { feed_url } => {
                        self.feed.check(feed_url, &workflow.trigger_state).await?
                    }
                    PollingTriggerConfig::ChainLog { address, chain } => {
                        self.chain_log
                            .check(address, chain, &workflow.trigger_state)
                            .await?
                    }
                };
                Ok(TriggerDecision {
                    fired,
                    state: Some(state),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CircuitBreakerConfig, ProviderManager};
    use crate::test_support::StubProvider;
    use crate::workflow::types::{TriggerType, Workflow};
    use chrono::Duration;
    use serde_json::json;

    fn evaluator_with_price(value: f64) -> TriggerEvaluator {
        let stub = StubProvider::with_onchain_value(json!(value));
        let manager = Arc::new(ProviderManager::new(
            stub,
            StubProvider::with_onchain_value(json!(value)),
            CircuitBreakerConfig::default(),
        ));
        TriggerEvaluator::new(
            manager,
            FeedChecker::new(),
            ChainLogChecker::new("https://explorer.invalid/api".to_string(), "k".to_string()),
        )
    }

    fn price_workflow() -> (Workflow, TriggerSpec) {
        let config = json!({"asset": "ETH-USD", "operator": ">", "value": 10.0, "chain": "base"});
        let workflow = Workflow::new(
            uuid::Uuid::new_v4(),
            "0xsca".to_string(),
            "price".to_string(),
            TriggerType::PriceThreshold,
            config.clone(),
            vec![crate::workflow::types::Node {
                id: "n1".to_string(),
                kind: crate::workflow::types::NodeKind::Notification,
                config: json!({"webhook_url": "https://hooks.invalid"}),
            }],
            vec![],
        );
        let spec = TriggerSpec::parse(TriggerType::PriceThreshold, &config).unwrap();
        (workflow, spec)
    }

    #[tokio::test]
    async fn price_trigger_fires_above_threshold() {
        let (workflow, spec) = price_workflow();
        let decision = evaluator_with_price(15.0)
            .evaluate(&workflow, &spec)
            .await
            .unwrap();
        assert!(decision.fired);
        assert!(decision.state.is_none());
    }

    #[tokio::test]
    async fn price_trigger_holds_below_threshold() {
        let (workflow, spec) = price_workflow();
        let decision = evaluator_with_price(5.0)
            .evaluate(&workflow, &spec)
            .await
            .unwrap();
        assert!(!decision.fired);
    }

    #[tokio::test]
    async fn schedule_trigger_fires_when_due() {
        let (mut workflow, _) = price_workflow();
        workflow.trigger_type = TriggerType::TimeSchedule;
        let spec = TriggerSpec::parse(TriggerType::TimeSchedule, &json!({"interval_minutes": 60}))
            .unwrap();

        workflow.next_check_at = Some(Utc::now() - Duration::minutes(1));
        let decision = evaluator_with_price(0.0)
            .evaluate(&workflow, &spec)
            .await
            .unwrap();
        assert!(decision.fired);

        workflow.next_check_at = Some(Utc::now() + Duration::minutes(10));
        let decision = evaluator_with_price(0.0)
            .evaluate(&workflow, &spec)
            .await
            .unwrap();
        assert!(!decision.fired);

        // No schedule set at all: never fires, only warns.
        workflow.next_check_at = None;
        let decision = evaluator_with_price(0.0)
            .evaluate(&workflow, &spec)
            .await
            .unwrap();
        assert!(!decision.fired);
    }
}
