/// Provider failover manager
///
/// Routes every capability call to the primary adapter through the circuit
/// breaker, falling back to the degraded adapter when the primary fails or
/// the circuit is open. Two error classes bypass the machinery entirely:
/// NotSupported (permanent capability gap, not transient unavailability)
/// and QuoteExpired (the engine's own retry concern; a fallback adapter
/// cannot execute another provider's quote anyway).

use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::provider::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::provider::types::{
    BridgeQuote, BridgeQuoteRequest, ExecuteRequest, LendingQuote, OnchainData, PortfolioBalance,
    StakeQuoteRequest, StakingQuote, SupplyQuoteRequest, SwapQuote, SwapQuoteRequest,
    TransactionResult, UpkeepReceipt, UpkeepRegistration,
};
use crate::provider::ActionProvider;

/// Primary + fallback adapter pair arbitrated by a circuit breaker
pub struct ProviderManager {
    primary: Arc<dyn ActionProvider>,
    fallback: Arc<dyn ActionProvider>,
    breaker: CircuitBreaker,
}

impl ProviderManager {
    pub fn new(
        primary: Arc<dyn ActionProvider>,
        fallback: Arc<dyn ActionProvider>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        tracing::info!(
            "🧭 Provider manager initialized: primary={}, fallback={}, breaker threshold={}",
            primary.name(),
            fallback.name(),
            breaker_config.failure_threshold
        );
        Self {
            primary,
            fallback,
            breaker: CircuitBreaker::new(breaker_config),
        }
    }

    /// Run one capability call with breaker-arbitrated failover.
    ///
    /// Both futures are built lazily by the callers' adapters; the fallback
    /// future is only polled when the primary is skipped or fails.
    async fn with_failover<T, P, F>(
        &self,
        operation: &'static str,
        primary: P,
        fallback: F,
    ) -> Result<T, ProviderError>
    where
        P: Future<Output = Result<T, ProviderError>> + Send,
        F: Future<Output = Result<T, ProviderError>> + Send,
    {
        if !self.breaker.allow_request() {
            tracing::warn!(
                "⚡ Circuit open: routing '{}' directly to {}",
                operation,
                self.fallback.name()
            );
            return match fallback.await {
                Ok(value) => Ok(value),
                Err(fallback_err) => Err(ProviderError::TotalFailure {
                    operation,
                    primary: Box::new(ProviderError::CircuitOpen { operation }),
                    fallback: Box::new(fallback_err),
                }),
            };
        }

        match primary.await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            // Capability gaps and expired quotes are not provider-health
            // signals: no breaker count, no fallback attempt.
            Err(err @ ProviderError::NotSupported { .. }) => Err(err),
            Err(err @ ProviderError::QuoteExpired { .. }) => {
                self.breaker.record_success();
                Err(err)
            }
            Err(primary_err) => {
                self.breaker.record_failure();
                tracing::warn!(
                    "⚠️ Primary {} failed for '{}' ({}); attempting fallback {}",
                    self.primary.name(),
                    operation,
                    primary_err,
                    self.fallback.name()
                );
                match fallback.await {
                    Ok(value) => {
                        tracing::warn!("🛟 Fallback successful for '{}'", operation);
                        Ok(value)
                    }
                    Err(fallback_err) => Err(ProviderError::TotalFailure {
                        operation,
                        primary: Box::new(primary_err),
                        fallback: Box::new(fallback_err),
                    }),
                }
            }
        }
    }

    pub async fn swap_quote(&self, req: &SwapQuoteRequest) -> Result<SwapQuote, ProviderError> {
        self.with_failover(
            "swap_quote",
            self.primary.swap_quote(req),
            self.fallback.swap_quote(req),
        )
        .await
    }

    pub async fn execute_swap(&self, req: &ExecuteRequest) -> Result<TransactionResult, ProviderError> {
        self.with_failover(
            "execute_swap",
            self.primary.execute_swap(req),
            self.fallback.execute_swap(req),
        )
        .await
    }

    pub async fn bridge_quote(&self, req: &BridgeQuoteRequest) -> Result<BridgeQuote, ProviderError> {
        self.with_failover(
            "bridge_quote",
            self.primary.bridge_quote(req),
            self.fallback.bridge_quote(req),
        )
        .await
    }

    pub async fn execute_bridge(
        &self,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        self.with_failover(
            "execute_bridge",
            self.primary.execute_bridge(req),
            self.fallback.execute_bridge(req),
        )
        .await
    }

    pub async fn staking_quote(&self, req: &StakeQuoteRequest) -> Result<StakingQuote, ProviderError> {
        self.with_failover(
            "staking_quote",
            self.primary.staking_quote(req),
            self.fallback.staking_quote(req),
        )
        .await
    }

    pub async fn execute_staking(
        &self,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        self.with_failover(
            "execute_staking",
            self.primary.execute_staking(req),
            self.fallback.execute_staking(req),
        )
        .await
    }

    pub async fn lending_quote(&self, req: &SupplyQuoteRequest) -> Result<LendingQuote, ProviderError> {
        self.with_failover(
            "lending_quote",
            self.primary.lending_quote(req),
            self.fallback.lending_quote(req),
        )
        .await
    }

    pub async fn execute_supply(
        &self,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        self.with_failover(
            "execute_supply",
            self.primary.execute_supply(req),
            self.fallback.execute_supply(req),
        )
        .await
    }

    pub async fn onchain_data(&self, source: &str, chain: &str) -> Result<OnchainData, ProviderError> {
        self.with_failover(
            "onchain_data",
            self.primary.onchain_data(source, chain),
            self.fallback.onchain_data(source, chain),
        )
        .await
    }

    pub async fn portfolio(&self, address: &str) -> Result<PortfolioBalance, ProviderError> {
        self.with_failover(
            "portfolio",
            self.primary.portfolio(address),
            self.fallback.portfolio(address),
        )
        .await
    }

    pub async fn transaction_status(
        &self,
        tx_hash: &str,
        chain: &str,
    ) -> Result<TransactionResult, ProviderError> {
        self.with_failover(
            "transaction_status",
            self.primary.transaction_status(tx_hash, chain),
            self.fallback.transaction_status(tx_hash, chain),
        )
        .await
    }

    /// Registry interaction is not an aggregator capability; it goes to the
    /// fallback adapter directly, outside the breaker.
    pub async fn register_upkeep(
        &self,
        req: &UpkeepRegistration,
    ) -> Result<UpkeepReceipt, ProviderError> {
        self.fallback.register_upkeep(req).await
    }

    pub async fn deregister_upkeep(
        &self,
        upkeep_id: &str,
    ) -> Result<TransactionResult, ProviderError> {
        self.fallback.deregister_upkeep(upkeep_id).await
    }

    /// Combined health view for the /healthz endpoint
    pub async fn health_summary(&self) -> Value {
        let primary = self.primary.health().await;
        let fallback = self.fallback.health().await;
        let status = if primary.healthy || fallback.healthy {
            "healthy"
        } else {
            "unhealthy"
        };

        json!({
            "status": status,
            "circuit_breaker": self.breaker.state().as_str(),
            "primary": serde_json::to_value(&primary).unwrap_or(Value::Null),
            "fallback": serde_json::to_value(&fallback).unwrap_or(Value::Null),
            "failover_available": fallback.healthy,
        })
    }

    pub fn breaker_state(&self) -> crate::provider::breaker::CircuitState {
        self.breaker.state()
    }
}
