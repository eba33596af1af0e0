/// Provider Abstraction Layer
///
/// This module provides the vendor-agnostic capability interface for
/// pricing and executing onchain operations, with a primary aggregator
/// adapter, a degraded direct-RPC fallback, and a circuit-breaker-arbitrated
/// failover manager between them.

// Standardized quote/result/request types
pub mod types;

// Failure-count circuit breaker guarding the primary adapter
pub mod breaker;

// Primary adapter: HTTP aggregator API
pub mod onebalance;

// Fallback adapter: direct JSON-RPC, materially reduced capability
pub mod fallback;

// Failover manager wiring primary, fallback and breaker together
pub mod manager;

use async_trait::async_trait;

use crate::error::ProviderError;
use types::{
    BridgeQuote, BridgeQuoteRequest, ExecuteRequest, LendingQuote, OnchainData, PortfolioBalance,
    ProviderHealth, StakeQuoteRequest, StakingQuote, SupplyQuoteRequest, SwapQuote,
    SwapQuoteRequest, TransactionResult, UpkeepReceipt, UpkeepRegistration,
};

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use fallback::DirectRpcAdapter;
pub use manager::ProviderManager;
pub use onebalance::OneBalanceAdapter;

/// Vendor-agnostic pricing and execution capability
///
/// One operation per capability; adapters that genuinely cannot perform an
/// operation return `ProviderError::NotSupported`, which the manager
/// surfaces directly instead of counting it as a breaker failure.
#[async_trait]
pub trait ActionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn swap_quote(&self, req: &SwapQuoteRequest) -> Result<SwapQuote, ProviderError>;
    async fn execute_swap(&self, req: &ExecuteRequest) -> Result<TransactionResult, ProviderError>;

    async fn bridge_quote(&self, req: &BridgeQuoteRequest) -> Result<BridgeQuote, ProviderError>;
    async fn execute_bridge(&self, req: &ExecuteRequest)
        -> Result<TransactionResult, ProviderError>;

    async fn staking_quote(&self, req: &StakeQuoteRequest) -> Result<StakingQuote, ProviderError>;
    async fn execute_staking(
        &self,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError>;

    async fn lending_quote(&self, req: &SupplyQuoteRequest) -> Result<LendingQuote, ProviderError>;
    async fn execute_supply(
        &self,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError>;

    /// Generic onchain read, e.g. source "price_feed:ETH-USD"
    async fn onchain_data(&self, source: &str, chain: &str) -> Result<OnchainData, ProviderError>;

    async fn portfolio(&self, address: &str) -> Result<PortfolioBalance, ProviderError>;

    async fn transaction_status(
        &self,
        tx_hash: &str,
        chain: &str,
    ) -> Result<TransactionResult, ProviderError>;

    /// Register a workflow trigger with the onchain automation registry
    async fn register_upkeep(
        &self,
        req: &UpkeepRegistration,
    ) -> Result<UpkeepReceipt, ProviderError>;

    async fn deregister_upkeep(&self, upkeep_id: &str) -> Result<TransactionResult, ProviderError>;

    async fn health(&self) -> ProviderHealth;
}
