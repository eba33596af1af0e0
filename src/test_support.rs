/// Shared test doubles
///
/// A stub provider adapter with tweakable behavior, used by the engine,
/// trigger and scheduler unit tests. Compiled only for tests.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ProviderError;
use crate::provider::types::{
    BridgeQuote, BridgeQuoteRequest, ExecuteRequest, LendingQuote, OnchainData, PortfolioBalance,
    ProviderHealth, StakeQuoteRequest, StakingQuote, SupplyQuoteRequest, SwapQuote,
    SwapQuoteRequest, TransactionResult, TransactionStatus, UpkeepReceipt, UpkeepRegistration,
};
use crate::provider::ActionProvider;

pub struct StubProvider {
    /// Value returned by onchain_data
    pub onchain_value: Mutex<Value>,
    /// When set, swap quotes carry a route whose first hop targets this
    /// address (the engine's signing target)
    pub swap_target: Mutex<Option<String>>,
    /// First execute call fails with QuoteExpired, then recovers
    pub expire_first_execute: AtomicBool,
    /// When set, every quote call fails with an API error
    pub fail_quotes: AtomicBool,
    pub quote_calls: AtomicUsize,
    pub execute_calls: AtomicUsize,
}

impl StubProvider {
    pub fn new() -> Arc<Self> {
        Self::with_onchain_value(json!(0.0))
    }

    pub fn with_onchain_value(value: Value) -> Arc<Self> {
        Arc::new(Self {
            onchain_value: Mutex::new(value),
            swap_target: Mutex::new(None),
            expire_first_execute: AtomicBool::new(false),
            fail_quotes: AtomicBool::new(false),
            quote_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
        })
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    fn note_quote(&self) -> Result<(), ProviderError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_quotes.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                provider: "stub",
                code: Some(500),
                message: "quote endpoint down".to_string(),
            });
        }
        Ok(())
    }

    fn execute(&self, req: &ExecuteRequest) -> Result<TransactionResult, ProviderError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        if self.expire_first_execute.swap(false, Ordering::SeqCst) {
            return Err(ProviderError::QuoteExpired {
                provider: "stub",
                quote_id: req.quote_id.clone(),
            });
        }
        Ok(TransactionResult {
            transaction_hash: "0xstubtx".to_string(),
            status: TransactionStatus::Confirmed,
            block_number: Some(1),
            gas_used: None,
            error_message: None,
            provider: "stub".to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ActionProvider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn swap_quote(&self, req: &SwapQuoteRequest) -> Result<SwapQuote, ProviderError> {
        self.note_quote()?;
        let route = self
            .swap_target
            .lock()
            .unwrap()
            .as_ref()
            .map(|target| vec![json!({ "toTokenAddress": target })])
            .unwrap_or_default();
        Ok(SwapQuote {
            quote_id: format!("stub-swap-{}", self.quote_calls()),
            from_asset: req.from_asset.clone(),
            to_asset: req.to_asset.clone(),
            from_amount: req.amount.clone(),
            to_amount: "99".to_string(),
            from_chain: req.from_chain.clone(),
            to_chain: req.to_chain.clone(),
            route,
            estimated_gas: None,
            slippage: req.slippage,
            expires_at: Utc::now().timestamp() + 60,
            provider: "stub".to_string(),
            degraded: false,
        })
    }

    async fn execute_swap(&self, req: &ExecuteRequest) -> Result<TransactionResult, ProviderError> {
        self.execute(req)
    }

    async fn bridge_quote(&self, req: &BridgeQuoteRequest) -> Result<BridgeQuote, ProviderError> {
        self.note_quote()?;
        Ok(BridgeQuote {
            quote_id: format!("stub-bridge-{}", self.quote_calls()),
            asset: req.asset.clone(),
            amount: req.amount.clone(),
            from_chain: req.from_chain.clone(),
            to_chain: req.to_chain.clone(),
            bridge_fee: None,
            estimated_time_minutes: Some(3),
            expires_at: Utc::now().timestamp() + 60,
            provider: "stub".to_string(),
            degraded: false,
        })
    }

    async fn execute_bridge(
        &self,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        self.execute(req)
    }

    async fn staking_quote(&self, req: &StakeQuoteRequest) -> Result<StakingQuote, ProviderError> {
        self.note_quote()?;
        Ok(StakingQuote {
            quote_id: format!("stub-stake-{}", self.quote_calls()),
            asset: req.asset.clone(),
            amount: req.amount.clone(),
            staking_pool_address: req.staking_pool.clone(),
            apy_percentage: Some(4.2),
            expires_at: Utc::now().timestamp() + 60,
            provider: "stub".to_string(),
            degraded: false,
        })
    }

    async fn execute_staking(
        &self,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        self.execute(req)
    }

    async fn lending_quote(&self, req: &SupplyQuoteRequest) -> Result<LendingQuote, ProviderError> {
        self.note_quote()?;
        Ok(LendingQuote {
            quote_id: format!("stub-supply-{}", self.quote_calls()),
            asset: req.asset.clone(),
            amount: req.amount.clone(),
            lending_pool_address: req.lending_pool.clone(),
            apy_percentage: Some(2.1),
            expires_at: Utc::now().timestamp() + 60,
            provider: "stub".to_string(),
            degraded: false,
        })
    }

    async fn execute_supply(
        &self,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        self.execute(req)
    }

    async fn onchain_data(&self, source: &str, chain: &str) -> Result<OnchainData, ProviderError> {
        Ok(OnchainData {
            source: source.to_string(),
            chain: chain.to_string(),
            value: self.onchain_value.lock().unwrap().clone(),
            provider: "stub".to_string(),
            retrieved_at: Utc::now().timestamp(),
        })
    }

    async fn portfolio(&self, address: &str) -> Result<PortfolioBalance, ProviderError> {
        Ok(PortfolioBalance {
            address: address.to_string(),
            assets: Vec::new(),
            total_value_usd: "0".to_string(),
            provider: "stub".to_string(),
            degraded: false,
        })
    }

    async fn transaction_status(
        &self,
        tx_hash: &str,
        _chain: &str,
    ) -> Result<TransactionResult, ProviderError> {
        Ok(TransactionResult {
            transaction_hash: tx_hash.to_string(),
            status: TransactionStatus::Confirmed,
            block_number: Some(1),
            gas_used: None,
            error_message: None,
            provider: "stub".to_string(),
        })
    }

    async fn register_upkeep(
        &self,
        _req: &UpkeepRegistration,
    ) -> Result<UpkeepReceipt, ProviderError> {
        Ok(UpkeepReceipt {
            upkeep_id: "42".to_string(),
            transaction_hash: "0xstubreg".to_string(),
            provider: "stub".to_string(),
        })
    }

    async fn deregister_upkeep(&self, _upkeep_id: &str) -> Result<TransactionResult, ProviderError> {
        Ok(TransactionResult {
            transaction_hash: "0xstubdereg".to_string(),
            status: TransactionStatus::Confirmed,
            block_number: None,
            gas_used: None,
            error_message: None,
            provider: "stub".to_string(),
        })
    }

    async fn health(&self) -> ProviderHealth {
        ProviderHealth {
            provider: "stub".to_string(),
            healthy: true,
            detail: None,
        }
    }
}
