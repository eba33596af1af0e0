/// Primary provider adapter: OneBalance aggregator API
///
/// Speaks HTTP to the aggregator's quote/execute endpoints. All amounts are
/// base-unit strings; quotes must be executed before their expiry or the
/// aggregator answers 410 Gone, which is surfaced as a QuoteExpired error so
/// the engine can re-fetch once within the same run.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::provider::types::{
    BridgeQuote, BridgeQuoteRequest, ExecuteRequest, LendingQuote, OnchainData, PortfolioBalance,
    ProviderHealth, StakeQuoteRequest, StakingQuote, SupplyQuoteRequest, SwapQuote,
    SwapQuoteRequest, TransactionResult, TransactionStatus, UpkeepReceipt, UpkeepRegistration,
};
use crate::provider::ActionProvider;

const PROVIDER: &str = "onebalance";

/// Default quote lifetime when the aggregator omits expiresAt
const DEFAULT_QUOTE_TTL_SECS: i64 = 60;

/// HTTP adapter for the OneBalance aggregator
#[derive(Debug, Clone)]
pub struct OneBalanceAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OneBalanceAdapter {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<reqwest::Response, ProviderError> {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| ProviderError::Network {
                provider: PROVIDER,
                message: e.to_string(),
            })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ProviderError> {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network {
                provider: PROVIDER,
                message: e.to_string(),
            })
    }

    async fn parse_ok<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| ProviderError::Network {
            provider: PROVIDER,
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(ProviderError::Api {
                provider: PROVIDER,
                code: Some(status.as_u16()),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ProviderError::Api {
            provider: PROVIDER,
            code: None,
            message: format!("unexpected response shape: {}", e),
        })
    }

    /// Shared execute path for all quote kinds. 410 Gone means the quote
    /// expired between fetch and execute.
    async fn execute_at(
        &self,
        path: &str,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        let payload = json!({
            "quoteId": req.quote_id,
            "signature": req.user_signature,
            "account": req.sca_address,
        });

        let response = self.post(path, &payload).await?;
        if response.status().as_u16() == 410 {
            return Err(ProviderError::QuoteExpired {
                provider: PROVIDER,
                quote_id: req.quote_id.clone(),
            });
        }

        let parsed: ExecuteResponse = Self::parse_ok(response).await?;
        tracing::info!("✅ {} executed quote {}: {}", PROVIDER, req.quote_id, parsed.user_op_hash);

        Ok(TransactionResult {
            transaction_hash: parsed.user_op_hash,
            status: match parsed.status.as_deref() {
                Some("confirmed") => TransactionStatus::Confirmed,
                Some("failed") => TransactionStatus::Failed,
                _ => TransactionStatus::Pending,
            },
            block_number: None,
            gas_used: None,
            error_message: None,
            provider: PROVIDER.to_string(),
        })
    }

    fn quote_expiry(raw: Option<i64>) -> i64 {
        raw.unwrap_or_else(|| Utc::now().timestamp() + DEFAULT_QUOTE_TTL_SECS)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferQuoteResponse {
    quote_id: String,
    #[serde(default)]
    to_amount: Option<String>,
    #[serde(default)]
    route: Vec<Value>,
    #[serde(default)]
    estimated_gas: Option<String>,
    #[serde(default)]
    bridge_fee: Option<String>,
    #[serde(default)]
    estimated_time_minutes: Option<u32>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolQuoteResponse {
    quote_id: String,
    pool_address: String,
    #[serde(default)]
    apy_percentage: Option<f64>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    user_op_hash: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainDataResponse {
    value: Value,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalancesResponse {
    #[serde(default)]
    assets: Vec<Value>,
    #[serde(default)]
    total_value_usd: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxStatusResponse {
    status: String,
    #[serde(default)]
    block_number: Option<i64>,
    #[serde(default)]
    gas_used: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[async_trait::async_trait]
impl ActionProvider for OneBalanceAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn swap_quote(&self, req: &SwapQuoteRequest) -> Result<SwapQuote, ProviderError> {
        let payload = json!({
            "user": req.sca_address,
            "fromAsset": req.from_asset,
            "toAsset": req.to_asset,
            "fromAmount": req.amount,
            "fromChain": req.from_chain,
            "toChain": req.to_chain,
            "slippage": req.slippage,
        });

        let response = self.post("/v2/transfers/quote", &payload).await?;
        let parsed: TransferQuoteResponse = Self::parse_ok(response).await?;
        tracing::debug!("💱 {} swap quote {}", PROVIDER, parsed.quote_id);

        Ok(SwapQuote {
            quote_id: parsed.quote_id,
            from_asset: req.from_asset.clone(),
            to_asset: req.to_asset.clone(),
            from_amount: req.amount.clone(),
            to_amount: parsed.to_amount.unwrap_or_else(|| "0".to_string()),
            from_chain: req.from_chain.clone(),
            to_chain: req.to_chain.clone(),
            route: parsed.route,
            estimated_gas: parsed.estimated_gas,
            slippage: req.slippage,
            expires_at: Self::quote_expiry(parsed.expires_at),
            provider: PROVIDER.to_string(),
            degraded: false,
        })
    }

    async fn execute_swap(&self, req: &ExecuteRequest) -> Result<TransactionResult, ProviderError> {
        self.execute_at("/v2/transfers/execute", req).await
    }

    async fn bridge_quote(&self, req: &BridgeQuoteRequest) -> Result<BridgeQuote, ProviderError> {
        let payload = json!({
            "user": req.sca_address,
            "asset": req.asset,
            "fromAmount": req.amount,
            "fromChain": req.from_chain,
            "toChain": req.to_chain,
        });

        let response = self.post("/v2/transfers/quote", &payload).await?;
        let parsed: TransferQuoteResponse = Self::parse_ok(response).await?;

        Ok(BridgeQuote {
            quote_id: parsed.quote_id,
            asset: req.asset.clone(),
            amount: req.amount.clone(),
            from_chain: req.from_chain.clone(),
            to_chain: req.to_chain.clone(),
            bridge_fee: parsed.bridge_fee,
            estimated_time_minutes: parsed.estimated_time_minutes,
            expires_at: Self::quote_expiry(parsed.expires_at),
            provider: PROVIDER.to_string(),
            degraded: false,
        })
    }

    async fn execute_bridge(
        &self,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        self.execute_at("/v2/transfers/execute", req).await
    }

    async fn staking_quote(&self, req: &StakeQuoteRequest) -> Result<StakingQuote, ProviderError> {
        let payload = json!({
            "user": req.sca_address,
            "asset": req.asset,
            "amount": req.amount,
            "chain": req.from_chain,
            "pool": req.staking_pool,
        });

        let response = self.post("/v2/staking/quote", &payload).await?;
        let parsed: PoolQuoteResponse = Self::parse_ok(response).await?;

        Ok(StakingQuote {
            quote_id: parsed.quote_id,
            asset: req.asset.clone(),
            amount: req.amount.clone(),
            staking_pool_address: parsed.pool_address,
            apy_percentage: parsed.apy_percentage,
            expires_at: Self::quote_expiry(parsed.expires_at),
            provider: PROVIDER.to_string(),
            degraded: false,
        })
    }

    async fn execute_staking(
        &self,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        self.execute_at("/v2/staking/execute", req).await
    }

    async fn lending_quote(&self, req: &SupplyQuoteRequest) -> Result<LendingQuote, ProviderError> {
        let payload = json!({
            "user": req.sca_address,
            "asset": req.asset,
            "amount": req.amount,
            "chain": req.from_chain,
            "pool": req.lending_pool,
        });

        let response = self.post("/v2/lending/quote", &payload).await?;
        let parsed: PoolQuoteResponse = Self::parse_ok(response).await?;

        Ok(LendingQuote {
            quote_id: parsed.quote_id,
            asset: req.asset.clone(),
            amount: req.amount.clone(),
            lending_pool_address: parsed.pool_address,
            apy_percentage: parsed.apy_percentage,
            expires_at: Self::quote_expiry(parsed.expires_at),
            provider: PROVIDER.to_string(),
            degraded: false,
        })
    }

    async fn execute_supply(
        &self,
        req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        self.execute_at("/v2/lending/execute", req).await
    }

    async fn onchain_data(&self, source: &str, chain: &str) -> Result<OnchainData, ProviderError> {
        let response = self
            .get(&format!(
                "/v2/chain/data?source={}&chain={}",
                source, chain
            ))
            .await?;
        let parsed: ChainDataResponse = Self::parse_ok(response).await?;

        Ok(OnchainData {
            source: source.to_string(),
            chain: chain.to_string(),
            value: parsed.value,
            provider: PROVIDER.to_string(),
            retrieved_at: parsed.timestamp.unwrap_or_else(|| Utc::now().timestamp()),
        })
    }

    async fn portfolio(&self, address: &str) -> Result<PortfolioBalance, ProviderError> {
        let response = self.get(&format!("/v2/balances/{}", address)).await?;
        let parsed: BalancesResponse = Self::parse_ok(response).await?;

        Ok(PortfolioBalance {
            address: address.to_string(),
            assets: parsed.assets,
            total_value_usd: parsed.total_value_usd.unwrap_or_else(|| "0".to_string()),
            provider: PROVIDER.to_string(),
            degraded: false,
        })
    }

    async fn transaction_status(
        &self,
        tx_hash: &str,
        chain: &str,
    ) -> Result<TransactionResult, ProviderError> {
        let response = self
            .get(&format!("/v2/transactions/{}?chain={}", tx_hash, chain))
            .await?;
        let parsed: TxStatusResponse = Self::parse_ok(response).await?;

        Ok(TransactionResult {
            transaction_hash: tx_hash.to_string(),
            status: match parsed.status.as_str() {
                "confirmed" => TransactionStatus::Confirmed,
                "failed" => TransactionStatus::Failed,
                "dropped" => TransactionStatus::Dropped,
                _ => TransactionStatus::Pending,
            },
            block_number: parsed.block_number,
            gas_used: parsed.gas_used,
            error_message: parsed.error_message,
            provider: PROVIDER.to_string(),
        })
    }

    async fn register_upkeep(
        &self,
        _req: &UpkeepRegistration,
    ) -> Result<UpkeepReceipt, ProviderError> {
        // Automation registry calls are raw contract interactions the
        // aggregator does not expose; the manager routes them to the
        // fallback adapter directly.
        Err(ProviderError::NotSupported {
            provider: PROVIDER,
            operation: "register_upkeep",
        })
    }

    async fn deregister_upkeep(
        &self,
        _upkeep_id: &str,
    ) -> Result<TransactionResult, ProviderError> {
        Err(ProviderError::NotSupported {
            provider: PROVIDER,
            operation: "deregister_upkeep",
        })
    }

    async fn health(&self) -> ProviderHealth {
        match self.get("/status").await {
            Ok(response) if response.status().is_success() => ProviderHealth {
                provider: PROVIDER.to_string(),
                healthy: true,
                detail: None,
            },
            Ok(response) => ProviderHealth {
                provider: PROVIDER.to_string(),
                healthy: false,
                detail: Some(format!("status endpoint answered {}", response.status())),
            },
            Err(e) => ProviderHealth {
                provider: PROVIDER.to_string(),
                healthy: false,
                detail: Some(e.to_string()),
            },
        }
    }
}
