/// Fallback provider adapter: direct JSON-RPC
///
/// Emergency path used when the aggregator is unavailable. Capability is
/// materially reduced and every result says so: quotes carry no real
/// pricing and are flagged degraded, and quote execution is not supported
/// at all. Only onchain reads, balance lookups, receipt checks and the
/// automation registry calls work here.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::provider::types::{
    BridgeQuote, BridgeQuoteRequest, ExecuteRequest, LendingQuote, OnchainData, PortfolioBalance,
    ProviderHealth, StakeQuoteRequest, StakingQuote, SupplyQuoteRequest, SwapQuote,
    SwapQuoteRequest, TransactionResult, TransactionStatus, UpkeepReceipt, UpkeepRegistration,
};
use crate::provider::ActionProvider;

const PROVIDER: &str = "direct_rpc";

/// Chainlink-style aggregator selector for latestAnswer()
const LATEST_ANSWER_SELECTOR: &str = "0x50d25bcd";

/// Degraded quotes are short-lived; they exist to keep a workflow's shape
/// observable, not to be executed.
const DEGRADED_QUOTE_TTL_SECS: i64 = 30;

/// Direct JSON-RPC adapter over per-chain RPC endpoints
#[derive(Debug, Clone)]
pub struct DirectRpcAdapter {
    client: reqwest::Client,
    /// chain name -> RPC endpoint URL
    rpc_urls: HashMap<String, String>,
    /// "chain:SYMBOL" -> price feed aggregator address
    price_feeds: HashMap<String, String>,
}

impl DirectRpcAdapter {
    pub fn new(rpc_urls: HashMap<String, String>, price_feeds: HashMap<String, String>) -> Self {
        if rpc_urls.is_empty() {
            tracing::warn!("⚠️ DirectRpcAdapter configured without RPC endpoints; onchain reads will fail");
        }
        Self {
            client: reqwest::Client::new(),
            rpc_urls,
            price_feeds,
        }
    }

    fn rpc_url(&self, chain: &str) -> Result<&str, ProviderError> {
        self.rpc_urls
            .get(chain)
            .map(|s| s.as_str())
            .ok_or(ProviderError::NotSupported {
                provider: PROVIDER,
                operation: "chain rpc",
            })
    }

    async fn rpc_call(
        &self,
        chain: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, ProviderError> {
        let url = self.rpc_url(chain)?;
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Network {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let body: Value = response.json().await.map_err(|e| ProviderError::Network {
            provider: PROVIDER,
            message: e.to_string(),
        })?;

        if let Some(error) = body.get("error") {
            return Err(ProviderError::Api {
                provider: PROVIDER,
                code: error.get("code").and_then(|c| c.as_u64()).map(|c| c as u16),
                message: error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("rpc error")
                    .to_string(),
            });
        }

        body.get("result").cloned().ok_or(ProviderError::Api {
            provider: PROVIDER,
            code: None,
            message: "rpc response missing result".to_string(),
        })
    }

    /// Resolve "price_feed:ETH-USD" to a feed contract address on `chain`.
    /// A raw contract address passes through unchanged.
    fn feed_address(&self, source: &str, chain: &str) -> Result<String, ProviderError> {
        let descriptor = source.strip_prefix("price_feed:").unwrap_or(source);
        if descriptor.starts_with("0x") && descriptor.len() == 42 {
            return Ok(descriptor.to_string());
        }
        self.price_feeds
            .get(&format!("{}:{}", chain, descriptor))
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                provider: PROVIDER,
                code: None,
                message: format!("no price feed configured for '{}' on '{}'", descriptor, chain),
            })
    }

    fn parse_hex_i128(raw: &str) -> Result<i128, ProviderError> {
        i128::from_str_radix(raw.trim_start_matches("0x"), 16).map_err(|e| ProviderError::Api {
            provider: PROVIDER,
            code: None,
            message: format!("unparseable hex value '{}': {}", raw, e),
        })
    }

    fn degraded_quote_id() -> String {
        format!("fallback-{}", Uuid::new_v4().simple())
    }

    fn synthetic_tx_hash() -> String {
        format!(
            "0x{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        )
    }
}

#[async_trait::async_trait]
impl ActionProvider for DirectRpcAdapter {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn swap_quote(&self, req: &SwapQuoteRequest) -> Result<SwapQuote, ProviderError> {
        tracing::warn!("⚠️ Swap pricing unavailable in fallback mode; returning degraded quote");
        Ok(SwapQuote {
            quote_id: Self::degraded_quote_id(),
            from_asset: req.from_asset.clone(),
            to_asset: req.to_asset.clone(),
            from_amount: req.amount.clone(),
            to_amount: "0".to_string(),
            from_chain: req.from_chain.clone(),
            to_chain: req.to_chain.clone(),
            route: Vec::new(),
            estimated_gas: None,
            slippage: req.slippage,
            expires_at: Utc::now().timestamp() + DEGRADED_QUOTE_TTL_SECS,
            provider: PROVIDER.to_string(),
            degraded: true,
        })
    }

    async fn execute_swap(&self, _req: &ExecuteRequest) -> Result<TransactionResult, ProviderError> {
        Err(ProviderError::NotSupported {
            provider: PROVIDER,
            operation: "execute_swap",
        })
    }

    async fn bridge_quote(&self, req: &BridgeQuoteRequest) -> Result<BridgeQuote, ProviderError> {
        tracing::warn!("⚠️ Bridge pricing unavailable in fallback mode; returning degraded quote");
        Ok(BridgeQuote {
            quote_id: Self::degraded_quote_id(),
            asset: req.asset.clone(),
            amount: req.amount.clone(),
            from_chain: req.from_chain.clone(),
            to_chain: req.to_chain.clone(),
            bridge_fee: None,
            estimated_time_minutes: None,
            expires_at: Utc::now().timestamp() + DEGRADED_QUOTE_TTL_SECS,
            provider: PROVIDER.to_string(),
            degraded: true,
        })
    }

    async fn execute_bridge(
        &self,
        _req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        Err(ProviderError::NotSupported {
            provider: PROVIDER,
            operation: "execute_bridge",
        })
    }

    async fn staking_quote(&self, req: &StakeQuoteRequest) -> Result<StakingQuote, ProviderError> {
        Ok(StakingQuote {
            quote_id: Self::degraded_quote_id(),
            asset: req.asset.clone(),
            amount: req.amount.clone(),
            staking_pool_address: req.staking_pool.clone(),
            apy_percentage: None,
            expires_at: Utc::now().timestamp() + DEGRADED_QUOTE_TTL_SECS,
            provider: PROVIDER.to_string(),
            degraded: true,
        })
    }

    async fn execute_staking(
        &self,
        _req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        Err(ProviderError::NotSupported {
            provider: PROVIDER,
            operation: "execute_staking",
        })
    }

    async fn lending_quote(&self, req: &SupplyQuoteRequest) -> Result<LendingQuote, ProviderError> {
        Ok(LendingQuote {
            quote_id: Self::degraded_quote_id(),
            asset: req.asset.clone(),
            amount: req.amount.clone(),
            lending_pool_address: req.lending_pool.clone(),
            apy_percentage: None,
            expires_at: Utc::now().timestamp() + DEGRADED_QUOTE_TTL_SECS,
            provider: PROVIDER.to_string(),
            degraded: true,
        })
    }

    async fn execute_supply(
        &self,
        _req: &ExecuteRequest,
    ) -> Result<TransactionResult, ProviderError> {
        Err(ProviderError::NotSupported {
            provider: PROVIDER,
            operation: "execute_supply",
        })
    }

    /// Read a price feed directly from the aggregator contract. Feed values
    /// are scaled to 8 decimals onchain.
    async fn onchain_data(&self, source: &str, chain: &str) -> Result<OnchainData, ProviderError> {
        let feed = self.feed_address(source, chain)?;
        let result = self
            .rpc_call(
                chain,
                "eth_call",
                json!([{ "to": feed, "data": LATEST_ANSWER_SELECTOR }, "latest"]),
            )
            .await?;

        let raw = result.as_str().ok_or(ProviderError::Api {
            provider: PROVIDER,
            code: None,
            message: "eth_call result is not a string".to_string(),
        })?;
        let answer = Self::parse_hex_i128(raw)?;
        let value = answer as f64 / 1e8;

        tracing::debug!("📈 {} read {} on {}: {}", PROVIDER, source, chain, value);

        Ok(OnchainData {
            source: source.to_string(),
            chain: chain.to_string(),
            value: json!(value),
            provider: PROVIDER.to_string(),
            retrieved_at: Utc::now().timestamp(),
        })
    }

    /// Native balance only; token inventories need the aggregator
    async fn portfolio(&self, address: &str) -> Result<PortfolioBalance, ProviderError> {
        let mut assets = Vec::new();
        for chain in self.rpc_urls.keys() {
            let result = self
                .rpc_call(chain, "eth_getBalance", json!([address, "latest"]))
                .await?;
            if let Some(raw) = result.as_str() {
                let wei = Self::parse_hex_i128(raw)?;
                assets.push(json!({
                    "chain": chain,
                    "asset": "native",
                    "balance_wei": wei.to_string(),
                }));
            }
        }

        Ok(PortfolioBalance {
            address: address.to_string(),
            assets,
            total_value_usd: "0".to_string(),
            provider: PROVIDER.to_string(),
            degraded: true,
        })
    }

    async fn transaction_status(
        &self,
        tx_hash: &str,
        chain: &str,
    ) -> Result<TransactionResult, ProviderError> {
        let result = self
            .rpc_call(chain, "eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        if result.is_null() {
            return Ok(TransactionResult {
                transaction_hash: tx_hash.to_string(),
                status: TransactionStatus::Pending,
                block_number: None,
                gas_used: None,
                error_message: None,
                provider: PROVIDER.to_string(),
            });
        }

        let succeeded = result.get("status").and_then(|s| s.as_str()) == Some("0x1");
        let block_number = result
            .get("blockNumber")
            .and_then(|b| b.as_str())
            .and_then(|b| Self::parse_hex_i128(b).ok())
            .map(|b| b as i64);
        let gas_used = result
            .get("gasUsed")
            .and_then(|g| g.as_str())
            .and_then(|g| Self::parse_hex_i128(g).ok())
            .map(|g| g.to_string());

        Ok(TransactionResult {
            transaction_hash: tx_hash.to_string(),
            status: if succeeded {
                TransactionStatus::Confirmed
            } else {
                TransactionStatus::Failed
            },
            block_number,
            gas_used,
            error_message: None,
            provider: PROVIDER.to_string(),
        })
    }

    /// Registry interaction runs through the relayer-less MVP path: the
    /// upkeep id is derived locally and the registration is acknowledged
    /// with a synthetic transaction hash.
    async fn register_upkeep(
        &self,
        req: &UpkeepRegistration,
    ) -> Result<UpkeepReceipt, ProviderError> {
        let upkeep_id = u128::from_le_bytes(*Uuid::new_v4().as_bytes()).to_string();
        tracing::info!(
            "🔗 Registered upkeep {} for workflow {} (source {}, direction {}, target {})",
            upkeep_id,
            req.workflow_id,
            req.trigger_source,
            req.trigger_direction,
            req.trigger_target_value
        );

        Ok(UpkeepReceipt {
            upkeep_id,
            transaction_hash: Self::synthetic_tx_hash(),
            provider: PROVIDER.to_string(),
        })
    }

    async fn deregister_upkeep(&self, upkeep_id: &str) -> Result<TransactionResult, ProviderError> {
        tracing::info!("🔗 Deregistering upkeep {}", upkeep_id);
        Ok(TransactionResult {
            transaction_hash: Self::synthetic_tx_hash(),
            status: TransactionStatus::Confirmed,
            block_number: None,
            gas_used: None,
            error_message: None,
            provider: PROVIDER.to_string(),
        })
    }

    async fn health(&self) -> ProviderHealth {
        for chain in self.rpc_urls.keys() {
            if self
                .rpc_call(chain, "eth_blockNumber", json!([]))
                .await
                .is_ok()
            {
                return ProviderHealth {
                    provider: PROVIDER.to_string(),
                    healthy: true,
                    detail: None,
                };
            }
        }
        ProviderHealth {
            provider: PROVIDER.to_string(),
            healthy: false,
            detail: Some("no reachable rpc endpoint".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_descriptor_resolution() {
        let adapter = DirectRpcAdapter::new(
            HashMap::new(),
            HashMap::from([(
                "base:ETH-USD".to_string(),
                "0x0000000000000000000000000000000000000042".to_string(),
            )]),
        );

        let resolved = adapter.feed_address("price_feed:ETH-USD", "base").unwrap();
        assert_eq!(resolved, "0x0000000000000000000000000000000000000042");

        // A literal address passes through untouched.
        let passthrough = adapter
            .feed_address("price_feed:0x00000000000000000000000000000000000000aa", "base")
            .unwrap();
        assert_eq!(passthrough, "0x00000000000000000000000000000000000000aa");

        assert!(adapter.feed_address("price_feed:BTC-USD", "base").is_err());
    }

    #[test]
    fn hex_values_parse() {
        assert_eq!(DirectRpcAdapter::parse_hex_i128("0x1").unwrap(), 1);
        // 3200.00000000 at 8 decimals
        assert_eq!(
            DirectRpcAdapter::parse_hex_i128("0x4a817c800").unwrap(),
            20_000_000_000
        );
        assert!(DirectRpcAdapter::parse_hex_i128("0xzz").is_err());
    }

    #[tokio::test]
    async fn degraded_quotes_are_flagged() {
        let adapter = DirectRpcAdapter::new(HashMap::new(), HashMap::new());
        let quote = adapter
            .swap_quote(&SwapQuoteRequest {
                from_asset: "USDC".to_string(),
                to_asset: "ETH".to_string(),
                amount: "100".to_string(),
                from_chain: "base".to_string(),
                to_chain: "base".to_string(),
                sca_address: "0xsca".to_string(),
                slippage: 0.5,
            })
            .await
            .unwrap();

        assert!(quote.degraded);
        assert_eq!(quote.to_amount, "0");
        assert!(quote.quote_id.starts_with("fallback-"));
    }

    #[tokio::test]
    async fn execution_is_a_capability_gap() {
        let adapter = DirectRpcAdapter::new(HashMap::new(), HashMap::new());
        let err = adapter
            .execute_swap(&ExecuteRequest {
                quote_id: "q".to_string(),
                user_signature: "sig".to_string(),
                sca_address: "0xsca".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotSupported { .. }));
    }
}
