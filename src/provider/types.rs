/// Vendor-agnostic provider types
///
/// Standardized quote/result shapes shared by every adapter. Every result
/// carries the provider identity and a `degraded` flag so reduced-capability
/// fallback output is never silently presented as equivalent to the primary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Onchain transaction lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
    Dropped,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Dropped => "dropped",
        }
    }
}

/// Standardized swap quote across providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapQuote {
    pub quote_id: String,
    pub from_asset: String,
    pub to_asset: String,
    /// Amounts in base units, as strings
    pub from_amount: String,
    pub to_amount: String,
    pub from_chain: String,
    pub to_chain: String,
    /// Routing hops; the first hop's toTokenAddress is the signing target
    #[serde(default)]
    pub route: Vec<Value>,
    #[serde(default)]
    pub estimated_gas: Option<String>,
    pub slippage: f64,
    /// Unix timestamp after which the quote is no longer executable
    pub expires_at: i64,
    pub provider: String,
    /// True when produced by a reduced-capability adapter (no real pricing)
    #[serde(default)]
    pub degraded: bool,
}

/// Standardized bridge quote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeQuote {
    pub quote_id: String,
    pub asset: String,
    pub amount: String,
    pub from_chain: String,
    pub to_chain: String,
    #[serde(default)]
    pub bridge_fee: Option<String>,
    #[serde(default)]
    pub estimated_time_minutes: Option<u32>,
    pub expires_at: i64,
    pub provider: String,
    #[serde(default)]
    pub degraded: bool,
}

/// Quote for a staking operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingQuote {
    pub quote_id: String,
    pub asset: String,
    pub amount: String,
    pub staking_pool_address: String,
    #[serde(default)]
    pub apy_percentage: Option<f64>,
    pub expires_at: i64,
    pub provider: String,
    #[serde(default)]
    pub degraded: bool,
}

/// Quote for supplying assets to a lending protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingQuote {
    pub quote_id: String,
    pub asset: String,
    pub amount: String,
    pub lending_pool_address: String,
    #[serde(default)]
    pub apy_percentage: Option<f64>,
    pub expires_at: i64,
    pub provider: String,
    #[serde(default)]
    pub degraded: bool,
}

/// Standardized transaction result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    pub transaction_hash: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub block_number: Option<i64>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub provider: String,
}

/// A piece of data read from the chain (e.g. a price feed round)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnchainData {
    /// Source descriptor, e.g. "price_feed:ETH-USD"
    pub source: String,
    pub chain: String,
    pub value: Value,
    pub provider: String,
    pub retrieved_at: i64,
}

/// Multi-chain portfolio snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioBalance {
    pub address: String,
    #[serde(default)]
    pub assets: Vec<Value>,
    pub total_value_usd: String,
    pub provider: String,
    #[serde(default)]
    pub degraded: bool,
}

/// Health snapshot of one adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub healthy: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

// --- Request shapes ---

#[derive(Debug, Clone, Serialize)]
pub struct SwapQuoteRequest {
    pub from_asset: String,
    pub to_asset: String,
    pub amount: String,
    pub from_chain: String,
    pub to_chain: String,
    pub sca_address: String,
    pub slippage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeQuoteRequest {
    pub asset: String,
    pub amount: String,
    pub from_chain: String,
    pub to_chain: String,
    pub sca_address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StakeQuoteRequest {
    pub asset: String,
    pub amount: String,
    pub from_chain: String,
    pub staking_pool: String,
    pub sca_address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupplyQuoteRequest {
    pub asset: String,
    pub amount: String,
    pub from_chain: String,
    pub lending_pool: String,
    pub sca_address: String,
}

/// Execute a previously fetched quote with the user's signature
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    pub quote_id: String,
    pub user_signature: String,
    pub sca_address: String,
}

/// Onchain trigger registration request (automation upkeep)
#[derive(Debug, Clone, Serialize)]
pub struct UpkeepRegistration {
    pub workflow_id: String,
    pub trigger_source: String,
    /// 0 = above, 1 = below
    pub trigger_direction: u8,
    /// Target value scaled to 8 decimals
    pub trigger_target_value: i128,
}

/// Result of registering an upkeep with the automation registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpkeepReceipt {
    pub upkeep_id: String,
    pub transaction_hash: String,
    pub provider: String,
}
