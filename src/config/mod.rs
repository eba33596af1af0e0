/// Configuration management for the Chainflow engine
///
/// Environment-driven configuration for the server, database, scheduler
/// cadence and provider endpoints. Defaults are suitable for local
/// development: a SQLite file next to the binary and a 15-second sweep.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub provider: ProviderConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL; rwc mode creates the file when missing
    pub url: String,
}

/// Trigger scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 6-field cron expression for the trigger sweep cadence
    pub sweep_schedule: String,
    /// Delay before a failed workflow is rechecked for retry
    pub retry_delay_minutes: i64,
}

/// Provider adapter and circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub onebalance_api_url: String,
    pub onebalance_api_key: String,
    /// chain name -> JSON-RPC endpoint for the fallback adapter
    pub rpc_urls: HashMap<String, String>,
    /// "chain:SYMBOL" -> price feed aggregator address
    pub price_feeds: HashMap<String, String>,
    /// Etherscan-compatible explorer endpoint for the chain log poller
    pub explorer_api_url: String,
    pub explorer_api_key: String,
    /// Consecutive primary failures before the circuit opens
    pub breaker_failure_threshold: u32,
    /// Seconds the circuit stays open before a half-open probe
    pub breaker_cooldown_secs: u64,
}

impl Default for Config {
    /// Default configuration with CHAINFLOW_* env var overrides for
    /// container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("CHAINFLOW_HOST", "0.0.0.0"),
                port: env_or("CHAINFLOW_PORT", "3040").parse().unwrap_or(3040),
            },
            database: DatabaseConfig {
                url: env_or("CHAINFLOW_DATABASE_URL", "sqlite:chainflow.db?mode=rwc"),
            },
            scheduler: SchedulerConfig {
                sweep_schedule: env_or("CHAINFLOW_SWEEP_SCHEDULE", "*/15 * * * * *"),
                retry_delay_minutes: env_or("CHAINFLOW_RETRY_DELAY_MINUTES", "5")
                    .parse()
                    .unwrap_or(5),
            },
            provider: ProviderConfig {
                onebalance_api_url: env_or(
                    "CHAINFLOW_ONEBALANCE_API_URL",
                    "https://api.onebalance.io",
                ),
                onebalance_api_key: env_or("CHAINFLOW_ONEBALANCE_API_KEY", ""),
                rpc_urls: parse_map(&env_or("CHAINFLOW_RPC_URLS", "")),
                price_feeds: parse_map(&env_or("CHAINFLOW_PRICE_FEEDS", "")),
                explorer_api_url: env_or(
                    "CHAINFLOW_EXPLORER_API_URL",
                    "https://api.etherscan.io/v2/api",
                ),
                explorer_api_key: env_or("CHAINFLOW_EXPLORER_API_KEY", ""),
                breaker_failure_threshold: env_or("CHAINFLOW_BREAKER_THRESHOLD", "5")
                    .parse()
                    .unwrap_or(5),
                breaker_cooldown_secs: env_or("CHAINFLOW_BREAKER_COOLDOWN_SECS", "60")
                    .parse()
                    .unwrap_or(60),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse "key=value,key=value" pairs, e.g.
/// CHAINFLOW_RPC_URLS="base=https://mainnet.base.org,fuji=https://api.avax-test.network/ext/bc/C/rpc"
fn parse_map(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_parsing_handles_pairs_and_garbage() {
        let map = parse_map("base=https://rpc.base,eth = https://rpc.eth");
        assert_eq!(map.len(), 2);
        assert_eq!(map["base"], "https://rpc.base");
        assert_eq!(map["eth"], "https://rpc.eth");

        assert!(parse_map("").is_empty());
        assert!(parse_map("novalue,=x").is_empty());
    }
}
