/// Chain explorer transaction poller
///
/// Polls an Etherscan-compatible explorer for new transactions involving a
/// watched address, keyed on the last seen block number. Unlike the feed
/// poller there is no bootstrap: a cursor of zero means any existing
/// transaction fires the trigger, matching the "tell me when this wallet
/// moves" intent.

use serde_json::{json, Value};
use std::collections::HashMap;

use crate::error::TriggerError;

const CURSOR_KEY: &str = "last_checked_block";

#[derive(Debug, Clone)]
pub struct ChainLogChecker {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    chain_ids: HashMap<String, u64>,
}

impl ChainLogChecker {
    pub fn new(api_url: String, api_key: String) -> Self {
        if api_key.is_empty() {
            tracing::warn!("⚠️ Explorer api key not configured; chain log checks will fail");
        }
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            chain_ids: HashMap::from([
                ("ethereum".to_string(), 1),
                ("base".to_string(), 8453),
                ("avalanche".to_string(), 43114),
                ("fuji".to_string(), 43113),
            ]),
        }
    }

    pub async fn check(
        &self,
        address: &str,
        chain: &str,
        state: &Value,
    ) -> Result<(bool, Value), TriggerError> {
        let chain_id = self
            .chain_ids
            .get(chain)
            .copied()
            .ok_or_else(|| TriggerError::Misconfigured(format!("unknown chain '{}'", chain)))?;

        let cursor = read_cursor(state);
        let url = format!(
            "{}?chainid={}&module=account&action=txlist&address={}&startblock={}&endblock=99999999&sort=asc&apikey={}",
            self.api_url,
            chain_id,
            address,
            cursor + 1,
            self.api_key
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TriggerError::Source(format!("explorer fetch failed: {}", e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| TriggerError::Source(format!("explorer response is not json: {}", e)))?;

        // Explorer convention: status "1" means transactions found, "0"
        // means none (also used for benign "No transactions found").
        let found = body.get("status").and_then(|s| s.as_str()) == Some("1");
        if !found {
            return Ok((false, json!({ CURSOR_KEY: cursor })));
        }

        let txs = body
            .get("result")
            .and_then(|r| r.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[]);

        Ok(decide(cursor, txs))
    }
}

fn read_cursor(state: &Value) -> u64 {
    state.get(CURSOR_KEY).and_then(|v| v.as_u64()).unwrap_or(0)
}

/// Fire when the response holds a transaction beyond the cursor; the cursor
/// advances to the newest block seen either way.
fn decide(cursor: u64, txs: &[Value]) -> (bool, Value) {
    let newest_block = txs
        .iter()
        .filter_map(|tx| {
            tx.get("blockNumber")
                .and_then(|b| b.as_str())
                .and_then(|b| b.parse::<u64>().ok())
        })
        .max();

    match newest_block {
        Some(newest) if newest > cursor => {
            tracing::info!("🔔 New transaction seen at block {}", newest);
            (true, json!({ CURSOR_KEY: newest }))
        }
        _ => (false, json!({ CURSOR_KEY: cursor })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(block: &str) -> Value {
        json!({ "blockNumber": block, "hash": "0xabc" })
    }

    #[test]
    fn fires_on_transactions_beyond_cursor() {
        let (fired, state) = decide(100, &[tx("150"), tx("120")]);
        assert!(fired);
        assert_eq!(state[CURSOR_KEY], json!(150));
    }

    #[test]
    fn does_not_refire_for_already_seen_blocks() {
        let (fired, state) = decide(150, &[tx("150"), tx("120")]);
        assert!(!fired);
        assert_eq!(state[CURSOR_KEY], json!(150));
    }

    #[test]
    fn zero_cursor_fires_on_any_history() {
        let (fired, state) = decide(0, &[tx("42")]);
        assert!(fired);
        assert_eq!(state[CURSOR_KEY], json!(42));
    }

    #[test]
    fn unparseable_blocks_preserve_cursor() {
        let (fired, state) = decide(10, &[json!({ "blockNumber": null })]);
        assert!(!fired);
        assert_eq!(state[CURSOR_KEY], json!(10));
    }
}
