/// JSON feed poller
///
/// Polls a feed endpoint returning a JSON array of items (optionally under
/// an "items" key) and fires once per new item, keyed on the newest item
/// timestamp. The cursor lives in the workflow's engine-owned trigger state
/// and advances on every check, fired or not; on the very first poll the
/// cursor bootstraps to the newest existing item without firing, so old
/// items never replay.

use chrono::DateTime;
use serde_json::{json, Value};

use crate::error::TriggerError;

const CURSOR_KEY: &str = "last_item_timestamp";

#[derive(Debug, Clone)]
pub struct FeedChecker {
    client: reqwest::Client,
}

impl FeedChecker {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn check(&self, feed_url: &str, state: &Value) -> Result<(bool, Value), TriggerError> {
        let response = self
            .client
            .get(feed_url)
            .send()
            .await
            .map_err(|e| TriggerError::Source(format!("feed fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(TriggerError::Source(format!(
                "feed '{}' answered {}",
                feed_url,
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TriggerError::Source(format!("feed is not json: {}", e)))?;

        let items = extract_items(&body);
        Ok(advance(state, newest_timestamp(items)))
    }
}

impl Default for FeedChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Items may be the document itself or nested under "items"
fn extract_items(body: &Value) -> &[Value] {
    match body {
        Value::Array(items) => items,
        Value::Object(map) => map
            .get("items")
            .and_then(|v| v.as_array())
            .map(|v| v.as_slice())
            .unwrap_or(&[]),
        _ => &[],
    }
}

/// Newest item timestamp in the feed, from "published_at" (RFC 3339) or
/// "timestamp" (unix seconds)
fn newest_timestamp(items: &[Value]) -> Option<i64> {
    items.iter().filter_map(item_timestamp).max()
}

fn item_timestamp(item: &Value) -> Option<i64> {
    if let Some(published) = item.get("published_at").and_then(|v| v.as_str()) {
        if let Ok(ts) = DateTime::parse_from_rfc3339(published) {
            return Some(ts.timestamp());
        }
    }
    item.get("timestamp").and_then(|v| v.as_i64())
}

/// Pure cursor-advancement decision, split out for testing
fn advance(state: &Value, newest: Option<i64>) -> (bool, Value) {
    let cursor = state.get(CURSOR_KEY).and_then(|v| v.as_i64());

    match (cursor, newest) {
        // First poll: bootstrap the cursor to the newest existing item so
        // historical items never fire.
        (None, Some(newest)) => (false, json!({ CURSOR_KEY: newest })),
        (Some(cursor), Some(newest)) if newest > cursor => {
            (true, json!({ CURSOR_KEY: newest }))
        }
        (Some(cursor), _) => (false, json!({ CURSOR_KEY: cursor })),
        (None, None) => (false, json!({ CURSOR_KEY: 0 })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(timestamps: &[i64]) -> Vec<Value> {
        timestamps.iter().map(|t| json!({ "timestamp": t })).collect()
    }

    #[test]
    fn first_poll_bootstraps_without_firing() {
        let items = feed(&[100, 200, 150]);
        let (fired, state) = advance(&json!({}), newest_timestamp(&items));
        assert!(!fired);
        assert_eq!(state[CURSOR_KEY], json!(200));
    }

    #[test]
    fn new_item_fires_once_and_advances_cursor() {
        let items = feed(&[100, 200, 300]);
        let (fired, state) = advance(&json!({ CURSOR_KEY: 200 }), newest_timestamp(&items));
        assert!(fired);
        assert_eq!(state[CURSOR_KEY], json!(300));

        // Same feed on the next poll: the cursor holds, nothing re-fires.
        let (fired, state) = advance(&state, newest_timestamp(&items));
        assert!(!fired);
        assert_eq!(state[CURSOR_KEY], json!(300));
    }

    #[test]
    fn empty_feed_preserves_cursor() {
        let (fired, state) = advance(&json!({ CURSOR_KEY: 500 }), newest_timestamp(&[]));
        assert!(!fired);
        assert_eq!(state[CURSOR_KEY], json!(500));
    }

    #[test]
    fn rfc3339_published_at_is_understood() {
        let items = vec![json!({ "published_at": "2024-05-01T12:00:00Z" })];
        let newest = newest_timestamp(&items).unwrap();
        assert_eq!(newest, 1714564800);
    }

    #[test]
    fn items_key_and_bare_array_both_parse() {
        let bare = json!([{ "timestamp": 5 }]);
        assert_eq!(extract_items(&bare).len(), 1);
        let nested = json!({ "items": [{ "timestamp": 5 }, { "timestamp": 6 }] });
        assert_eq!(extract_items(&nested).len(), 2);
        let neither = json!("nope");
        assert!(extract_items(&neither).is_empty());
    }
}
