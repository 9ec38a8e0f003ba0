//! On-disk snapshot representation.
//!
//! The wire format is a single JSON object with camelCase field names. Every
//! field carries a serde default so snapshots written by older builds (or
//! hand-edited ones with fields removed) still decode.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in the bounded recent-calls list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool: String,
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub user_agent: String,
}

/// Complete point-in-time copy of the usage store, as persisted to disk.
///
/// `recent_tool_calls` is newest-first and never longer than
/// [`crate::store::RECENT_CALLS_CAP`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageSnapshot {
    pub server_start_time: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub total_tool_calls: u64,
    pub requests_by_method: BTreeMap<String, u64>,
    pub requests_by_endpoint: BTreeMap<String, u64>,
    pub tool_calls: BTreeMap<String, u64>,
    pub recent_tool_calls: Vec<ToolCallRecord>,
    pub clients_by_ip: BTreeMap<String, u64>,
    pub clients_by_user_agent: BTreeMap<String, u64>,
    pub hourly_requests: BTreeMap<String, u64>,
}

/// Truncate a timestamp to hour granularity, e.g. `2024-01-01T10`.
///
/// Hour keys sort chronologically as plain strings, which the hourly series
/// view relies on.
pub fn hour_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hour_key_truncates_to_hour() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 42, 59).unwrap();
        assert_eq!(hour_key(at), "2024-01-01T10");
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let mut snap = UsageSnapshot::default();
        snap.total_requests = 3;
        snap.requests_by_endpoint.insert("/mcp".to_string(), 3);
        snap.recent_tool_calls.push(ToolCallRecord {
            tool: "perplexity_search".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            client_ip: "10.0.0.1".to_string(),
            user_agent: "curl/8.0".to_string(),
        });

        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["totalRequests"], 3);
        assert_eq!(value["requestsByEndpoint"]["/mcp"], 3);
        assert_eq!(value["recentToolCalls"][0]["clientIp"], "10.0.0.1");
        assert_eq!(value["recentToolCalls"][0]["userAgent"], "curl/8.0");
        assert!(value.get("hourlyRequests").is_some());
    }

    #[test]
    fn decode_tolerates_missing_fields() {
        // A minimal snapshot from an older build: most fields absent.
        let snap: UsageSnapshot =
            serde_json::from_str(r#"{"totalRequests": 7, "toolCalls": {"perplexity_ask": 2}}"#)
                .unwrap();
        assert_eq!(snap.total_requests, 7);
        assert_eq!(snap.tool_calls.get("perplexity_ask"), Some(&2));
        assert!(snap.server_start_time.is_none());
        assert!(snap.recent_tool_calls.is_empty());
    }
}
