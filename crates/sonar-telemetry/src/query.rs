//! Read-only aggregated views over a usage snapshot.
//!
//! Pure functions: every view derives from a [`UsageSnapshot`] without
//! touching the live store, so queries never contend with the record path
//! beyond the snapshot copy itself.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::snapshot::UsageSnapshot;

/// Headline numbers for the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_requests: u64,
    pub total_tool_calls: u64,
    pub unique_clients: usize,
    pub uptime: String,
    pub server_start_time: Option<DateTime<Utc>>,
}

/// One row of the per-tool breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ToolUsage {
    pub tool: String,
    pub count: u64,
    pub percent: String,
}

/// One row of the top-clients table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUsage {
    pub client_ip: String,
    pub count: u64,
}

/// One bucket of the hourly series, oldest-first in the output.
#[derive(Debug, Clone, Serialize)]
pub struct HourBucket {
    pub hour: String,
    pub count: u64,
}

/// How many clients the top-clients view returns.
pub const TOP_CLIENTS: usize = 20;

/// How many hour buckets the time series returns.
pub const SERIES_HOURS: usize = 24;

pub fn summary(snap: &UsageSnapshot, now: DateTime<Utc>) -> UsageSummary {
    let uptime = snap
        .server_start_time
        .map(|started| (now - started).max(TimeDelta::zero()))
        .unwrap_or_else(TimeDelta::zero);
    UsageSummary {
        total_requests: snap.total_requests,
        total_tool_calls: snap.total_tool_calls,
        unique_clients: snap.clients_by_ip.len(),
        uptime: format_uptime(uptime),
        server_start_time: snap.server_start_time,
    }
}

/// Per-tool counts sorted by descending count (stable, so equal counts keep
/// the map's key order), with each tool's share of all calls. A zero total
/// reports `0%` for every tool.
pub fn tool_breakdown(snap: &UsageSnapshot) -> Vec<ToolUsage> {
    let total = snap.total_tool_calls;
    let mut rows: Vec<ToolUsage> = snap
        .tool_calls
        .iter()
        .map(|(tool, &count)| ToolUsage {
            tool: tool.clone(),
            count,
            percent: percent_of(count, total),
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

/// Top [`TOP_CLIENTS`] client IPs by request count, descending.
pub fn top_clients(snap: &UsageSnapshot, n: usize) -> Vec<ClientUsage> {
    let mut rows: Vec<ClientUsage> = snap
        .clients_by_ip
        .iter()
        .map(|(ip, &count)| ClientUsage {
            client_ip: ip.clone(),
            count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows.truncate(n);
    rows
}

/// The [`SERIES_HOURS`] most recent hour buckets, oldest-first for charting.
/// Hour keys sort chronologically as strings, so the newest buckets are the
/// last keys of the map.
pub fn hourly_series(snap: &UsageSnapshot, hours: usize) -> Vec<HourBucket> {
    let skip = snap.hourly_requests.len().saturating_sub(hours);
    snap.hourly_requests
        .iter()
        .skip(skip)
        .map(|(hour, &count)| HourBucket {
            hour: hour.clone(),
            count,
        })
        .collect()
}

/// `Nd Nh Nm` once a day has passed, `Nh Nm` within the first day, `Nm`
/// within the first hour.
pub fn format_uptime(uptime: TimeDelta) -> String {
    let minutes_total = uptime.num_minutes().max(0);
    let days = minutes_total / (24 * 60);
    let hours = (minutes_total / 60) % 24;
    let minutes = minutes_total % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn percent_of(count: u64, total: u64) -> String {
    if total == 0 {
        "0%".to_string()
    } else {
        format!("{:.1}%", count as f64 / total as f64 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::hour_key;
    use chrono::TimeZone;

    fn snap_with_tools(entries: &[(&str, u64)]) -> UsageSnapshot {
        let mut snap = UsageSnapshot::default();
        for (tool, count) in entries {
            snap.tool_calls.insert((*tool).to_string(), *count);
            snap.total_tool_calls += count;
        }
        snap
    }

    #[test]
    fn breakdown_sorted_descending_with_percentages() {
        let snap = snap_with_tools(&[
            ("perplexity_ask", 1),
            ("perplexity_search", 6),
            ("perplexity_reason", 3),
        ]);
        let rows = tool_breakdown(&snap);
        assert_eq!(rows[0].tool, "perplexity_search");
        assert_eq!(rows[0].percent, "60.0%");
        assert_eq!(rows[1].tool, "perplexity_reason");
        assert_eq!(rows[2].tool, "perplexity_ask");
        assert_eq!(rows[2].percent, "10.0%");
    }

    #[test]
    fn zero_total_reports_zero_percent_for_every_tool() {
        let mut snap = UsageSnapshot::default();
        snap.tool_calls.insert("perplexity_ask".to_string(), 0);
        snap.tool_calls.insert("perplexity_search".to_string(), 0);

        let rows = tool_breakdown(&snap);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.percent == "0%"));
    }

    #[test]
    fn series_returns_most_recent_hours_oldest_first() {
        let mut snap = UsageSnapshot::default();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for h in 0..30i64 {
            snap.hourly_requests
                .insert(hour_key(start + TimeDelta::hours(h)), h as u64);
        }

        let series = hourly_series(&snap, SERIES_HOURS);
        assert_eq!(series.len(), 24);
        assert_eq!(series[0].hour, "2024-01-01T06");
        assert_eq!(series[23].hour, "2024-01-02T05");
        assert!(series.windows(2).all(|w| w[0].hour < w[1].hour));
    }

    #[test]
    fn top_clients_cut_at_requested_size() {
        let mut snap = UsageSnapshot::default();
        for i in 0..25u64 {
            snap.clients_by_ip.insert(format!("10.0.0.{i}"), i);
        }

        let rows = top_clients(&snap, TOP_CLIENTS);
        assert_eq!(rows.len(), TOP_CLIENTS);
        assert_eq!(rows[0].count, 24);
        assert!(rows.windows(2).all(|w| w[0].count >= w[1].count));
    }

    #[test]
    fn uptime_uses_largest_applicable_units() {
        assert_eq!(format_uptime(TimeDelta::minutes(12)), "12m");
        assert_eq!(format_uptime(TimeDelta::minutes(3 * 60 + 5)), "3h 5m");
        assert_eq!(
            format_uptime(TimeDelta::minutes(2 * 24 * 60 + 60 + 1)),
            "2d 1h 1m"
        );
    }

    #[test]
    fn summary_counts_unique_clients() {
        let mut snap = UsageSnapshot::default();
        snap.total_requests = 9;
        snap.clients_by_ip.insert("10.0.0.1".to_string(), 5);
        snap.clients_by_ip.insert("10.0.0.2".to_string(), 4);
        snap.server_start_time = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        let view = summary(&snap, now);
        assert_eq!(view.unique_clients, 2);
        assert_eq!(view.uptime, "30m");
        assert_eq!(view.total_requests, 9);
    }
}
