//! Mutable in-memory usage aggregates.
//!
//! One [`UsageStore`] lives for the whole process. Request handlers call
//! [`UsageStore::record`] on the hot path; the persistence task and the query
//! layer read consistent copies via [`UsageStore::snapshot`]. All access goes
//! through a single mutex — every mutation (including ring-buffer eviction and
//! bucket pruning) completes before the lock is released.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

use crate::snapshot::{hour_key, ToolCallRecord, UsageSnapshot};

/// Maximum number of entries kept in the recent-calls list.
pub const RECENT_CALLS_CAP: usize = 100;

/// User-agent strings are truncated to this many characters before counting.
pub const USER_AGENT_MAX_CHARS: usize = 50;

/// Hourly buckets kept: a rolling 7 days. Older buckets are dropped on insert.
pub const HOURLY_BUCKET_CAP: usize = 24 * 7;

/// Cardinality cap for the per-client maps. Once a map holds this many
/// distinct keys, further new clients are counted under [`OVERFLOW_KEY`] so
/// totals are preserved while memory stays bounded.
pub const CLIENT_KEY_CAP: usize = 10_000;

const OVERFLOW_KEY: &str = "other";

/// One observation handed in by the dispatch layer.
#[derive(Debug, Clone)]
pub enum UsageEvent {
    Request {
        method: String,
        endpoint: String,
        client_ip: String,
        user_agent: String,
        at: DateTime<Utc>,
    },
    ToolCall {
        tool: String,
        client_ip: String,
        user_agent: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug)]
struct StoreState {
    started_at: DateTime<Utc>,
    total_requests: u64,
    total_tool_calls: u64,
    requests_by_method: BTreeMap<String, u64>,
    requests_by_endpoint: BTreeMap<String, u64>,
    tool_calls: BTreeMap<String, u64>,
    recent_tool_calls: VecDeque<ToolCallRecord>,
    clients_by_ip: BTreeMap<String, u64>,
    clients_by_user_agent: BTreeMap<String, u64>,
    hourly_requests: BTreeMap<String, u64>,
}

impl StoreState {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            total_requests: 0,
            total_tool_calls: 0,
            requests_by_method: BTreeMap::new(),
            requests_by_endpoint: BTreeMap::new(),
            tool_calls: BTreeMap::new(),
            recent_tool_calls: VecDeque::with_capacity(RECENT_CALLS_CAP),
            clients_by_ip: BTreeMap::new(),
            clients_by_user_agent: BTreeMap::new(),
            hourly_requests: BTreeMap::new(),
        }
    }
}

/// Thread-safe usage store. Cheap to clone (Arc).
#[derive(Clone)]
pub struct UsageStore {
    inner: Arc<Mutex<StoreState>>,
}

impl UsageStore {
    /// Fresh store with all counters at zero, started now.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreState::new(Utc::now()))),
        }
    }

    /// Restore a store from a persisted snapshot, adopting its counters
    /// wholesale. A recovered `serverStartTime` is preserved; if the snapshot
    /// predates that field, the start time is stamped now.
    pub fn from_snapshot(snap: UsageSnapshot) -> Self {
        let mut state = StoreState::new(snap.server_start_time.unwrap_or_else(Utc::now));
        state.total_requests = snap.total_requests;
        state.total_tool_calls = snap.total_tool_calls;
        state.requests_by_method = snap.requests_by_method;
        state.requests_by_endpoint = snap.requests_by_endpoint;
        state.tool_calls = snap.tool_calls;
        state.recent_tool_calls = snap
            .recent_tool_calls
            .into_iter()
            .take(RECENT_CALLS_CAP)
            .collect();
        state.clients_by_ip = snap.clients_by_ip;
        state.clients_by_user_agent = snap.clients_by_user_agent;
        state.hourly_requests = snap.hourly_requests;
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Fold one event into the aggregates. Never fails; unknown or empty
    /// identifiers are ordinary keys.
    pub fn record(&self, event: UsageEvent) {
        let mut state = self.lock();
        match event {
            UsageEvent::Request {
                method,
                endpoint,
                client_ip,
                user_agent,
                at,
            } => {
                state.total_requests += 1;
                bump(&mut state.requests_by_method, method);
                bump(&mut state.requests_by_endpoint, endpoint);
                bump_capped(&mut state.clients_by_ip, client_ip);
                bump_capped(
                    &mut state.clients_by_user_agent,
                    truncate_chars(&user_agent, USER_AGENT_MAX_CHARS),
                );
                bump(&mut state.hourly_requests, hour_key(at));
                prune_oldest(&mut state.hourly_requests, HOURLY_BUCKET_CAP);
            }
            UsageEvent::ToolCall {
                tool,
                client_ip,
                user_agent,
                at,
            } => {
                state.total_tool_calls += 1;
                bump(&mut state.tool_calls, tool.clone());
                state.recent_tool_calls.push_front(ToolCallRecord {
                    tool,
                    timestamp: at,
                    client_ip,
                    user_agent: truncate_chars(&user_agent, USER_AGENT_MAX_CHARS),
                });
                state.recent_tool_calls.truncate(RECENT_CALLS_CAP);
            }
        }
    }

    /// Consistent deep copy of the current state. The live structures are
    /// never handed out.
    pub fn snapshot(&self) -> UsageSnapshot {
        let state = self.lock();
        UsageSnapshot {
            server_start_time: Some(state.started_at),
            total_requests: state.total_requests,
            total_tool_calls: state.total_tool_calls,
            requests_by_method: state.requests_by_method.clone(),
            requests_by_endpoint: state.requests_by_endpoint.clone(),
            tool_calls: state.tool_calls.clone(),
            recent_tool_calls: state.recent_tool_calls.iter().cloned().collect(),
            clients_by_ip: state.clients_by_ip.clone(),
            clients_by_user_agent: state.clients_by_user_agent.clone(),
            hourly_requests: state.hourly_requests.clone(),
        }
    }

    /// Additively merge a foreign snapshot: scalars add, map entries add
    /// (creating keys absent locally). The recent-calls list and the start
    /// time stay local. Repeating the same import double-counts; the importer
    /// is cumulative by design, not deduplicating.
    pub fn merge(&self, foreign: &UsageSnapshot) {
        let mut state = self.lock();
        state.total_requests += foreign.total_requests;
        state.total_tool_calls += foreign.total_tool_calls;
        merge_counts(&mut state.requests_by_method, &foreign.requests_by_method);
        merge_counts(
            &mut state.requests_by_endpoint,
            &foreign.requests_by_endpoint,
        );
        merge_counts(&mut state.tool_calls, &foreign.tool_calls);
        merge_counts(&mut state.clients_by_ip, &foreign.clients_by_ip);
        merge_counts(
            &mut state.clients_by_user_agent,
            &foreign.clients_by_user_agent,
        );
        merge_counts(&mut state.hourly_requests, &foreign.hourly_requests);
        prune_oldest(&mut state.hourly_requests, HOURLY_BUCKET_CAP);
    }

    /// When this store started counting (process start, or the start time
    /// recovered from a snapshot).
    pub fn started_at(&self) -> DateTime<Utc> {
        self.lock().started_at
    }

    /// Elapsed time since `started_at`, clamped to zero if the clock moved.
    pub fn uptime(&self, now: DateTime<Utc>) -> TimeDelta {
        (now - self.started_at()).max(TimeDelta::zero())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        // Counter math cannot panic mid-update; a poisoned lock still holds
        // consistent state, so keep counting.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for UsageStore {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(map: &mut BTreeMap<String, u64>, key: String) {
    *map.entry(key).or_insert(0) += 1;
}

/// Increment, folding new keys into the overflow bucket once the map is at
/// its cardinality cap.
fn bump_capped(map: &mut BTreeMap<String, u64>, key: String) {
    if map.len() >= CLIENT_KEY_CAP && !map.contains_key(&key) {
        bump(map, OVERFLOW_KEY.to_string());
    } else {
        bump(map, key);
    }
}

fn merge_counts(into: &mut BTreeMap<String, u64>, from: &BTreeMap<String, u64>) {
    for (key, count) in from {
        *into.entry(key.clone()).or_insert(0) += count;
    }
}

/// Drop the oldest keys until the map fits the cap. Hour keys sort
/// chronologically, so the first BTreeMap key is the oldest bucket.
fn prune_oldest(map: &mut BTreeMap<String, u64>, cap: usize) {
    while map.len() > cap {
        if let Some(oldest) = map.keys().next().cloned() {
            map.remove(&oldest);
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
