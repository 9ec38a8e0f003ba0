//! Usage analytics for sonar-relay.
//!
//! A single in-process [`UsageStore`] accumulates request and tool-call
//! counters, a bounded recent-call list, and hourly buckets. The store is
//! periodically flushed to a JSON snapshot file and restored from it at
//! startup. Aggregated read-only views are derived on demand.
//!
//! Telemetry is best-effort throughout: every I/O failure is logged and
//! swallowed, never surfaced to the request path.

pub mod persist;
pub mod query;
pub mod snapshot;
pub mod store;

pub use persist::{run_periodic_save, SnapshotError, SnapshotFile};
pub use snapshot::{hour_key, ToolCallRecord, UsageSnapshot};
pub use store::{UsageEvent, UsageStore};
