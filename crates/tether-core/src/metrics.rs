//! Metric name constants to avoid typos across crates.
//!
//! Recording goes through the `metrics` facade; installing a recorder and
//! exporter is left to the host process.

/// Events forwarded to a live peer (counter, labels: role).
pub const EVENTS_FORWARDED_TOTAL: &str = "tether_events_forwarded_total";
/// Events appended to a queue file (counter, labels: role).
pub const EVENTS_QUEUED_TOTAL: &str = "tether_events_queued_total";
/// Queued events forwarded during replay (counter, labels: role).
pub const EVENTS_REPLAYED_TOTAL: &str = "tether_events_replayed_total";
/// Queue lines that failed to decode during replay (counter).
pub const REPLAY_MALFORMED_TOTAL: &str = "tether_replay_malformed_total";
/// Forward calls rejected by the transport (counter, labels: role).
pub const FORWARD_ERRORS_TOTAL: &str = "tether_forward_errors_total";
/// Lock acquisitions that timed out (counter).
pub const LOCK_TIMEOUTS_TOTAL: &str = "tether_lock_timeouts_total";
/// Time spent waiting for the queue lock (histogram, seconds).
pub const LOCK_WAIT_SECONDS: &str = "tether_lock_wait_seconds";
