//! Metric helpers for the NAT core.
//!
//! Thin wrappers around the [`metrics`](https://docs.rs/metrics) crate. The
//! core only increments; exporting is left to the embedding process.

use metrics::counter;

use crate::types::LinkId;

/// Calls dropped because their base station went away or failed them
pub const DROPPED_CALLS: &str = "mgcp_nat_dropped_calls_total";
/// Messages that could not be rewritten
pub const REWRITE_FAILURES: &str = "mgcp_nat_rewrite_failures_total";
/// Stale bindings and transactions found and torn down
pub const PROTOCOL_ANOMALIES: &str = "mgcp_nat_protocol_anomalies_total";

/// Kind of protocol anomaly
#[derive(Clone, Copy)]
pub enum Anomaly {
    StaleTransaction,
    StaleBinding,
    UnknownTransaction,
    MissingConnectionId,
}

impl Anomaly {
    fn as_str(self) -> &'static str {
        match self {
            Anomaly::StaleTransaction => "stale_transaction",
            Anomaly::StaleBinding => "stale_binding",
            Anomaly::UnknownTransaction => "unknown_transaction",
            Anomaly::MissingConnectionId => "missing_ci",
        }
    }
}

/// Record one dropped call on a link.
pub fn inc_dropped_calls(link: LinkId) {
    counter!(DROPPED_CALLS, "link" => link.to_string()).increment(1);
}

/// Record a failed rewrite.
pub fn inc_rewrite_failures() {
    counter!(REWRITE_FAILURES).increment(1);
}

/// Record a protocol anomaly.
pub fn inc_anomalies(anomaly: Anomaly) {
    counter!(PROTOCOL_ANOMALIES, "kind" => anomaly.as_str()).increment(1);
}
