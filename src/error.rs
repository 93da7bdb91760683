//! Error handling for the MGCP NAT core
//!
//! A single error type covers every failure the core can report. Apart from
//! [`NatError::Configuration`], all of them are local to one message or one
//! call and never take the gateway down.

use thiserror::Error;

/// Unified error type for NAT operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NatError {
    /// A line or field could not be parsed; the message is dropped
    #[error("malformed message: {reason}")]
    MalformedMessage {
        reason: String,
        line: Option<String>,
    },

    /// Input does not fit into the rewrite buffer with the required headroom
    #[error("message of {length} bytes exceeds the limit of {limit} bytes")]
    BufferExceeded { length: usize, limit: usize },

    /// A working buffer could not be allocated
    #[error("failed to allocate a buffer of {size} bytes")]
    AllocationFailed { size: usize },

    /// No free endpoint left on the base-station link
    #[error("no free endpoint on link {link} ({max_endpoints} endpoints)")]
    AllocationExhausted { link: u32, max_endpoints: u32 },

    /// The link has no endpoint configuration yet
    #[error("link {link} has no endpoint configuration")]
    Unconfigured { link: u32 },

    /// An endpoint or circuit outside of the configured range
    #[error("endpoint {endpoint:#x} outside of the configured range (limit {limit})")]
    EndpointOutOfRange { endpoint: u32, limit: u32 },

    /// Stale state left behind by a peer that broke the call protocol
    #[error("protocol inconsistency on endpoint {endpoint:#x}: {reason}")]
    ProtocolInconsistency { endpoint: u32, reason: String },

    /// The remote address of a base-station link could not be resolved
    #[error("peer address of link {link} unavailable: {reason}")]
    PeerAddressUnavailable { link: u32, reason: String },

    /// A base-station response matched no pending transaction
    #[error("no pending transaction '{transaction}' on link {link}")]
    UnknownTransaction { link: u32, transaction: String },

    /// The outbound send queue refused the message
    #[error("send queue full ({capacity} entries)")]
    QueueFull { capacity: usize },

    /// Referenced link or call is not known
    #[error("unknown {kind} {id}")]
    UnknownEntity { kind: &'static str, id: u32 },

    /// Invalid startup configuration
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl NatError {
    /// Create a malformed message error, keeping the offending line if any
    pub fn malformed(reason: impl Into<String>, line: Option<&str>) -> Self {
        NatError::MalformedMessage {
            reason: reason.into(),
            line: line.map(str::to_string),
        }
    }

    /// Create a buffer limit error
    pub fn buffer_exceeded(length: usize, limit: usize) -> Self {
        NatError::BufferExceeded { length, limit }
    }

    /// Create a protocol inconsistency error
    pub fn inconsistency(endpoint: u32, reason: impl Into<String>) -> Self {
        NatError::ProtocolInconsistency {
            endpoint,
            reason: reason.into(),
        }
    }

    /// Only configuration problems found at startup are fatal
    pub fn is_fatal(&self) -> bool {
        matches!(self, NatError::Configuration(_))
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            NatError::MalformedMessage { .. } => "malformed",
            NatError::BufferExceeded { .. } => "buffer",
            NatError::AllocationFailed { .. } => "allocation",
            NatError::AllocationExhausted { .. } => "exhausted",
            NatError::Unconfigured { .. } => "unconfigured",
            NatError::EndpointOutOfRange { .. } => "range",
            NatError::ProtocolInconsistency { .. } => "inconsistency",
            NatError::PeerAddressUnavailable { .. } => "peer_address",
            NatError::UnknownTransaction { .. } => "unknown_transaction",
            NatError::QueueFull { .. } => "queue",
            NatError::UnknownEntity { .. } => "unknown",
            NatError::Configuration(_) => "configuration",
        }
    }
}

/// Result type for NAT operations
pub type NatResult<T> = Result<T, NatError>;
