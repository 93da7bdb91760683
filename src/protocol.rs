//! Seam towards the MGCP protocol library
//!
//! The protocol library parses call-agent messages and owns the canonical
//! endpoint state. Before it acts on a connection command it asks the gateway
//! through a [`PolicyHandler`] whether to answer now, refuse, or wait for the
//! base station.

use bytes::Bytes;

use crate::types::{PolicyDecision, TransactionKind};

/// Decision callback invoked per connection command
pub trait PolicyHandler {
    fn decide(&mut self, endpoint: u32, kind: TransactionKind, transaction: &str) -> PolicyDecision;
}

/// MGCP protocol engine handling call-agent messages
pub trait MgcpProtocol {
    /// Handle one message. A returned message is a direct answer (e.g. to
    /// `AUEP`) for the call agent.
    fn handle_message(&mut self, message: &str, policy: &mut dyn PolicyHandler) -> Option<Bytes>;
}
