//! MGCP NAT - endpoint multiplexing for a BSC NAT
//!
//! This library sits between one MGCP call agent and many base-station
//! controllers. It hands out base-station endpoints for assignments, rewrites
//! MGCP/SDP so the media flows through the gateway, and keeps the transaction
//! bookkeeping needed to route responses back to the call agent.
//!
//! Sockets, IPA framing and the MGCP protocol engine itself live outside; the
//! core reaches them through [`Outbound`] and [`MgcpProtocol`].

pub mod allocator;
pub mod cic;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod limits;
pub mod metrics;
pub mod outbound;
pub mod parsing;
pub mod protocol;
pub mod rewrite;
pub mod tracker;
pub mod types;

pub use allocator::BaseStationLink;
pub use config::{CallAgentTransport, LinkConfig, NatConfig, RewriteLimits};
pub use connection::{CallBinding, ConnectionTable};
pub use error::{NatError, NatResult};
pub use gateway::{GatewayState, ResponseOutcome};
pub use outbound::{BufferedOutbound, Outbound};
pub use parsing::{extract_connection_id, parse_response, ResponseLine};
pub use protocol::{MgcpProtocol, PolicyHandler};
pub use rewrite::{build_dlcx_probe, build_mdcx_probe, rewrite_message, RewriteBuffer, RewriteTarget};
pub use types::{CallId, LinkId, PolicyDecision, TransactionKind, Verb};
