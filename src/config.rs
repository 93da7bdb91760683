//! Gateway configuration consumed by the NAT core
//!
//! The core never writes configuration; it is handed a validated
//! [`NatConfig`] at startup and per-link [`LinkConfig`] values whenever a
//! base station has been identified.

use std::net::Ipv4Addr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{NatError, NatResult};
use crate::limits::*;

/// How MGCP towards the call agent is transported
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallAgentTransport {
    /// Own UDP socket with a bounded write queue
    #[default]
    Direct,
    /// Multiplexed over the IPA connection to the MSC
    Ipa,
}

/// Per base-station configuration
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Endpoints the base station's media gateway offers
    pub max_endpoints: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { max_endpoints: 32 }
    }
}

/// Limits applied while rewriting
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteLimits {
    pub buffer_size: usize,
    pub headroom: usize,
}

impl Default for RewriteLimits {
    fn default() -> Self {
        Self {
            buffer_size: REWRITE_BUFFER_SIZE,
            headroom: REWRITE_HEADROOM,
        }
    }
}

impl RewriteLimits {
    /// Largest input accepted by the rewriter
    pub fn max_input(&self) -> usize {
        self.buffer_size.saturating_sub(self.headroom)
    }
}

/// Gateway wide configuration
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct NatConfig {
    /// Address written into every rewritten `c=` line
    pub source_addr: Ipv4Addr,
    /// Local MGCP port of the gateway
    pub source_port: u16,
    /// Call agent to talk to; required
    pub call_agent_addr: Option<Ipv4Addr>,
    /// Must stay unset, the gateway learns BTS addresses per link
    pub bts_ip: Option<Ipv4Addr>,
    pub transport: CallAgentTransport,
    /// Endpoints of the trunk as numbered by the call agent
    pub number_endpoints: u32,
    /// First RTP port handed out on the base-station side
    pub bts_base_port: u16,
    /// First RTP port handed out on the call-agent side
    pub net_base_port: u16,
    pub send_queue_depth: usize,
    pub rewrite: RewriteLimits,
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            source_addr: Ipv4Addr::LOCALHOST,
            source_port: 2427,
            call_agent_addr: None,
            bts_ip: None,
            transport: CallAgentTransport::Direct,
            number_endpoints: 32,
            bts_base_port: 4000,
            net_base_port: 16000,
            send_queue_depth: DEFAULT_SEND_QUEUE_DEPTH,
            rewrite: RewriteLimits::default(),
        }
    }
}

impl NatConfig {
    /// Check everything the gateway cannot start without
    pub fn validate(&self) -> NatResult<()> {
        if self.call_agent_addr.is_none() {
            return Err(NatError::Configuration(
                "the call agent address must be set".to_string(),
            ));
        }
        if self.bts_ip.is_some() {
            return Err(NatError::Configuration(
                "a BTS address must not be configured for the NAT".to_string(),
            ));
        }
        if self.number_endpoints == 0 {
            return Err(NatError::Configuration(
                "the trunk needs at least one endpoint".to_string(),
            ));
        }
        if self.rewrite.headroom >= self.rewrite.buffer_size {
            return Err(NatError::Configuration(format!(
                "rewrite headroom {} leaves no room in a {} byte buffer",
                self.rewrite.headroom, self.rewrite.buffer_size
            )));
        }
        if self.transport == CallAgentTransport::Direct && self.send_queue_depth == 0 {
            return Err(NatError::Configuration(
                "the direct send queue needs a non-zero depth".to_string(),
            ));
        }
        Ok(())
    }

    /// Base-station side RTP port of an endpoint
    pub fn bts_rtp_port(&self, endpoint: u32) -> u16 {
        rtp_port(self.bts_base_port, endpoint)
    }

    /// Call-agent side RTP port of an endpoint
    pub fn net_rtp_port(&self, endpoint: u32) -> u16 {
        rtp_port(self.net_base_port, endpoint)
    }
}

/// Every endpoint gets an RTP/RTCP port pair above the base
pub fn rtp_port(base: u16, endpoint: u32) -> u16 {
    let offset = endpoint.saturating_mul(2);
    u32::from(base)
        .saturating_add(offset)
        .min(u32::from(u16::MAX)) as u16
}
