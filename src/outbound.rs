//! Outbound delivery towards base stations and the call agent
//!
//! Socket handling lives outside of the core. The gateway state machine only
//! talks to an [`Outbound`] implementation which owns delivery and
//! back-pressure.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::config::CallAgentTransport;
use crate::error::{NatError, NatResult};
use crate::types::LinkId;

/// Delivery services the gateway core depends on
pub trait Outbound {
    /// Write an MGCP message to a base station
    fn send_to_link(&mut self, link: LinkId, message: Bytes);

    /// Queue a message for the call agent
    fn queue_for_call_agent(&mut self, transport: CallAgentTransport, message: Bytes) -> NatResult<()>;

    /// Remote address of the base station behind a link
    fn peer_address(&self, link: LinkId) -> NatResult<Ipv4Addr>;
}

/// In-memory outbound queues with a bounded direct call-agent queue
#[derive(Debug, Default)]
pub struct BufferedOutbound {
    links: HashMap<LinkId, VecDeque<Bytes>>,
    peers: HashMap<LinkId, Ipv4Addr>,
    direct: VecDeque<Bytes>,
    ipa: VecDeque<Bytes>,
    max_direct: usize,
}

impl BufferedOutbound {
    /// Create queues; the direct call-agent queue holds at most `max_direct` messages
    pub fn new(max_direct: usize) -> Self {
        Self {
            max_direct,
            ..Self::default()
        }
    }

    /// Remember the remote address of a link
    pub fn set_peer(&mut self, link: LinkId, address: Ipv4Addr) {
        self.peers.insert(link, address);
    }

    /// Take everything written to a link so far
    pub fn drain_link(&mut self, link: LinkId) -> Vec<Bytes> {
        self.links
            .get_mut(&link)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Take everything queued for the call agent, IPA messages first
    pub fn drain_call_agent(&mut self) -> Vec<Bytes> {
        self.ipa.drain(..).chain(self.direct.drain(..)).collect()
    }

    pub fn pending_call_agent(&self) -> usize {
        self.direct.len() + self.ipa.len()
    }
}

impl Outbound for BufferedOutbound {
    fn send_to_link(&mut self, link: LinkId, message: Bytes) {
        self.links.entry(link).or_default().push_back(message);
    }

    fn queue_for_call_agent(&mut self, transport: CallAgentTransport, message: Bytes) -> NatResult<()> {
        match transport {
            CallAgentTransport::Ipa => {
                self.ipa.push_back(message);
                Ok(())
            }
            CallAgentTransport::Direct => {
                if self.direct.len() >= self.max_direct {
                    return Err(NatError::QueueFull {
                        capacity: self.max_direct,
                    });
                }
                self.direct.push_back(message);
                Ok(())
            }
        }
    }

    fn peer_address(&self, link: LinkId) -> NatResult<Ipv4Addr> {
        self.peers
            .get(&link)
            .copied()
            .ok_or_else(|| NatError::PeerAddressUnavailable {
                link: link.0,
                reason: "no peer address known".to_string(),
            })
    }
}
