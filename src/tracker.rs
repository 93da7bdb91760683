//! Per endpoint transaction tracking
//!
//! Every call-agent endpoint owns one slot. The slot remembers the
//! transaction that was forwarded to a base station until its response comes
//! back, and the link the endpoint was last routed to until the call is torn
//! down.

use std::net::Ipv4Addr;

use crate::config::NatConfig;
use crate::error::{NatError, NatResult};
use crate::types::{LinkId, TransactionKind};

/// Transaction waiting for a base-station response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub id: String,
    pub kind: TransactionKind,
}

/// Transaction state of one endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRecord {
    pub pending: Option<PendingTransaction>,
    /// Link the endpoint was routed to; stays set after the response
    pub link: Option<LinkId>,
}

impl TransactionRecord {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.link = None;
    }
}

/// Media side of an endpoint as seen by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEndpoint {
    /// Connection identifier assigned by the base station
    pub ci: Option<u32>,
    /// Base-station address learned when the connection was created
    pub bts_addr: Option<Ipv4Addr>,
    pub bts_port: u16,
    pub net_port: u16,
}

impl MediaEndpoint {
    fn new(config: &NatConfig, endpoint: u32) -> Self {
        Self {
            ci: None,
            bts_addr: None,
            bts_port: config.bts_rtp_port(endpoint),
            net_port: config.net_rtp_port(endpoint),
        }
    }

    /// Forget the connection; ports are fixed per endpoint
    pub fn reset(&mut self) {
        self.ci = None;
        self.bts_addr = None;
    }
}

/// Everything the gateway keeps per call-agent endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSlot {
    pub transaction: TransactionRecord,
    pub media: MediaEndpoint,
}

/// Slot table covering the whole trunk
#[derive(Debug)]
pub struct EndpointTable {
    slots: Vec<EndpointSlot>,
}

impl EndpointTable {
    /// Allocate one slot per trunk endpoint
    pub fn new(config: &NatConfig) -> NatResult<Self> {
        let count = config.number_endpoints as usize;
        let mut slots = Vec::new();
        slots.try_reserve_exact(count).map_err(|_| {
            NatError::Configuration(format!("failed to allocate {} endpoint slots", count))
        })?;
        slots.extend((0..config.number_endpoints).map(|endpoint| EndpointSlot {
            transaction: TransactionRecord::default(),
            media: MediaEndpoint::new(config, endpoint),
        }));
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, endpoint: u32) -> Option<&EndpointSlot> {
        self.slots.get(endpoint as usize)
    }

    pub fn get_mut(&mut self, endpoint: u32) -> Option<&mut EndpointSlot> {
        self.slots.get_mut(endpoint as usize)
    }

    /// Usable endpoint numbers; endpoint 0 is never handed out
    fn usable(&self) -> impl Iterator<Item = (u32, &EndpointSlot)> {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .map(|(index, slot)| (index as u32, slot))
    }

    /// Endpoint whose pending transaction on `link` carries `transaction`
    pub fn find_pending(&self, link: LinkId, transaction: &str) -> Option<u32> {
        self.usable()
            .find(|(_, slot)| {
                slot.transaction.link == Some(link)
                    && slot
                        .transaction
                        .pending
                        .as_ref()
                        .is_some_and(|pending| pending.id == transaction)
            })
            .map(|(endpoint, _)| endpoint)
    }

    /// Endpoints routed to a link
    pub fn endpoints_on_link(&self, link: LinkId) -> Vec<u32> {
        self.usable()
            .filter(|(_, slot)| slot.transaction.link == Some(link))
            .map(|(endpoint, _)| endpoint)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.transaction.is_pending())
            .count()
    }

    /// Clear the transaction state of an endpoint
    pub fn clear_transaction(&mut self, endpoint: u32) {
        if let Some(slot) = self.get_mut(endpoint) {
            slot.transaction.clear();
        }
    }

    /// Clear transaction and media state of an endpoint
    pub fn free(&mut self, endpoint: u32) {
        if let Some(slot) = self.get_mut(endpoint) {
            slot.transaction.clear();
            slot.media.reset();
        }
    }

    /// Free every usable endpoint
    pub fn free_all(&mut self) {
        for slot in self.slots.iter_mut().skip(1) {
            slot.transaction.clear();
            slot.media.reset();
        }
    }
}
