//! Connection table binding call-agent endpoints to base-station endpoints

use std::collections::BTreeMap;

use crate::types::{CallId, LinkId};

/// Per call mapping between both endpoint numberings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBinding {
    pub call: CallId,
    /// Base-station link the call runs over
    pub link: LinkId,
    /// Endpoint as numbered by the call agent
    pub call_agent_endpoint: Option<u32>,
    /// Endpoint claimed on the base-station link
    pub gateway_endpoint: Option<u32>,
}

impl CallBinding {
    pub fn new(call: CallId, link: LinkId) -> Self {
        Self {
            call,
            link,
            call_agent_endpoint: None,
            gateway_endpoint: None,
        }
    }

    /// Back to the unassigned state
    pub fn reset(&mut self) {
        self.call_agent_endpoint = None;
        self.gateway_endpoint = None;
    }

    pub fn is_assigned(&self) -> bool {
        self.call_agent_endpoint.is_some()
    }
}

/// All calls currently known to the gateway
#[derive(Debug, Default)]
pub struct ConnectionTable {
    calls: BTreeMap<CallId, CallBinding>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unassigned binding; an existing one is kept as is
    pub fn open(&mut self, call: CallId, link: LinkId) -> &mut CallBinding {
        self.calls
            .entry(call)
            .or_insert_with(|| CallBinding::new(call, link))
    }

    pub fn get(&self, call: CallId) -> Option<&CallBinding> {
        self.calls.get(&call)
    }

    pub fn get_mut(&mut self, call: CallId) -> Option<&mut CallBinding> {
        self.calls.get_mut(&call)
    }

    pub fn remove(&mut self, call: CallId) -> Option<CallBinding> {
        self.calls.remove(&call)
    }

    /// Call currently using a call-agent endpoint
    pub fn find_by_call_agent_endpoint(&self, endpoint: u32) -> Option<CallId> {
        self.calls
            .values()
            .filter(|binding| binding.call_agent_endpoint == Some(endpoint))
            .map(|binding| binding.call)
            .last()
    }

    /// Every call holding a call-agent endpoint, normally at most one
    pub fn holders_of_call_agent_endpoint(&self, endpoint: u32) -> Vec<CallId> {
        self.calls
            .values()
            .filter(|binding| binding.call_agent_endpoint == Some(endpoint))
            .map(|binding| binding.call)
            .collect()
    }

    /// Call holding a claimed endpoint of a link
    pub fn find_by_gateway_endpoint(&self, link: LinkId, endpoint: u32) -> Option<CallId> {
        self.calls
            .values()
            .find(|binding| binding.link == link && binding.gateway_endpoint == Some(endpoint))
            .map(|binding| binding.call)
    }

    /// Calls running over a link
    pub fn calls_on_link(&self, link: LinkId) -> Vec<CallId> {
        self.calls
            .values()
            .filter(|binding| binding.link == link)
            .map(|binding| binding.call)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallBinding> {
        self.calls.values()
    }
}
