//! Gateway state machine
//!
//! Ties the pieces together: assignments claim base-station endpoints,
//! connection commands from the call agent are rewritten and forwarded with a
//! deferred answer, base-station responses are matched to their transaction
//! and sent back, and a departing base station takes all of its calls with it.
//!
//! All state lives in [`GatewayState`] and is only touched from the event
//! handler processing the current message.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::allocator::BaseStationLink;
use crate::cic::{circuit_code_to_endpoint, endpoint_to_circuit_code};
use crate::config::{LinkConfig, NatConfig};
use crate::connection::{CallBinding, ConnectionTable};
use crate::error::{NatError, NatResult};
use crate::limits::{CALL_AGENT_BUFFER_SIZE, MAX_RESPONSE_LENGTH};
use crate::metrics::{self, Anomaly};
use crate::outbound::Outbound;
use crate::parsing::{extract_connection_id, parse_response};
use crate::protocol::{MgcpProtocol, PolicyHandler};
use crate::rewrite::{build_dlcx_probe, build_mdcx_probe, rewrite_message, RewriteTarget};
use crate::tracker::{EndpointSlot, EndpointTable, PendingTransaction};
use crate::types::{CallId, LinkId, PolicyDecision, TransactionKind};

/// What became of a base-station response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Rewritten and queued for the call agent
    Forwarded { endpoint: u32, ci: u32 },
    /// No connection identifier, the endpoint was freed
    ConnectionFailed { endpoint: u32 },
}

/// Complete NAT state for one gateway
#[derive(Debug)]
pub struct GatewayState {
    config: NatConfig,
    links: HashMap<LinkId, BaseStationLink>,
    calls: ConnectionTable,
    endpoints: EndpointTable,
    dropped_calls: HashMap<LinkId, u64>,
}

impl GatewayState {
    /// Validate the configuration and allocate the endpoint table
    pub fn new(config: NatConfig) -> NatResult<Self> {
        config.validate()?;
        let endpoints = EndpointTable::new(&config)?;
        info!(
            endpoints = config.number_endpoints,
            source = %config.source_addr,
            "MGCP NAT initialized"
        );
        Ok(Self {
            config,
            links: HashMap::new(),
            calls: ConnectionTable::new(),
            endpoints,
            dropped_calls: HashMap::new(),
        })
    }

    pub fn config(&self) -> &NatConfig {
        &self.config
    }

    pub fn link(&self, link: LinkId) -> Option<&BaseStationLink> {
        self.links.get(&link)
    }

    pub fn call(&self, call: CallId) -> Option<&CallBinding> {
        self.calls.get(call)
    }

    pub fn calls(&self) -> &ConnectionTable {
        &self.calls
    }

    pub fn endpoint(&self, endpoint: u32) -> Option<&EndpointSlot> {
        self.endpoints.get(endpoint)
    }

    pub fn pending_transactions(&self) -> usize {
        self.endpoints.pending_count()
    }

    /// Calls dropped on a link since the gateway started
    pub fn dropped_calls(&self, link: LinkId) -> u64 {
        self.dropped_calls.get(&link).copied().unwrap_or(0)
    }

    // Link lifecycle

    /// A base station connected; its configuration may follow later.
    ///
    /// A link that is still attached under the same id is detached first, so
    /// its calls are dropped before the allocator starts over. Returns the
    /// number of endpoints released that way.
    pub fn attach_link(&mut self, link: LinkId, config: Option<LinkConfig>) -> usize {
        let dropped = if self.links.contains_key(&link) {
            warn!(%link, "link attached again, dropping its previous calls");
            self.detach_link(link)
        } else {
            0
        };
        debug!(%link, configured = config.is_some(), "link attached");
        self.links.insert(link, BaseStationLink::new(link, config));
        dropped
    }

    /// The base station identified itself
    pub fn configure_link(&mut self, link: LinkId, config: LinkConfig) -> NatResult<()> {
        let bsc = self.links.get_mut(&link).ok_or(NatError::UnknownEntity {
            kind: "link",
            id: link.0,
        })?;
        bsc.set_config(config);
        Ok(())
    }

    /// The base station went away; every call through it is dropped.
    ///
    /// Returns the number of endpoints released.
    pub fn detach_link(&mut self, link: LinkId) -> usize {
        let mut released: BTreeSet<u32> = self.endpoints.endpoints_on_link(link).into_iter().collect();

        for call in self.calls.calls_on_link(link) {
            if let Some(binding) = self.calls.remove(call) {
                if let Some(endpoint) = binding.call_agent_endpoint {
                    released.insert(endpoint);
                }
            }
        }

        for endpoint in &released {
            debug!(%link, endpoint = format_args!("{:#x}", endpoint), "dropping call of departing link");
            self.endpoints.free(*endpoint);
            *self.dropped_calls.entry(link).or_default() += 1;
            metrics::inc_dropped_calls(link);
        }

        if self.links.remove(&link).is_none() {
            warn!(%link, "detach of unknown link");
        }
        if !released.is_empty() {
            info!(%link, dropped = released.len(), "link detached with active calls");
        }
        released.len()
    }

    // Call lifecycle

    /// A signalling connection for a call was established on a link
    pub fn open_call(&mut self, call: CallId, link: LinkId) -> NatResult<()> {
        if !self.links.contains_key(&link) {
            return Err(NatError::UnknownEntity {
                kind: "link",
                id: link.0,
            });
        }
        self.calls.open(call, link);
        Ok(())
    }

    /// The signalling connection is gone; free whatever the call held
    pub fn close_call<O: Outbound>(&mut self, call: CallId, out: &mut O) {
        self.release_call(call, out);
        self.calls.remove(call);
    }

    /// Tear a call down: free its base-station endpoint, tell the base
    /// station, forget the transaction and reset the binding.
    pub fn release_call<O: Outbound>(&mut self, call: CallId, out: &mut O) {
        let Some(binding) = self.calls.get_mut(call) else {
            return;
        };

        if let (Some(gateway_endpoint), Some(bsc)) =
            (binding.gateway_endpoint, self.links.get_mut(&binding.link))
        {
            if bsc.is_initialized() {
                bsc.release(gateway_endpoint);
                out.send_to_link(binding.link, Bytes::from(build_dlcx_probe(gateway_endpoint)));
                if let Some(endpoint) = binding.call_agent_endpoint {
                    self.endpoints.clear_transaction(endpoint);
                }
            }
        }

        binding.reset();
    }

    /// Rewrite the circuit identity code of an assignment.
    ///
    /// `cic_field` is the two byte, network order circuit identity code inside
    /// the assignment message; it is overwritten with the code of the claimed
    /// base-station endpoint. Returns that endpoint.
    pub fn assign_patch<O: Outbound>(
        &mut self,
        call: CallId,
        cic_field: &mut [u8],
        out: &mut O,
    ) -> NatResult<u32> {
        let code: [u8; 2] = (&*cic_field).try_into().map_err(|_| {
            error!(%call, length = cic_field.len(), "circuit identity code has wrong length");
            NatError::malformed("circuit identity code must be two bytes", None)
        })?;
        let endpoint = circuit_code_to_endpoint(u16::from_be_bytes(code));

        if endpoint >= self.config.number_endpoints {
            error!(%call, endpoint = format_args!("{:#x}", endpoint), "MSC attempted to assign bad endpoint");
            return Err(NatError::EndpointOutOfRange {
                endpoint,
                limit: self.config.number_endpoints,
            });
        }

        let Some(current) = self.calls.get(call) else {
            return Err(NatError::UnknownEntity {
                kind: "call",
                id: call.0,
            });
        };

        // find stale connections using that endpoint
        let mut stale = self.calls.holders_of_call_agent_endpoint(endpoint);
        if current.gateway_endpoint.is_some() && !stale.contains(&call) {
            stale.push(call);
        }
        for previous in stale {
            error!(
                endpoint = format_args!("{:#x}", endpoint),
                previous = %previous,
                current = %call,
                "endpoint was assigned before, releasing the stale call"
            );
            metrics::inc_anomalies(Anomaly::StaleBinding);
            self.release_call(previous, out);
        }

        let link_id = self.calls.get(call).map(|binding| binding.link).ok_or(NatError::UnknownEntity {
            kind: "call",
            id: call.0,
        })?;

        let bsc = self.links.get_mut(&link_id).ok_or(NatError::UnknownEntity {
            kind: "link",
            id: link_id.0,
        })?;
        let gateway_endpoint = bsc.claim().inspect_err(|err| {
            error!(%call, link = %link_id, %err, "failed to claim a base-station endpoint");
        })?;

        // The allocator handed the endpoint out, so any other holder is stale
        if let Some(other) = self
            .calls
            .find_by_gateway_endpoint(link_id, gateway_endpoint)
            .filter(|other| *other != call)
        {
            error!(
                link = %link_id,
                endpoint = format_args!("{:#x}", gateway_endpoint),
                previous = %other,
                "base-station endpoint still bound to another call"
            );
            metrics::inc_anomalies(Anomaly::StaleBinding);
            if let Some(binding) = self.calls.get_mut(other) {
                if let Some(endpoint) = binding.call_agent_endpoint {
                    self.endpoints.clear_transaction(endpoint);
                }
                binding.reset();
            }
        }

        // only a successful claim binds the call-agent endpoint
        if let Some(binding) = self.calls.get_mut(call) {
            binding.call_agent_endpoint = Some(endpoint);
            binding.gateway_endpoint = Some(gateway_endpoint);
        }

        cic_field.copy_from_slice(&endpoint_to_circuit_code(gateway_endpoint).to_be_bytes());
        debug!(
            %call,
            link = %link_id,
            msc_endpoint = format_args!("{:#x}", endpoint),
            bsc_endpoint = format_args!("{:#x}", gateway_endpoint),
            "assignment patched"
        );
        Ok(gateway_endpoint)
    }

    /// Decide on a connection command of the call agent for `endpoint`.
    ///
    /// `message` is the complete call-agent message that carried the command.
    pub fn policy<O: Outbound>(
        &mut self,
        endpoint: u32,
        kind: TransactionKind,
        transaction: &str,
        message: &str,
        out: &mut O,
    ) -> PolicyDecision {
        let Some(slot) = self.endpoints.get_mut(endpoint) else {
            error!(endpoint = format_args!("{:#x}", endpoint), "command for endpoint outside of the trunk");
            return PolicyDecision::Reject;
        };

        if let Some(stale) = slot.transaction.pending.take() {
            error!(
                endpoint = format_args!("{:#x}", endpoint),
                transaction = %stale.id,
                "endpoint had pending transaction"
            );
            metrics::inc_anomalies(Anomaly::StaleTransaction);
        }
        slot.transaction.link = None;

        let binding = self
            .calls
            .find_by_call_agent_endpoint(endpoint)
            .and_then(|call| self.calls.get(call))
            .and_then(|binding| {
                binding
                    .gateway_endpoint
                    .map(|gateway_endpoint| (binding.call, binding.link, gateway_endpoint))
            });

        let Some((call, link, gateway_endpoint)) = binding else {
            error!(
                endpoint = format_args!("{:#x}", endpoint),
                %kind,
                "did not find BSC for change on endpoint"
            );
            return match kind {
                TransactionKind::Create => PolicyDecision::Reject,
                TransactionKind::Modify | TransactionKind::Delete => PolicyDecision::Continue,
            };
        };

        // we need to generate a new and patched message
        let target = RewriteTarget {
            endpoint: Some(gateway_endpoint),
            address: self.config.source_addr,
            port: slot.media.bts_port,
        };
        let rewritten = match rewrite_message(message, &target, &self.config.rewrite) {
            Ok(rewritten) => rewritten,
            Err(err) => {
                error!(endpoint = format_args!("{:#x}", endpoint), %err, "failed to patch the msg");
                metrics::inc_rewrite_failures();
                return PolicyDecision::Continue;
            }
        };

        slot.transaction.pending = Some(PendingTransaction {
            id: transaction.to_string(),
            kind,
        });
        slot.transaction.link = Some(link);

        match kind {
            TransactionKind::Create => {
                match out.peer_address(link) {
                    Ok(address) => slot.media.bts_addr = Some(address),
                    Err(err) => warn!(%link, %err, "can not get the peer address"),
                }

                // send the message and a fake MDCX to force sending of a dummy packet
                out.send_to_link(link, rewritten.into_bytes());
                let probe = build_mdcx_probe(gateway_endpoint, self.config.source_addr, slot.media.bts_port);
                out.send_to_link(link, Bytes::from(probe));
                PolicyDecision::Defer
            }
            TransactionKind::Delete => {
                // the endpoint is freed now and a DLCX goes to the BSC
                drop(rewritten);
                self.release_call(call, out);
                PolicyDecision::Continue
            }
            TransactionKind::Modify => {
                out.send_to_link(link, rewritten.into_bytes());
                PolicyDecision::Defer
            }
        }
    }

    /// Handle a response of a base station and pass it on to the call agent
    pub fn forward_response<O: Outbound>(
        &mut self,
        link: LinkId,
        message: &[u8],
        out: &mut O,
    ) -> NatResult<ResponseOutcome> {
        if message.len() > MAX_RESPONSE_LENGTH {
            error!(%link, length = message.len(), "MGCP message too long");
            return Err(NatError::buffer_exceeded(message.len(), MAX_RESPONSE_LENGTH));
        }

        let text = std::str::from_utf8(message)
            .map_err(|_| NatError::malformed("response is not valid text", None))?;
        let response = parse_response(text).inspect_err(|err| {
            error!(%link, %err, "failed to parse response code");
        })?;

        let Some(endpoint) = self.endpoints.find_pending(link, &response.transaction) else {
            error!(
                %link,
                transaction = %response.transaction,
                message = %text,
                "could not find active endpoint"
            );
            metrics::inc_anomalies(Anomaly::UnknownTransaction);
            return Err(NatError::UnknownTransaction {
                link: link.0,
                transaction: response.transaction,
            });
        };

        let ci = extract_connection_id(text);
        let Some(slot) = self.endpoints.get_mut(endpoint) else {
            return Err(NatError::inconsistency(endpoint, "pending endpoint vanished"));
        };
        slot.media.ci = ci;

        let Some(ci) = ci else {
            error!(%link, message = %text, "no CI in response");
            metrics::inc_anomalies(Anomaly::MissingConnectionId);
            self.free_downstream(endpoint, link, out);
            return Ok(ResponseOutcome::ConnectionFailed { endpoint });
        };

        slot.transaction.pending = None;

        // Responses carry no command line, only the SDP is pointed at us
        let target = RewriteTarget {
            endpoint: None,
            address: self.config.source_addr,
            port: slot.media.net_port,
        };
        let rewritten = rewrite_message(text, &target, &self.config.rewrite).inspect_err(|err| {
            error!(%link, endpoint = format_args!("{:#x}", endpoint), %err, "failed to rewrite MGCP msg");
            metrics::inc_rewrite_failures();
        })?;

        self.queue_for_call_agent(out, rewritten.into_bytes())?;
        debug!(
            %link,
            endpoint = format_args!("{:#x}", endpoint),
            code = response.code,
            ci,
            "response forwarded"
        );
        Ok(ResponseOutcome::Forwarded { endpoint, ci })
    }

    /// A forwarded command did not yield a connection, free everything
    /// downstream of `endpoint`.
    fn free_downstream<O: Outbound>(&mut self, endpoint: u32, link: LinkId, out: &mut O) {
        let kind = self
            .endpoints
            .get(endpoint)
            .and_then(|slot| slot.transaction.pending.as_ref())
            .map(|pending| pending.kind);
        error!(
            endpoint = format_args!("{:#x}", endpoint),
            kind = ?kind,
            "no CI, freeing endpoint"
        );

        match self.calls.find_by_call_agent_endpoint(endpoint) {
            None => {
                error!(endpoint = format_args!("{:#x}", endpoint), "no connection for endpoint");
            }
            Some(call) => match self.calls.get_mut(call) {
                Some(binding) if binding.link == link => {
                    if let Some(gateway_endpoint) = binding.gateway_endpoint {
                        // a failed CRCX leaves a half open connection behind
                        if kind == Some(TransactionKind::Create) {
                            out.send_to_link(link, Bytes::from(build_dlcx_probe(gateway_endpoint)));
                        }
                        if let Some(bsc) = self.links.get_mut(&link) {
                            bsc.release(gateway_endpoint);
                        }
                    }
                    binding.reset();
                }
                Some(binding) => {
                    error!(
                        endpoint = format_args!("{:#x}", endpoint),
                        owner = %binding.link,
                        reporter = %link,
                        "endpoint belongs to a different BSC"
                    );
                }
                None => {}
            },
        }

        self.endpoints.free(endpoint);
    }

    /// Handle a message of the call agent.
    ///
    /// The protocol library consults [`GatewayState::policy`] for every
    /// connection command; a direct answer is queued for the call agent.
    pub fn handle_call_agent_message<P, O>(
        &mut self,
        message: &[u8],
        protocol: &mut P,
        out: &mut O,
    ) -> NatResult<()>
    where
        P: MgcpProtocol,
        O: Outbound,
    {
        if message.len() > CALL_AGENT_BUFFER_SIZE - 1 {
            error!(length = message.len(), "MGCP msg too big for handling");
            return Err(NatError::buffer_exceeded(message.len(), CALL_AGENT_BUFFER_SIZE - 1));
        }
        let text = std::str::from_utf8(message)
            .map_err(|_| NatError::malformed("call agent message is not valid text", None))?;

        let response = {
            let mut context = PolicyContext {
                state: self,
                out: &mut *out,
                message: text,
            };
            protocol.handle_message(text, &mut context)
        };

        // we do have a direct answer... e.g. AUEP
        match response {
            Some(response) => self.queue_for_call_agent(out, response),
            None => Ok(()),
        }
    }

    /// Forget every transaction and connection of the trunk
    pub fn reset_endpoints(&mut self) {
        self.endpoints.free_all();
    }

    fn queue_for_call_agent<O: Outbound>(&self, out: &mut O, message: Bytes) -> NatResult<()> {
        out.queue_for_call_agent(self.config.transport, message)
            .inspect_err(|err| error!(%err, "failed to queue MGCP msg"))
    }
}

/// Policy callback bound to the message currently being handled
struct PolicyContext<'a, O: Outbound> {
    state: &'a mut GatewayState,
    out: &'a mut O,
    message: &'a str,
}

impl<O: Outbound> PolicyHandler for PolicyContext<'_, O> {
    fn decide(&mut self, endpoint: u32, kind: TransactionKind, transaction: &str) -> PolicyDecision {
        self.state
            .policy(endpoint, kind, transaction, self.message, &mut *self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::BufferedOutbound;
    use std::net::Ipv4Addr;
    use tracing_test::traced_test;

    const BSC: LinkId = LinkId(1);

    fn gateway() -> (GatewayState, BufferedOutbound) {
        let config = NatConfig {
            call_agent_addr: Some(Ipv4Addr::new(10, 0, 0, 1)),
            source_addr: Ipv4Addr::new(10, 0, 0, 23),
            number_endpoints: 64,
            ..NatConfig::default()
        };
        let mut state = GatewayState::new(config).unwrap();
        state.attach_link(BSC, Some(LinkConfig { max_endpoints: 64 }));
        let mut out = BufferedOutbound::new(10);
        out.set_peer(BSC, Ipv4Addr::new(172, 16, 0, 9));
        (state, out)
    }

    fn assign(state: &mut GatewayState, out: &mut BufferedOutbound, call: CallId, msc_endpoint: u32) -> u32 {
        state.open_call(call, BSC).unwrap();
        let mut cic = endpoint_to_circuit_code(msc_endpoint).to_be_bytes();
        state.assign_patch(call, &mut cic, out).unwrap()
    }

    #[test]
    fn test_startup_requires_call_agent() {
        let err = GatewayState::new(NatConfig::default()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_assign_patch_rewrites_cic() {
        let (mut state, mut out) = gateway();
        state.open_call(CallId(1), BSC).unwrap();
        let mut cic = [0x00, 0x03];
        let claimed = state.assign_patch(CallId(1), &mut cic, &mut out).unwrap();
        assert_eq!(claimed, 1);
        assert_eq!(cic, [0x00, 0x01]);

        let binding = state.call(CallId(1)).unwrap();
        assert_eq!(binding.call_agent_endpoint, Some(3));
        assert_eq!(binding.gateway_endpoint, Some(1));
    }

    #[test]
    fn test_assign_patch_rejects_bad_input() {
        let (mut state, mut out) = gateway();
        state.open_call(CallId(1), BSC).unwrap();

        let mut short = [0x03];
        assert!(matches!(
            state.assign_patch(CallId(1), &mut short, &mut out),
            Err(NatError::MalformedMessage { .. })
        ));

        // multiplex 2 is beyond a 64 endpoint trunk
        let mut cic = [0x00, 0x41];
        assert!(matches!(
            state.assign_patch(CallId(1), &mut cic, &mut out),
            Err(NatError::EndpointOutOfRange { endpoint: 65, limit: 64 })
        ));
        assert_eq!(cic, [0x00, 0x41]);

        let mut cic = [0x00, 0x03];
        assert!(matches!(
            state.assign_patch(CallId(9), &mut cic, &mut out),
            Err(NatError::UnknownEntity { kind: "call", .. })
        ));
    }

    #[test]
    fn test_assign_patch_unconfigured_link() {
        let (mut state, mut out) = gateway();
        state.attach_link(LinkId(2), None);
        state.open_call(CallId(1), LinkId(2)).unwrap();
        let mut cic = [0x00, 0x03];
        assert_eq!(
            state.assign_patch(CallId(1), &mut cic, &mut out),
            Err(NatError::Unconfigured { link: 2 })
        );
        assert!(!state.call(CallId(1)).unwrap().is_assigned());

        state.configure_link(LinkId(2), LinkConfig { max_endpoints: 32 }).unwrap();
        assert_eq!(state.assign_patch(CallId(1), &mut cic, &mut out), Ok(1));
    }

    #[test]
    fn test_failed_claim_is_not_a_dropped_call() {
        let (mut state, mut out) = gateway();
        state.attach_link(LinkId(2), Some(LinkConfig { max_endpoints: 2 }));
        state.open_call(CallId(1), LinkId(2)).unwrap();
        state.open_call(CallId(2), LinkId(2)).unwrap();

        let mut cic = [0x00, 0x03];
        assert_eq!(state.assign_patch(CallId(1), &mut cic, &mut out), Ok(1));
        let mut cic = [0x00, 0x04];
        assert!(matches!(
            state.assign_patch(CallId(2), &mut cic, &mut out),
            Err(NatError::AllocationExhausted { link: 2, .. })
        ));
        assert_eq!(state.call(CallId(2)).unwrap().call_agent_endpoint, None);

        assert_eq!(state.detach_link(LinkId(2)), 1);
        assert_eq!(state.dropped_calls(LinkId(2)), 1);
    }

    #[test]
    #[traced_test]
    fn test_reattach_drops_previous_calls() {
        let (mut state, mut out) = gateway();
        assign(&mut state, &mut out, CallId(1), 3);
        state.policy(3, TransactionKind::Create, "100", "CRCX 100 3@mgw MGCP 1.0\r\n", &mut out);

        assert_eq!(state.attach_link(BSC, Some(LinkConfig { max_endpoints: 64 })), 1);
        assert!(logs_contain("link attached again"));
        assert_eq!(state.dropped_calls(BSC), 1);
        assert_eq!(state.pending_transactions(), 0);
        assert!(state.call(CallId(1)).is_none());
        assert_eq!(state.attach_link(LinkId(5), None), 0);
    }

    #[test]
    #[traced_test]
    fn test_stale_assignment_is_released() {
        let (mut state, mut out) = gateway();
        let first = assign(&mut state, &mut out, CallId(1), 3);
        let second = assign(&mut state, &mut out, CallId(2), 3);
        assert_ne!(first, second);

        assert!(logs_contain("releasing the stale call"));
        assert_eq!(state.call(CallId(1)).unwrap().call_agent_endpoint, None);
        assert!(!state.link(BSC).unwrap().is_claimed(first));
        let sent = out.drain_link(BSC);
        assert_eq!(sent, vec![Bytes::from(build_dlcx_probe(first))]);
    }

    #[test]
    fn test_reassignment_of_same_call_frees_old_endpoint() {
        let (mut state, mut out) = gateway();
        let first = assign(&mut state, &mut out, CallId(1), 3);
        let mut cic = endpoint_to_circuit_code(4).to_be_bytes();
        let second = state.assign_patch(CallId(1), &mut cic, &mut out).unwrap();

        assert!(!state.link(BSC).unwrap().is_claimed(first));
        assert!(state.link(BSC).unwrap().is_claimed(second));
        assert_eq!(state.link(BSC).unwrap().claimed_count(), 1);
    }

    #[test]
    fn test_policy_without_binding() {
        let (mut state, mut out) = gateway();
        let msg = "CRCX 1 3@mgw MGCP 1.0\r\n";
        assert_eq!(
            state.policy(3, TransactionKind::Create, "1", msg, &mut out),
            PolicyDecision::Reject
        );
        assert_eq!(
            state.policy(3, TransactionKind::Modify, "2", msg, &mut out),
            PolicyDecision::Continue
        );
        assert_eq!(
            state.policy(3, TransactionKind::Delete, "3", msg, &mut out),
            PolicyDecision::Continue
        );
        assert_eq!(
            state.policy(500, TransactionKind::Create, "4", msg, &mut out),
            PolicyDecision::Reject
        );
        assert!(out.drain_link(BSC).is_empty());
    }

    #[test]
    fn test_create_is_forwarded_and_deferred() {
        let (mut state, mut out) = gateway();
        let gateway_endpoint = assign(&mut state, &mut out, CallId(1), 3);

        let msg = "CRCX 100 3@mgw MGCP 1.0\r\nM: recvonly\r\n";
        let decision = state.policy(3, TransactionKind::Create, "100", msg, &mut out);
        assert_eq!(decision, PolicyDecision::Defer);

        let slot = state.endpoint(3).unwrap();
        assert_eq!(slot.transaction.link, Some(BSC));
        assert_eq!(slot.media.bts_addr, Some(Ipv4Addr::new(172, 16, 0, 9)));

        let sent = out.drain_link(BSC);
        assert_eq!(sent.len(), 2);
        assert_eq!(&sent[0][..], b"CRCX 100 1@mgw MGCP 1.0\r\nM: recvonly\r\n");
        assert_eq!(
            sent[1],
            Bytes::from(build_mdcx_probe(gateway_endpoint, Ipv4Addr::new(10, 0, 0, 23), 4006))
        );
    }

    #[test]
    #[traced_test]
    fn test_create_without_peer_address_proceeds() {
        let (mut state, _) = gateway();
        let mut out = BufferedOutbound::new(10);
        assign(&mut state, &mut out, CallId(1), 3);

        let msg = "CRCX 100 3@mgw MGCP 1.0\r\n";
        assert_eq!(
            state.policy(3, TransactionKind::Create, "100", msg, &mut out),
            PolicyDecision::Defer
        );
        assert!(logs_contain("can not get the peer address"));
        assert_eq!(state.endpoint(3).unwrap().media.bts_addr, None);
    }

    #[test]
    fn test_modify_is_forwarded_without_probe() {
        let (mut state, mut out) = gateway();
        assign(&mut state, &mut out, CallId(1), 3);
        out.drain_link(BSC);

        let msg = "MDCX 7 3@mgw MGCP 1.0\r\n";
        assert_eq!(
            state.policy(3, TransactionKind::Modify, "7", msg, &mut out),
            PolicyDecision::Defer
        );
        assert_eq!(out.drain_link(BSC).len(), 1);
    }

    #[test]
    fn test_delete_releases_and_answers() {
        let (mut state, mut out) = gateway();
        let gateway_endpoint = assign(&mut state, &mut out, CallId(1), 3);

        let msg = "DLCX 9 3@mgw MGCP 1.0\r\n";
        assert_eq!(
            state.policy(3, TransactionKind::Delete, "9", msg, &mut out),
            PolicyDecision::Continue
        );
        assert_eq!(
            out.drain_link(BSC),
            vec![Bytes::from(build_dlcx_probe(gateway_endpoint))]
        );
        assert!(!state.link(BSC).unwrap().is_claimed(gateway_endpoint));
        assert_eq!(state.pending_transactions(), 0);
        assert_eq!(state.call(CallId(1)).unwrap().gateway_endpoint, None);
    }

    #[test]
    fn test_rewrite_failure_continues() {
        let (mut state, mut out) = gateway();
        assign(&mut state, &mut out, CallId(1), 3);

        let msg = "CRCX 1 3@mgw MGCP 1.0\r\n\r\nm=audio 1 RTP/AVP x\r\n";
        assert_eq!(
            state.policy(3, TransactionKind::Create, "1", msg, &mut out),
            PolicyDecision::Continue
        );
        assert_eq!(state.pending_transactions(), 0);
        assert!(out.drain_link(BSC).is_empty());
    }

    #[test]
    #[traced_test]
    fn test_stale_transaction_replaced() {
        let (mut state, mut out) = gateway();
        assign(&mut state, &mut out, CallId(1), 3);
        let msg = "MDCX 1 3@mgw MGCP 1.0\r\n";
        state.policy(3, TransactionKind::Modify, "1", msg, &mut out);
        state.policy(3, TransactionKind::Modify, "2", msg, &mut out);

        assert!(logs_contain("endpoint had pending transaction"));
        let pending = state.endpoint(3).unwrap().transaction.pending.clone().unwrap();
        assert_eq!(pending.id, "2");
        assert_eq!(state.pending_transactions(), 1);
    }

    #[test]
    fn test_response_is_forwarded() {
        let (mut state, mut out) = gateway();
        assign(&mut state, &mut out, CallId(1), 3);
        state.policy(3, TransactionKind::Create, "100", "CRCX 100 3@mgw MGCP 1.0\r\n", &mut out);

        let response = b"200 100 OK\r\nI: 77\r\n\r\nc=IN IP4 172.16.0.9\r\nm=audio 2000 RTP/AVP 98\r\n";
        let outcome = state.forward_response(BSC, response, &mut out).unwrap();
        assert_eq!(outcome, ResponseOutcome::Forwarded { endpoint: 3, ci: 77 });
        assert_eq!(state.pending_transactions(), 0);
        assert_eq!(state.endpoint(3).unwrap().media.ci, Some(77));

        let queued = out.drain_call_agent();
        assert_eq!(queued.len(), 1);
        assert_eq!(
            &queued[0][..],
            b"200 100 OK\r\nI: 77\r\n\r\nc=IN IP4 10.0.0.23\r\nm=audio 16006 RTP/AVP 98\r\na=fmtp:98 mode-set=2\r\n"
        );
    }

    #[test]
    fn test_response_from_wrong_link_is_dropped() {
        let (mut state, mut out) = gateway();
        state.attach_link(LinkId(2), Some(LinkConfig { max_endpoints: 32 }));
        assign(&mut state, &mut out, CallId(1), 3);
        state.policy(3, TransactionKind::Create, "100", "CRCX 100 3@mgw MGCP 1.0\r\n", &mut out);

        let response = b"200 100 OK\r\nI: 77\r\n";
        assert!(matches!(
            state.forward_response(LinkId(2), response, &mut out),
            Err(NatError::UnknownTransaction { link: 2, .. })
        ));
        assert_eq!(state.pending_transactions(), 1);
        assert_eq!(out.pending_call_agent(), 0);
    }

    #[test]
    fn test_response_limits() {
        let (mut state, mut out) = gateway();
        let long = vec![b'a'; MAX_RESPONSE_LENGTH + 1];
        assert!(matches!(
            state.forward_response(BSC, &long, &mut out),
            Err(NatError::BufferExceeded { .. })
        ));
        assert!(matches!(
            state.forward_response(BSC, b"garbage\r\n", &mut out),
            Err(NatError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn test_failed_create_sends_dlcx() {
        let (mut state, mut out) = gateway();
        let gateway_endpoint = assign(&mut state, &mut out, CallId(1), 3);
        state.policy(3, TransactionKind::Create, "100", "CRCX 100 3@mgw MGCP 1.0\r\n", &mut out);
        out.drain_link(BSC);

        let outcome = state.forward_response(BSC, b"510 100 FAIL\r\n", &mut out).unwrap();
        assert_eq!(outcome, ResponseOutcome::ConnectionFailed { endpoint: 3 });
        assert_eq!(
            out.drain_link(BSC),
            vec![Bytes::from(build_dlcx_probe(gateway_endpoint))]
        );
        assert_eq!(state.call(CallId(1)).unwrap().gateway_endpoint, None);
        assert!(!state.link(BSC).unwrap().is_claimed(gateway_endpoint));
        assert_eq!(state.endpoint(3).unwrap().transaction, Default::default());
        assert_eq!(out.pending_call_agent(), 0);
    }

    #[test]
    fn test_failed_modify_releases_without_dlcx() {
        let (mut state, mut out) = gateway();
        let gateway_endpoint = assign(&mut state, &mut out, CallId(1), 3);
        state.policy(3, TransactionKind::Modify, "5", "MDCX 5 3@mgw MGCP 1.0\r\n", &mut out);
        out.drain_link(BSC);

        let outcome = state.forward_response(BSC, b"200 5 OK\r\n", &mut out).unwrap();
        assert_eq!(outcome, ResponseOutcome::ConnectionFailed { endpoint: 3 });
        assert!(out.drain_link(BSC).is_empty());
        assert!(!state.link(BSC).unwrap().is_claimed(gateway_endpoint));
    }

    #[test]
    fn test_close_call() {
        let (mut state, mut out) = gateway();
        let gateway_endpoint = assign(&mut state, &mut out, CallId(1), 3);
        state.close_call(CallId(1), &mut out);
        assert!(state.call(CallId(1)).is_none());
        assert!(!state.link(BSC).unwrap().is_claimed(gateway_endpoint));
        assert_eq!(out.drain_link(BSC).len(), 1);
    }

    #[test]
    fn test_reset_endpoints() {
        let (mut state, mut out) = gateway();
        assign(&mut state, &mut out, CallId(1), 3);
        state.policy(3, TransactionKind::Create, "100", "CRCX 100 3@mgw MGCP 1.0\r\n", &mut out);
        assert_eq!(state.pending_transactions(), 1);

        state.reset_endpoints();
        assert_eq!(state.pending_transactions(), 0);
        assert_eq!(state.endpoint(3).unwrap().media.bts_addr, None);
    }
}
