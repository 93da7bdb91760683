//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::net::Ipv4Addr;

use bytes::Bytes;
use mgcp_nat::cic::endpoint_to_circuit_code;
use mgcp_nat::parsing::parse_endpoint_name;
use mgcp_nat::*;

pub const SOURCE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 23);
pub const CALL_AGENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

pub fn config(number_endpoints: u32) -> NatConfig {
    NatConfig {
        source_addr: SOURCE,
        call_agent_addr: Some(CALL_AGENT),
        number_endpoints,
        ..NatConfig::default()
    }
}

/// Gateway with the given links attached and configured
pub fn gateway(number_endpoints: u32, links: &[(LinkId, u32)]) -> (GatewayState, BufferedOutbound) {
    let mut state = GatewayState::new(config(number_endpoints)).unwrap();
    let mut out = BufferedOutbound::new(10);
    for (link, max_endpoints) in links {
        state.attach_link(*link, Some(LinkConfig { max_endpoints: *max_endpoints }));
        out.set_peer(*link, Ipv4Addr::new(172, 16, 0, link.0 as u8));
    }
    (state, out)
}

/// Open a call on `link` and run its assignment for `msc_endpoint`
pub fn assign(
    state: &mut GatewayState,
    out: &mut BufferedOutbound,
    call: CallId,
    link: LinkId,
    msc_endpoint: u32,
) -> NatResult<u32> {
    state.open_call(call, link)?;
    let mut cic = endpoint_to_circuit_code(msc_endpoint).to_be_bytes();
    state.assign_patch(call, &mut cic, out)
}

pub fn text(message: &Bytes) -> &str {
    std::str::from_utf8(message).unwrap()
}

/// Minimal MGCP engine: consults the policy for connection commands and
/// answers everything it does not defer.
#[derive(Debug, Default)]
pub struct ScriptedProtocol {
    pub decisions: Vec<(u32, TransactionKind, PolicyDecision)>,
}

impl MgcpProtocol for ScriptedProtocol {
    fn handle_message(&mut self, message: &str, policy: &mut dyn PolicyHandler) -> Option<Bytes> {
        let line = message.lines().next()?;
        let mut words = line.split_whitespace();
        let verb = words.next()?;
        let transaction = words.next()?;
        let endpoint = words.next().and_then(parse_endpoint_name)?;

        let kind = match verb {
            "CRCX" => TransactionKind::Create,
            "MDCX" => TransactionKind::Modify,
            "DLCX" => TransactionKind::Delete,
            _ => return Some(Bytes::from(format!("200 {} OK\r\n", transaction))),
        };

        let decision = policy.decide(endpoint, kind, transaction);
        self.decisions.push((endpoint, kind, decision));
        match decision {
            PolicyDecision::Continue => Some(Bytes::from(format!("250 {} OK\r\n", transaction))),
            PolicyDecision::Reject => Some(Bytes::from(format!("400 {} FAIL\r\n", transaction))),
            PolicyDecision::Defer => None,
        }
    }
}
