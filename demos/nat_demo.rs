use bytes::Bytes;
use mgcp_nat::cic::endpoint_to_circuit_code;
use mgcp_nat::parsing::parse_endpoint_name;
use mgcp_nat::*;
use std::net::Ipv4Addr;

/// Tiny MGCP engine answering everything the gateway does not defer
struct DemoProtocol;

impl MgcpProtocol for DemoProtocol {
    fn handle_message(&mut self, message: &str, policy: &mut dyn PolicyHandler) -> Option<Bytes> {
        let mut words = message.lines().next()?.split_whitespace();
        let verb = words.next()?;
        let transaction = words.next()?;
        let endpoint = words.next().and_then(parse_endpoint_name)?;

        let kind = match verb {
            "CRCX" => TransactionKind::Create,
            "MDCX" => TransactionKind::Modify,
            "DLCX" => TransactionKind::Delete,
            _ => return Some(Bytes::from(format!("200 {} OK\r\n", transaction))),
        };

        match policy.decide(endpoint, kind, transaction) {
            PolicyDecision::Continue => Some(Bytes::from(format!("250 {} OK\r\n", transaction))),
            PolicyDecision::Reject => Some(Bytes::from(format!("400 {} FAIL\r\n", transaction))),
            PolicyDecision::Defer => None,
        }
    }
}

fn show(label: &str, messages: Vec<Bytes>) {
    for message in messages {
        println!("   {} ->\n{}", label, String::from_utf8_lossy(&message).replace("\r\n", "\n      "));
    }
}

fn main() -> Result<(), NatError> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    println!("🚀 MGCP NAT Demo");

    let config = NatConfig {
        source_addr: Ipv4Addr::new(10, 0, 0, 23),
        call_agent_addr: Some(Ipv4Addr::new(10, 0, 0, 1)),
        number_endpoints: 64,
        ..NatConfig::default()
    };
    let mut state = GatewayState::new(config)?;
    let mut out = BufferedOutbound::new(10);
    let mut protocol = DemoProtocol;
    let bsc = LinkId(1);

    state.attach_link(bsc, Some(LinkConfig { max_endpoints: 32 }));
    out.set_peer(bsc, Ipv4Addr::new(172, 16, 0, 9));

    println!("\n1️⃣ Assignment for MSC endpoint 0x3:");
    state.open_call(CallId(0x1001), bsc)?;
    let mut cic = endpoint_to_circuit_code(3).to_be_bytes();
    let endpoint = state.assign_patch(CallId(0x1001), &mut cic, &mut out)?;
    println!("   claimed BSC endpoint {:#x}, patched CIC {:02x?}", endpoint, cic);

    println!("\n2️⃣ CRCX from the call agent:");
    let crcx = "CRCX 1234 3@mgw MGCP 1.0\r\nM: recvonly\r\n\r\nc=IN IP4 10.0.0.1\r\nm=audio 4000 RTP/AVP 98\r\n";
    state.handle_call_agent_message(crcx.as_bytes(), &mut protocol, &mut out)?;
    show(&bsc.to_string(), out.drain_link(bsc));

    println!("\n3️⃣ Response of the BSC:");
    let response = "200 1234 OK\r\nI: 42\r\n\r\nc=IN IP4 172.16.0.9\r\nm=audio 5000 RTP/AVP 98\r\n";
    let outcome = state.forward_response(bsc, response.as_bytes(), &mut out)?;
    println!("   {:?}", outcome);
    show("call agent", out.drain_call_agent());

    println!("\n4️⃣ BSC goes away:");
    let dropped = state.detach_link(bsc);
    println!("   dropped {} call(s), {} in total for {}", dropped, state.dropped_calls(bsc), bsc);

    Ok(())
}
