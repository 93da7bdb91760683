//! MGCP and SDP rewriting between the call agent and the base stations
//!
//! Messages are patched line by line instead of being parsed into a full
//! model: command lines get the endpoint of the other side, `c=` and
//! `m=audio` lines get the gateway's address and port. Every line keeps its own
//! terminator. A missing `a=fmtp` line for the audio payload is appended using
//! the terminator of the last scanned line.

use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::Bytes;
use tracing::error;

use crate::config::RewriteLimits;
use crate::error::{NatError, NatResult};
use crate::limits::MAX_COMMAND_TOKEN_LENGTH;
use crate::malformed;
use crate::parsing::parse_endpoint_name;
use crate::types::Verb;

const CONNECTION_PREFIX: &str = "c=IN IP4 ";
const AUDIO_PREFIX: &str = "m=audio ";
const FMTP_PREFIX: &str = "a=fmtp:";

/// Output of a rewrite, bounded by the configured buffer size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteBuffer {
    text: String,
    capacity: usize,
}

impl RewriteBuffer {
    /// Reserve a buffer of `capacity` bytes up front
    pub fn with_capacity(capacity: usize) -> NatResult<Self> {
        let mut text = String::new();
        text.try_reserve_exact(capacity).map_err(|_| {
            error!(capacity, "failed to allocate rewrite buffer");
            NatError::AllocationFailed { size: capacity }
        })?;
        Ok(Self { text, capacity })
    }

    fn push(&mut self, piece: &str) -> NatResult<()> {
        if self.text.len() + piece.len() > self.capacity {
            return Err(NatError::buffer_exceeded(
                self.text.len() + piece.len(),
                self.capacity,
            ));
        }
        self.text.push_str(piece);
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Hand the rewritten message over to a send queue
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.text.into_bytes())
    }
}

/// Where a rewritten message should point to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteTarget {
    /// Endpoint for command lines; `None` leaves command lines untouched
    pub endpoint: Option<u32>,
    pub address: Ipv4Addr,
    pub port: u16,
}

/// Classified line of an MGCP message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind<'a> {
    Command(Verb),
    Connection,
    Audio(&'a str),
    Fmtp,
    Other,
}

impl<'a> LineKind<'a> {
    fn classify(line: &'a str) -> Self {
        if let Some(verb) = command_verb(line) {
            LineKind::Command(verb)
        } else if line.starts_with(CONNECTION_PREFIX) {
            LineKind::Connection
        } else if let Some(rest) = line.strip_prefix(AUDIO_PREFIX) {
            LineKind::Audio(rest)
        } else if line.starts_with(FMTP_PREFIX) {
            LineKind::Fmtp
        } else {
            LineKind::Other
        }
    }
}

fn command_verb(line: &str) -> Option<Verb> {
    let (word, _) = line.split_once(' ')?;
    Verb::from_str(word)
        .ok()
        .filter(|verb| verb.is_connection_command())
}

fn terminator(cr: bool) -> &'static str {
    if cr {
        "\r\n"
    } else {
        "\n"
    }
}

/// Rewrite a message for the other side of the gateway.
///
/// Only `\n` terminated lines are processed; a trailing fragment without a
/// newline is not part of the output. Any unparseable command or audio line
/// fails the whole rewrite.
pub fn rewrite_message(
    input: &str,
    target: &RewriteTarget,
    limits: &RewriteLimits,
) -> NatResult<RewriteBuffer> {
    if input.len() > limits.max_input() {
        error!(length = input.len(), limit = limits.max_input(), "input is too long");
        return Err(NatError::buffer_exceeded(input.len(), limits.max_input()));
    }

    let mut output = RewriteBuffer::with_capacity(limits.buffer_size)?;

    // keep state to add the a=fmtp line
    let mut found_fmtp = false;
    let mut payload: Option<i32> = None;
    let mut cr = true;

    for chunk in input.split_inclusive('\n') {
        let Some(line) = chunk.strip_suffix('\n') else {
            break;
        };
        cr = line.ends_with('\r');
        let content = line.strip_suffix('\r').unwrap_or(line);

        match LineKind::classify(content) {
            LineKind::Command(verb) => match target.endpoint {
                Some(endpoint) => {
                    let patched = patch_command(verb, content, endpoint, cr)?;
                    output.push(&patched)?;
                }
                None => {
                    output.push(line)?;
                    output.push("\n")?;
                }
            },
            LineKind::Connection => {
                output.push(CONNECTION_PREFIX)?;
                output.push(&target.address.to_string())?;
                output.push(terminator(cr))?;
            }
            LineKind::Audio(rest) => {
                let pt = parse_audio_payload(rest)?;
                payload = Some(pt);
                output.push(&format!(
                    "m=audio {} RTP/AVP {}{}",
                    target.port,
                    pt,
                    terminator(cr)
                ))?;
            }
            LineKind::Fmtp => {
                found_fmtp = true;
                output.push(line)?;
                output.push("\n")?;
            }
            LineKind::Other => {
                output.push(line)?;
                output.push("\n")?;
            }
        }
    }

    if let (false, Some(pt)) = (found_fmtp, payload) {
        output.push(&format!("a=fmtp:{} mode-set=2{}", pt, terminator(cr)))?;
    }

    Ok(output)
}

/// Build a command line addressed to `endpoint`, keeping verb and transaction
fn patch_command(verb: Verb, line: &str, endpoint: u32, cr: bool) -> NatResult<String> {
    let mut words = line.split_whitespace().skip(1);
    let Some(transaction) = words.next() else {
        malformed!("no transaction in command", line);
    };
    let endpoint_token = words.next().unwrap_or_default();
    if parse_endpoint_name(endpoint_token).is_none() {
        malformed!("failed to find endpoint in command", line);
    }

    let transaction: String = transaction.chars().take(MAX_COMMAND_TOKEN_LENGTH).collect();
    Ok(format!(
        "{} {} {:x}@mgw MGCP 1.0{}",
        verb,
        transaction,
        endpoint,
        terminator(cr)
    ))
}

/// Payload type of `<port> RTP/AVP <payload> ...`
fn parse_audio_payload(rest: &str) -> NatResult<i32> {
    let mut words = rest.split_whitespace();
    let port_ok = words.next().is_some_and(|port| port.parse::<i32>().is_ok());
    let profile_ok = words.next() == Some("RTP/AVP");
    let payload = words.next().and_then(|pt| pt.parse::<i32>().ok());

    match (port_ok, profile_ok, payload) {
        (true, true, Some(pt)) => Ok(pt),
        _ => Err(NatError::malformed(
            "could not parse audio line",
            Some(&format!("{}{}", AUDIO_PREFIX, rest)),
        )),
    }
}

/// `MDCX` without reply, asking the base station to emit a dummy packet
pub fn build_mdcx_probe(endpoint: u32, address: Ipv4Addr, port: u16) -> String {
    format!(
        "MDCX 23 {:x}@mgw MGCP 1.0\r\n\
         Z: noanswer\r\n\
         \r\n\
         c=IN IP4 {}\r\n\
         m=audio {} RTP/AVP 255\r\n",
        endpoint, address, port
    )
}

/// `DLCX` without reply, freeing an endpoint on the base station
pub fn build_dlcx_probe(endpoint: u32) -> String {
    format!("DLCX 26 {:x}@mgw MGCP 1.0\r\nZ: noanswer\r\n", endpoint)
}
