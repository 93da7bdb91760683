//! Parsing of base-station responses
//!
//! Only the pieces the gateway needs to correlate a response are extracted:
//! the response code, the transaction token and the connection identifier.

use crate::error::{NatError, NatResult};
use crate::limits::{CI_UNUSED, MAX_TRANSACTION_LENGTH};

/// Macro to bail out with a malformed message error
#[macro_export]
macro_rules! malformed {
    ($reason:expr) => {
        return Err($crate::error::NatError::malformed($reason, None))
    };
    ($reason:expr, $line:expr) => {
        return Err($crate::error::NatError::malformed($reason, Some($line)))
    };
}

/// Status line of a response: `<code> <transaction>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    pub transaction: String,
}

/// Parse the response code and transaction token from the first line.
///
/// The code consists of at most three digits, the transaction token is
/// truncated to 59 characters.
pub fn parse_response(message: &str) -> NatResult<ResponseLine> {
    let rest = message.trim_start();
    let digits = rest
        .bytes()
        .take(3)
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        malformed!("response does not start with a code", first_line(message));
    }

    let code = rest[..digits]
        .parse::<u16>()
        .map_err(|_| NatError::malformed("invalid response code", Some(first_line(message))))?;

    let transaction: String = rest[digits..]
        .split_whitespace()
        .next()
        .map(|token| token.chars().take(MAX_TRANSACTION_LENGTH).collect())
        .unwrap_or_default();
    if transaction.is_empty() {
        malformed!("response has no transaction", first_line(message));
    }

    Ok(ResponseLine { code, transaction })
}

/// Find the connection identifier (`I: <decimal>`) of a response.
///
/// Returns `None` when it is missing, unparseable or the unused sentinel.
pub fn extract_connection_id(message: &str) -> Option<u32> {
    let start = message.find("I: ")?;
    let value = message[start + 3..].trim_start();
    let digits = value.bytes().take_while(u8::is_ascii_digit).count();
    let ci = value[..digits].parse::<u32>().ok()?;
    (ci != CI_UNUSED).then_some(ci)
}

/// Hex endpoint number out of an endpoint name like `1f@mgw`
pub fn parse_endpoint_name(name: &str) -> Option<u32> {
    let (number, _domain) = name.split_once('@')?;
    u32::from_str_radix(number, 16).ok()
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}
