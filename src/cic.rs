//! Circuit identity code handling
//!
//! Endpoints are numbered like the channels of an E1 trunk: `multiplex * 32 +
//! timeslot`. The same pair travels on the signalling side as a 16-bit
//! circuit identity code.

use crate::limits::{RESERVED_TIMESLOT, TIMESLOTS_PER_MULTIPLEX};

/// Split an endpoint index into `(multiplex, timeslot)`
pub fn endpoint_to_slot(endpoint: u32) -> (u32, u32) {
    (
        endpoint / TIMESLOTS_PER_MULTIPLEX,
        endpoint % TIMESLOTS_PER_MULTIPLEX,
    )
}

/// Join a `(multiplex, timeslot)` pair into an endpoint index
pub fn slot_to_endpoint(multiplex: u32, timeslot: u32) -> u32 {
    multiplex * TIMESLOTS_PER_MULTIPLEX + timeslot
}

/// Encode an endpoint as circuit identity code
pub fn endpoint_to_circuit_code(endpoint: u32) -> u16 {
    let (multiplex, timeslot) = endpoint_to_slot(endpoint);
    ((multiplex << 5) | (timeslot & RESERVED_TIMESLOT)) as u16
}

/// Decode a circuit identity code into `(multiplex, timeslot)`
pub fn circuit_code_to_slot(code: u16) -> (u32, u32) {
    let code = u32::from(code);
    ((code & !RESERVED_TIMESLOT) >> 5, code & RESERVED_TIMESLOT)
}

/// Decode a circuit identity code straight into an endpoint index
pub fn circuit_code_to_endpoint(code: u16) -> u32 {
    let (multiplex, timeslot) = circuit_code_to_slot(code);
    slot_to_endpoint(multiplex, timeslot)
}

/// Whether a timeslot may carry a call (0 and 0x1f never do)
pub fn is_usable_timeslot(timeslot: u32) -> bool {
    timeslot != 0 && timeslot < RESERVED_TIMESLOT
}

/// Number of multiplexes needed to address `max_endpoints` endpoints
pub fn multiplexes_for(max_endpoints: u32) -> u32 {
    max_endpoints.div_ceil(TIMESLOTS_PER_MULTIPLEX)
}
