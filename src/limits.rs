//! Buffer limits and protocol constants
//!
//! These limits bound every message the gateway copies or rewrites.

/// Capacity of a rewrite output buffer
pub const REWRITE_BUFFER_SIZE: usize = 4096;

/// Bytes kept free in a rewrite buffer for framing and line growth
pub const REWRITE_HEADROOM: usize = 256;

/// Largest base-station response that is parsed at all
pub const MAX_RESPONSE_LENGTH: usize = 2000;

/// Size of the buffer holding one call-agent message for the policy step
pub const CALL_AGENT_BUFFER_SIZE: usize = 4096;

/// Longest transaction token kept from a response line
pub const MAX_TRANSACTION_LENGTH: usize = 59;

/// Longest transaction token copied from a command line
pub const MAX_COMMAND_TOKEN_LENGTH: usize = 39;

/// Timeslots addressed per multiplex
pub const TIMESLOTS_PER_MULTIPLEX: u32 = 32;

/// Reserved all-ones timeslot pattern
pub const RESERVED_TIMESLOT: u32 = 0x1f;

/// Connection identifier value meaning "no connection"
pub const CI_UNUSED: u32 = 0xFFFF_FFFF;

/// Default depth of the direct call-agent send queue
pub const DEFAULT_SEND_QUEUE_DEPTH: usize = 10;
