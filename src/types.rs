//! Common types and enums used throughout the NAT core

use std::fmt;
use strum_macros::{Display, EnumString};

/// MGCP verbs the rewriter knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Verb {
    CRCX,
    MDCX,
    DLCX,
    AUEP,
    RSIP,
}

impl Verb {
    /// Connection commands whose endpoint token is rewritten
    pub fn is_connection_command(self) -> bool {
        matches!(self, Verb::CRCX | Verb::MDCX | Verb::DLCX)
    }
}

/// Kind of a transaction forwarded to a base station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum TransactionKind {
    #[strum(serialize = "create")]
    Create,
    #[strum(serialize = "modify")]
    Modify,
    #[strum(serialize = "delete")]
    Delete,
}

impl From<TransactionKind> for Verb {
    fn from(kind: TransactionKind) -> Self {
        match kind {
            TransactionKind::Create => Verb::CRCX,
            TransactionKind::Modify => Verb::MDCX,
            TransactionKind::Delete => Verb::DLCX,
        }
    }
}

/// Answer of the policy step for a call-agent command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PolicyDecision {
    /// Answer locally right away
    #[strum(serialize = "continue")]
    Continue,
    /// Refuse the command
    #[strum(serialize = "reject")]
    Reject,
    /// The answer follows once the base station responded
    #[strum(serialize = "defer")]
    Defer,
}

/// Identifier of a base-station link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bsc-{}", self.0)
    }
}

/// Identifier of a signalling connection carrying one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u32);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#08x}", self.0)
    }
}
