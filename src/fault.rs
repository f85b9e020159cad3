//! Byzantine behaviors a replica can be told to exhibit.

use std::{fmt, str::FromStr};

use crate::message::{Operation, ProcessId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Reply with `result` instead of the service state.
    CorruptReply { result: i64 },
    /// Reply with a timestamp that belongs to no request.
    StaleReply,
    /// Never send the Prepare.
    SilentPrepare,
    /// Declare `claimed` as sender of PrePrepare, Prepare and Commit.
    ForgeSender { claimed: ProcessId },
    /// Prepare and Commit for the opposite operation.
    ConflictingVotes,
    /// As primary, PrePrepare the opposite of the requested operation.
    ConflictingPrePrepare,
}

impl Fault {
    pub fn sends_prepare(&self) -> bool {
        !matches!(self, Self::SilentPrepare)
    }

    pub fn declared_sender(&self, id: ProcessId) -> ProcessId {
        match self {
            Self::ForgeSender { claimed } => *claimed,
            _ => id,
        }
    }

    pub fn vote_op(&self, op: Operation) -> Operation {
        match self {
            Self::ConflictingVotes => op.opposite(),
            _ => op,
        }
    }

    pub fn pre_prepare_op(&self, op: Operation) -> Operation {
        match self {
            Self::ConflictingPrePrepare => op.opposite(),
            _ => op,
        }
    }

    pub fn reply_result(&self, state: i64) -> i64 {
        match self {
            Self::CorruptReply { result } => *result,
            _ => state,
        }
    }

    pub fn reply_timestamp(&self, timestamp: f64) -> f64 {
        match self {
            Self::StaleReply => timestamp - 1.,
            _ => timestamp,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptReply { result } => write!(f, "corrupt-reply:{result}"),
            Self::StaleReply => write!(f, "stale-reply"),
            Self::SilentPrepare => write!(f, "silent-prepare"),
            Self::ForgeSender { claimed } => write!(f, "forge-sender:{claimed}"),
            Self::ConflictingVotes => write!(f, "conflicting-votes"),
            Self::ConflictingPrePrepare => write!(f, "conflicting-pre-prepare"),
        }
    }
}

/// `KIND[:ARG]`, the same form `Display` writes.
impl FromStr for Fault {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s, None),
        };
        let fault = match (kind, arg) {
            ("corrupt-reply", Some(result)) => Self::CorruptReply {
                result: result.parse()?,
            },
            ("forge-sender", Some(claimed)) => Self::ForgeSender {
                claimed: claimed.parse()?,
            },
            ("stale-reply", None) => Self::StaleReply,
            ("silent-prepare", None) => Self::SilentPrepare,
            ("conflicting-votes", None) => Self::ConflictingVotes,
            ("conflicting-pre-prepare", None) => Self::ConflictingPrePrepare,
            _ => crate::bail!("unrecognized fault {s:?}"),
        };
        Ok(fault)
    }
}
