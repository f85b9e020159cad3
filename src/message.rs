use std::{fmt, str::FromStr};

use derive_more::From;
use serde::{Deserialize, Serialize};

pub type ProcessId = u8;
pub type ViewNum = u32;
pub type OpNum = u32;

pub const CLIENT: ProcessId = 0;
/// Fixed primary of view 0.
pub const PRIMARY: ProcessId = 1;
pub const INITIAL_VIEW: ViewNum = 0;

/// Operation of the replicated counter.
///
/// Carried on the wire as its integer code so that a peer sending a code this
/// build does not know still decodes; such operations execute as no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Operation {
    Add,
    Sub,
    Unknown(i32),
}

impl Operation {
    pub const ADD_CODE: i32 = 1;
    pub const SUB_CODE: i32 = 2;

    pub fn code(self) -> i32 {
        match self {
            Self::Add => Self::ADD_CODE,
            Self::Sub => Self::SUB_CODE,
            Self::Unknown(code) => code,
        }
    }

    /// The other known operation. Unknown codes stay as they are.
    pub fn opposite(self) -> Self {
        match self {
            Self::Add => Self::Sub,
            Self::Sub => Self::Add,
            other => other,
        }
    }
}

impl From<i32> for Operation {
    fn from(code: i32) -> Self {
        match code {
            Self::ADD_CODE => Self::Add,
            Self::SUB_CODE => Self::Sub,
            code => Self::Unknown(code),
        }
    }
}

impl From<Operation> for i32 {
    fn from(op: Operation) -> Self {
        op.code()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "ADD"),
            Self::Sub => write!(f, "SUB"),
            Self::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

impl FromStr for Operation {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &*s.to_ascii_lowercase() {
            "add" => Ok(Self::Add),
            "sub" => Ok(Self::Sub),
            other => match other.parse::<i32>() {
                Ok(code) => Ok(code.into()),
                Err(_) => crate::bail!("unknown operation {s:?}"),
            },
        }
    }
}

/// Two requests are the same request iff both fields are equal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub timestamp: f64,
    pub op: Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrePrepare {
    pub view_num: ViewNum,
    pub op_num: OpNum,
    pub op: Operation,
    pub sender: ProcessId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prepare {
    pub view_num: ViewNum,
    pub op_num: OpNum,
    pub op: Operation,
    pub sender: ProcessId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commit {
    pub view_num: ViewNum,
    pub op_num: OpNum,
    pub op: Operation,
    pub sender: ProcessId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub view_num: ViewNum,
    pub replica_id: ProcessId,
    pub timestamp: f64,
    pub result: i64,
}

impl Reply {
    /// Never a legitimate service state; a reply carrying it is rejected.
    pub const RESERVED_RESULT: i64 = i64::MIN;
}

/// Message type tag, the first half of a transport address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    Request,
    PrePrepare,
    Prepare,
    Commit,
    Reply,
}

#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    PrePrepare(PrePrepare),
    Prepare(Prepare),
    Commit(Commit),
    Reply(Reply),
}

impl Message {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Request(_) => Kind::Request,
            Self::PrePrepare(_) => Kind::PrePrepare,
            Self::Prepare(_) => Kind::Prepare,
            Self::Commit(_) => Kind::Commit,
            Self::Reply(_) => Kind::Reply,
        }
    }

    /// Declared sender and proposal of a Prepare or Commit.
    pub fn vote(&self) -> Option<(ProcessId, Proposal)> {
        match *self {
            Self::Prepare(Prepare {
                view_num,
                op_num,
                op,
                sender,
            })
            | Self::Commit(Commit {
                view_num,
                op_num,
                op,
                sender,
            }) => Some((
                sender,
                Proposal {
                    view_num,
                    op_num,
                    op,
                },
            )),
            _ => None,
        }
    }
}

/// The `(view, sequence number, operation)` triple every phase agrees on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Proposal {
    pub view_num: ViewNum,
    pub op_num: OpNum,
    pub op: Operation,
}

impl Proposal {
    pub fn pre_prepare(&self, sender: ProcessId) -> PrePrepare {
        PrePrepare {
            view_num: self.view_num,
            op_num: self.op_num,
            op: self.op,
            sender,
        }
    }

    pub fn prepare(&self, sender: ProcessId) -> Prepare {
        Prepare {
            view_num: self.view_num,
            op_num: self.op_num,
            op: self.op,
            sender,
        }
    }

    pub fn commit(&self, sender: ProcessId) -> Commit {
        Commit {
            view_num: self.view_num,
            op_num: self.op_num,
            op: self.op,
            sender,
        }
    }
}
