//! Replica member states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The externally visible state of a replica set member.
///
/// Discriminants are the on-wire codes; heartbeat responses and the status
/// document carry them numerically.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum MemberState {
    Startup = 0,
    Primary = 1,
    Secondary = 2,
    Recovering = 3,
    Startup2 = 5,
    #[default]
    Unknown = 6,
    Arbiter = 7,
    Down = 8,
    Rollback = 9,
    Removed = 10,
}

impl MemberState {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MemberState::Startup),
            1 => Some(MemberState::Primary),
            2 => Some(MemberState::Secondary),
            3 => Some(MemberState::Recovering),
            5 => Some(MemberState::Startup2),
            6 => Some(MemberState::Unknown),
            7 => Some(MemberState::Arbiter),
            8 => Some(MemberState::Down),
            9 => Some(MemberState::Rollback),
            10 => Some(MemberState::Removed),
            _ => None,
        }
    }

    pub fn primary(self) -> bool {
        self == MemberState::Primary
    }

    pub fn secondary(self) -> bool {
        self == MemberState::Secondary
    }

    /// Whether the member can serve as a replication source.
    pub fn readable(self) -> bool {
        matches!(self, MemberState::Primary | MemberState::Secondary)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MemberState::Startup => "STARTUP",
            MemberState::Primary => "PRIMARY",
            MemberState::Secondary => "SECONDARY",
            MemberState::Recovering => "RECOVERING",
            MemberState::Startup2 => "STARTUP2",
            MemberState::Unknown => "UNKNOWN",
            MemberState::Arbiter => "ARBITER",
            MemberState::Down => "DOWN",
            MemberState::Rollback => "ROLLBACK",
            MemberState::Removed => "REMOVED",
        }
    }
}

impl From<MemberState> for i32 {
    fn from(state: MemberState) -> i32 {
        state.code()
    }
}

impl TryFrom<i32> for MemberState {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        MemberState::from_code(i64::from(code))
            .ok_or_else(|| format!("unknown member state code {code}"))
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
