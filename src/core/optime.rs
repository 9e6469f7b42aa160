//! Oplog position.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A `(secs, counter)` pair identifying a position in the replicated log.
///
/// Ordering is lexicographic; the zero value means "no progress". All
/// freshness comparisons in the coordinator use this order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpTime {
    pub secs: u32,
    pub counter: u32,
}

impl OpTime {
    pub const ZERO: OpTime = OpTime { secs: 0, counter: 0 };

    pub fn new(secs: u32, counter: u32) -> Self {
        Self { secs, counter }
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// Packed 64-bit form preserving total order, used where a response
    /// document carries an op time as a single scalar.
    pub fn as_u64(self) -> u64 {
        (u64::from(self.secs) << 32) | u64::from(self.counter)
    }

    /// Millisecond rendering of the seconds component, used for the
    /// `optimeDate` status field.
    pub fn as_millis(self) -> u64 {
        u64::from(self.secs) * 1000
    }
}

impl PartialOrd for OpTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.counter.cmp(&other.counter))
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.secs, self.counter)
    }
}

impl From<OpTime> for serde_json::Value {
    fn from(optime: OpTime) -> Self {
        serde_json::json!({"secs": optime.secs, "counter": optime.counter})
    }
}
