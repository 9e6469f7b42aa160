//! Layer 0: primitive value types shared by the whole crate.

mod host;
mod optime;
mod state;
mod time;

pub use host::{HostAndPort, HostParseError};
pub use optime::OpTime;
pub use state::MemberState;
pub use time::{ElectionRound, Instant, Millis};
