//! The topology coordinator state machine and its supporting records.

mod action;
mod coordinator;
mod member;
mod ping;
mod proto;

pub use action::{ActionKind, HeartbeatResponseAction};
pub use coordinator::{HEARTBEAT_INTERVAL, MAX_SYNC_SOURCE_LAG, TopologyCoordinator, VOTE_LEASE};
pub use member::{MemberHealth, MemberHeartbeatData};
pub use ping::{MAX_HEARTBEAT_RETRIES, PingStats};
pub use proto::{
    CallbackContext, ElectArgs, FreshArgs, HeartbeatArgs, HeartbeatResponse, ResponseDoc,
};
