#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod topo;

pub use error::{ErrorCode, StatusError};
pub type Result<T> = std::result::Result<T, StatusError>;

// Re-export the working set at crate root for convenience
pub use crate::config::{ConfigError, MemberConfig, ReplSettings, ReplicaSetConfig};
pub use crate::core::{ElectionRound, HostAndPort, Instant, MemberState, Millis, OpTime};
pub use crate::topo::{
    ActionKind, CallbackContext, ElectArgs, FreshArgs, HeartbeatArgs, HeartbeatResponse,
    HeartbeatResponseAction, MemberHealth, MemberHeartbeatData, ResponseDoc, TopologyCoordinator,
};
