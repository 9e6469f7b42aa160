//! Directives handed back to the replication runtime.

use crate::config::ReplicaSetConfig;
use crate::core::Instant;

/// What the runtime should do after a heartbeat response was folded in.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionKind {
    NoAction,
    /// A peer advertised a newer configuration; install it.
    Reconfig(ReplicaSetConfig),
    /// No primary is visible and this node is electable.
    StartElection,
    /// Another primary with a more recent election was seen; the carried
    /// index is this node's own config index.
    StepDownSelf { index: usize },
    /// A remote primary with an older election was seen; the carried index
    /// is the remote's config index.
    StepDownRemotePrimary { index: usize },
}

/// An [`ActionKind`] plus the instant at which the next heartbeat attempt
/// toward the same target should start.
#[derive(Clone, Debug, PartialEq)]
pub struct HeartbeatResponseAction {
    pub kind: ActionKind,
    pub next_heartbeat_start: Instant,
}

impl HeartbeatResponseAction {
    pub fn no_action() -> Self {
        Self {
            kind: ActionKind::NoAction,
            next_heartbeat_start: Instant::ZERO,
        }
    }

    pub fn reconfig(config: ReplicaSetConfig) -> Self {
        Self {
            kind: ActionKind::Reconfig(config),
            next_heartbeat_start: Instant::ZERO,
        }
    }

    pub fn start_election() -> Self {
        Self {
            kind: ActionKind::StartElection,
            next_heartbeat_start: Instant::ZERO,
        }
    }

    pub fn step_down_self(index: usize) -> Self {
        Self {
            kind: ActionKind::StepDownSelf { index },
            next_heartbeat_start: Instant::ZERO,
        }
    }

    pub fn step_down_remote_primary(index: usize) -> Self {
        Self {
            kind: ActionKind::StepDownRemotePrimary { index },
            next_heartbeat_start: Instant::ZERO,
        }
    }

    pub fn at(mut self, next_heartbeat_start: Instant) -> Self {
        self.next_heartbeat_start = next_heartbeat_start;
        self
    }
}
