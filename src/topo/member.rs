//! Observed heartbeat state per configured member.

use crate::core::{HostAndPort, Instant, MemberState, OpTime};

use super::proto::HeartbeatResponse;

/// Reachability of a member as last observed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemberHealth {
    #[default]
    Unknown,
    Down,
    Up,
}

impl MemberHealth {
    /// The numeric rendering used by the status document.
    pub fn as_f64(self) -> f64 {
        match self {
            MemberHealth::Unknown => -1.0,
            MemberHealth::Down => 0.0,
            MemberHealth::Up => 1.0,
        }
    }
}

/// Mutable per-member record fed by heartbeat outcomes.
///
/// One entry exists per configured member, including self; self's entry is
/// never updated by heartbeats and stays at its defaults.
#[derive(Clone, Debug, Default)]
pub struct MemberHeartbeatData {
    health: MemberHealth,
    last_state: MemberState,
    optime: OpTime,
    election_time: OpTime,
    last_heartbeat: Instant,
    last_heartbeat_recv: Instant,
    up_since: Instant,
    down_since: Instant,
    last_message: String,
    syncing_to: Option<HostAndPort>,
    authoritative: bool,
}

impl MemberHeartbeatData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a successful heartbeat response into the record.
    pub fn set_up_values(&mut self, now: Instant, response: &HeartbeatResponse) {
        if self.health != MemberHealth::Up {
            self.up_since = now;
        }
        self.health = MemberHealth::Up;
        self.last_heartbeat = now;
        self.last_state = response.state.unwrap_or(MemberState::Unknown);
        if let Some(election_time) = response.election_time {
            self.election_time = election_time;
        }
        if let Some(optime) = response.optime {
            self.optime = optime;
        }
        self.last_message = response.hbmsg.clone();
        self.syncing_to = response.syncing_to.clone();
        self.authoritative = true;
    }

    /// Fold a failed heartbeat response into the record.
    pub fn set_down_values(&mut self, now: Instant, reason: impl Into<String>) {
        if self.health != MemberHealth::Down {
            self.down_since = now;
        }
        self.health = MemberHealth::Down;
        self.last_heartbeat = now;
        self.last_state = MemberState::Down;
        self.last_message = reason.into();
        self.syncing_to = None;
        self.authoritative = true;
    }

    /// Record that the member contacted us (inbound heartbeat).
    pub fn note_contact(&mut self, now: Instant) {
        self.last_heartbeat_recv = now;
    }

    pub fn up(&self) -> bool {
        self.health == MemberHealth::Up
    }

    pub fn health(&self) -> MemberHealth {
        self.health
    }

    pub fn last_state(&self) -> MemberState {
        self.last_state
    }

    pub fn optime(&self) -> OpTime {
        self.optime
    }

    pub fn election_time(&self) -> OpTime {
        self.election_time
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    pub fn last_heartbeat_recv(&self) -> Instant {
        self.last_heartbeat_recv
    }

    pub fn up_since(&self) -> Instant {
        self.up_since
    }

    pub fn down_since(&self) -> Instant {
        self.down_since
    }

    pub fn last_message(&self) -> &str {
        &self.last_message
    }

    pub fn syncing_to(&self) -> Option<&HostAndPort> {
        self.syncing_to.as_ref()
    }

    /// Whether the record reflects a response from the member itself rather
    /// than initial defaults.
    pub fn authoritative(&self) -> bool {
        self.authoritative
    }
}
