//! Shared harness for driving a coordinator through scripted timelines.
#![allow(dead_code)]

use serde_json::Value;

use replset_topo::{
    HeartbeatResponse, HeartbeatResponseAction, HostAndPort, Instant, MemberState, Millis, OpTime,
    ReplicaSetConfig, StatusError, TopologyCoordinator,
};

/// Drives a [`TopologyCoordinator`] with a scripted clock that advances by
/// one millisecond per observation, the way the reference timelines do.
pub struct Harness {
    pub topo: TopologyCoordinator,
    now_ms: u64,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            topo: TopologyCoordinator::new(Millis::from_secs(100)),
            now_ms: 0,
        }
    }

    /// Current instant; advances the scripted clock by 1 ms.
    pub fn now(&mut self) -> Instant {
        let now = Instant::from_millis(self.now_ms);
        self.now_ms += 1;
        now
    }

    pub fn set_now(&mut self, now_ms: u64) {
        assert!(now_ms >= self.now_ms, "scripted clock may not go backward");
        self.now_ms = now_ms;
    }

    pub fn update_config(&mut self, doc: Value, self_index: Option<usize>) {
        let config = ReplicaSetConfig::from_doc(&doc).expect("valid test config");
        let now = self.now();
        self.topo.update_config(config, self_index, now, OpTime::ZERO);
    }

    pub fn set_self_state(&mut self, state: MemberState) {
        self.topo.set_member_state_for_test(state);
    }

    pub fn make_self_primary(&mut self, election_time: OpTime) {
        self.topo.set_member_state_for_test(MemberState::Primary);
        let self_index = self.topo.self_index();
        self.topo.set_current_primary_for_test(self_index);
        self.topo.set_election_time_for_test(election_time);
    }

    fn exchange(
        &mut self,
        host: &HostAndPort,
        set_name: &str,
        rtt: Millis,
        response: Result<HeartbeatResponse, StatusError>,
        receiver_optime: OpTime,
    ) -> HeartbeatResponseAction {
        let now = self.now();
        self.topo.prepare_heartbeat_request(now, set_name, host);
        let now = self.now();
        let action = self
            .topo
            .process_heartbeat_response(now, rtt, host, response, receiver_optime);
        // The next attempt is never scheduled in the past.
        assert!(
            action.next_heartbeat_start >= now,
            "next heartbeat scheduled before now"
        );
        action
    }

    pub fn heartbeat_from_member(
        &mut self,
        host: &str,
        set_name: &str,
        state: MemberState,
        optime: OpTime,
        rtt: Millis,
    ) -> HeartbeatResponseAction {
        let host: HostAndPort = host.parse().unwrap();
        let response = HeartbeatResponse {
            set_name: Some(set_name.to_string()),
            state: Some(state),
            optime: Some(optime),
            config_version: 1,
            ..HeartbeatResponse::default()
        };
        self.exchange(&host, set_name, rtt, Ok(response), OpTime::ZERO)
    }

    pub fn up_heartbeat(
        &mut self,
        host: &str,
        set_name: &str,
        state: MemberState,
        election_time: OpTime,
        sender_optime: OpTime,
        receiver_optime: OpTime,
    ) -> HeartbeatResponseAction {
        let host: HostAndPort = host.parse().unwrap();
        let response = HeartbeatResponse {
            set_name: Some(set_name.to_string()),
            state: Some(state),
            election_time: Some(election_time),
            optime: Some(sender_optime),
            config_version: 1,
            ..HeartbeatResponse::default()
        };
        self.exchange(&host, set_name, Millis::ZERO, Ok(response), receiver_optime)
    }

    pub fn down_member(&mut self, host: &str, set_name: &str) -> HeartbeatResponseAction {
        let host: HostAndPort = host.parse().unwrap();
        self.exchange(
            &host,
            set_name,
            Millis::ZERO,
            Err(StatusError::host_unreachable("")),
            OpTime::ZERO,
        )
    }

    pub fn choose(&mut self, last_applied: OpTime) -> Option<String> {
        let now = self.now();
        self.topo
            .choose_new_sync_source(now, last_applied)
            .map(|host| host.to_string())
    }

    pub fn sync_source(&self) -> Option<String> {
        self.topo.sync_source_address().map(|host| host.to_string())
    }
}

pub fn host(name: &str) -> HostAndPort {
    name.parse().unwrap()
}
