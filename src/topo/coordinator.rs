//! The topology coordinator state machine.
//!
//! Every public operation takes the current instant from the caller, runs to
//! completion without blocking, and either mutates local state or emits a
//! directive for the surrounding replication runtime. The runtime serializes
//! calls; there is no internal locking and no hidden clock.

use std::cmp;
use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::Result;
use crate::config::ReplicaSetConfig;
use crate::core::{HostAndPort, Instant, MemberState, Millis, OpTime};
use crate::error::StatusError;

use super::action::HeartbeatResponseAction;
use super::member::{MemberHealth, MemberHeartbeatData};
use super::ping::PingStats;
use super::proto::{
    CallbackContext, ElectArgs, FreshArgs, HeartbeatArgs, HeartbeatResponse, ResponseDoc,
};

/// Interval between successful heartbeat rounds.
pub const HEARTBEAT_INTERVAL: Millis = Millis::from_secs(2);

/// How long a yea vote binds this node against voting for another candidate.
pub const VOTE_LEASE: Millis = Millis::from_secs(30);

/// Default staleness cap for sync-source candidates.
pub const MAX_SYNC_SOURCE_LAG: Millis = Millis::from_secs(30);

/// Heartbeat timeout applied before any configuration is installed.
const DEFAULT_HEARTBEAT_TIMEOUT: Millis = Millis::from_secs(5);

/// Lag beyond which a sync-from target draws a warning, and behind the most
/// up-to-date member beyond which a member stops being electable.
const LAG_WARNING_SECS: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UnelectableReason {
    NotInitialized,
    CannotSeeMajority,
    Arbiter,
    ZeroPriority,
    StepDownPeriodActive,
    NoData,
    NotSecondary,
    TooStale,
}

impl fmt::Display for UnelectableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UnelectableReason::NotInitialized => {
                "node is not a member of a valid replica set configuration"
            }
            UnelectableReason::CannotSeeMajority => "I cannot see a majority",
            UnelectableReason::Arbiter => "member is an arbiter",
            UnelectableReason::ZeroPriority => "member has zero priority",
            UnelectableReason::StepDownPeriodActive => {
                "I am still waiting for stepdown period to end"
            }
            UnelectableReason::NoData => "node has no applied oplog entries",
            UnelectableReason::NotSecondary => "member is not currently a secondary",
            UnelectableReason::TooStale => {
                "member is more than 10 seconds behind the most up-to-date member"
            }
        };
        f.write_str(text)
    }
}

#[derive(Clone, Debug)]
struct LastVote {
    when: Instant,
    who_id: i32,
    who_host: HostAndPort,
}

/// Deterministic, time-driven coordinator for a replication group.
#[derive(Debug)]
pub struct TopologyCoordinator {
    config: Option<ReplicaSetConfig>,
    self_index: Option<usize>,
    self_state: MemberState,
    current_primary: Option<usize>,
    election_time: OpTime,
    step_down_until: Instant,
    blacklist: BTreeMap<HostAndPort, Instant>,
    force_sync_source_index: Option<usize>,
    last_vote: Option<LastVote>,
    vote_lease: Millis,
    sync_source: Option<HostAndPort>,
    pings: BTreeMap<HostAndPort, PingStats>,
    hb_data: Vec<MemberHeartbeatData>,
    hb_message: String,
    hb_message_at: Instant,
    max_sync_source_lag: Millis,
}

impl TopologyCoordinator {
    pub fn new(max_sync_source_lag: Millis) -> Self {
        Self {
            config: None,
            self_index: None,
            self_state: MemberState::Startup,
            current_primary: None,
            election_time: OpTime::ZERO,
            step_down_until: Instant::ZERO,
            blacklist: BTreeMap::new(),
            force_sync_source_index: None,
            last_vote: None,
            vote_lease: VOTE_LEASE,
            sync_source: None,
            pings: BTreeMap::new(),
            hb_data: Vec::new(),
            hb_message: String::new(),
            hb_message_at: Instant::ZERO,
            max_sync_source_lag,
        }
    }

    // ---- accessors -------------------------------------------------------

    pub fn config(&self) -> Option<&ReplicaSetConfig> {
        self.config.as_ref()
    }

    pub fn self_index(&self) -> Option<usize> {
        self.self_index
    }

    pub fn member_state(&self) -> MemberState {
        self.self_state
    }

    pub fn current_primary_index(&self) -> Option<usize> {
        self.current_primary
    }

    pub fn sync_source_address(&self) -> Option<&HostAndPort> {
        self.sync_source.as_ref()
    }

    pub fn step_down_until(&self) -> Instant {
        self.step_down_until
    }

    pub fn member_data(&self, index: usize) -> &MemberHeartbeatData {
        &self.hb_data[index]
    }

    /// Heartbeat round bookkeeping for `host`, if any attempt was made.
    pub fn heartbeat_stats(&self, host: &HostAndPort) -> Option<&PingStats> {
        self.pings.get(host)
    }

    /// The most recent locally generated status message and when it was set.
    /// Peers see it in our heartbeat replies.
    pub fn heartbeat_message(&self) -> (&str, Instant) {
        (&self.hb_message, self.hb_message_at)
    }

    fn i_am_primary(&self) -> bool {
        self.self_index.is_some() && self.current_primary == self.self_index
    }

    fn installed_config(&self) -> Result<&ReplicaSetConfig> {
        self.config.as_ref().ok_or_else(|| {
            StatusError::replica_set_not_found("no replica set configuration has been installed")
        })
    }

    fn heartbeat_timeout(&self) -> Millis {
        self.config
            .as_ref()
            .map(|c| c.heartbeat_timeout())
            .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT)
    }

    fn set_heartbeat_message(&mut self, now: Instant, message: String) {
        self.hb_message = message;
        self.hb_message_at = now;
    }

    // ---- configuration ---------------------------------------------------

    /// Install a validated configuration.
    ///
    /// Heartbeat state is preserved for members retained by id; removed
    /// members are dropped and new members start unknown. A `self_index` of
    /// `None` removes this node from the set.
    pub fn update_config(
        &mut self,
        config: ReplicaSetConfig,
        self_index: Option<usize>,
        now: Instant,
        _last_applied: OpTime,
    ) {
        debug_assert!(self_index.is_none_or(|i| i < config.num_members()));

        let mut hb_data = Vec::with_capacity(config.num_members());
        for member in &config.members {
            let preserved = self.config.as_ref().and_then(|old| {
                old.find_member_index_by_id(member.id)
                    .map(|old_index| self.hb_data[old_index].clone())
            });
            hb_data.push(preserved.unwrap_or_default());
        }

        let self_is_arbiter = self_index.is_some_and(|i| config.member_at(i).arbiter_only);
        let self_index_changed = self.self_index != self_index;
        self.config = Some(config);
        self.hb_data = hb_data;
        self.self_index = self_index;
        self.current_primary = None;
        self.force_sync_source_index = None;
        if self_index_changed {
            self.election_time = OpTime::ZERO;
        }

        match self_index {
            None => {
                tracing::info!("this node is not in the new replica set configuration at {now}");
                self.self_state = MemberState::Removed;
            }
            Some(_) => {
                if self_is_arbiter {
                    self.self_state = MemberState::Arbiter;
                } else if matches!(
                    self.self_state,
                    MemberState::Startup | MemberState::Removed | MemberState::Arbiter
                ) {
                    self.self_state = MemberState::Startup2;
                }
            }
        }
    }

    // ---- heartbeat protocol ----------------------------------------------

    /// Build the outgoing heartbeat bundle for `target` and return the
    /// remaining time budget for this attempt.
    pub fn prepare_heartbeat_request(
        &mut self,
        now: Instant,
        set_name: &str,
        target: &HostAndPort,
    ) -> (HeartbeatArgs, Millis) {
        let timeout_period = self.heartbeat_timeout();
        let uninitialized = self.config.is_none();
        let stats = self.pings.entry(target.clone()).or_default();
        let mut elapsed = now.saturating_since(stats.last_start());
        if uninitialized || stats.exhausted() || elapsed >= timeout_period {
            stats.start(now);
            elapsed = Millis::ZERO;
        }

        let (sender_id, sender_host, config_version) = match (&self.config, self.self_index) {
            (Some(config), Some(self_index)) => {
                let member = config.member_at(self_index);
                (member.id, member.host.to_string(), config.version)
            }
            (Some(config), None) => (-1, String::new(), config.version),
            (None, _) => (-1, String::new(), -2),
        };

        let args = HeartbeatArgs {
            protocol_version: 1,
            set_name: set_name.to_string(),
            sender_id,
            sender_host,
            config_version,
            check_empty: false,
        };
        (args, timeout_period.saturating_sub(elapsed))
    }

    /// Fold a heartbeat outcome into the target's record and decide what the
    /// runtime should do next.
    pub fn process_heartbeat_response(
        &mut self,
        now: Instant,
        rtt: Millis,
        target: &HostAndPort,
        response: Result<HeartbeatResponse>,
        last_applied: OpTime,
    ) -> HeartbeatResponseAction {
        let timeout_period = self.heartbeat_timeout();
        let stats = self.pings.entry(target.clone()).or_default();
        match &response {
            Ok(_) => stats.hit(rtt),
            Err(_) => stats.miss(),
        }
        let elapsed = now.saturating_since(stats.last_start());
        let retry_immediately = !stats.exhausted() && elapsed < timeout_period;
        let next_start = if retry_immediately {
            now
        } else {
            now + HEARTBEAT_INTERVAL
        };

        if let Err(err) = &response {
            tracing::debug!("heartbeat to {target} failed: {err}");
        }

        // A newer advertised configuration wins before any member
        // bookkeeping, even from a host absent from the current config.
        if let Ok(resp) = &response
            && let Some(new_config) = &resp.config
        {
            let current_version = self.config.as_ref().map(|c| c.version).unwrap_or(-2);
            if new_config.version > current_version {
                return HeartbeatResponseAction::reconfig(new_config.clone()).at(next_start);
            }
            tracing::debug!(
                "config version {} from {target} is not newer than ours",
                new_config.version
            );
        }

        let Some(member_index) = self
            .config
            .as_ref()
            .and_then(|c| c.find_member_index(target))
        else {
            tracing::debug!("heartbeat response from {target} which is not in our config");
            return HeartbeatResponseAction::no_action().at(next_start);
        };

        let original_state = self.hb_data[member_index].last_state();
        match &response {
            Ok(resp) => self.hb_data[member_index].set_up_values(now, resp),
            Err(err) => self.hb_data[member_index].set_down_values(now, err.reason.clone()),
        }
        let new_state = self.hb_data[member_index].last_state();
        if new_state != original_state {
            tracing::info!("member {target} is now in state {new_state}");
        }

        self.update_topology(now, last_applied).at(next_start)
    }

    /// Re-derive the group-wide view after one member's record changed.
    fn update_topology(&mut self, now: Instant, last_applied: OpTime) -> HeartbeatResponseAction {
        // Drop our notion of the primary if its record no longer supports it.
        if let Some(primary_index) = self.current_primary
            && Some(primary_index) != self.self_index
        {
            let hb = &self.hb_data[primary_index];
            if !hb.up() || !hb.last_state().primary() {
                self.current_primary = None;
            }
        }

        // A primary that cannot see a majority of votes must relinquish.
        if let Some(self_index) = self.self_index
            && self.current_primary == Some(self_index)
            && !self.majority_of_votes_up()
        {
            tracing::warn!("can't see a majority of the set, relinquishing primary");
            return HeartbeatResponseAction::step_down_self(self_index);
        }

        // Scan the member records for a remote claiming to be primary.
        let mut remote_primary = None;
        for (index, hb) in self.hb_data.iter().enumerate() {
            if Some(index) == self.self_index {
                continue;
            }
            if hb.up() && hb.last_state().primary() {
                if remote_primary.is_some() {
                    // Asynchronously polled; wait for things to settle down.
                    tracing::info!("two remote primaries (transiently)");
                    return HeartbeatResponseAction::no_action();
                }
                remote_primary = Some(index);
            }
        }

        if let Some(primary_index) = remote_primary {
            if self.current_primary == Some(primary_index) {
                return HeartbeatResponseAction::no_action();
            }
            self.set_heartbeat_message(now, String::new());

            if let Some(self_index) = self.self_index
                && self.current_primary == Some(self_index)
            {
                let remote_election = self.hb_data[primary_index].election_time();
                tracing::info!("another primary seen with election time {remote_election}");
                if remote_election > self.election_time {
                    tracing::info!("stepping down; another primary was elected more recently");
                    return HeartbeatResponseAction::step_down_self(self_index);
                }
                tracing::info!(
                    "another primary should step down since it was elected before me"
                );
                return HeartbeatResponseAction::step_down_remote_primary(primary_index);
            }

            self.current_primary = Some(primary_index);
            return HeartbeatResponseAction::no_action();
        }

        // No primary anywhere in sight; consider standing for election.
        if self.current_primary.is_some() {
            return HeartbeatResponseAction::no_action();
        }
        match self.my_unelectable_reason(now, last_applied) {
            None => {
                tracing::info!("standing for election");
                HeartbeatResponseAction::start_election()
            }
            Some(reason) => {
                tracing::debug!("not standing for election because the {reason}");
                HeartbeatResponseAction::no_action()
            }
        }
    }

    /// Answer an inbound heartbeat from a peer.
    pub fn prepare_heartbeat_reply(
        &mut self,
        now: Instant,
        args: &HeartbeatArgs,
        our_set_name: &str,
        last_applied: OpTime,
    ) -> Result<HeartbeatResponse> {
        if args.protocol_version != 1 {
            return Err(StatusError::bad_value(format!(
                "incompatible replica set protocol version: {}",
                args.protocol_version
            )));
        }
        if args.set_name != our_set_name {
            return Err(StatusError::replica_set_not_found(format!(
                "repl set names do not match, ours: {}; remote node's: {}",
                our_set_name, args.set_name
            )));
        }

        let mut response = HeartbeatResponse {
            set_name: Some(our_set_name.to_string()),
            state: Some(self.self_state),
            optime: Some(last_applied),
            time_secs: now.as_millis() / 1000,
            hbmsg: self.hb_message.clone(),
            syncing_to: self.sync_source.clone(),
            config_version: -2,
            ..HeartbeatResponse::default()
        };
        if self.self_state.primary() {
            response.election_time = Some(self.election_time);
        }
        response.electable = Some(self.my_unelectable_reason(now, last_applied).is_none());

        if let Some(config) = &self.config {
            response.config_version = config.version;
            if args.config_version < config.version {
                response.config = Some(config.clone());
            }
            if let Some(sender_index) = config.find_member_index_by_id(args.sender_id) {
                self.hb_data[sender_index].note_contact(now);
            }
        }
        Ok(response)
    }

    // ---- election bookkeeping --------------------------------------------

    fn majority_of_votes_up(&self) -> bool {
        let Some(config) = &self.config else {
            return false;
        };
        let mut up_votes = 0;
        for (index, hb) in self.hb_data.iter().enumerate() {
            if Some(index) == self.self_index || hb.up() {
                up_votes += config.member_at(index).votes;
            }
        }
        up_votes * 2 > config.total_votes()
    }

    /// Most advanced op time among ourselves and every reachable member.
    fn latest_known_optime(&self, last_applied: OpTime) -> OpTime {
        let mut latest = last_applied;
        for (index, hb) in self.hb_data.iter().enumerate() {
            if Some(index) == self.self_index {
                continue;
            }
            if hb.up() && hb.optime() > latest {
                latest = hb.optime();
            }
        }
        latest
    }

    fn my_unelectable_reason(
        &self,
        now: Instant,
        last_applied: OpTime,
    ) -> Option<UnelectableReason> {
        let (Some(config), Some(self_index)) = (&self.config, self.self_index) else {
            return Some(UnelectableReason::NotInitialized);
        };
        if !self.majority_of_votes_up() {
            return Some(UnelectableReason::CannotSeeMajority);
        }
        let member = config.member_at(self_index);
        if member.arbiter_only {
            return Some(UnelectableReason::Arbiter);
        }
        if member.priority <= 0.0 {
            return Some(UnelectableReason::ZeroPriority);
        }
        if self.step_down_until > now {
            return Some(UnelectableReason::StepDownPeriodActive);
        }
        if last_applied.is_zero() {
            return Some(UnelectableReason::NoData);
        }
        if !self.self_state.secondary() {
            return Some(UnelectableReason::NotSecondary);
        }
        None
    }

    /// Electability of another member, judged from its heartbeat record.
    fn remote_unelectable_reason(
        &self,
        config: &ReplicaSetConfig,
        index: usize,
        last_applied: OpTime,
    ) -> Option<UnelectableReason> {
        let member = config.member_at(index);
        let hb = &self.hb_data[index];
        if member.arbiter_only {
            return Some(UnelectableReason::Arbiter);
        }
        if member.priority <= 0.0 {
            return Some(UnelectableReason::ZeroPriority);
        }
        if !hb.last_state().secondary() {
            return Some(UnelectableReason::NotSecondary);
        }
        let latest = self.latest_known_optime(last_applied);
        if u64::from(hb.optime().secs) + LAG_WARNING_SECS < u64::from(latest.secs) {
            return Some(UnelectableReason::TooStale);
        }
        None
    }

    /// Index of the electable member with the highest priority, judged from
    /// heartbeat records. Self's record is never updated by heartbeats, so
    /// self is naturally excluded here.
    fn highest_priority_electable_index(&self, last_applied: OpTime) -> Option<usize> {
        let config = self.config.as_ref()?;
        let mut best: Option<usize> = None;
        for index in 0..config.num_members() {
            if self
                .remote_unelectable_reason(config, index, last_applied)
                .is_some()
            {
                continue;
            }
            match best {
                Some(current)
                    if config.member_at(index).priority
                        <= config.member_at(current).priority => {}
                _ => best = Some(index),
            }
        }
        best
    }

    // ---- sync-source selection -------------------------------------------

    /// Exclude `host` from sync-source selection until `until`.
    pub fn blacklist_sync_source(&mut self, host: HostAndPort, until: Instant) {
        tracing::debug!("blacklisting {host} until {until}");
        self.blacklist.insert(host, until);
    }

    fn is_blacklisted(&self, host: &HostAndPort, now: Instant) -> bool {
        self.blacklist.get(host).is_some_and(|&until| until > now)
    }

    /// The next `choose_new_sync_source` call must select member `index`
    /// unconditionally, then clear the override.
    pub fn set_force_sync_source_index(&mut self, index: usize) {
        self.force_sync_source_index = Some(index);
    }

    fn total_pings(&self) -> u64 {
        self.pings.values().map(|p| p.count()).sum()
    }

    fn ping_millis(&self, host: &HostAndPort) -> u64 {
        self.pings
            .get(host)
            .and_then(|p| p.rtt())
            .map(|rtt| rtt.as_millis())
            .unwrap_or(u64::MAX)
    }

    /// Apply the selection algorithm and update the sync-source address.
    pub fn choose_new_sync_source(
        &mut self,
        now: Instant,
        last_applied: OpTime,
    ) -> Option<HostAndPort> {
        let Some(self_index) = self.self_index else {
            self.sync_source = None;
            return None;
        };

        // An operator-forced choice wins even when ineligible.
        if let Some(forced) = self.force_sync_source_index.take() {
            let host = match &self.config {
                Some(config) if forced < config.num_members() => {
                    config.member_at(forced).host.clone()
                }
                _ => {
                    self.sync_source = None;
                    return None;
                }
            };
            let message = format!("syncing from: {host} by request");
            tracing::info!("{message}");
            self.set_heartbeat_message(now, message);
            self.sync_source = Some(host.clone());
            return Some(host);
        }

        let Some(config) = &self.config else {
            self.sync_source = None;
            return None;
        };

        // Wait for two full rounds of pings before making a choice.
        let need_more_pings =
            (self.hb_data.len() as i64 - 1) * 2 - self.total_pings() as i64;
        if need_more_pings > 0 {
            tracing::info!("waiting for {need_more_pings} pings from other members before syncing");
            self.sync_source = None;
            return None;
        }

        // When chaining is disallowed, the primary is the only legal source.
        if !config.settings.chaining_allowed {
            let Some(primary_index) = self.current_primary else {
                tracing::debug!(
                    "cannot select sync source because chaining is not allowed and primary is unknown/down"
                );
                self.sync_source = None;
                return None;
            };
            let host = config.member_at(primary_index).host.clone();
            if self.is_blacklisted(&host, now) {
                tracing::debug!(
                    "cannot select sync source because chaining is not allowed and primary {host} is blacklisted"
                );
                self.sync_source = None;
                return None;
            }
            let message = format!("syncing from primary: {host}");
            tracing::info!("{message}");
            self.set_heartbeat_message(now, message);
            self.sync_source = Some(host.clone());
            return Some(host);
        }

        // Reject candidates lagging more than the cap behind the primary's
        // op time; without a visible primary, pick a floor that excludes
        // nobody.
        let lag_secs = self.max_sync_source_lag.as_secs() as u32;
        let mut primary_optime = match self.current_primary {
            Some(primary_index) => self.hb_data[primary_index].optime(),
            None => OpTime::new(lag_secs, 0),
        };
        if primary_optime.secs < lag_secs {
            primary_optime = OpTime::new(lag_secs, 0);
        }
        let oldest_allowed = OpTime::new(primary_optime.secs - lag_secs, 0);

        let self_member = config.member_at(self_index);
        let self_builds_indexes = self_member.build_indexes;
        let self_slave_delay = self_member.slave_delay_secs;

        // Two attempts. The first ignores hidden members, members with more
        // slave delay than ours, and members beyond the lag window; the
        // second includes them in case they are all we can reach.
        let mut closest: Option<usize> = None;
        for attempt in 0..2 {
            for (index, hb) in self.hb_data.iter().enumerate() {
                if index == self_index {
                    continue;
                }
                if !hb.up() {
                    continue;
                }
                if !hb.last_state().readable() {
                    continue;
                }
                let member = config.member_at(index);
                if self_builds_indexes && !member.build_indexes {
                    continue;
                }
                if hb.optime() <= last_applied {
                    continue;
                }
                if attempt == 0 && hb.optime() < oldest_allowed {
                    continue;
                }
                if attempt == 0 && (member.slave_delay_secs > self_slave_delay || member.hidden) {
                    continue;
                }
                if self.is_blacklisted(&member.host, now) {
                    continue;
                }
                // Omit candidates more latent than anything already chosen.
                if let Some(best) = closest
                    && self.ping_millis(&member.host)
                        > self.ping_millis(&config.member_at(best).host)
                {
                    continue;
                }
                closest = Some(index);
            }
            if closest.is_some() {
                break;
            }
        }
        let chosen = closest.map(|index| config.member_at(index).host.clone());

        match chosen {
            None => {
                let message = "could not find member to sync from".to_string();
                tracing::info!("{message}");
                self.set_heartbeat_message(now, message);
                self.sync_source = None;
                None
            }
            Some(host) => {
                let message = format!("syncing to: {host}");
                tracing::info!("{message}");
                self.set_heartbeat_message(now, message);
                self.sync_source = Some(host.clone());
                Some(host)
            }
        }
    }

    // ---- response builders -----------------------------------------------

    /// Handle an operator request to sync from a specific member.
    pub fn prepare_sync_from_response(
        &mut self,
        ctx: CallbackContext,
        target: &HostAndPort,
        last_applied: OpTime,
        response: &mut ResponseDoc,
    ) -> Result<()> {
        if ctx.is_canceled() {
            return Err(StatusError::shutdown_in_progress());
        }
        let config = self.installed_config()?;
        let Some(self_index) = self.self_index else {
            return Err(StatusError::not_secondary(
                "Removed and uninitialized nodes do not sync",
            ));
        };
        let self_member = config.member_at(self_index);
        if self_member.arbiter_only {
            return Err(StatusError::not_secondary("arbiters don't sync"));
        }

        response.put("syncFromRequested", target.to_string());
        if self.i_am_primary() {
            return Err(StatusError::not_secondary("primaries don't sync"));
        }

        let Some(target_index) = config.find_member_index(target) else {
            return Err(StatusError::node_not_found(format!(
                "Could not find member \"{target}\" in replica set"
            )));
        };
        if target_index == self_index {
            return Err(StatusError::invalid_options("I cannot sync from myself"));
        }
        let target_member = config.member_at(target_index);
        if target_member.arbiter_only {
            return Err(StatusError::invalid_options(format!(
                "Cannot sync from \"{target}\" because it is an arbiter"
            )));
        }
        if !target_member.build_indexes && self_member.build_indexes {
            return Err(StatusError::invalid_options(format!(
                "Cannot sync from \"{target}\" because it does not build indexes"
            )));
        }

        let hb = &self.hb_data[target_index];
        if hb.health() == MemberHealth::Down {
            return Err(StatusError::host_unreachable(format!(
                "I cannot reach the requested member: {target}"
            )));
        }
        if u64::from(hb.optime().secs) + LAG_WARNING_SECS < u64::from(last_applied.secs) {
            tracing::warn!(
                "attempting to sync from {target}, but its latest op time is {} and ours is {}",
                hb.optime(),
                last_applied
            );
            response.put(
                "warning",
                format!("requested member \"{target}\" is more than 10 seconds behind us"),
            );
        }
        if let Some(prev) = &self.sync_source {
            response.put("prevSyncTarget", prev.to_string());
        }
        self.force_sync_source_index = Some(target_index);
        Ok(())
    }

    /// Adjudicate a "fresh" query from an election candidate.
    pub fn prepare_fresh_response(
        &self,
        ctx: CallbackContext,
        args: &FreshArgs,
        last_applied: OpTime,
        response: &mut ResponseDoc,
    ) -> Result<()> {
        if ctx.is_canceled() {
            return Err(StatusError::shutdown_in_progress());
        }
        let config = self.installed_config()?;
        if args.set_name != config.set_name {
            return Err(StatusError::replica_set_not_found(format!(
                "Wrong repl set name. Expected: {}, received: {}",
                config.set_name, args.set_name
            )));
        }
        if let Some(self_index) = self.self_index
            && config.member_at(self_index).id == args.id
        {
            return Err(StatusError::bad_value(format!(
                "Received replSetFresh command from member with the same member ID as ourself: {}",
                args.id
            )));
        }

        let mut fresher = false;
        if config.version > args.cfgver {
            tracing::info!(
                "member {} is not yet aware its cfg version {} is stale",
                args.who,
                args.cfgver
            );
            response.put("info", "config version stale");
            fresher = true;
        } else if args.optime < self.latest_known_optime(last_applied) {
            fresher = true;
        }
        response.put("opTime", last_applied.as_u64());
        response.put("fresher", fresher);

        let veto = self.should_veto(config, args.id, last_applied);
        response.put("veto", veto.is_some());
        if let Some(errmsg) = veto {
            response.put("errmsg", errmsg);
        }
        Ok(())
    }

    fn should_veto(
        &self,
        config: &ReplicaSetConfig,
        member_id: i32,
        last_applied: OpTime,
    ) -> Option<String> {
        let Some(hopeful_index) = config.find_member_index_by_id(member_id) else {
            return Some(format!("replSet couldn't find member with id {member_id}"));
        };
        let hopeful = config.member_at(hopeful_index);

        // Our own record is not updated by heartbeats, so a primary must
        // compare the candidate against its own applied op time.
        if self.i_am_primary() && last_applied >= self.hb_data[hopeful_index].optime() {
            return Some(format!(
                "I am already primary, {} can try again once I've stepped down",
                hopeful.host
            ));
        }

        if let Some(primary_index) = self.current_primary
            && primary_index != hopeful_index
            && self.hb_data[primary_index].optime() >= self.hb_data[hopeful_index].optime()
        {
            return Some(format!(
                "{} is trying to elect itself but {} is already primary and more up-to-date",
                hopeful.host,
                config.member_at(primary_index).host
            ));
        }

        if let Some(highest_index) = self.highest_priority_electable_index(last_applied) {
            let highest = config.member_at(highest_index);
            if highest.priority > hopeful.priority {
                return Some(format!(
                    "{} has lower priority of {} than {} which has a priority of {}",
                    hopeful.host, hopeful.priority, highest.host, highest.priority
                ));
            }
        }

        if let Some(reason) = self.remote_unelectable_reason(config, hopeful_index, last_applied) {
            return Some(format!(
                "I don't think {} is electable because the {reason}",
                hopeful.host
            ));
        }
        None
    }

    /// Adjudicate an "elect" request: 1 yea, 0 abstain, -10000 veto.
    pub fn prepare_elect_response(
        &mut self,
        ctx: CallbackContext,
        args: &ElectArgs,
        now: Instant,
        response: &mut ResponseDoc,
    ) -> Result<()> {
        if ctx.is_canceled() {
            return Err(StatusError::shutdown_in_progress());
        }
        let config = self.installed_config()?;
        let my_version = config.version;
        let set_name = config.set_name.clone();
        let hopeful = config.find_member_by_id(args.whoid).cloned();
        let primary_host = self
            .current_primary
            .map(|index| config.member_at(index).host.clone());
        let highest = self
            .highest_priority_electable_index(OpTime::ZERO)
            .map(|index| config.member_at(index).clone());
        let self_votes = self
            .self_index
            .map(|index| config.member_at(index).votes)
            .unwrap_or(0);

        let vote: i32 = if args.set_name != set_name {
            tracing::warn!(
                "received an elect request for '{}' but our set name is '{}'",
                args.set_name,
                set_name
            );
            0
        } else if my_version < args.cfgver {
            tracing::info!("not voting because our config version is stale");
            0
        } else if my_version > args.cfgver {
            tracing::info!("received stale config version # during election");
            -10000
        } else {
            match hopeful {
                None => {
                    tracing::info!("couldn't find member with id {}", args.whoid);
                    -10000
                }
                Some(hopeful) => {
                    if self.i_am_primary() {
                        tracing::info!("I am already primary, not voting for {}", hopeful.host);
                        -10000
                    } else if let Some(primary_host) = primary_host {
                        tracing::info!("{primary_host} is already primary");
                        -10000
                    } else if let Some(highest) =
                        highest.filter(|h| h.priority > hopeful.priority)
                    {
                        tracing::info!(
                            "{} has lower priority than {}",
                            hopeful.host,
                            highest.host
                        );
                        -10000
                    } else {
                        match &self.last_vote {
                            Some(last)
                                if last.when + self.vote_lease >= now
                                    && last.who_id != args.whoid =>
                            {
                                tracing::info!(
                                    "voting no for {}; voted for {} {} secs ago",
                                    hopeful.host,
                                    last.who_host,
                                    now.saturating_since(last.when).as_secs()
                                );
                                0
                            }
                            _ => {
                                self.last_vote = Some(LastVote {
                                    when: now,
                                    who_id: args.whoid,
                                    who_host: hopeful.host.clone(),
                                });
                                tracing::info!(
                                    "voting yea for {} ({})",
                                    hopeful.host,
                                    args.whoid
                                );
                                self_votes
                            }
                        }
                    }
                }
            }
        };

        response.put("vote", vote);
        response.put("round", args.round.to_string());
        Ok(())
    }

    /// Handle a freeze command: postpone standing for election.
    pub fn prepare_freeze_response(
        &mut self,
        ctx: CallbackContext,
        now: Instant,
        secs: u64,
        response: &mut ResponseDoc,
    ) -> Result<()> {
        if ctx.is_canceled() {
            return Err(StatusError::shutdown_in_progress());
        }
        if secs == 0 {
            self.step_down_until = now;
            tracing::info!("'unfreezing'");
            response.put("info", "unfreezing");
        } else {
            if secs == 1 {
                response.put("warning", "you really want to freeze for only 1 second?");
            }
            if !self.i_am_primary() {
                self.step_down_until =
                    cmp::max(self.step_down_until, now + Millis::from_secs(secs));
                tracing::info!("'freezing' for {secs} seconds");
            } else {
                tracing::info!("received freeze command but we are primary");
            }
        }
        Ok(())
    }

    /// Build the group status document.
    pub fn prepare_status_response(
        &self,
        ctx: CallbackContext,
        now: Instant,
        uptime_secs: u64,
        last_applied: OpTime,
        response: &mut ResponseDoc,
    ) -> Result<()> {
        if ctx.is_canceled() {
            return Err(StatusError::shutdown_in_progress());
        }
        let config = self.installed_config()?;

        let mut members = Vec::with_capacity(config.num_members());
        for (index, member) in config.members.iter().enumerate() {
            let mut entry = ResponseDoc::new();
            entry.put("_id", member.id);
            entry.put("name", member.host.to_string());
            if Some(index) == self.self_index {
                entry.put("health", 1.0);
                entry.put("state", self.self_state.code());
                entry.put("stateStr", self.self_state.as_str());
                entry.put("uptime", uptime_secs);
                entry.put("optime", last_applied);
                entry.put("optimeDate", last_applied.as_millis());
                if self.self_state.primary() {
                    entry.put("electionTime", self.election_time);
                }
                entry.put("self", true);
            } else {
                let hb = &self.hb_data[index];
                entry.put("health", hb.health().as_f64());
                entry.put("state", hb.last_state().code());
                let state_str = if hb.health() == MemberHealth::Down {
                    "(not reachable/healthy)"
                } else {
                    hb.last_state().as_str()
                };
                entry.put("stateStr", state_str);
                if hb.health() != MemberHealth::Unknown {
                    let uptime = if hb.up_since() == Instant::ZERO {
                        0
                    } else {
                        now.saturating_since(hb.up_since()).as_secs()
                    };
                    entry.put("uptime", uptime);
                    entry.put("optime", hb.optime());
                    entry.put("optimeDate", hb.optime().as_millis());
                    entry.put("lastHeartbeat", hb.last_heartbeat().as_millis());
                    entry.put("lastHeartbeatRecv", hb.last_heartbeat_recv().as_millis());
                    if !hb.last_message().is_empty() {
                        entry.put("lastHeartbeatMessage", hb.last_message());
                    }
                    if let Some(rtt) = self.pings.get(&member.host).and_then(|p| p.rtt()) {
                        entry.put("pingMs", rtt.as_millis());
                    }
                    if !hb.election_time().is_zero() {
                        entry.put("electionTime", hb.election_time());
                    }
                    if let Some(syncing_to) = hb.syncing_to() {
                        entry.put("syncingTo", syncing_to.to_string());
                    }
                }
            }
            members.push(entry.into_value());
        }

        response.put("set", config.set_name.clone());
        response.put("date", now.as_millis());
        response.put("myState", self.self_state.code());
        if let Some(source) = &self.sync_source {
            response.put("syncingTo", source.to_string());
        }
        response.put("members", Value::Array(members));
        Ok(())
    }

    // ---- self state transitions ------------------------------------------

    /// Runtime-driven transition between follower states.
    pub fn set_follower_state(&mut self, state: MemberState) -> Result<()> {
        if !matches!(
            state,
            MemberState::Secondary
                | MemberState::Recovering
                | MemberState::Rollback
                | MemberState::Startup2
        ) {
            return Err(StatusError::bad_value(format!(
                "cannot transition to {state} as a follower state"
            )));
        }
        if self.i_am_primary() {
            return Err(StatusError::not_secondary(
                "cannot set a follower state while primary; step down first",
            ));
        }
        self.self_state = state;
        Ok(())
    }

    /// Record a won election: self becomes primary at `election_time`.
    pub fn process_win_election(&mut self, election_time: OpTime) {
        self.self_state = MemberState::Primary;
        self.election_time = election_time;
        self.current_primary = self.self_index;
    }

    /// Step down from primary, refusing to stand again until `until`.
    pub fn step_down(&mut self, until: Instant) {
        self.self_state = MemberState::Secondary;
        if self.current_primary == self.self_index {
            self.current_primary = None;
        }
        self.step_down_until = cmp::max(self.step_down_until, until);
    }

    // ---- test support ----------------------------------------------------

    #[doc(hidden)]
    pub fn set_member_state_for_test(&mut self, state: MemberState) {
        self.self_state = state;
    }

    #[doc(hidden)]
    pub fn set_current_primary_for_test(&mut self, index: Option<usize>) {
        self.current_primary = index;
    }

    #[doc(hidden)]
    pub fn set_election_time_for_test(&mut self, election_time: OpTime) {
        self.election_time = election_time;
    }

    #[doc(hidden)]
    pub fn set_vote_lease_for_test(&mut self, lease: Millis) {
        self.vote_lease = lease;
    }
}

impl Default for TopologyCoordinator {
    fn default() -> Self {
        Self::new(MAX_SYNC_SOURCE_LAG)
    }
}
