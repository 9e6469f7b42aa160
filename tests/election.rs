//! Fresh/elect adjudication, freeze handling, and builder cancellation.

mod fixtures;

use fixtures::{Harness, host};
use replset_topo::{
    CallbackContext, ElectArgs, ElectionRound, ErrorCode, FreshArgs, Instant, MemberState, Millis,
    OpTime, ResponseDoc,
};
use serde_json::json;

fn fresh_test_set(h: &mut Harness) {
    h.update_config(
        json!({
            "_id": "rs0",
            "version": 10,
            "members": [
                {"_id": 10, "host": "hself", "priority": 10},
                {"_id": 20, "host": "h1"},
                {"_id": 30, "host": "h2"},
                {"_id": 40, "host": "h3", "priority": 10},
            ],
        }),
        Some(0),
    );
}

fn elect_test_set(h: &mut Harness) {
    h.update_config(
        json!({
            "_id": "rs0",
            "version": 10,
            "members": [
                {"_id": 0, "host": "hself"},
                {"_id": 1, "host": "h1"},
                {"_id": 2, "host": "h2", "priority": 10},
                {"_id": 3, "host": "h3", "priority": 10},
            ],
        }),
        Some(0),
    );
}

fn round() -> ElectionRound {
    ElectionRound::from_bytes([7; 12])
}

fn elect_args(set_name: &str, cfgver: i64, whoid: i32) -> ElectArgs {
    ElectArgs {
        set_name: set_name.to_string(),
        round: round(),
        cfgver,
        whoid,
    }
}

#[test]
fn fresh_rejects_wrong_set_name_with_empty_body() {
    let mut h = Harness::new();
    fresh_test_set(&mut h);
    let args = FreshArgs {
        set_name: "fakeset".to_string(),
        cfgver: 10,
        id: 20,
        who: host("h1"),
        optime: OpTime::ZERO,
    };
    let mut doc = ResponseDoc::new();
    let err = h
        .topo
        .prepare_fresh_response(CallbackContext::new(), &args, OpTime::new(10, 10), &mut doc)
        .unwrap_err();
    assert!(err.is(ErrorCode::ReplicaSetNotFound));
    assert!(doc.is_empty());
}

#[test]
fn fresh_vetoes_unknown_member_and_reports_stale_config() {
    let mut h = Harness::new();
    fresh_test_set(&mut h);
    let our_optime = OpTime::new(10, 10);
    let args = FreshArgs {
        set_name: "rs0".to_string(),
        cfgver: 5,
        id: 0,
        who: host("fakenode"),
        optime: OpTime::new(1, 1),
    };
    let mut doc = ResponseDoc::new();
    h.topo
        .prepare_fresh_response(CallbackContext::new(), &args, our_optime, &mut doc)
        .unwrap();
    assert_eq!(doc["info"], "config version stale");
    assert_eq!(doc["opTime"], json!(our_optime.as_u64()));
    assert_eq!(doc["fresher"], true);
    assert_eq!(doc["veto"], true);
    assert_eq!(
        doc["errmsg"],
        "replSet couldn't find member with id 0"
    );
}

#[test]
fn fresh_vetoes_while_we_are_primary() {
    let mut h = Harness::new();
    fresh_test_set(&mut h);
    let our_optime = OpTime::new(10, 10);
    let stale = OpTime::new(1, 1);

    h.heartbeat_from_member("h1", "rs0", MemberState::Secondary, stale, Millis::ZERO);
    h.make_self_primary(OpTime::ZERO);

    let args = FreshArgs {
        set_name: "rs0".to_string(),
        cfgver: 10,
        id: 20,
        who: host("h1"),
        optime: our_optime,
    };
    let mut doc = ResponseDoc::new();
    h.topo
        .prepare_fresh_response(CallbackContext::new(), &args, our_optime, &mut doc)
        .unwrap();
    assert!(!doc.has_field("info"));
    assert_eq!(doc["fresher"], false);
    assert_eq!(doc["veto"], true);
    assert_eq!(
        doc["errmsg"],
        "I am already primary, h1:27017 can try again once I've stepped down"
    );
}

#[test]
fn fresh_vetoes_when_another_primary_is_more_up_to_date() {
    let mut h = Harness::new();
    fresh_test_set(&mut h);
    let our_optime = OpTime::new(10, 10);
    let stale = OpTime::new(1, 1);

    h.heartbeat_from_member("h1", "rs0", MemberState::Secondary, stale, Millis::ZERO);
    h.heartbeat_from_member("h2", "rs0", MemberState::Secondary, our_optime, Millis::ZERO);
    h.set_self_state(MemberState::Secondary);
    h.topo.set_current_primary_for_test(Some(2));

    let args = FreshArgs {
        set_name: "rs0".to_string(),
        cfgver: 10,
        id: 20,
        who: host("h1"),
        optime: our_optime,
    };
    let mut doc = ResponseDoc::new();
    h.topo
        .prepare_fresh_response(CallbackContext::new(), &args, our_optime, &mut doc)
        .unwrap();
    assert_eq!(doc["veto"], true);
    assert_eq!(
        doc["errmsg"],
        "h1:27017 is trying to elect itself but h2:27017 is already primary and more up-to-date"
    );
}

#[test]
fn fresh_vetoes_candidate_below_highest_priority() {
    let mut h = Harness::new();
    fresh_test_set(&mut h);
    let our_optime = OpTime::new(10, 10);
    let stale = OpTime::new(1, 1);

    h.heartbeat_from_member("h1", "rs0", MemberState::Secondary, stale, Millis::ZERO);
    h.set_self_state(MemberState::Secondary);
    h.topo.set_current_primary_for_test(Some(2));
    h.heartbeat_from_member("h1", "rs0", MemberState::Secondary, our_optime, Millis::ZERO);
    h.heartbeat_from_member("h2", "rs0", MemberState::Secondary, stale, Millis::ZERO);
    h.heartbeat_from_member("h3", "rs0", MemberState::Secondary, our_optime, Millis::ZERO);

    let args = FreshArgs {
        set_name: "rs0".to_string(),
        cfgver: 10,
        id: 20,
        who: host("h1"),
        optime: our_optime,
    };
    let mut doc = ResponseDoc::new();
    h.topo
        .prepare_fresh_response(CallbackContext::new(), &args, our_optime, &mut doc)
        .unwrap();
    assert_eq!(doc["fresher"], false);
    assert_eq!(doc["veto"], true);
    assert_eq!(
        doc["errmsg"],
        "h1:27017 has lower priority of 1 than h3:27017 which has a priority of 10"
    );
}

#[test]
fn fresh_vetoes_unelectable_candidate_then_accepts_once_recovered() {
    let mut h = Harness::new();
    fresh_test_set(&mut h);
    let our_optime = OpTime::new(10, 10);

    h.set_self_state(MemberState::Secondary);
    h.down_member("h3", "rs0");

    let args = FreshArgs {
        set_name: "rs0".to_string(),
        cfgver: 10,
        id: 40,
        who: host("h3"),
        optime: our_optime,
    };
    let mut doc = ResponseDoc::new();
    h.topo
        .prepare_fresh_response(CallbackContext::new(), &args, our_optime, &mut doc)
        .unwrap();
    assert_eq!(doc["veto"], true);
    assert_eq!(
        doc["errmsg"],
        "I don't think h3:27017 is electable because the member is not currently a secondary"
    );

    // h3 comes back up to date; the veto clears.
    h.heartbeat_from_member("h3", "rs0", MemberState::Secondary, our_optime, Millis::ZERO);
    let mut doc = ResponseDoc::new();
    h.topo
        .prepare_fresh_response(CallbackContext::new(), &args, our_optime, &mut doc)
        .unwrap();
    assert!(!doc.has_field("info"));
    assert_eq!(doc["fresher"], false);
    assert_eq!(doc["veto"], false);
    assert!(!doc.has_field("errmsg"));
}

#[test]
fn fresh_rejects_our_own_member_id() {
    let mut h = Harness::new();
    fresh_test_set(&mut h);
    let args = FreshArgs {
        set_name: "rs0".to_string(),
        cfgver: 10,
        id: 10,
        who: host("hself"),
        optime: OpTime::ZERO,
    };
    let mut doc = ResponseDoc::new();
    let err = h
        .topo
        .prepare_fresh_response(CallbackContext::new(), &args, OpTime::ZERO, &mut doc)
        .unwrap_err();
    assert!(err.is(ErrorCode::BadValue));
    assert_eq!(
        err.reason,
        "Received replSetFresh command from member with the same member ID as ourself: 10"
    );
}

#[test]
fn elect_abstains_on_wrong_set_name_and_stale_local_config() {
    let mut h = Harness::new();
    elect_test_set(&mut h);

    for args in [elect_args("fakeset", 10, 1), elect_args("rs0", 20, 1)] {
        let mut doc = ResponseDoc::new();
        let now = h.now();
        h.topo
            .prepare_elect_response(CallbackContext::new(), &args, now, &mut doc)
            .unwrap();
        assert_eq!(doc["vote"], 0);
        assert_eq!(doc["round"], json!(round().to_string()));
    }
}

#[test]
fn elect_vetoes_stale_remote_config_and_unknown_candidate() {
    let mut h = Harness::new();
    elect_test_set(&mut h);

    for args in [elect_args("rs0", 5, 1), elect_args("rs0", 10, 99)] {
        let mut doc = ResponseDoc::new();
        let now = h.now();
        h.topo
            .prepare_elect_response(CallbackContext::new(), &args, now, &mut doc)
            .unwrap();
        assert_eq!(doc["vote"], -10000);
        assert_eq!(doc["round"], json!(round().to_string()));
    }
}

#[test]
fn elect_vetoes_while_any_primary_is_known() {
    let mut h = Harness::new();
    elect_test_set(&mut h);

    // We are primary.
    h.topo.set_current_primary_for_test(Some(0));
    let mut doc = ResponseDoc::new();
    let now = h.now();
    h.topo
        .prepare_elect_response(CallbackContext::new(), &elect_args("rs0", 10, 1), now, &mut doc)
        .unwrap();
    assert_eq!(doc["vote"], -10000);

    // Someone else is primary.
    h.topo.set_current_primary_for_test(Some(2));
    let mut doc = ResponseDoc::new();
    let now = h.now();
    h.topo
        .prepare_elect_response(CallbackContext::new(), &elect_args("rs0", 10, 1), now, &mut doc)
        .unwrap();
    assert_eq!(doc["vote"], -10000);
}

#[test]
fn elect_vetoes_candidate_below_highest_priority() {
    let mut h = Harness::new();
    elect_test_set(&mut h);

    h.heartbeat_from_member(
        "h3",
        "rs0",
        MemberState::Secondary,
        OpTime::new(10_000, 0),
        Millis::ZERO,
    );

    let mut doc = ResponseDoc::new();
    let now = h.now();
    h.topo
        .prepare_elect_response(CallbackContext::new(), &elect_args("rs0", 10, 1), now, &mut doc)
        .unwrap();
    assert_eq!(doc["vote"], -10000);
}

#[test]
fn elect_yea_vote_honors_the_lease() {
    let mut h = Harness::new();
    elect_test_set(&mut h);

    // First valid vote is granted.
    let mut doc = ResponseDoc::new();
    h.topo
        .prepare_elect_response(
            CallbackContext::new(),
            &elect_args("rs0", 10, 2),
            Instant::from_millis(100),
            &mut doc,
        )
        .unwrap();
    assert_eq!(doc["vote"], 1);
    assert_eq!(doc["round"], json!(round().to_string()));

    // A different candidate inside the lease window is refused.
    let mut doc = ResponseDoc::new();
    h.topo
        .prepare_elect_response(
            CallbackContext::new(),
            &elect_args("rs0", 10, 3),
            Instant::from_millis(101),
            &mut doc,
        )
        .unwrap();
    assert_eq!(doc["vote"], 0);

    // The same candidate we voted for may be re-affirmed inside the lease.
    let mut doc = ResponseDoc::new();
    h.topo
        .prepare_elect_response(
            CallbackContext::new(),
            &elect_args("rs0", 10, 2),
            Instant::from_millis(102),
            &mut doc,
        )
        .unwrap();
    assert_eq!(doc["vote"], 1);

    // Once the lease expires the other candidate gets its vote.
    let mut doc = ResponseDoc::new();
    h.topo
        .prepare_elect_response(
            CallbackContext::new(),
            &elect_args("rs0", 10, 3),
            Instant::from_millis(102 + 30_001),
            &mut doc,
        )
        .unwrap();
    assert_eq!(doc["vote"], 1);
}

#[test]
fn at_most_one_yea_per_lease_window() {
    let mut h = Harness::new();
    elect_test_set(&mut h);

    // Re-affirming the candidate we already voted for is always allowed, so
    // the lease guarantee is about switching: consecutive yea votes for
    // *different* candidates are never within the lease window.
    let mut yea_votes: Vec<(u64, i32)> = Vec::new();
    for step in 0..2_000u64 {
        let now = Instant::from_millis(step * 100);
        let whoid = if step % 2 == 0 { 2 } else { 3 };
        let mut doc = ResponseDoc::new();
        h.topo
            .prepare_elect_response(CallbackContext::new(), &elect_args("rs0", 10, whoid), now, &mut doc)
            .unwrap();
        if doc["vote"] == serde_json::json!(1) {
            yea_votes.push((now.as_millis(), whoid));
        }
    }
    assert!(!yea_votes.is_empty());
    for pair in yea_votes.windows(2) {
        let ((earlier, earlier_who), (later, later_who)) = (pair[0], pair[1]);
        if earlier_who != later_who {
            assert!(
                later - earlier > 30_000,
                "switched candidates within the lease window: {earlier} and {later}"
            );
        }
    }
}

#[test]
fn freeze_controls_the_stepdown_deadline() {
    let mut h = Harness::new();
    elect_test_set(&mut h);
    h.set_self_state(MemberState::Secondary);

    // Unfreeze even when not frozen.
    let mut doc = ResponseDoc::new();
    let now = h.now();
    h.topo
        .prepare_freeze_response(CallbackContext::new(), now, 0, &mut doc)
        .unwrap();
    assert_eq!(doc["info"], "unfreezing");

    // One second draws a warning but still freezes a secondary.
    let mut doc = ResponseDoc::new();
    let now = h.now();
    h.topo
        .prepare_freeze_response(CallbackContext::new(), now, 1, &mut doc)
        .unwrap();
    assert_eq!(
        doc["warning"],
        "you really want to freeze for only 1 second?"
    );
    assert_eq!(h.topo.step_down_until(), now + Millis::from_secs(1));

    // A longer freeze produces an empty body and sets the deadline.
    let mut doc = ResponseDoc::new();
    let now = h.now();
    h.topo
        .prepare_freeze_response(CallbackContext::new(), now, 20, &mut doc)
        .unwrap();
    assert!(doc.is_empty());
    assert_eq!(h.topo.step_down_until(), now + Millis::from_secs(20));

    // Unfreezing clears the deadline.
    let mut doc = ResponseDoc::new();
    let now = h.now();
    h.topo
        .prepare_freeze_response(CallbackContext::new(), now, 0, &mut doc)
        .unwrap();
    assert_eq!(doc["info"], "unfreezing");
    assert_eq!(h.topo.step_down_until(), now);
}

#[test]
fn freeze_while_primary_never_sets_the_deadline() {
    let mut h = Harness::new();
    elect_test_set(&mut h);
    h.make_self_primary(OpTime::new(1, 0));

    let mut doc = ResponseDoc::new();
    let now = h.now();
    h.topo
        .prepare_freeze_response(CallbackContext::new(), now, 1, &mut doc)
        .unwrap();
    assert_eq!(
        doc["warning"],
        "you really want to freeze for only 1 second?"
    );
    assert!(h.topo.step_down_until() < now);

    let mut doc = ResponseDoc::new();
    let now = h.now();
    h.topo
        .prepare_freeze_response(CallbackContext::new(), now, 20, &mut doc)
        .unwrap();
    assert!(doc.is_empty());
    assert!(h.topo.step_down_until() < now);

    // Unfreezing works even while primary.
    let mut doc = ResponseDoc::new();
    let now = h.now();
    h.topo
        .prepare_freeze_response(CallbackContext::new(), now, 0, &mut doc)
        .unwrap();
    assert_eq!(doc["info"], "unfreezing");
}

#[test]
fn canceled_context_shuts_down_every_builder() {
    let mut h = Harness::new();
    fresh_test_set(&mut h);
    let ctx = CallbackContext::canceled();
    let deadline_before = h.topo.step_down_until();

    let mut doc = ResponseDoc::new();
    let err = h
        .topo
        .prepare_sync_from_response(ctx, &host("h1"), OpTime::ZERO, &mut doc)
        .unwrap_err();
    assert!(err.is(ErrorCode::ShutdownInProgress));
    assert!(doc.is_empty());

    let args = FreshArgs {
        set_name: "rs0".to_string(),
        cfgver: 10,
        id: 20,
        who: host("h1"),
        optime: OpTime::ZERO,
    };
    let mut doc = ResponseDoc::new();
    let err = h
        .topo
        .prepare_fresh_response(ctx, &args, OpTime::ZERO, &mut doc)
        .unwrap_err();
    assert!(err.is(ErrorCode::ShutdownInProgress));
    assert!(doc.is_empty());

    let mut doc = ResponseDoc::new();
    let now = h.now();
    let err = h
        .topo
        .prepare_elect_response(ctx, &elect_args("rs0", 10, 20), now, &mut doc)
        .unwrap_err();
    assert!(err.is(ErrorCode::ShutdownInProgress));
    assert!(doc.is_empty());

    let mut doc = ResponseDoc::new();
    let now = h.now();
    let err = h
        .topo
        .prepare_freeze_response(ctx, now, 20, &mut doc)
        .unwrap_err();
    assert!(err.is(ErrorCode::ShutdownInProgress));
    assert!(doc.is_empty());
    assert_eq!(h.topo.step_down_until(), deadline_before);

    let mut doc = ResponseDoc::new();
    let now = h.now();
    let err = h
        .topo
        .prepare_status_response(ctx, now, 10, OpTime::ZERO, &mut doc)
        .unwrap_err();
    assert!(err.is(ErrorCode::ShutdownInProgress));
    assert!(doc.is_empty());
}
