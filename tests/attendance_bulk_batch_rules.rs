mod test_support;

use serde_json::json;
use test_support::{
    add_member, open_state, request_err, request_ok, seed_activity, seed_group, seed_region,
    seed_user, set_status, TOMORROW,
};

struct Fixture {
    admin: String,
    members: Vec<String>,
    activity_a: String,
    activity_b: String,
}

fn setup(state: &mut mgmpd::ipc::AppState) -> Fixture {
    let region = seed_region(state, "Jakarta Pusat");
    let group = seed_group(state, "MGMP Matematika SMP", &region);
    let admin = seed_user(state, "admin_grup1", "admin_grup", Some(&region), None);
    add_member(state, &group, &admin, true);

    let mut members = Vec::new();
    for i in 0..3 {
        let member = seed_user(
            state,
            &format!("guru{}", i),
            "guru",
            Some(&region),
            None,
        );
        add_member(state, &group, &member, false);
        members.push(member);
    }

    let activity_a = seed_activity(state, &group, TOMORROW, &admin);
    set_status(state, &activity_a, "published");
    let activity_b = seed_activity(state, &group, "2024-08-20", &admin);
    set_status(state, &activity_b, "published");

    Fixture {
        admin,
        members,
        activity_a,
        activity_b,
    }
}

fn row_count(state: &mut mgmpd::ipc::AppState, activity_id: &str) -> usize {
    let listed = request_ok(
        state,
        "count",
        "attendance.listByActivity",
        json!({ "activityId": activity_id }),
    );
    listed["attendance"].as_array().unwrap().len()
}

fn record(activity: &str, user: &str, present: bool, recorder: &str) -> serde_json::Value {
    json!({
        "activityId": activity,
        "userId": user,
        "isPresent": present,
        "recordedBy": recorder,
    })
}

#[test]
fn batch_spanning_two_activities_fails_with_zero_writes() {
    let mut state = open_state("bulk-two-activities");
    let fx = setup(&mut state);

    let code = request_err(
        &mut state,
        "1",
        "attendance.bulkRecord",
        json!({
            "records": [
                record(&fx.activity_a, &fx.members[0], true, &fx.admin),
                record(&fx.activity_b, &fx.members[1], true, &fx.admin),
            ]
        }),
    );
    assert_eq!(code, "inconsistent_batch");
    assert_eq!(row_count(&mut state, &fx.activity_a), 0);
    assert_eq!(row_count(&mut state, &fx.activity_b), 0);
}

#[test]
fn batch_with_mixed_recorders_fails_with_zero_writes() {
    let mut state = open_state("bulk-two-recorders");
    let fx = setup(&mut state);

    let code = request_err(
        &mut state,
        "1",
        "attendance.bulkRecord",
        json!({
            "records": [
                record(&fx.activity_a, &fx.members[0], true, &fx.admin),
                record(&fx.activity_a, &fx.members[1], true, &fx.members[0]),
            ]
        }),
    );
    assert_eq!(code, "inconsistent_batch");
    assert_eq!(row_count(&mut state, &fx.activity_a), 0);
}

#[test]
fn empty_batch_is_a_no_op_success() {
    let mut state = open_state("bulk-empty");
    let _fx = setup(&mut state);

    let result = request_ok(
        &mut state,
        "1",
        "attendance.bulkRecord",
        json!({ "records": [] }),
    );
    assert_eq!(result["recorded"], json!(0));
}

#[test]
fn batch_applies_in_order_and_reapplying_updates_in_place() {
    let mut state = open_state("bulk-apply");
    let fx = setup(&mut state);

    let result = request_ok(
        &mut state,
        "1",
        "attendance.bulkRecord",
        json!({
            "records": [
                record(&fx.activity_a, &fx.members[0], true, &fx.admin),
                record(&fx.activity_a, &fx.members[1], true, &fx.admin),
                record(&fx.activity_a, &fx.members[2], false, &fx.admin),
            ]
        }),
    );
    assert_eq!(result["recorded"], json!(3));
    assert_eq!(row_count(&mut state, &fx.activity_a), 3);

    // Same pairs again with flipped presence: still three rows.
    let result = request_ok(
        &mut state,
        "2",
        "attendance.bulkRecord",
        json!({
            "records": [
                record(&fx.activity_a, &fx.members[0], false, &fx.admin),
                record(&fx.activity_a, &fx.members[1], false, &fx.admin),
                record(&fx.activity_a, &fx.members[2], true, &fx.admin),
            ]
        }),
    );
    assert_eq!(result["recorded"], json!(3));

    let listed = request_ok(
        &mut state,
        "3",
        "attendance.listByActivity",
        json!({ "activityId": fx.activity_a }),
    );
    let rows = listed["attendance"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    let present_flags: Vec<bool> = rows
        .iter()
        .map(|r| r["isPresent"].as_bool().unwrap())
        .collect();
    assert_eq!(present_flags, vec![false, false, true]);
}

#[test]
fn authorization_is_checked_once_before_any_write() {
    let mut state = open_state("bulk-unauthorized");
    let fx = setup(&mut state);

    let code = request_err(
        &mut state,
        "1",
        "attendance.bulkRecord",
        json!({
            "records": [
                record(&fx.activity_a, &fx.members[0], true, &fx.members[1]),
                record(&fx.activity_a, &fx.members[2], true, &fx.members[1]),
            ]
        }),
    );
    assert_eq!(code, "unauthorized");
    assert_eq!(row_count(&mut state, &fx.activity_a), 0);
}

#[test]
fn mid_batch_write_failure_keeps_earlier_rows() {
    let mut state = open_state("bulk-partial");
    let fx = setup(&mut state);

    // Second record references a user the store has never seen; the
    // referential check fails mid-loop, after the first row committed.
    let resp = request_err(
        &mut state,
        "1",
        "attendance.bulkRecord",
        json!({
            "records": [
                record(&fx.activity_a, &fx.members[0], true, &fx.admin),
                record(&fx.activity_a, "ghost-user", true, &fx.admin),
                record(&fx.activity_a, &fx.members[2], true, &fx.admin),
            ]
        }),
    );
    assert_eq!(resp, "db_update_failed");

    let listed = request_ok(
        &mut state,
        "2",
        "attendance.listByActivity",
        json!({ "activityId": fx.activity_a }),
    );
    let rows = listed["attendance"].as_array().unwrap();
    assert_eq!(rows.len(), 1, "first write stays committed, rest abort");
    assert_eq!(rows[0]["userId"].as_str().unwrap(), fx.members[0]);
}
