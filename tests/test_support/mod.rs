#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use mgmpd::clock::Clock;
use mgmpd::ipc::{handle_request, AppState, Request};

static WORKSPACE_SEQ: AtomicU64 = AtomicU64::new(0);

/// All scenarios run at a pinned instant so date partitioning and month
/// bucketing are reproducible: 2024-08-15T10:00:00Z.
pub fn fixed_clock() -> Clock {
    Clock::Fixed(Utc.with_ymd_and_hms(2024, 8, 15, 10, 0, 0).unwrap())
}

pub const FIXED_TS: &str = "2024-08-15T10:00:00Z";
pub const TODAY: &str = "2024-08-15";
pub const TOMORROW: &str = "2024-08-16";
pub const YESTERDAY: &str = "2024-08-14";

pub fn temp_dir(tag: &str) -> PathBuf {
    let seq = WORKSPACE_SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("mgmpd-{}-{}-{}", tag, std::process::id(), seq))
}

/// Fresh state with a fixed clock and an open workspace in a temp dir.
pub fn open_state(tag: &str) -> AppState {
    let mut state = AppState::new(fixed_clock());
    let workspace = temp_dir(tag);
    let resp = request(
        &mut state,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(resp["ok"], json!(true), "workspace.select failed: {resp}");
    state
}

pub fn request(
    state: &mut AppState,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    handle_request(
        state,
        Request {
            id: id.to_string(),
            method: method.to_string(),
            params,
        },
    )
}

/// Sends a request and unwraps the result payload.
pub fn request_ok(
    state: &mut AppState,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let resp = request(state, id, method, params);
    assert_eq!(resp["ok"], json!(true), "{method} failed: {resp}");
    resp["result"].clone()
}

/// Sends a request expected to fail and returns the error code.
pub fn request_err(
    state: &mut AppState,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let resp = request(state, id, method, params);
    assert_eq!(resp["ok"], json!(false), "{method} unexpectedly ok: {resp}");
    resp["error"]["code"]
        .as_str()
        .expect("error code")
        .to_string()
}

pub fn seed_region(state: &mut AppState, name: &str) -> String {
    let result = request_ok(
        state,
        "seed-region",
        "masterData.regions.create",
        json!({ "name": name, "code": name.to_ascii_uppercase() }),
    );
    result["id"].as_str().expect("region id").to_string()
}

pub fn seed_school(state: &mut AppState, name: &str, region_id: &str) -> String {
    let result = request_ok(
        state,
        "seed-school",
        "masterData.schools.create",
        json!({
            "name": name,
            "npsn": "12345678",
            "address": "Jl. Pendidikan 1",
            "level": "smp",
            "regionId": region_id,
        }),
    );
    result["id"].as_str().expect("school id").to_string()
}

pub fn seed_user(
    state: &mut AppState,
    username: &str,
    role: &str,
    region_id: Option<&str>,
    school_id: Option<&str>,
) -> String {
    let result = request_ok(
        state,
        "seed-user",
        "users.create",
        json!({
            "username": username,
            "email": format!("{}@disdik.example", username),
            "password": "rahasia123",
            "fullName": format!("User {}", username),
            "role": role,
            "regionId": region_id,
            "schoolId": school_id,
            "level": "smp",
        }),
    );
    result["id"].as_str().expect("user id").to_string()
}

pub fn seed_group(state: &mut AppState, name: &str, region_id: &str) -> String {
    let result = request_ok(
        state,
        "seed-group",
        "groups.create",
        json!({
            "name": name,
            "type": "mgmp",
            "level": "smp",
            "regionId": region_id,
        }),
    );
    result["id"].as_str().expect("group id").to_string()
}

pub fn add_member(state: &mut AppState, group_id: &str, user_id: &str, is_admin: bool) {
    request_ok(
        state,
        "seed-member",
        "groups.addMember",
        json!({ "groupId": group_id, "userId": user_id, "isAdmin": is_admin }),
    );
}

pub fn seed_activity(
    state: &mut AppState,
    group_id: &str,
    date: &str,
    created_by: &str,
) -> String {
    let result = request_ok(
        state,
        "seed-activity",
        "activities.create",
        json!({
            "groupId": group_id,
            "title": format!("Kegiatan {}", date),
            "activityDate": date,
            "startTime": "09:00",
            "endTime": "12:00",
            "location": "Aula Dinas",
            "fundingSource": "apbd",
            "createdBy": created_by,
        }),
    );
    result["id"].as_str().expect("activity id").to_string()
}

pub fn set_status(state: &mut AppState, activity_id: &str, status: &str) {
    request_ok(
        state,
        "seed-status",
        "activities.setStatus",
        json!({ "id": activity_id, "status": status }),
    );
}

/// draft -> published -> ongoing -> completed, driven through the handler.
pub fn complete_activity(state: &mut AppState, activity_id: &str) {
    set_status(state, activity_id, "published");
    set_status(state, activity_id, "ongoing");
    set_status(state, activity_id, "completed");
}
