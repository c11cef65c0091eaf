mod test_support;

use serde_json::json;
use test_support::{open_state, request_err, request_ok, seed_region, seed_school, seed_user};

#[test]
fn health_reports_the_selected_workspace() {
    let mut state = open_state("core-health");
    let health = request_ok(&mut state, "1", "health", json!({}));
    assert!(health["workspacePath"].as_str().is_some());
    assert_eq!(health["version"], json!(env!("CARGO_PKG_VERSION")));
}

#[test]
fn methods_require_a_workspace() {
    let mut state = mgmpd::ipc::AppState::new(test_support::fixed_clock());
    let resp = test_support::request(&mut state, "1", "users.list", json!({}));
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("no_workspace"));
}

#[test]
fn school_creation_requires_an_existing_region() {
    let mut state = open_state("master-school-region");
    let code = request_err(
        &mut state,
        "1",
        "masterData.schools.create",
        json!({
            "name": "SMPN 99",
            "npsn": "99999999",
            "address": "Jl. Hilang",
            "level": "smp",
            "regionId": "missing",
        }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn schools_filter_by_region() {
    let mut state = open_state("master-schools-filter");
    let r1 = seed_region(&mut state, "Jakarta Pusat");
    let r2 = seed_region(&mut state, "Jakarta Selatan");
    seed_school(&mut state, "SMPN 1", &r1);
    seed_school(&mut state, "SMPN 2", &r2);

    let all = request_ok(&mut state, "1", "masterData.schools.list", json!({}));
    assert_eq!(all["schools"].as_array().unwrap().len(), 2);

    let filtered = request_ok(
        &mut state,
        "2",
        "masterData.schools.list",
        json!({ "regionId": r1 }),
    );
    let schools = filtered["schools"].as_array().unwrap();
    assert_eq!(schools.len(), 1);
    assert_eq!(schools[0]["name"], json!("SMPN 1"));
}

#[test]
fn subjects_filter_by_level() {
    let mut state = open_state("master-subjects");
    request_ok(
        &mut state,
        "1",
        "masterData.subjects.create",
        json!({ "name": "Matematika", "code": "MTK", "level": "smp" }),
    );
    request_ok(
        &mut state,
        "2",
        "masterData.subjects.create",
        json!({ "name": "Fisika", "code": "FIS", "level": "sma" }),
    );

    let filtered = request_ok(
        &mut state,
        "3",
        "masterData.subjects.list",
        json!({ "level": "smp" }),
    );
    let subjects = filtered["subjects"].as_array().unwrap();
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0]["code"], json!("MTK"));
}

#[test]
fn user_listing_filters_compose() {
    let mut state = open_state("users-filters");
    let r1 = seed_region(&mut state, "Jakarta Pusat");
    let r2 = seed_region(&mut state, "Jakarta Selatan");
    let guru1 = seed_user(&mut state, "guru1", "guru", Some(&r1), None);
    seed_user(&mut state, "guru2", "guru", Some(&r2), None);
    seed_user(&mut state, "kacab", "kepala_cabdin", Some(&r1), None);

    let by_role = request_ok(&mut state, "1", "users.list", json!({ "role": "guru" }));
    assert_eq!(by_role["users"].as_array().unwrap().len(), 2);

    let by_both = request_ok(
        &mut state,
        "2",
        "users.list",
        json!({ "role": "guru", "regionId": r1 }),
    );
    let users = by_both["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["id"].as_str().unwrap(), guru1);

    request_ok(
        &mut state,
        "3",
        "users.setActive",
        json!({ "id": guru1, "isActive": false }),
    );
    let active_only = request_ok(
        &mut state,
        "4",
        "users.list",
        json!({ "role": "guru", "isActive": true }),
    );
    assert_eq!(active_only["users"].as_array().unwrap().len(), 1);
}

#[test]
fn user_payloads_never_contain_the_password_hash() {
    let mut state = open_state("users-no-hash");
    let region = seed_region(&mut state, "Bandung");
    let id = seed_user(&mut state, "guru3", "guru", Some(&region), None);

    let user = request_ok(&mut state, "1", "users.get", json!({ "id": id }));
    assert!(user.get("passwordHash").is_none());
    assert!(user.get("password_hash").is_none());
    assert_eq!(user["username"], json!("guru3"));
    assert_eq!(user["isActive"], json!(true));
}

#[test]
fn unknown_roles_are_rejected_at_creation() {
    let mut state = open_state("users-unknown-role");
    let code = request_err(
        &mut state,
        "1",
        "users.create",
        json!({
            "username": "aneh",
            "email": "aneh@disdik.example",
            "password": "rahasia123",
            "fullName": "Role Aneh",
            "role": "principal",
        }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn toggling_activation_is_reversible_and_checked() {
    let mut state = open_state("users-toggle");
    let region = seed_region(&mut state, "Semarang");
    let id = seed_user(&mut state, "guru4", "guru", Some(&region), None);

    request_ok(
        &mut state,
        "1",
        "users.setActive",
        json!({ "id": id, "isActive": false }),
    );
    let user = request_ok(&mut state, "2", "users.get", json!({ "id": id }));
    assert_eq!(user["isActive"], json!(false));

    request_ok(
        &mut state,
        "3",
        "users.setActive",
        json!({ "id": id, "isActive": true }),
    );
    let user = request_ok(&mut state, "4", "users.get", json!({ "id": id }));
    assert_eq!(user["isActive"], json!(true));

    let code = request_err(
        &mut state,
        "5",
        "users.setActive",
        json!({ "id": "missing", "isActive": true }),
    );
    assert_eq!(code, "not_found");
}
