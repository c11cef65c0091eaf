mod test_support;

use serde_json::json;
use test_support::{open_state, request_err, request_ok, seed_region, seed_school, seed_user};

struct Fixture {
    supervisor: String,
    school: String,
}

fn setup(state: &mut mgmpd::ipc::AppState) -> Fixture {
    let region = seed_region(state, "Jakarta Pusat");
    let school = seed_school(state, "SMPN 1", &region);
    let supervisor = seed_user(state, "pengawas1", "pengawas_sekolah", Some(&region), None);
    Fixture { supervisor, school }
}

fn report_input(fx: &Fixture) -> serde_json::Value {
    json!({
        "supervisorId": fx.supervisor,
        "schoolId": fx.school,
        "visitDate": "2024-08-10",
        "title": "Kunjungan Supervisi",
        "filePath": "/uploads/laporan-1.pdf",
        "fileName": "laporan-1.pdf",
    })
}

#[test]
fn assigning_twice_succeeds_with_one_row() {
    let mut state = open_state("supervision-idempotent");
    let fx = setup(&mut state);

    let first = request_ok(
        &mut state,
        "1",
        "supervision.assign",
        json!({ "supervisorId": fx.supervisor, "schoolId": fx.school }),
    );
    assert_eq!(first["assigned"], json!(true));
    assert_eq!(first["alreadyAssigned"], json!(false));

    let second = request_ok(
        &mut state,
        "2",
        "supervision.assign",
        json!({ "supervisorId": fx.supervisor, "schoolId": fx.school }),
    );
    assert_eq!(second["assigned"], json!(true));
    assert_eq!(second["alreadyAssigned"], json!(true));

    let schools = request_ok(
        &mut state,
        "3",
        "supervision.schools",
        json!({ "supervisorId": fx.supervisor }),
    );
    assert_eq!(schools["schools"].as_array().unwrap().len(), 1);
}

#[test]
fn non_supervisory_roles_cannot_be_assigned() {
    let mut state = open_state("supervision-role-mismatch");
    let fx = setup(&mut state);
    let teacher = seed_user(&mut state, "guru1", "guru", None, None);

    let code = request_err(
        &mut state,
        "1",
        "supervision.assign",
        json!({ "supervisorId": teacher, "schoolId": fx.school }),
    );
    assert_eq!(code, "role_mismatch");

    // kepala_bidang belongs to the supervisory set.
    let kabid = seed_user(&mut state, "kabid1", "kepala_bidang", None, None);
    request_ok(
        &mut state,
        "2",
        "supervision.assign",
        json!({ "supervisorId": kabid, "schoolId": fx.school }),
    );
}

#[test]
fn unknown_supervisor_or_school_is_not_found() {
    let mut state = open_state("supervision-not-found");
    let fx = setup(&mut state);

    let code = request_err(
        &mut state,
        "1",
        "supervision.assign",
        json!({ "supervisorId": "missing", "schoolId": fx.school }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut state,
        "2",
        "supervision.assign",
        json!({ "supervisorId": fx.supervisor, "schoolId": "missing" }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn report_requires_a_live_assignment() {
    let mut state = open_state("supervision-unassigned");
    let fx = setup(&mut state);

    let code = request_err(&mut state, "1", "supervision.createReport", report_input(&fx));
    assert_eq!(code, "unassigned");

    request_ok(
        &mut state,
        "2",
        "supervision.assign",
        json!({ "supervisorId": fx.supervisor, "schoolId": fx.school }),
    );
    let report = request_ok(&mut state, "3", "supervision.createReport", report_input(&fx));
    assert_eq!(report["title"], json!("Kunjungan Supervisi"));

    let reports = request_ok(
        &mut state,
        "4",
        "supervision.reportsBySupervisor",
        json!({ "supervisorId": fx.supervisor }),
    );
    assert_eq!(reports["reports"].as_array().unwrap().len(), 1);

    let by_school = request_ok(
        &mut state,
        "5",
        "supervision.reportsBySchool",
        json!({ "schoolId": fx.school }),
    );
    assert_eq!(by_school["reports"].as_array().unwrap().len(), 1);
}

#[test]
fn removal_is_idempotent_and_revokes_reporting() {
    let mut state = open_state("supervision-remove");
    let fx = setup(&mut state);

    request_ok(
        &mut state,
        "1",
        "supervision.assign",
        json!({ "supervisorId": fx.supervisor, "schoolId": fx.school }),
    );
    request_ok(
        &mut state,
        "2",
        "supervision.remove",
        json!({ "supervisorId": fx.supervisor, "schoolId": fx.school }),
    );
    // Absent row: removal still succeeds.
    request_ok(
        &mut state,
        "3",
        "supervision.remove",
        json!({ "supervisorId": fx.supervisor, "schoolId": fx.school }),
    );

    let schools = request_ok(
        &mut state,
        "4",
        "supervision.schools",
        json!({ "supervisorId": fx.supervisor }),
    );
    assert_eq!(schools["schools"].as_array().unwrap().len(), 0);

    let code = request_err(&mut state, "5", "supervision.createReport", report_input(&fx));
    assert_eq!(code, "unassigned");
}
