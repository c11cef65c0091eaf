use super::with_conn;
use crate::clock::Clock;
use crate::ipc::error::{get_opt_str, get_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scope::Role;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Loads the supervisor and checks the role gate shared by assignment and
/// report creation.
fn require_supervisor(conn: &Connection, supervisor_id: &str) -> Result<(), HandlerErr> {
    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [supervisor_id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(role) = role else {
        return Err(HandlerErr::not_found("supervisor not found"));
    };
    let supervisory = Role::parse(&role).map(Role::is_supervisory).unwrap_or(false);
    if !supervisory {
        return Err(HandlerErr::new(
            "role_mismatch",
            "user does not have a supervisory role",
        ));
    }
    Ok(())
}

fn require_school(conn: &Connection, school_id: &str) -> Result<(), HandlerErr> {
    let exists = conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [school_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("school not found"));
    }
    Ok(())
}

fn assignment_exists(
    conn: &Connection,
    supervisor_id: &str,
    school_id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM school_supervision WHERE supervisor_id = ? AND school_id = ?",
        (supervisor_id, school_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

/// Re-assigning an already-assigned school is a success no-op.
fn assign(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let supervisor_id = get_str(params, "supervisorId")?;
    let school_id = get_str(params, "schoolId")?;
    require_supervisor(conn, &supervisor_id)?;
    require_school(conn, &school_id)?;

    if assignment_exists(conn, &supervisor_id, &school_id)? {
        return Ok(json!({ "assigned": true, "alreadyAssigned": true }));
    }

    conn.execute(
        "INSERT INTO school_supervision(supervisor_id, school_id, assigned_at) VALUES(?, ?, ?)",
        (&supervisor_id, &school_id, &clock.timestamp()),
    )
    .map_err(|e| HandlerErr::db_update(e, "school_supervision"))?;
    Ok(json!({ "assigned": true, "alreadyAssigned": false }))
}

/// Removing an absent assignment is not an error.
fn remove(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let supervisor_id = get_str(params, "supervisorId")?;
    let school_id = get_str(params, "schoolId")?;
    conn.execute(
        "DELETE FROM school_supervision WHERE supervisor_id = ? AND school_id = ?",
        (&supervisor_id, &school_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "school_supervision"))?;
    Ok(json!({ "removed": true }))
}

fn supervised_schools(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let supervisor_id = get_str(params, "supervisorId")?;
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.npsn, s.address, s.level, s.region_id, ss.assigned_at
         FROM school_supervision ss
         JOIN schools s ON s.id = ss.school_id
         WHERE ss.supervisor_id = ?
         ORDER BY ss.rowid",
    )?;
    let schools = stmt
        .query_map([&supervisor_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "npsn": r.get::<_, String>(2)?,
                "address": r.get::<_, String>(3)?,
                "level": r.get::<_, String>(4)?,
                "regionId": r.get::<_, String>(5)?,
                "assignedAt": r.get::<_, String>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "schools": schools }))
}

fn create_report(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let supervisor_id = get_str(params, "supervisorId")?;
    let school_id = get_str(params, "schoolId")?;
    let visit_date = get_str(params, "visitDate")?;
    let title = get_str(params, "title")?;
    let description = get_opt_str(params, "description")?;
    let file_path = get_str(params, "filePath")?;
    let file_name = get_str(params, "fileName")?;

    require_supervisor(conn, &supervisor_id)?;
    require_school(conn, &school_id)?;

    // The assignment edge is the authority to report on this school.
    if !assignment_exists(conn, &supervisor_id, &school_id)? {
        return Err(HandlerErr::new(
            "unassigned",
            "supervisor has no assignment for this school",
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO supervision_reports(id, supervisor_id, school_id, visit_date, title,
                                         description, file_path, file_name, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &supervisor_id,
            &school_id,
            &visit_date,
            &title,
            &description,
            &file_path,
            &file_name,
            &clock.timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "supervision_reports"))?;

    Ok(json!({
        "id": id,
        "supervisorId": supervisor_id,
        "schoolId": school_id,
        "visitDate": visit_date,
        "title": title,
        "description": description,
        "filePath": file_path,
        "fileName": file_name,
    }))
}

fn report_json(r: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "supervisorId": r.get::<_, String>(1)?,
        "schoolId": r.get::<_, String>(2)?,
        "visitDate": r.get::<_, String>(3)?,
        "title": r.get::<_, String>(4)?,
        "description": r.get::<_, Option<String>>(5)?,
        "filePath": r.get::<_, String>(6)?,
        "fileName": r.get::<_, String>(7)?,
        "createdAt": r.get::<_, String>(8)?,
    }))
}

const REPORT_COLUMNS: &str = "id, supervisor_id, school_id, visit_date, title, description, \
                              file_path, file_name, created_at";

fn reports_by_supervisor(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let supervisor_id = get_str(params, "supervisorId")?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM supervision_reports WHERE supervisor_id = ? ORDER BY visit_date DESC, rowid",
        REPORT_COLUMNS
    ))?;
    let reports = stmt
        .query_map([&supervisor_id], report_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "reports": reports }))
}

fn reports_by_school(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_str(params, "schoolId")?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM supervision_reports WHERE school_id = ? ORDER BY visit_date DESC, rowid",
        REPORT_COLUMNS
    ))?;
    let reports = stmt
        .query_map([&school_id], report_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "reports": reports }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let clock = state.clock;
    match req.method.as_str() {
        "supervision.assign" => Some(with_conn(state, req, |conn, params| {
            assign(conn, &clock, params)
        })),
        "supervision.remove" => Some(with_conn(state, req, remove)),
        "supervision.schools" => Some(with_conn(state, req, supervised_schools)),
        "supervision.createReport" => Some(with_conn(state, req, |conn, params| {
            create_report(conn, &clock, params)
        })),
        "supervision.reportsBySupervisor" => Some(with_conn(state, req, reports_by_supervisor)),
        "supervision.reportsBySchool" => Some(with_conn(state, req, reports_by_school)),
        _ => None,
    }
}
