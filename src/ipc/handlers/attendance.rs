use super::with_conn;
use crate::clock::Clock;
use crate::ipc::error::{get_bool, get_opt_str, get_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scope::Role;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct AttendanceInput {
    activity_id: String,
    user_id: String,
    is_present: bool,
    notes: Option<String>,
    recorded_by: String,
}

fn parse_input(params: &serde_json::Value) -> Result<AttendanceInput, HandlerErr> {
    Ok(AttendanceInput {
        activity_id: get_str(params, "activityId")?,
        user_id: get_str(params, "userId")?,
        is_present: get_bool(params, "isPresent")?,
        notes: get_opt_str(params, "notes")?,
        recorded_by: get_str(params, "recordedBy")?,
    })
}

fn owning_group(conn: &Connection, activity_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT group_id FROM activities WHERE id = ?",
        [activity_id],
        |r| r.get::<_, String>(0),
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("activity not found"))
}

/// Recorder must hold an admin-flagged membership of the activity's group.
/// A super_admin recorder bypasses the membership check entirely; this is an
/// explicit capability override, not role inheritance.
fn authorize_recorder(
    conn: &Connection,
    group_id: &str,
    recorder_id: &str,
) -> Result<(), HandlerErr> {
    let recorder_role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [recorder_id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(recorder_role) = recorder_role else {
        return Err(HandlerErr::not_found("recorder not found"));
    };
    if Role::parse(&recorder_role) == Some(Role::SuperAdmin) {
        return Ok(());
    }

    let is_group_admin = conn
        .query_row(
            "SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ? AND is_admin = 1",
            (group_id, recorder_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !is_group_admin {
        return Err(HandlerErr::new(
            "unauthorized",
            "recorder is not an admin of the activity's group",
        ));
    }
    Ok(())
}

fn attendance_row_json(
    conn: &Connection,
    activity_id: &str,
    user_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    conn.query_row(
        "SELECT activity_id, user_id, is_present, notes, recorded_by, recorded_at
         FROM attendance WHERE activity_id = ? AND user_id = ?",
        (activity_id, user_id),
        |r| {
            Ok(json!({
                "activityId": r.get::<_, String>(0)?,
                "userId": r.get::<_, String>(1)?,
                "isPresent": r.get::<_, i64>(2)? != 0,
                "notes": r.get::<_, Option<String>>(3)?,
                "recordedBy": r.get::<_, String>(4)?,
                "recordedAt": r.get::<_, String>(5)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::db)
}

/// One attendance fact per (activity, user): overwrite when the pair exists,
/// insert otherwise. Returns the post-write row.
fn upsert_attendance(
    conn: &Connection,
    clock: &Clock,
    input: &AttendanceInput,
) -> Result<serde_json::Value, HandlerErr> {
    let existing = conn
        .query_row(
            "SELECT 1 FROM attendance WHERE activity_id = ? AND user_id = ?",
            (&input.activity_id, &input.user_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();

    if existing {
        conn.execute(
            "UPDATE attendance
             SET is_present = ?, notes = ?, recorded_by = ?, recorded_at = ?
             WHERE activity_id = ? AND user_id = ?",
            (
                input.is_present as i64,
                &input.notes,
                &input.recorded_by,
                &clock.timestamp(),
                &input.activity_id,
                &input.user_id,
            ),
        )
        .map_err(|e| HandlerErr::db_update(e, "attendance"))?;
    } else {
        conn.execute(
            "INSERT INTO attendance(activity_id, user_id, is_present, notes, recorded_by,
                                    recorded_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &input.activity_id,
                &input.user_id,
                input.is_present as i64,
                &input.notes,
                &input.recorded_by,
                &clock.timestamp(),
            ),
        )
        .map_err(|e| HandlerErr::db_update(e, "attendance"))?;
    }

    attendance_row_json(conn, &input.activity_id, &input.user_id)?
        .ok_or_else(|| HandlerErr::not_found("attendance row vanished after write"))
}

fn record(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let input = parse_input(params)?;
    let group_id = owning_group(conn, &input.activity_id)?;
    authorize_recorder(conn, &group_id, &input.recorded_by)?;
    upsert_attendance(conn, clock, &input)
}

/// Ordered, non-atomic bulk apply. Consistency and authorization are checked
/// before the first write, so taxonomy failures leave zero rows; a storage
/// failure mid-loop aborts the rest but keeps earlier writes.
fn bulk_record(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(raw_records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing records"));
    };
    if raw_records.is_empty() {
        return Ok(json!({ "recorded": 0 }));
    }

    let mut inputs = Vec::with_capacity(raw_records.len());
    for raw in raw_records {
        inputs.push(parse_input(raw)?);
    }

    let activity_id = inputs[0].activity_id.clone();
    let recorded_by = inputs[0].recorded_by.clone();
    let consistent = inputs
        .iter()
        .all(|i| i.activity_id == activity_id && i.recorded_by == recorded_by);
    if !consistent {
        return Err(HandlerErr::new(
            "inconsistent_batch",
            "all records must share one activity and one recorder",
        ));
    }

    let group_id = owning_group(conn, &activity_id)?;
    authorize_recorder(conn, &group_id, &recorded_by)?;

    let mut recorded = 0usize;
    for input in &inputs {
        upsert_attendance(conn, clock, input)?;
        recorded += 1;
    }
    Ok(json!({ "recorded": recorded }))
}

fn list_by_activity(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let activity_id = get_str(params, "activityId")?;
    let mut stmt = conn.prepare(
        "SELECT activity_id, user_id, is_present, notes, recorded_by, recorded_at
         FROM attendance WHERE activity_id = ? ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([&activity_id], |r| {
            Ok(json!({
                "activityId": r.get::<_, String>(0)?,
                "userId": r.get::<_, String>(1)?,
                "isPresent": r.get::<_, i64>(2)? != 0,
                "notes": r.get::<_, Option<String>>(3)?,
                "recordedBy": r.get::<_, String>(4)?,
                "recordedAt": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "attendance": rows }))
}

fn get_for_user(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let activity_id = get_str(params, "activityId")?;
    let user_id = get_str(params, "userId")?;
    let row = attendance_row_json(conn, &activity_id, &user_id)?;
    Ok(json!({ "attendance": row }))
}

fn history(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_str(params, "userId")?;
    let mut stmt = conn.prepare(
        "SELECT att.activity_id, att.is_present, att.notes, att.recorded_at,
                a.title, a.activity_date, g.name
         FROM attendance att
         JOIN activities a ON a.id = att.activity_id
         JOIN groups g ON g.id = a.group_id
         WHERE att.user_id = ?
         ORDER BY a.activity_date DESC, att.rowid",
    )?;
    let rows = stmt
        .query_map([&user_id], |r| {
            Ok(json!({
                "activityId": r.get::<_, String>(0)?,
                "isPresent": r.get::<_, i64>(1)? != 0,
                "notes": r.get::<_, Option<String>>(2)?,
                "recordedAt": r.get::<_, String>(3)?,
                "activityTitle": r.get::<_, String>(4)?,
                "activityDate": r.get::<_, String>(5)?,
                "groupName": r.get::<_, String>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "history": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let clock = state.clock;
    match req.method.as_str() {
        "attendance.record" => Some(with_conn(state, req, |conn, params| {
            record(conn, &clock, params)
        })),
        "attendance.bulkRecord" => Some(with_conn(state, req, |conn, params| {
            bulk_record(conn, &clock, params)
        })),
        "attendance.listByActivity" => Some(with_conn(state, req, list_by_activity)),
        "attendance.getForUser" => Some(with_conn(state, req, get_for_user)),
        "attendance.history" => Some(with_conn(state, req, history)),
        _ => None,
    }
}
