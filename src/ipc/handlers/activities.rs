use super::with_conn;
use crate::clock::Clock;
use crate::ipc::error::{get_opt_str, get_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const ACTIVITY_COLUMNS: &str = "id, group_id, title, description, activity_date, start_time, \
                                end_time, location, speaker, funding_source, status, created_by, \
                                created_at";

pub(super) fn activity_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "groupId": r.get::<_, String>(1)?,
        "title": r.get::<_, String>(2)?,
        "description": r.get::<_, Option<String>>(3)?,
        "activityDate": r.get::<_, String>(4)?,
        "startTime": r.get::<_, String>(5)?,
        "endTime": r.get::<_, String>(6)?,
        "location": r.get::<_, String>(7)?,
        "speaker": r.get::<_, Option<String>>(8)?,
        "fundingSource": r.get::<_, String>(9)?,
        "status": r.get::<_, String>(10)?,
        "createdBy": r.get::<_, String>(11)?,
        "createdAt": r.get::<_, String>(12)?,
    }))
}

fn parse_activity_date(raw: &str) -> Result<String, HandlerErr> {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(d) => Ok(d.format("%Y-%m-%d").to_string()),
        Err(_) => Err(HandlerErr::bad_params("activityDate must be YYYY-MM-DD")),
    }
}

/// draft -> published -> ongoing -> completed, cancel from any non-terminal.
fn transition_allowed(from: &str, to: &str) -> bool {
    match (from, to) {
        ("draft", "published") => true,
        ("published", "ongoing") => true,
        ("ongoing", "completed") => true,
        ("draft", "cancelled") | ("published", "cancelled") | ("ongoing", "cancelled") => true,
        _ => false,
    }
}

fn create_activity(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_str(params, "groupId")?;
    let title = get_str(params, "title")?;
    let description = get_opt_str(params, "description")?;
    let activity_date = parse_activity_date(&get_str(params, "activityDate")?)?;
    let start_time = get_str(params, "startTime")?;
    let end_time = get_str(params, "endTime")?;
    let location = get_str(params, "location")?;
    let speaker = get_opt_str(params, "speaker")?;
    let funding_source = get_str(params, "fundingSource")?;
    let created_by = get_str(params, "createdBy")?;

    let group_exists = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&group_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !group_exists {
        return Err(HandlerErr::not_found("group not found"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO activities(id, group_id, title, description, activity_date, start_time,
                                end_time, location, speaker, funding_source, status,
                                created_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'draft', ?, ?)",
        (
            &id,
            &group_id,
            &title,
            &description,
            &activity_date,
            &start_time,
            &end_time,
            &location,
            &speaker,
            &funding_source,
            &created_by,
            &clock.timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "activities"))?;

    conn.query_row(
        &format!("SELECT {} FROM activities WHERE id = ?", ACTIVITY_COLUMNS),
        [&id],
        activity_json,
    )
    .map_err(HandlerErr::db)
}

fn list_activities(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(group_id) = get_opt_str(params, "groupId")? {
        conditions.push("group_id = ?");
        values.push(Value::Text(group_id));
    }
    if let Some(status) = get_opt_str(params, "status")? {
        conditions.push("status = ?");
        values.push(Value::Text(status));
    }
    if let Some(date_from) = get_opt_str(params, "dateFrom")? {
        conditions.push("activity_date >= ?");
        values.push(Value::Text(parse_activity_date(&date_from)?));
    }
    if let Some(date_to) = get_opt_str(params, "dateTo")? {
        conditions.push("activity_date <= ?");
        values.push(Value::Text(parse_activity_date(&date_to)?));
    }

    let mut sql = format!("SELECT {} FROM activities", ACTIVITY_COLUMNS);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY activity_date, rowid");

    let mut stmt = conn.prepare(&sql)?;
    let activities = stmt
        .query_map(params_from_iter(values), activity_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "activities": activities }))
}

fn get_activity(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_str(params, "id")?;
    conn.query_row(
        &format!("SELECT {} FROM activities WHERE id = ?", ACTIVITY_COLUMNS),
        [&id],
        activity_json,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("activity not found"))
}

fn set_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_str(params, "id")?;
    let status = get_str(params, "status")?;
    if !matches!(
        status.as_str(),
        "draft" | "published" | "ongoing" | "completed" | "cancelled"
    ) {
        return Err(HandlerErr::bad_params(format!("unknown status: {}", status)));
    }

    let current: Option<String> = conn
        .query_row("SELECT status FROM activities WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(current) = current else {
        return Err(HandlerErr::not_found("activity not found"));
    };

    if !transition_allowed(&current, &status) {
        return Err(HandlerErr::new(
            "invalid_transition",
            format!("cannot move activity from {} to {}", current, status),
        ));
    }

    conn.execute(
        "UPDATE activities SET status = ? WHERE id = ?",
        (&status, &id),
    )
    .map_err(|e| HandlerErr::db_update(e, "activities"))?;
    Ok(json!({ "id": id, "status": status }))
}

/// Activities in any of the caller's groups dated today or later.
fn upcoming(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_str(params, "userId")?;
    let today = clock.today().format("%Y-%m-%d").to_string();
    let mut stmt = conn.prepare(
        "SELECT a.id, a.group_id, a.title, a.description, a.activity_date, a.start_time,
                a.end_time, a.location, a.speaker, a.funding_source, a.status, a.created_by,
                a.created_at
         FROM activities a
         JOIN group_members gm ON gm.group_id = a.group_id
         WHERE gm.user_id = ? AND a.activity_date >= ?
         ORDER BY a.activity_date, a.rowid",
    )?;
    let activities = stmt
        .query_map((&user_id, &today), activity_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "activities": activities }))
}

fn list_by_group(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_str(params, "groupId")?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM activities WHERE group_id = ? ORDER BY activity_date, rowid",
        ACTIVITY_COLUMNS
    ))?;
    let activities = stmt
        .query_map([&group_id], activity_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "activities": activities }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let clock = state.clock;
    match req.method.as_str() {
        "activities.create" => Some(with_conn(state, req, |conn, params| {
            create_activity(conn, &clock, params)
        })),
        "activities.list" => Some(with_conn(state, req, list_activities)),
        "activities.get" => Some(with_conn(state, req, get_activity)),
        "activities.setStatus" => Some(with_conn(state, req, set_status)),
        "activities.upcoming" => Some(with_conn(state, req, |conn, params| {
            upcoming(conn, &clock, params)
        })),
        "activities.listByGroup" => Some(with_conn(state, req, list_by_group)),
        _ => None,
    }
}
