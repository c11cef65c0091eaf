use super::with_conn;
use crate::clock::Clock;
use crate::ipc::error::{get_bool, get_opt_bool, get_opt_str, get_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const GROUP_COLUMNS: &str =
    "id, name, type, level, region_id, subject_id, description, is_active, created_at";

fn group_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "type": r.get::<_, String>(2)?,
        "level": r.get::<_, String>(3)?,
        "regionId": r.get::<_, String>(4)?,
        "subjectId": r.get::<_, Option<String>>(5)?,
        "description": r.get::<_, Option<String>>(6)?,
        "isActive": r.get::<_, i64>(7)? != 0,
        "createdAt": r.get::<_, String>(8)?,
    }))
}

fn create_group(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_str(params, "name")?;
    let group_type = get_str(params, "type")?;
    if group_type != "mgmp" && group_type != "mkks" {
        return Err(HandlerErr::bad_params("type must be mgmp or mkks"));
    }
    let level = get_str(params, "level")?;
    let region_id = get_str(params, "regionId")?;
    let subject_id = get_opt_str(params, "subjectId")?;
    let description = get_opt_str(params, "description")?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO groups(id, name, type, level, region_id, subject_id, description,
                            is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &id,
            &name,
            &group_type,
            &level,
            &region_id,
            &subject_id,
            &description,
            &clock.timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "groups"))?;

    conn.query_row(
        &format!("SELECT {} FROM groups WHERE id = ?", GROUP_COLUMNS),
        [&id],
        group_json,
    )
    .map_err(HandlerErr::db)
}

fn list_groups(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM groups WHERE is_active = 1 ORDER BY name",
        GROUP_COLUMNS
    ))?;
    let groups = stmt
        .query_map([], group_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "groups": groups }))
}

fn get_group(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_str(params, "id")?;
    conn.query_row(
        &format!("SELECT {} FROM groups WHERE id = ?", GROUP_COLUMNS),
        [&id],
        group_json,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("group not found"))
}

/// Adding an existing member is a reported no-op, never an error.
fn add_member(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_str(params, "groupId")?;
    let user_id = get_str(params, "userId")?;
    let is_admin = get_opt_bool(params, "isAdmin")?.unwrap_or(false);

    let group_exists = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&group_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !group_exists {
        return Err(HandlerErr::not_found("group not found"));
    }
    let user_exists = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !user_exists {
        return Err(HandlerErr::not_found("user not found"));
    }

    let already = conn
        .query_row(
            "SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?",
            (&group_id, &user_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if already {
        return Ok(json!({ "added": false, "alreadyMember": true }));
    }

    conn.execute(
        "INSERT INTO group_members(group_id, user_id, is_admin, joined_at) VALUES(?, ?, ?, ?)",
        (&group_id, &user_id, is_admin as i64, &clock.timestamp()),
    )
    .map_err(|e| HandlerErr::db_update(e, "group_members"))?;
    Ok(json!({ "added": true, "alreadyMember": false }))
}

fn remove_member(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_str(params, "groupId")?;
    let user_id = get_str(params, "userId")?;
    conn.execute(
        "DELETE FROM group_members WHERE group_id = ? AND user_id = ?",
        (&group_id, &user_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "group_members"))?;
    Ok(json!({ "removed": true }))
}

fn list_members(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_str(params, "groupId")?;
    let mut stmt = conn.prepare(
        "SELECT gm.group_id, gm.user_id, gm.is_admin, gm.joined_at,
                u.full_name, u.email, u.role
         FROM group_members gm
         JOIN users u ON u.id = gm.user_id
         WHERE gm.group_id = ?
         ORDER BY gm.rowid",
    )?;
    let members = stmt
        .query_map([&group_id], |r| {
            Ok(json!({
                "groupId": r.get::<_, String>(0)?,
                "userId": r.get::<_, String>(1)?,
                "isAdmin": r.get::<_, i64>(2)? != 0,
                "joinedAt": r.get::<_, String>(3)?,
                "fullName": r.get::<_, String>(4)?,
                "email": r.get::<_, String>(5)?,
                "role": r.get::<_, String>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "members": members }))
}

fn set_admin(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_str(params, "groupId")?;
    let user_id = get_str(params, "userId")?;
    let is_admin = get_bool(params, "isAdmin")?;

    // The admin flag only exists on a membership row.
    let changed = conn
        .execute(
            "UPDATE group_members SET is_admin = ? WHERE group_id = ? AND user_id = ?",
            (is_admin as i64, &group_id, &user_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "group_members"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("membership not found"));
    }
    Ok(json!({ "groupId": group_id, "userId": user_id, "isAdmin": is_admin }))
}

/// Full membership union, unlike the dashboard's first-group counting.
fn list_mine(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_str(params, "userId")?;
    let mut stmt = conn.prepare(
        "SELECT g.id, g.name, g.type, g.level, g.region_id, g.subject_id, g.description,
                g.is_active, g.created_at
         FROM groups g
         JOIN group_members gm ON gm.group_id = g.id
         WHERE gm.user_id = ? AND g.is_active = 1
         ORDER BY gm.rowid",
    )?;
    let groups = stmt
        .query_map([&user_id], group_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "groups": groups }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let clock = state.clock;
    match req.method.as_str() {
        "groups.create" => Some(with_conn(state, req, |conn, params| {
            create_group(conn, &clock, params)
        })),
        "groups.list" => Some(with_conn(state, req, list_groups)),
        "groups.get" => Some(with_conn(state, req, get_group)),
        "groups.addMember" => Some(with_conn(state, req, |conn, params| {
            add_member(conn, &clock, params)
        })),
        "groups.removeMember" => Some(with_conn(state, req, remove_member)),
        "groups.members" => Some(with_conn(state, req, list_members)),
        "groups.setAdmin" => Some(with_conn(state, req, set_admin)),
        "groups.listMine" => Some(with_conn(state, req, list_mine)),
        _ => None,
    }
}
