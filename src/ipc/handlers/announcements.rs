use super::with_conn;
use crate::clock::Clock;
use crate::ipc::error::{get_bool, get_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, Row};
use serde_json::json;
use uuid::Uuid;

fn announcement_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "title": r.get::<_, String>(1)?,
        "content": r.get::<_, String>(2)?,
        "isActive": r.get::<_, i64>(3)? != 0,
        "createdBy": r.get::<_, String>(4)?,
        "createdAt": r.get::<_, String>(5)?,
    }))
}

fn create(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let title = get_str(params, "title")?;
    let content = get_str(params, "content")?;
    let created_by = get_str(params, "createdBy")?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO announcements(id, title, content, is_active, created_by, created_at)
         VALUES(?, ?, ?, 1, ?, ?)",
        (&id, &title, &content, &created_by, &clock.timestamp()),
    )
    .map_err(|e| HandlerErr::db_update(e, "announcements"))?;
    Ok(json!({ "id": id, "title": title, "content": content, "isActive": true }))
}

fn list_active(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, title, content, is_active, created_by, created_at
         FROM announcements WHERE is_active = 1 ORDER BY created_at DESC, rowid",
    )?;
    let announcements = stmt
        .query_map([], announcement_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "announcements": announcements }))
}

fn list_all(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, title, content, is_active, created_by, created_at
         FROM announcements ORDER BY created_at DESC, rowid",
    )?;
    let announcements = stmt
        .query_map([], announcement_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "announcements": announcements }))
}

fn set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_str(params, "id")?;
    let is_active = get_bool(params, "isActive")?;
    let changed = conn
        .execute(
            "UPDATE announcements SET is_active = ? WHERE id = ?",
            (is_active as i64, &id),
        )
        .map_err(|e| HandlerErr::db_update(e, "announcements"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("announcement not found"));
    }
    Ok(json!({ "id": id, "isActive": is_active }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_str(params, "id")?;
    let changed = conn
        .execute("DELETE FROM announcements WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db_update(e, "announcements"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("announcement not found"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let clock = state.clock;
    match req.method.as_str() {
        "announcements.create" => Some(with_conn(state, req, |conn, params| {
            create(conn, &clock, params)
        })),
        "announcements.listActive" => Some(with_conn(state, req, list_active)),
        "announcements.listAll" => Some(with_conn(state, req, list_all)),
        "announcements.setActive" => Some(with_conn(state, req, set_active)),
        "announcements.delete" => Some(with_conn(state, req, delete)),
        _ => None,
    }
}
