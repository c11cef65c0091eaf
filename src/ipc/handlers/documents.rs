use super::with_conn;
use crate::clock::Clock;
use crate::ipc::error::{get_i64, get_opt_str, get_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const DOCUMENT_COLUMNS: &str = "id, user_id, activity_id, group_id, title, description, \
                                file_path, file_name, file_size, mime_type, document_type, \
                                uploaded_by, created_at";

fn document_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "userId": r.get::<_, Option<String>>(1)?,
        "activityId": r.get::<_, Option<String>>(2)?,
        "groupId": r.get::<_, Option<String>>(3)?,
        "title": r.get::<_, String>(4)?,
        "description": r.get::<_, Option<String>>(5)?,
        "filePath": r.get::<_, String>(6)?,
        "fileName": r.get::<_, String>(7)?,
        "fileSize": r.get::<_, i64>(8)?,
        "mimeType": r.get::<_, String>(9)?,
        "documentType": r.get::<_, String>(10)?,
        "uploadedBy": r.get::<_, String>(11)?,
        "createdAt": r.get::<_, String>(12)?,
    }))
}

fn require_row(conn: &Connection, table: &str, id: &str, what: &str) -> Result<(), HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let exists = conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found(format!("{} not found", what)));
    }
    Ok(())
}

/// Stores metadata only; the file itself lives wherever the caller put it.
fn upload(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_opt_str(params, "userId")?;
    let activity_id = get_opt_str(params, "activityId")?;
    let group_id = get_opt_str(params, "groupId")?;
    let title = get_str(params, "title")?;
    let description = get_opt_str(params, "description")?;
    let file_path = get_str(params, "filePath")?;
    let file_name = get_str(params, "fileName")?;
    let file_size = get_i64(params, "fileSize")?;
    let mime_type = get_str(params, "mimeType")?;
    let document_type = get_str(params, "documentType")?;
    let uploaded_by = get_str(params, "uploadedBy")?;

    require_row(conn, "users", &uploaded_by, "uploader")?;
    if let Some(u) = &user_id {
        require_row(conn, "users", u, "user")?;
    }
    if let Some(a) = &activity_id {
        require_row(conn, "activities", a, "activity")?;
    }
    if let Some(g) = &group_id {
        require_row(conn, "groups", g, "group")?;
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO documents(id, user_id, activity_id, group_id, title, description,
                               file_path, file_name, file_size, mime_type, document_type,
                               uploaded_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &user_id,
            &activity_id,
            &group_id,
            &title,
            &description,
            &file_path,
            &file_name,
            file_size,
            &mime_type,
            &document_type,
            &uploaded_by,
            &clock.timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "documents"))?;

    conn.query_row(
        &format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS),
        [&id],
        document_json,
    )
    .map_err(HandlerErr::db)
}

fn list_by(
    conn: &Connection,
    params: &serde_json::Value,
    key: &str,
    column: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_str(params, key)?;
    let sql = format!(
        "SELECT {} FROM documents WHERE {} = ? ORDER BY created_at DESC, rowid",
        DOCUMENT_COLUMNS, column
    );
    let mut stmt = conn.prepare(&sql)?;
    let documents = stmt
        .query_map([&id], document_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "documents": documents }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_str(params, "id")?;
    conn.query_row(
        &format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS),
        [&id],
        document_json,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("document not found"))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_str(params, "id")?;
    let changed = conn
        .execute("DELETE FROM documents WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db_update(e, "documents"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("document not found"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let clock = state.clock;
    match req.method.as_str() {
        "documents.upload" => Some(with_conn(state, req, |conn, params| {
            upload(conn, &clock, params)
        })),
        "documents.listByUser" => Some(with_conn(state, req, |conn, params| {
            list_by(conn, params, "userId", "user_id")
        })),
        "documents.listByActivity" => Some(with_conn(state, req, |conn, params| {
            list_by(conn, params, "activityId", "activity_id")
        })),
        "documents.listByGroup" => Some(with_conn(state, req, |conn, params| {
            list_by(conn, params, "groupId", "group_id")
        })),
        "documents.get" => Some(with_conn(state, req, get)),
        "documents.delete" => Some(with_conn(state, req, delete)),
        _ => None,
    }
}
