use super::with_conn;
use crate::clock::Clock;
use crate::ipc::error::{get_bool, get_opt_bool, get_opt_str, get_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scope::Role;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, email, full_name, nip, role, school_id, region_id, \
                            level, is_active, last_login, created_at";

fn user_json_from_row(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "username": r.get::<_, String>(1)?,
        "email": r.get::<_, String>(2)?,
        "fullName": r.get::<_, String>(3)?,
        "nip": r.get::<_, Option<String>>(4)?,
        "role": r.get::<_, String>(5)?,
        "schoolId": r.get::<_, Option<String>>(6)?,
        "regionId": r.get::<_, Option<String>>(7)?,
        "level": r.get::<_, Option<String>>(8)?,
        "isActive": r.get::<_, i64>(9)? != 0,
        "lastLogin": r.get::<_, Option<String>>(10)?,
        "createdAt": r.get::<_, String>(11)?,
    }))
}

/// The password hash never leaves the store through this shape.
pub fn load_user_json(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
        [user_id],
        user_json_from_row,
    )
    .optional()
    .map_err(HandlerErr::db)
}

fn create_user(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let username = get_str(params, "username")?;
    let email = get_str(params, "email")?;
    let password = get_str(params, "password")?;
    let full_name = get_str(params, "fullName")?;
    let nip = get_opt_str(params, "nip")?;
    let role_str = get_str(params, "role")?;
    let school_id = get_opt_str(params, "schoolId")?;
    let region_id = get_opt_str(params, "regionId")?;
    let level = get_opt_str(params, "level")?;

    let role = Role::parse(&role_str)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown role: {}", role_str)))?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, email, password_hash, full_name, nip, role,
                           school_id, region_id, level, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &id,
            &username,
            &email,
            &super::auth::hash_password(&password),
            &full_name,
            &nip,
            role.as_str(),
            &school_id,
            &region_id,
            &level,
            &clock.timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "users"))?;

    load_user_json(conn, &id)?.ok_or_else(|| HandlerErr::not_found("user not found"))
}

fn list_users(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(role) = get_opt_str(params, "role")? {
        conditions.push("role = ?");
        values.push(Value::Text(role));
    }
    if let Some(region_id) = get_opt_str(params, "regionId")? {
        conditions.push("region_id = ?");
        values.push(Value::Text(region_id));
    }
    if let Some(school_id) = get_opt_str(params, "schoolId")? {
        conditions.push("school_id = ?");
        values.push(Value::Text(school_id));
    }
    if let Some(is_active) = get_opt_bool(params, "isActive")? {
        conditions.push("is_active = ?");
        values.push(Value::Integer(is_active as i64));
    }

    let mut sql = format!("SELECT {} FROM users", USER_COLUMNS);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY full_name, rowid");

    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params_from_iter(values), user_json_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "users": users }))
}

fn get_user(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_str(params, "id")?;
    load_user_json(conn, &id)?.ok_or_else(|| HandlerErr::not_found("user not found"))
}

fn set_active(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_str(params, "id")?;
    let is_active = get_bool(params, "isActive")?;

    let changed = conn
        .execute(
            "UPDATE users SET is_active = ? WHERE id = ?",
            (is_active as i64, &id),
        )
        .map_err(|e| HandlerErr::db_update(e, "users"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }
    Ok(json!({ "id": id, "isActive": is_active }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => {
            let clock = state.clock;
            Some(with_conn(state, req, |conn, params| {
                create_user(conn, &clock, params)
            }))
        }
        "users.list" => Some(with_conn(state, req, list_users)),
        "users.get" => Some(with_conn(state, req, get_user)),
        "users.setActive" => Some(with_conn(state, req, set_active)),
        _ => None,
    }
}
