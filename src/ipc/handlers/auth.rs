use crate::clock::Clock;
use crate::ipc::error::{get_str, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

// Hashing scheme is an inherited contract with existing password rows, not a
// recommendation.
const PASSWORD_SALT: &str = "mgmp_salt_v1";

pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(PASSWORD_SALT.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn login(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let username = get_str(params, "username")?;
    let password = get_str(params, "password")?;

    let row = conn
        .query_row(
            "SELECT id, password_hash, is_active FROM users WHERE username = ?",
            [&username],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)? != 0,
                ))
            },
        )
        .optional()?;

    // Unknown username and wrong password are indistinguishable to the caller.
    let Some((user_id, stored_hash, is_active)) = row else {
        return Err(HandlerErr::new(
            "invalid_credentials",
            "invalid username or password",
        ));
    };
    if hash_password(&password) != stored_hash {
        return Err(HandlerErr::new(
            "invalid_credentials",
            "invalid username or password",
        ));
    }
    if !is_active {
        return Err(HandlerErr::new("account_disabled", "account is deactivated"));
    }

    let now = clock.timestamp();
    conn.execute(
        "UPDATE users SET last_login = ? WHERE id = ?",
        (&now, &user_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "users"))?;

    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at) VALUES(?, ?, ?)",
        (&token, &user_id, &now),
    )
    .map_err(|e| HandlerErr::db_update(e, "sessions"))?;

    let user = super::users::load_user_json(conn, &user_id)?
        .ok_or_else(|| HandlerErr::not_found("user not found"))?;
    Ok(json!({ "user": user, "token": token }))
}

fn reset_password(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_str(params, "userId")?;
    let new_password = get_str(params, "newPassword")?;

    let exists = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("user not found"));
    }

    conn.execute(
        "UPDATE users SET password_hash = ? WHERE id = ?",
        (&hash_password(&new_password), &user_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "users"))?;
    Ok(json!({ "reset": true }))
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let clock = state.clock;
    let Some(conn) = state.db.as_ref() else {
        return HandlerErr::new("no_workspace", "select a workspace first").response(&req.id);
    };
    match login(conn, &clock, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_reset_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return HandlerErr::new("no_workspace", "select a workspace first").response(&req.id);
    };
    match reset_password(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.resetPassword" => Some(handle_reset_password(state, req)),
        _ => None,
    }
}
