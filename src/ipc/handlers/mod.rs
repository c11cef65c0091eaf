pub mod activities;
pub mod announcements;
pub mod attendance;
pub mod auth;
pub mod core;
pub mod dashboard;
pub mod documents;
pub mod groups;
pub mod master_data;
pub mod supervision;
pub mod users;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

/// Runs a handler body against the open workspace connection, mapping the
/// missing-workspace case and the error envelope in one place.
pub(crate) fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return HandlerErr::new("no_workspace", "select a workspace first").response(&req.id);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}
