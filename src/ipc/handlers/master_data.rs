use super::with_conn;
use crate::clock::Clock;
use crate::ipc::error::{get_opt_str, get_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

fn region_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "code": r.get::<_, String>(2)?,
        "createdAt": r.get::<_, String>(3)?,
    }))
}

fn school_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "npsn": r.get::<_, String>(2)?,
        "address": r.get::<_, String>(3)?,
        "level": r.get::<_, String>(4)?,
        "regionId": r.get::<_, String>(5)?,
        "createdAt": r.get::<_, String>(6)?,
    }))
}

fn list_regions(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare("SELECT id, name, code, created_at FROM regions ORDER BY name")?;
    let regions = stmt
        .query_map([], region_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "regions": regions }))
}

fn create_region(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_str(params, "name")?;
    let code = get_str(params, "code")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO regions(id, name, code, created_at) VALUES(?, ?, ?, ?)",
        (&id, &name, &code, &clock.timestamp()),
    )
    .map_err(|e| HandlerErr::db_update(e, "regions"))?;
    Ok(json!({ "id": id, "name": name, "code": code }))
}

fn list_schools(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let schools = if let Some(region_id) = get_opt_str(params, "regionId")? {
        let mut stmt = conn.prepare(
            "SELECT id, name, npsn, address, level, region_id, created_at
             FROM schools WHERE region_id = ? ORDER BY name",
        )?;
        let rows = stmt
            .query_map([&region_id], school_json)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    } else {
        let mut stmt = conn.prepare(
            "SELECT id, name, npsn, address, level, region_id, created_at
             FROM schools ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], school_json)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    Ok(json!({ "schools": schools }))
}

fn create_school(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_str(params, "name")?;
    let npsn = get_str(params, "npsn")?;
    let address = get_str(params, "address")?;
    let level = get_str(params, "level")?;
    let region_id = get_str(params, "regionId")?;

    let region_exists = conn
        .query_row("SELECT 1 FROM regions WHERE id = ?", [&region_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !region_exists {
        return Err(HandlerErr::not_found("region not found"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schools(id, name, npsn, address, level, region_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&id, &name, &npsn, &address, &level, &region_id, &clock.timestamp()),
    )
    .map_err(|e| HandlerErr::db_update(e, "schools"))?;
    Ok(json!({ "id": id, "name": name, "npsn": npsn, "level": level, "regionId": region_id }))
}

fn list_subjects(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subjects = if let Some(level) = get_opt_str(params, "level")? {
        let mut stmt = conn.prepare(
            "SELECT id, name, code, level, created_at FROM subjects WHERE level = ? ORDER BY name",
        )?;
        let rows = stmt
            .query_map([&level], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "code": r.get::<_, String>(2)?,
                    "level": r.get::<_, String>(3)?,
                    "createdAt": r.get::<_, String>(4)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    } else {
        let mut stmt = conn
            .prepare("SELECT id, name, code, level, created_at FROM subjects ORDER BY name")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "code": r.get::<_, String>(2)?,
                    "level": r.get::<_, String>(3)?,
                    "createdAt": r.get::<_, String>(4)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    Ok(json!({ "subjects": subjects }))
}

fn create_subject(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_str(params, "name")?;
    let code = get_str(params, "code")?;
    let level = get_str(params, "level")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code, level, created_at) VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &code, &level, &clock.timestamp()),
    )
    .map_err(|e| HandlerErr::db_update(e, "subjects"))?;
    Ok(json!({ "id": id, "name": name, "code": code, "level": level }))
}

fn list_academic_years(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, year, start_date, end_date, is_active, created_at
         FROM academic_years ORDER BY start_date",
    )?;
    let years = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "year": r.get::<_, String>(1)?,
                "startDate": r.get::<_, String>(2)?,
                "endDate": r.get::<_, String>(3)?,
                "isActive": r.get::<_, i64>(4)? != 0,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "academicYears": years }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let clock = state.clock;
    match req.method.as_str() {
        "masterData.regions.list" => Some(with_conn(state, req, list_regions)),
        "masterData.regions.create" => Some(with_conn(state, req, |conn, params| {
            create_region(conn, &clock, params)
        })),
        "masterData.schools.list" => Some(with_conn(state, req, list_schools)),
        "masterData.schools.create" => Some(with_conn(state, req, |conn, params| {
            create_school(conn, &clock, params)
        })),
        "masterData.subjects.list" => Some(with_conn(state, req, list_subjects)),
        "masterData.subjects.create" => Some(with_conn(state, req, |conn, params| {
            create_subject(conn, &clock, params)
        })),
        "masterData.academicYears.list" => Some(with_conn(state, req, list_academic_years)),
        _ => None,
    }
}
