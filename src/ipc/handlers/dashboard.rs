use super::with_conn;
use crate::clock::Clock;
use crate::ipc::error::{get_opt_str, get_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scope::{self, Scope};
use chrono::{Datelike, NaiveDate};
use rusqlite::{params_from_iter, types::Value, Connection};
use serde_json::json;
use std::collections::HashMap;

const MONTH_SHORT_ID: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "Mei", "Jun", "Jul", "Agu", "Sep", "Okt", "Nov", "Des",
];

/// Scope rendered as SQL against `activities a JOIN groups g`. `None` means
/// the scope is provably empty and no query should run.
struct ActivityScopeSql {
    extra_join: &'static str,
    cond: &'static str,
    param: Option<String>,
}

fn activity_scope_sql(scope: &Scope) -> Option<ActivityScopeSql> {
    match scope {
        Scope::All => Some(ActivityScopeSql {
            extra_join: "",
            cond: "1=1",
            param: None,
        }),
        Scope::Region(region_id) => Some(ActivityScopeSql {
            extra_join: "",
            cond: "g.region_id = ?",
            param: Some(region_id.clone()),
        }),
        // An activity is tied to a school through its creator's affiliation.
        Scope::School(school_id) => Some(ActivityScopeSql {
            extra_join: " JOIN users cu ON cu.id = a.created_by",
            cond: "cu.school_id = ?",
            param: Some(school_id.clone()),
        }),
        // Count queries deliberately see only the first membership's group.
        Scope::Groups(_) => scope.first_group().map(|g| ActivityScopeSql {
            extra_join: "",
            cond: "a.group_id = ?",
            param: Some(g.to_string()),
        }),
    }
}

fn count_activities(
    conn: &Connection,
    scope_sql: &ActivityScopeSql,
    extra_cond: &str,
    extra_params: &[String],
) -> Result<i64, HandlerErr> {
    let sql = format!(
        "SELECT COUNT(*) FROM activities a JOIN groups g ON g.id = a.group_id{} WHERE {}{}",
        scope_sql.extra_join, scope_sql.cond, extra_cond
    );
    let mut values: Vec<Value> = Vec::new();
    if let Some(p) = &scope_sql.param {
        values.push(Value::Text(p.clone()));
    }
    for p in extra_params {
        values.push(Value::Text(p.clone()));
    }
    conn.query_row(&sql, params_from_iter(values), |r| r.get(0))
        .map_err(HandlerErr::db)
}

fn count_participants(conn: &Connection, scope: &Scope) -> Result<i64, HandlerErr> {
    let (sql, param): (&str, Option<&str>) = match scope {
        Scope::All => ("SELECT COUNT(*) FROM users WHERE is_active = 1", None),
        Scope::Region(r) => (
            "SELECT COUNT(*) FROM users WHERE is_active = 1 AND region_id = ?",
            Some(r),
        ),
        Scope::School(s) => (
            "SELECT COUNT(*) FROM users WHERE is_active = 1 AND school_id = ?",
            Some(s),
        ),
        Scope::Groups(_) => match scope.first_group() {
            Some(g) => (
                "SELECT COUNT(*) FROM users u
                 JOIN group_members gm ON gm.user_id = u.id
                 WHERE gm.group_id = ? AND u.is_active = 1",
                Some(g),
            ),
            None => return Ok(0),
        },
    };
    let res = match param {
        Some(p) => conn.query_row(sql, [p], |r| r.get(0)),
        None => conn.query_row(sql, [], |r| r.get(0)),
    };
    res.map_err(HandlerErr::db)
}

fn count_groups(conn: &Connection, scope: &Scope) -> Result<i64, HandlerErr> {
    let (sql, param): (&str, Option<&str>) = match scope {
        Scope::All => ("SELECT COUNT(*) FROM groups WHERE is_active = 1", None),
        Scope::Region(r) => (
            "SELECT COUNT(*) FROM groups WHERE is_active = 1 AND region_id = ?",
            Some(r),
        ),
        Scope::School(s) => (
            "SELECT COUNT(DISTINCT g.id) FROM groups g
             JOIN group_members gm ON gm.group_id = g.id
             JOIN users u ON u.id = gm.user_id
             WHERE g.is_active = 1 AND u.school_id = ?",
            Some(s),
        ),
        Scope::Groups(_) => match scope.first_group() {
            Some(g) => (
                "SELECT COUNT(*) FROM groups WHERE is_active = 1 AND id = ?",
                Some(g),
            ),
            None => return Ok(0),
        },
    };
    let res = match param {
        Some(p) => conn.query_row(sql, [p], |r| r.get(0)),
        None => conn.query_row(sql, [], |r| r.get(0)),
    };
    res.map_err(HandlerErr::db)
}

/// Five most recent in-scope activities created since the start of the
/// current month. `created_at DESC, rowid` keeps ties in insertion order.
fn recent_activities(
    conn: &Connection,
    scope_sql: &ActivityScopeSql,
    month_start_ts: &str,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let sql = format!(
        "SELECT a.id, a.title, a.activity_date, a.status, g.name, a.created_at
         FROM activities a JOIN groups g ON g.id = a.group_id{}
         WHERE {} AND a.created_at >= ?
         ORDER BY a.created_at DESC, a.rowid
         LIMIT 5",
        scope_sql.extra_join, scope_sql.cond
    );
    let mut values: Vec<Value> = Vec::new();
    if let Some(p) = &scope_sql.param {
        values.push(Value::Text(p.clone()));
    }
    values.push(Value::Text(month_start_ts.to_string()));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "activityDate": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "groupName": r.get::<_, String>(4)?,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn empty_stats() -> serde_json::Value {
    json!({
        "totalActivities": 0,
        "upcomingActivities": 0,
        "completedActivities": 0,
        "totalParticipants": 0,
        "totalGroups": 0,
        "recentActivities": [],
    })
}

fn stats(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_str(params, "userId")?;
    let identity = scope::load_identity(conn, &user_id)?
        .ok_or_else(|| HandlerErr::new("identity_not_found", "user not found"))?;
    let memberships = scope::membership_group_ids(conn, &identity.id)?;

    // A leadership profile without its affiliation yields zero counters
    // instead of failing the whole dashboard render.
    let scope = match scope::resolve_scope(&identity, &memberships) {
        Ok(s) => s,
        Err(_) => return Ok(empty_stats()),
    };
    let Some(scope_sql) = activity_scope_sql(&scope) else {
        return Ok(empty_stats());
    };

    let today = clock.today().format("%Y-%m-%d").to_string();
    let month_start = clock.today().with_day(1).unwrap_or_else(|| clock.today());
    let month_start_ts = format!("{}T00:00:00Z", month_start.format("%Y-%m-%d"));

    let total = count_activities(conn, &scope_sql, "", &[])?;
    // Upcoming means published and not yet past; future drafts and
    // cancellations stay out of the number.
    let upcoming = count_activities(
        conn,
        &scope_sql,
        " AND a.activity_date >= ? AND a.status = 'published'",
        &[today],
    )?;
    let completed = count_activities(conn, &scope_sql, " AND a.status = 'completed'", &[])?;
    let participants = count_participants(conn, &scope)?;
    let groups = count_groups(conn, &scope)?;
    let recent = recent_activities(conn, &scope_sql, &month_start_ts)?;

    Ok(json!({
        "totalActivities": total,
        "upcomingActivities": upcoming,
        "completedActivities": completed,
        "totalParticipants": participants,
        "totalGroups": groups,
        "recentActivities": recent,
    }))
}

fn date_filter_sql(
    params: &serde_json::Value,
    column: &str,
) -> Result<(String, Vec<String>), HandlerErr> {
    let mut cond = String::new();
    let mut values = Vec::new();
    if let Some(from) = get_opt_str(params, "dateFrom")? {
        parse_date(&from)?;
        cond.push_str(&format!(" AND {} >= ?", column));
        values.push(from);
    }
    if let Some(to) = get_opt_str(params, "dateTo")? {
        parse_date(&to)?;
        cond.push_str(&format!(" AND {} <= ?", column));
        values.push(to);
    }
    Ok((cond, values))
}

fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("dates must be YYYY-MM-DD"))
}

fn participation_report(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let region_id = get_opt_str(params, "regionId")?;
    let role = get_opt_str(params, "role")?;
    let group_id = get_opt_str(params, "groupId")?;
    let (date_cond, date_values) = date_filter_sql(params, "a.activity_date")?;

    let mut conditions = vec!["u.is_active = 1".to_string()];
    let mut values: Vec<Value> = Vec::new();
    if let Some(r) = &region_id {
        conditions.push("u.region_id = ?".to_string());
        values.push(Value::Text(r.clone()));
    }
    if let Some(r) = &role {
        conditions.push("u.role = ?".to_string());
        values.push(Value::Text(r.clone()));
    }
    let mut join = String::new();
    if let Some(g) = &group_id {
        join.push_str(" JOIN group_members fgm ON fgm.user_id = u.id");
        conditions.push("fgm.group_id = ?".to_string());
        values.push(Value::Text(g.clone()));
    }

    let sql = format!(
        "SELECT u.id, u.full_name, u.role FROM users u{} WHERE {} ORDER BY u.full_name, u.rowid",
        join,
        conditions.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params_from_iter(values), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut report = Vec::with_capacity(users.len());
    for (user_id, full_name, user_role) in users {
        // Everything the user's groups scheduled, inside the window.
        let total_sql = format!(
            "SELECT COUNT(*) FROM activities a
             JOIN group_members gm ON gm.group_id = a.group_id
             WHERE gm.user_id = ?{}",
            date_cond
        );
        let mut total_params: Vec<Value> = vec![Value::Text(user_id.clone())];
        for v in &date_values {
            total_params.push(Value::Text(v.clone()));
        }
        let total: i64 = conn.query_row(&total_sql, params_from_iter(total_params), |r| r.get(0))?;

        // Present-flagged rows only, date read through the activity join and
        // still restricted to the user's own groups.
        let attended_sql = format!(
            "SELECT COUNT(*) FROM attendance att
             JOIN activities a ON a.id = att.activity_id
             JOIN group_members gm ON gm.group_id = a.group_id AND gm.user_id = att.user_id
             WHERE att.user_id = ? AND att.is_present = 1{}",
            date_cond
        );
        let mut attended_params: Vec<Value> = vec![Value::Text(user_id.clone())];
        for v in &date_values {
            attended_params.push(Value::Text(v.clone()));
        }
        let attended: i64 =
            conn.query_row(&attended_sql, params_from_iter(attended_params), |r| r.get(0))?;

        let rate: i64 = if total > 0 {
            ((attended as f64 / total as f64) * 100.0).round() as i64
        } else {
            0
        };

        let group_name: Option<String> = {
            use rusqlite::OptionalExtension;
            conn.query_row(
                "SELECT g.name FROM group_members gm
                 JOIN groups g ON g.id = gm.group_id
                 WHERE gm.user_id = ? ORDER BY gm.rowid LIMIT 1",
                [&user_id],
                |r| r.get(0),
            )
            .optional()?
        };

        report.push(json!({
            "userId": user_id,
            "fullName": full_name,
            "role": user_role,
            "groupName": group_name,
            "totalActivities": total,
            "attendedActivities": attended,
            "attendanceRate": rate,
        }));
    }

    Ok(json!({ "report": report }))
}

fn month_label(year: i32, month: u32) -> String {
    format!("{} {}", MONTH_SHORT_ID[(month - 1) as usize], year)
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn months_back(year: i32, month: u32, back: u32) -> (i32, u32) {
    let mut y = year;
    let mut m = month;
    for _ in 0..back {
        if m == 1 {
            y -= 1;
            m = 12;
        } else {
            m -= 1;
        }
    }
    (y, m)
}

fn month_start_date(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start")
}

fn activity_frequency(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let region_id = get_opt_str(params, "regionId")?;
    let group_id = get_opt_str(params, "groupId")?;
    let date_from = get_opt_str(params, "dateFrom")?;
    let date_to = get_opt_str(params, "dateTo")?;

    // Default window: the six calendar months ending at "now".
    let today = clock.today();
    let (from_date, to_date) = match (&date_from, &date_to) {
        (Some(f), Some(t)) => (parse_date(f)?, parse_date(t)?),
        (Some(f), None) => (parse_date(f)?, today),
        (None, Some(t)) => {
            let t = parse_date(t)?;
            let (y, m) = months_back(t.year(), t.month(), 5);
            (month_start_date(y, m), t)
        }
        (None, None) => {
            let (y, m) = months_back(today.year(), today.month(), 5);
            let start = month_start_date(y, m);
            let (ny, nm) = next_month(today.year(), today.month());
            let end = month_start_date(ny, nm).pred_opt().expect("month end");
            (start, end)
        }
    };
    if from_date > to_date {
        return Err(HandlerErr::bad_params("dateFrom is after dateTo"));
    }

    let mut conditions = vec![
        "a.activity_date >= ?".to_string(),
        "a.activity_date <= ?".to_string(),
    ];
    let mut values: Vec<Value> = vec![
        Value::Text(from_date.format("%Y-%m-%d").to_string()),
        Value::Text(to_date.format("%Y-%m-%d").to_string()),
    ];
    if let Some(r) = &region_id {
        conditions.push("g.region_id = ?".to_string());
        values.push(Value::Text(r.clone()));
    }
    if let Some(g) = &group_id {
        conditions.push("a.group_id = ?".to_string());
        values.push(Value::Text(g.clone()));
    }

    let sql = format!(
        "SELECT a.activity_date, a.status
         FROM activities a JOIN groups g ON g.id = a.group_id
         WHERE {}",
        conditions.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // Bucket on (year, month); the label is display-only.
    let mut buckets: HashMap<(i32, u32), (i64, i64)> = HashMap::new();
    for (date_str, status) in rows {
        let Ok(date) = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d") else {
            continue;
        };
        let entry = buckets.entry((date.year(), date.month())).or_insert((0, 0));
        entry.0 += 1;
        if status == "completed" {
            entry.1 += 1;
        }
    }

    // Dense series: every month in the window gets a point, zero or not.
    let mut labels = Vec::new();
    let mut total_data = Vec::new();
    let mut completed_data = Vec::new();
    let (mut y, mut m) = (from_date.year(), from_date.month());
    let (end_y, end_m) = (to_date.year(), to_date.month());
    loop {
        labels.push(month_label(y, m));
        let (total, completed) = buckets.get(&(y, m)).copied().unwrap_or((0, 0));
        total_data.push(total);
        completed_data.push(completed);
        if (y, m) == (end_y, end_m) {
            break;
        }
        let next = next_month(y, m);
        y = next.0;
        m = next.1;
    }

    Ok(json!({
        "labels": labels,
        "datasets": [
            { "label": "Total Kegiatan", "data": total_data },
            { "label": "Kegiatan Selesai", "data": completed_data },
        ],
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let clock = state.clock;
    match req.method.as_str() {
        "dashboard.stats" => Some(with_conn(state, req, |conn, params| {
            stats(conn, &clock, params)
        })),
        "dashboard.participationReport" => Some(with_conn(state, req, participation_report)),
        "dashboard.activityFrequency" => Some(with_conn(state, req, |conn, params| {
            activity_frequency(conn, &clock, params)
        })),
        _ => None,
    }
}
