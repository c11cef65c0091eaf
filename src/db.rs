use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("mgmp.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS regions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            npsn TEXT NOT NULL,
            address TEXT NOT NULL,
            level TEXT NOT NULL,
            region_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(region_id) REFERENCES regions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schools_region ON schools(region_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            level TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            year TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            full_name TEXT NOT NULL,
            nip TEXT,
            role TEXT NOT NULL,
            school_id TEXT,
            region_id TEXT,
            level TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_login TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(region_id) REFERENCES regions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_region ON users(region_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_school ON users(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            level TEXT NOT NULL,
            region_id TEXT NOT NULL,
            subject_id TEXT,
            description TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(region_id) REFERENCES regions(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_groups_region ON groups(region_id)",
        [],
    )?;

    // Membership is keyed by the pair itself; the admin flag rides on the row.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_members(
            group_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            is_admin INTEGER NOT NULL DEFAULT 0,
            joined_at TEXT NOT NULL,
            PRIMARY KEY(group_id, user_id),
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            activity_date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            location TEXT NOT NULL,
            speaker TEXT,
            funding_source TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(created_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_group ON activities(group_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_date ON activities(activity_date)",
        [],
    )?;

    // One attendance fact per (activity, user); re-recording overwrites.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            activity_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            is_present INTEGER NOT NULL,
            notes TEXT,
            recorded_by TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY(activity_id, user_id),
            FOREIGN KEY(activity_id) REFERENCES activities(id),
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(recorded_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_user ON attendance(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            id TEXT PRIMARY KEY,
            user_id TEXT,
            activity_id TEXT,
            group_id TEXT,
            title TEXT NOT NULL,
            description TEXT,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            document_type TEXT NOT NULL,
            uploaded_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(activity_id) REFERENCES activities(id),
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(uploaded_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_activity ON documents(activity_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS supervision_reports(
            id TEXT PRIMARY KEY,
            supervisor_id TEXT NOT NULL,
            school_id TEXT NOT NULL,
            visit_date TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(supervisor_id) REFERENCES users(id),
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_supervision_reports_supervisor
         ON supervision_reports(supervisor_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_supervision_reports_school
         ON supervision_reports(school_id)",
        [],
    )?;

    // Assignment edge gating report creation; the pair is the key.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_supervision(
            supervisor_id TEXT NOT NULL,
            school_id TEXT NOT NULL,
            assigned_at TEXT NOT NULL,
            PRIMARY KEY(supervisor_id, school_id),
            FOREIGN KEY(supervisor_id) REFERENCES users(id),
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(created_by) REFERENCES users(id)
        )",
        [],
    )?;

    Ok(conn)
}
