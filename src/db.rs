use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "enroll.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS strands(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            deleted_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            strand_id TEXT NOT NULL,
            grade_level INTEGER NOT NULL,
            capacity INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            deleted_at TEXT,
            FOREIGN KEY(strand_id) REFERENCES strands(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_strand ON sections(strand_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            description TEXT NOT NULL,
            grade_level INTEGER NOT NULL,
            strand_id TEXT,
            semester INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            deleted_at TEXT,
            FOREIGN KEY(strand_id) REFERENCES strands(id),
            UNIQUE(code, grade_level, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_strand ON subjects(strand_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            lrn TEXT NOT NULL UNIQUE,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            middle_name TEXT,
            suffix TEXT,
            gender TEXT NOT NULL,
            birth_date TEXT,
            email TEXT,
            phone TEXT,
            address TEXT,
            guardian_name TEXT,
            guardian_phone TEXT,
            last_school TEXT,
            school_year TEXT NOT NULL,
            grade_level INTEGER NOT NULL,
            strand_id TEXT NOT NULL,
            section_id TEXT,
            status TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            deleted_at TEXT,
            FOREIGN KEY(strand_id) REFERENCES strands(id),
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_strand ON students(strand_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_section ON students(section_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_year_status ON students(school_year, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT,
            updated_at TEXT,
            deleted_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        [],
    )?;

    // Singleton row (id = 1). A missing row means maintenance off and the
    // enrollment window closed.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollment_settings(
            id INTEGER PRIMARY KEY CHECK(id = 1),
            school_year TEXT NOT NULL,
            semester INTEGER NOT NULL,
            start_date TEXT,
            end_date TEXT,
            maintenance_mode INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_logs(
            id TEXT PRIMARY KEY,
            user_id TEXT,
            action TEXT NOT NULL,
            description TEXT NOT NULL,
            ip_address TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activity_logs_user ON activity_logs(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activity_logs_created ON activity_logs(created_at)",
        [],
    )?;

    // Existing workspaces predate some columns. Add them if needed.
    ensure_students_suffix(&conn)?;
    ensure_activity_logs_ip(&conn)?;

    Ok(conn)
}

/// Seed a default admin account into an empty workspace so the system is
/// reachable on first run. Returns true if the account was created.
pub fn seed_bootstrap_admin(conn: &Connection) -> anyhow::Result<bool> {
    let user_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE deleted_at IS NULL",
        [],
        |r| r.get(0),
    )?;
    if user_count > 0 {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO users(id, username, password_hash, display_name, role, active, created_at)
         VALUES(?, 'admin', ?, 'Administrator', 'admin', 1, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (Uuid::new_v4().to_string(), hash_password("admin")),
    )?;
    Ok(true)
}

#[derive(Debug, Clone)]
pub struct EnrollmentSettings {
    pub school_year: String,
    pub semester: i64,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub maintenance_mode: bool,
}

pub fn settings_load(conn: &Connection) -> anyhow::Result<Option<EnrollmentSettings>> {
    let row = conn
        .query_row(
            "SELECT school_year, semester, start_date, end_date, maintenance_mode
             FROM enrollment_settings WHERE id = 1",
            [],
            |r| {
                Ok(EnrollmentSettings {
                    school_year: r.get(0)?,
                    semester: r.get(1)?,
                    start_date: r.get(2)?,
                    end_date: r.get(3)?,
                    maintenance_mode: r.get::<_, i64>(4)? != 0,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn maintenance_mode_enabled(conn: &Connection) -> anyhow::Result<bool> {
    Ok(settings_load(conn)?.map(|s| s.maintenance_mode).unwrap_or(false))
}

pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let digest = Sha256::digest(format!("{}{}", salt, password).as_bytes());
    format!("{}${:x}", salt, digest)
}

pub fn verify_password(stored: &str, password: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    let digest = Sha256::digest(format!("{}{}", salt, password).as_bytes());
    format!("{:x}", digest) == expected
}

fn ensure_students_suffix(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "suffix")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN suffix TEXT", [])?;
    Ok(())
}

fn ensure_activity_logs_ip(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "activity_logs", "ip_address")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE activity_logs ADD COLUMN ip_address TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
