use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::Path;

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
const DEFAULT_ADMIN_PASSWORD: &str = "admin1234";

const DEFAULT_GRADES: [&str; 6] = ["L1", "L2", "L3", "M1", "M2", "Alumni"];
const DEFAULT_SPECIALTIES: [&str; 13] = [
    "SI",
    "SSI",
    "GTR",
    "CyberSec",
    "Web",
    "E-commerce",
    "Finance",
    "MBA",
    "Management",
    "Psychology",
    "Educational Sciences",
    "DDA",
    "Public Law",
];

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("studenttrack.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    init_schema(&conn)?;
    seed_admin(&conn)?;
    seed_catalog(&conn)?;

    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS specialties(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS specialty_grades(
            specialty_id INTEGER NOT NULL,
            grade_id INTEGER NOT NULL,
            PRIMARY KEY(specialty_id, grade_id),
            FOREIGN KEY(specialty_id) REFERENCES specialties(id),
            FOREIGN KEY(grade_id) REFERENCES grades(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS skills(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            type TEXT NOT NULL CHECK(type IN ('SOFT','HARD'))
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            type TEXT NOT NULL CHECK(type IN ('INTERNSHIP','EVENT','WORKSHOP','SPORT'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT NOT NULL,
            address TEXT NOT NULL,
            birth_date TEXT NOT NULL,
            birth_place TEXT NOT NULL,
            enrollment_year TEXT NOT NULL,
            grade_id INTEGER NOT NULL,
            specialty_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            FOREIGN KEY(specialty_id) REFERENCES specialties(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_grade ON students(grade_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_specialty ON students(specialty_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_activities(
            student_id TEXT NOT NULL,
            activity_id INTEGER NOT NULL,
            PRIMARY KEY(student_id, activity_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(activity_id) REFERENCES activities(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_activities_activity ON student_activities(activity_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            comment TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_student ON evaluations(student_id)",
        [],
    )?;

    // The association set is a mapping keyed by skill id, not a multiset.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS skill_evaluations(
            evaluation_id TEXT NOT NULL,
            skill_id INTEGER NOT NULL,
            score REAL,
            PRIMARY KEY(evaluation_id, skill_id),
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id),
            FOREIGN KEY(skill_id) REFERENCES skills(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_skill_evaluations_skill ON skill_evaluations(skill_id)",
        [],
    )?;

    Ok(())
}

fn seed_admin(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO admins(username, password_hash) VALUES(?, ?)",
        (DEFAULT_ADMIN_USERNAME, password_hash(DEFAULT_ADMIN_PASSWORD)),
    )?;
    Ok(())
}

/// Baseline grade/specialty catalog with the full cross join, so imports can
/// reference them by id out of the box.
fn seed_catalog(conn: &Connection) -> anyhow::Result<()> {
    for name in DEFAULT_GRADES {
        conn.execute("INSERT OR IGNORE INTO grades(name) VALUES(?)", [name])?;
    }
    for name in DEFAULT_SPECIALTIES {
        conn.execute("INSERT OR IGNORE INTO specialties(name) VALUES(?)", [name])?;
    }
    conn.execute(
        "INSERT OR IGNORE INTO specialty_grades(specialty_id, grade_id)
         SELECT s.id, g.id FROM specialties s CROSS JOIN grades g",
        [],
    )?;
    Ok(())
}

pub fn password_hash(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
