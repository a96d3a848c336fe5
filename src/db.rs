use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("registrar.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            year INTEGER NOT NULL,
            section TEXT NOT NULL,
            register_number TEXT NOT NULL UNIQUE,
            photo_path TEXT NOT NULL,
            signature_path TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_year_section ON students(year, section)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_created_at ON students(created_at)",
        [],
    )?;

    // Device tracking arrived after the first workspaces shipped. Add and
    // default if needed.
    ensure_students_device_columns(&conn)?;

    Ok(conn)
}

fn ensure_students_device_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "has_device")? {
        conn.execute(
            "ALTER TABLE students ADD COLUMN has_device INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !table_has_column(conn, "students", "device_mac")? {
        conn.execute("ALTER TABLE students ADD COLUMN device_mac TEXT", [])?;
    }
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
