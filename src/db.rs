use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("timetable.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            room_type_id INTEGER,
            department_id TEXT,
            capacity INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rooms_type ON rooms(room_type_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            teacher_id TEXT,
            department_id TEXT,
            size INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS time_slots(
            id INTEGER PRIMARY KEY,
            slot_name TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            shift TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS weekly_bookings(
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            day_of_week INTEGER NOT NULL,
            time_slot_id INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_bookings_grid
         ON weekly_bookings(day_of_week, time_slot_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_bookings_room ON weekly_bookings(room_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_bookings_teacher ON weekly_bookings(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exceptions(
            id TEXT PRIMARY KEY,
            request_type_id INTEGER NOT NULL,
            class_schedule_id TEXT,
            class_id TEXT,
            exception_date TEXT,
            teacher_id TEXT,
            new_time_slot_id INTEGER,
            new_room_id TEXT,
            moved_to_date TEXT,
            moved_to_time_slot_id INTEGER,
            moved_to_room_id TEXT,
            substitute_teacher_id TEXT,
            request_status_id INTEGER NOT NULL DEFAULT 1,
            reason TEXT,
            note TEXT,
            requester_id TEXT,
            approved_by TEXT,
            approved_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exceptions_status_date
         ON exceptions(request_status_id, exception_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exceptions_moved_to_date ON exceptions(moved_to_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exceptions_schedule ON exceptions(class_schedule_id)",
        [],
    )?;

    Ok(())
}
