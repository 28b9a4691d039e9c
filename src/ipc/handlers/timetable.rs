use crate::calendar;
use crate::ipc::helpers::{
    freed_json, occupant_json, opt_date, opt_i64, required_date, required_i64, required_str,
    with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    build_booking_index, build_weekly_index, weekly_booking_collision, Exclusions, ScheduleError,
};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool, ScheduleError> {
    // Table names come from a fixed internal list, never from params.
    conn.query_row(
        &format!("SELECT 1 FROM {} WHERE id = ?", table),
        [id],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(ScheduleError::db)
}

fn create_weekly_booking(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let room_id = required_str(params, "roomId")?;
    let teacher_id = required_str(params, "teacherId")?;
    let class_id = required_str(params, "classId")?;
    let day_of_week = required_i64(params, "dayOfWeek")?;
    let time_slot_id = required_i64(params, "timeSlotId")?;
    let start_date = required_date(params, "startDate")?;
    let end_date = required_date(params, "endDate")?;

    if !calendar::valid_day_of_week(day_of_week) {
        return Err(ScheduleError::new(
            "bad_params",
            "dayOfWeek must be 1 (Sunday) .. 7 (Saturday)",
        ));
    }
    if end_date < start_date {
        return Err(ScheduleError::new(
            "invalid_date",
            "endDate precedes startDate",
        ));
    }
    for (table, id, what) in [
        ("rooms", room_id.as_str(), "room"),
        ("teachers", teacher_id.as_str(), "teacher"),
        ("classes", class_id.as_str(), "class"),
    ] {
        if !exists(conn, table, id)? {
            return Err(ScheduleError::new("not_found", format!("{} {} not found", what, id)));
        }
    }

    if let Some((conflict_id, code)) = weekly_booking_collision(
        conn,
        day_of_week,
        time_slot_id,
        start_date,
        end_date,
        Some(&room_id),
        Some(&teacher_id),
        None,
    )? {
        return Err(ScheduleError::with_details(
            code,
            format!("weekly grid slot already taken by {}", conflict_id),
            json!({ "conflictType": "weekly-booking", "conflictId": conflict_id }),
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO weekly_bookings(id, room_id, teacher_id, class_id, day_of_week,
            time_slot_id, start_date, end_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &room_id,
            &teacher_id,
            &class_id,
            day_of_week,
            time_slot_id,
            start_date.to_string(),
            end_date.to_string(),
        ),
    )
    .map_err(|e| ScheduleError::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "scheduleId": id }))
}

fn list_weekly_bookings(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let mut sql = String::from(
        "SELECT id, room_id, teacher_id, class_id, day_of_week, time_slot_id, start_date, end_date
         FROM weekly_bookings",
    );
    let dow = opt_i64(params, "dayOfWeek");
    if dow.is_some() {
        sql.push_str(" WHERE day_of_week = ?");
    }
    sql.push_str(" ORDER BY day_of_week, time_slot_id");
    let mut stmt = conn.prepare(&sql).map_err(ScheduleError::db)?;
    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "roomId": row.get::<_, String>(1)?,
            "teacherId": row.get::<_, String>(2)?,
            "classId": row.get::<_, String>(3)?,
            "dayOfWeek": row.get::<_, i64>(4)?,
            "timeSlotId": row.get::<_, i64>(5)?,
            "startDate": row.get::<_, String>(6)?,
            "endDate": row.get::<_, String>(7)?,
        }))
    };
    let rows = match dow {
        Some(dow) => stmt.query_map([dow], map_row),
        None => stmt.query_map([], map_row),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(ScheduleError::db)?;
    Ok(json!({ "bookings": rows }))
}

fn by_time_slot_and_date(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let time_slot_id = required_i64(params, "timeSlotId")?;
    let date = opt_date(params, "date")?;
    let (index, verified) = match date {
        Some(date) => (
            build_booking_index(conn, date, time_slot_id, &Exclusions::default())?,
            true,
        ),
        None => {
            let dow = required_i64(params, "dayOfWeek")?;
            if !calendar::valid_day_of_week(dow) {
                return Err(ScheduleError::new(
                    "bad_params",
                    "dayOfWeek must be 1 (Sunday) .. 7 (Saturday)",
                ));
            }
            (build_weekly_index(conn, dow, time_slot_id)?, false)
        }
    };
    Ok(json!({
        "occupants": index.occupants.iter().map(occupant_json).collect::<Vec<_>>(),
        "freed": index.freed.iter().map(freed_json).collect::<Vec<_>>(),
        "verifiedAgainstExceptions": verified,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.createWeeklyBooking" => Some(with_db(state, req, create_weekly_booking)),
        "timetable.list" => Some(with_db(state, req, list_weekly_bookings)),
        "schedule.byTimeSlotAndDate" => Some(with_db(state, req, by_time_slot_and_date)),
        _ => None,
    }
}
