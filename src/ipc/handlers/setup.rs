use crate::ipc::helpers::{opt_i64, opt_str, required_i64, required_str, room_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{RoomRow, ScheduleError};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn upsert_room(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ScheduleError> {
    let id = opt_str(params, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let name = required_str(params, "name")?;
    let room_type_id = opt_i64(params, "roomTypeId");
    let department_id = opt_str(params, "departmentId");
    let capacity = opt_i64(params, "capacity").unwrap_or(0);
    conn.execute(
        "INSERT INTO rooms(id, name, room_type_id, department_id, capacity)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           room_type_id = excluded.room_type_id,
           department_id = excluded.department_id,
           capacity = excluded.capacity",
        (&id, &name, room_type_id, &department_id, capacity),
    )
    .map_err(|e| ScheduleError::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "roomId": id }))
}

fn list_rooms(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, ScheduleError> {
    let mut stmt = conn
        .prepare("SELECT id, name, room_type_id, department_id, capacity FROM rooms ORDER BY name")
        .map_err(ScheduleError::db)?;
    let rooms = stmt
        .query_map([], |row| {
            Ok(RoomRow {
                id: row.get(0)?,
                name: row.get(1)?,
                room_type_id: row.get(2)?,
                department_id: row.get(3)?,
                capacity: row.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ScheduleError::db)?;
    Ok(json!({ "rooms": rooms.iter().map(room_json).collect::<Vec<_>>() }))
}

fn upsert_teacher(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ScheduleError> {
    let id = opt_str(params, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let name = required_str(params, "name")?;
    conn.execute(
        "INSERT INTO teachers(id, name) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (&id, &name),
    )
    .map_err(|e| ScheduleError::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "teacherId": id }))
}

fn upsert_class(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ScheduleError> {
    let id = opt_str(params, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let name = required_str(params, "name")?;
    let teacher_id = opt_str(params, "teacherId");
    let department_id = opt_str(params, "departmentId");
    let size = opt_i64(params, "size").unwrap_or(0);
    conn.execute(
        "INSERT INTO classes(id, name, teacher_id, department_id, size)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           teacher_id = excluded.teacher_id,
           department_id = excluded.department_id,
           size = excluded.size",
        (&id, &name, &teacher_id, &department_id, size),
    )
    .map_err(|e| ScheduleError::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "classId": id }))
}

fn upsert_time_slot(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ScheduleError> {
    let id = required_i64(params, "id")?;
    let slot_name = required_str(params, "slotName")?;
    let start_time = required_str(params, "startTime")?;
    let end_time = required_str(params, "endTime")?;
    let shift = required_str(params, "shift")?;
    conn.execute(
        "INSERT INTO time_slots(id, slot_name, start_time, end_time, shift)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           slot_name = excluded.slot_name,
           start_time = excluded.start_time,
           end_time = excluded.end_time,
           shift = excluded.shift",
        (id, &slot_name, &start_time, &end_time, &shift),
    )
    .map_err(|e| ScheduleError::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "timeSlotId": id }))
}

fn list_time_slots(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, ScheduleError> {
    let mut stmt = conn
        .prepare("SELECT id, slot_name, start_time, end_time, shift FROM time_slots ORDER BY id")
        .map_err(ScheduleError::db)?;
    let slots = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "slotName": row.get::<_, String>(1)?,
                "startTime": row.get::<_, String>(2)?,
                "endTime": row.get::<_, String>(3)?,
                "shift": row.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ScheduleError::db)?;
    Ok(json!({ "timeSlots": slots }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.upsertRoom" => Some(with_db(state, req, upsert_room)),
        "setup.listRooms" => Some(with_db(state, req, list_rooms)),
        "setup.upsertTeacher" => Some(with_db(state, req, upsert_teacher)),
        "setup.upsertClass" => Some(with_db(state, req, upsert_class)),
        "setup.upsertTimeSlot" => Some(with_db(state, req, upsert_time_slot)),
        "setup.listTimeSlots" => Some(with_db(state, req, list_time_slots)),
        _ => None,
    }
}
