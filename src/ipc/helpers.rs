use crate::calendar;
use crate::ipc::error::{err, err_from, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{FreedEntry, Occupant, OccupancySource, RoomRow, ScheduleError};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, ScheduleError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ScheduleError::new("bad_params", format!("missing {}", key)))
}

pub fn opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_i64(params: &serde_json::Value, key: &str) -> Result<i64, ScheduleError> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ScheduleError::new("bad_params", format!("missing {}", key)))
}

pub fn opt_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, ScheduleError> {
    let raw = required_str(params, key)?;
    calendar::parse_date(&raw)
        .ok_or_else(|| ScheduleError::new("invalid_date", format!("{} must be YYYY-MM-DD", key)))
}

pub fn opt_date(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, ScheduleError> {
    match opt_str(params, key) {
        None => Ok(None),
        Some(raw) => calendar::parse_date(&raw).map(Some).ok_or_else(|| {
            ScheduleError::new("invalid_date", format!("{} must be YYYY-MM-DD", key))
        }),
    }
}

/// Standard handler wrapper: reject when no workspace is open, map domain
/// errors onto the IPC envelope.
pub fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, ScheduleError>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => err_from(&req.id, e),
    }
}

pub fn room_json(room: &RoomRow) -> serde_json::Value {
    json!({
        "id": room.id,
        "name": room.name,
        "roomTypeId": room.room_type_id,
        "departmentId": room.department_id,
        "capacity": room.capacity,
    })
}

pub fn occupant_json(occ: &Occupant) -> serde_json::Value {
    let source = match &occ.source {
        OccupancySource::WeeklyBooking { schedule_id } => json!({
            "kind": "weekly-booking",
            "id": schedule_id,
        }),
        OccupancySource::Exception {
            exception_id,
            request_type,
        } => json!({
            "kind": "exception",
            "id": exception_id,
            "requestTypeId": request_type.id(),
        }),
    };
    json!({
        "roomId": occ.room_id,
        "teacherId": occ.teacher_id,
        "classId": occ.class_id,
        "source": source,
        "movedIn": occ.moved_in,
    })
}

pub fn freed_json(entry: &FreedEntry) -> serde_json::Value {
    json!({
        "roomId": entry.room_id,
        "exceptionId": entry.exception_id,
        "requestTypeId": entry.request_type.id(),
        "scheduleId": entry.schedule_id,
        "classId": entry.class_id,
        "reason": entry.reason,
    })
}
