use crate::calendar;
use crate::ipc::helpers::{
    freed_json, occupant_json, opt_date, opt_i64, opt_str, required_date, required_i64,
    required_str, room_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    available_rooms, check_room_conflict, check_teacher_conflict, conflicts_for_schedule,
    AvailabilityQuery, Exclusions, ScheduleError,
};
use rusqlite::Connection;
use serde_json::json;

fn parse_exclusions(params: &serde_json::Value) -> Exclusions {
    Exclusions {
        exception_id: opt_str(params, "excludeRequestId"),
        schedule_id: opt_str(params, "excludeScheduleId"),
    }
}

fn handle_available_rooms(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let time_slot_id = required_i64(params, "timeSlotId")?;
    let date = opt_date(params, "date")?;
    let day_of_week = match date {
        Some(date) => calendar::day_of_week_of(date),
        None => {
            let dow = required_i64(params, "dayOfWeek")?;
            if !calendar::valid_day_of_week(dow) {
                return Err(ScheduleError::new(
                    "bad_params",
                    "dayOfWeek must be 1 (Sunday) .. 7 (Saturday)",
                ));
            }
            dow
        }
    };
    let query = AvailabilityQuery {
        time_slot_id,
        day_of_week,
        date,
        min_capacity: opt_i64(params, "minCapacity").unwrap_or(0),
        room_type_id: opt_i64(params, "roomTypeId"),
        department_id: opt_str(params, "departmentId"),
    };
    let view = available_rooms(conn, &query)?;
    Ok(json!({
        "normalRooms": view.normal_rooms.iter().map(room_json).collect::<Vec<_>>(),
        "freedRooms": view
            .freed_rooms
            .iter()
            .map(|(room, freed)| {
                let mut v = room_json(room);
                v["freedBy"] = freed_json(freed);
                v
            })
            .collect::<Vec<_>>(),
        "occupiedRooms": view
            .occupied_rooms
            .iter()
            .map(|(room, occ)| {
                let mut v = room_json(room);
                v["occupiedBy"] = occupant_json(occ);
                v
            })
            .collect::<Vec<_>>(),
        "verifiedAgainstExceptions": view.verified_against_exceptions,
    }))
}

fn handle_room_conflict(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let room_id = required_str(params, "roomId")?;
    let date = required_date(params, "date")?;
    let time_slot_id = required_i64(params, "timeSlotId")?;
    let report = check_room_conflict(conn, &room_id, date, time_slot_id, &parse_exclusions(params))?;
    serde_json::to_value(report).map_err(|e| ScheduleError::new("db_query_failed", e.to_string()))
}

fn handle_teacher_conflict(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let teacher_id = required_str(params, "teacherId")?;
    let date = required_date(params, "date")?;
    let time_slot_id = required_i64(params, "timeSlotId")?;
    let report =
        check_teacher_conflict(conn, &teacher_id, date, time_slot_id, &parse_exclusions(params))?;
    serde_json::to_value(report).map_err(|e| ScheduleError::new("db_query_failed", e.to_string()))
}

fn handle_conflicts(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let date = required_date(params, "date")?;
    let time_slot_id = required_i64(params, "timeSlotId")?;
    let room_id = opt_str(params, "roomId");
    let teacher_id = opt_str(params, "teacherId");
    let conflicts = conflicts_for_schedule(
        conn,
        date,
        time_slot_id,
        room_id.as_deref(),
        teacher_id.as_deref(),
    )?;
    Ok(json!({
        "conflicts": conflicts.iter().map(occupant_json).collect::<Vec<_>>(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.availableRooms" => Some(with_db(state, req, handle_available_rooms)),
        "schedule.roomConflict" => Some(with_db(state, req, handle_room_conflict)),
        "schedule.teacherConflict" => Some(with_db(state, req, handle_teacher_conflict)),
        "schedule.conflicts" => Some(with_db(state, req, handle_conflicts)),
        _ => None,
    }
}
