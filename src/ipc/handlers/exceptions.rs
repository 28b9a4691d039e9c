use crate::ipc::error::{err, err_from, ok};
use crate::ipc::helpers::{opt_date, opt_i64, opt_str, required_i64, required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle::{
    approve_exception, create_or_update_exception, reject_exception, revert_exception,
    validate_exception_change, ExceptionDraft, TransitionOutcome,
};
use crate::schedule::{load_exception, ExceptionRow, ScheduleError, EXCEPTION_COLS};
use rusqlite::Connection;
use serde_json::json;

fn parse_draft(params: &serde_json::Value) -> Result<ExceptionDraft, ScheduleError> {
    Ok(ExceptionDraft {
        id: opt_str(params, "id"),
        request_type_id: required_i64(params, "requestTypeId")?,
        class_schedule_id: opt_str(params, "classScheduleId"),
        class_id: opt_str(params, "classId"),
        exception_date: opt_date(params, "exceptionDate")?,
        teacher_id: opt_str(params, "teacherId"),
        new_time_slot_id: opt_i64(params, "newTimeSlotId"),
        new_room_id: opt_str(params, "newClassRoomId"),
        moved_to_date: opt_date(params, "movedToDate")?,
        moved_to_time_slot_id: opt_i64(params, "movedToTimeSlotId"),
        moved_to_room_id: opt_str(params, "movedToClassRoomId"),
        substitute_teacher_id: opt_str(params, "substituteTeacherId"),
        reason: opt_str(params, "reason"),
        note: opt_str(params, "note"),
        requester_id: opt_str(params, "requesterId"),
    })
}

fn exception_json(exc: &ExceptionRow) -> serde_json::Value {
    json!({
        "id": exc.id,
        "requestTypeId": exc.request_type.id(),
        "classScheduleId": exc.class_schedule_id,
        "classId": exc.class_id,
        "exceptionDate": exc.exception_date.map(|d| d.to_string()),
        "teacherId": exc.teacher_id,
        "newTimeSlotId": exc.new_time_slot_id,
        "newClassRoomId": exc.new_room_id,
        "movedToDate": exc.moved_to_date.map(|d| d.to_string()),
        "movedToTimeSlotId": exc.moved_to_time_slot_id,
        "movedToClassRoomId": exc.moved_to_room_id,
        "substituteTeacherId": exc.substitute_teacher_id,
        "requestStatusId": exc.status.id(),
        "reason": exc.reason,
        "note": exc.note,
        "requesterId": exc.requester_id,
        "approvedBy": exc.approved_by,
        "approvedAt": exc.approved_at,
    })
}

fn is_store_error(e: &ScheduleError) -> bool {
    e.code.starts_with("db_")
}

fn handle_validate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let verdict = parse_draft(params).and_then(|draft| validate_exception_change(conn, &draft));
    match verdict {
        Ok(()) => Ok(json!({ "isValid": true })),
        Err(e) if is_store_error(&e) => Err(e),
        Err(e) => Ok(json!({
            "isValid": false,
            "errorCode": e.code,
            "errorMessage": e.message,
        })),
    }
}

fn handle_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let mut draft = parse_draft(params)?;
    draft.id = None;
    let id = create_or_update_exception(conn, &draft)?;
    Ok(json!({ "exceptionId": id }))
}

fn handle_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let mut draft = parse_draft(params)?;
    draft.id = Some(required_str(params, "id")?);
    let id = create_or_update_exception(conn, &draft)?;
    Ok(json!({ "exceptionId": id }))
}

fn handle_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let id = required_str(params, "id")?;
    let exc = load_exception(conn, &id)?
        .ok_or_else(|| ScheduleError::new("not_found", "exception not found"))?;
    Ok(json!({ "exception": exception_json(&exc) }))
}

fn handle_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ScheduleError> {
    let mut sql = format!("SELECT {} FROM exceptions WHERE 1=1", EXCEPTION_COLS);
    let mut bind: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(status) = opt_i64(params, "statusId") {
        sql.push_str(" AND request_status_id = ?");
        bind.push(status.into());
    }
    if let Some(sid) = opt_str(params, "classScheduleId") {
        sql.push_str(" AND class_schedule_id = ?");
        bind.push(sid.into());
    }
    if let Some(date) = opt_date(params, "date")? {
        sql.push_str(" AND (exception_date = ? OR moved_to_date = ?)");
        bind.push(date.to_string().into());
        bind.push(date.to_string().into());
    }
    sql.push_str(" ORDER BY exception_date, id");
    let mut stmt = conn.prepare(&sql).map_err(ScheduleError::db)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(bind), |row| {
            crate::schedule::map_exception_row(row)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ScheduleError::db)?;
    Ok(json!({
        "exceptions": rows.iter().map(exception_json).collect::<Vec<_>>(),
    }))
}

/// Transition handlers need the notifier as well as the connection, so they
/// split-borrow AppState instead of going through with_db.
fn with_transition<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<TransitionOutcome, ScheduleError>,
{
    let AppState { db, notifier, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(outcome) => {
            notifier.schedule_changed(&outcome.affected_user_ids);
            ok(&req.id, json!({ "exceptionId": outcome.exception_id }))
        }
        Err(e) => err_from(&req.id, e),
    }
}

fn handle_approve(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<TransitionOutcome, ScheduleError> {
    let id = required_str(params, "id")?;
    approve_exception(
        conn,
        &id,
        opt_str(params, "assignedRoomId").as_deref(),
        opt_str(params, "assignedTeacherId").as_deref(),
        opt_str(params, "approvedBy").as_deref(),
    )
}

fn handle_reject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<TransitionOutcome, ScheduleError> {
    let id = required_str(params, "id")?;
    reject_exception(conn, &id, opt_str(params, "note").as_deref())
}

fn handle_revert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<TransitionOutcome, ScheduleError> {
    let id = required_str(params, "id")?;
    revert_exception(conn, &id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exception.validate" => Some(with_db(state, req, handle_validate)),
        "exception.create" => Some(with_db(state, req, handle_create)),
        "exception.update" => Some(with_db(state, req, handle_update)),
        "exception.get" => Some(with_db(state, req, handle_get)),
        "exception.list" => Some(with_db(state, req, handle_list)),
        "exception.approve" => Some(with_transition(state, req, handle_approve)),
        "exception.reject" => Some(with_transition(state, req, handle_reject)),
        "exception.revert" => Some(with_transition(state, req, handle_revert)),
        _ => None,
    }
}
