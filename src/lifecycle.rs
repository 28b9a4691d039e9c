use crate::calendar;
use crate::schedule::{
    check_room_conflict, check_teacher_conflict, load_exception, load_room, load_weekly_booking,
    ExceptionRow, Exclusions, RequestStatus, RequestType, ScheduleError, WeeklyBooking,
};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// A requested exception as submitted by a teacher/admin, before or during
/// the pending stage. Room/teacher assignments may still be blank; approval
/// fills them in.
#[derive(Debug, Clone, Default)]
pub struct ExceptionDraft {
    pub id: Option<String>,
    pub request_type_id: i64,
    pub class_schedule_id: Option<String>,
    pub class_id: Option<String>,
    pub exception_date: Option<NaiveDate>,
    pub teacher_id: Option<String>,
    pub new_time_slot_id: Option<i64>,
    pub new_room_id: Option<String>,
    pub moved_to_date: Option<NaiveDate>,
    pub moved_to_time_slot_id: Option<i64>,
    pub moved_to_room_id: Option<String>,
    pub substitute_teacher_id: Option<String>,
    pub reason: Option<String>,
    pub note: Option<String>,
    pub requester_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub exception_id: String,
    pub affected_user_ids: Vec<String>,
}

fn missing(field: &str) -> ScheduleError {
    ScheduleError::with_details(
        "missing_field",
        format!("missing {} for this request type", field),
        json!({ "field": field }),
    )
}

/// At most one active (approved) exception per displaced schedule (or class,
/// for final exams) and date. Self-excluded so re-approving an edit of the
/// same request never trips over itself.
fn duplicate_active_exception(
    conn: &Connection,
    class_schedule_id: Option<&str>,
    class_id: Option<&str>,
    date: NaiveDate,
    exclude_id: Option<&str>,
) -> Result<Option<String>, ScheduleError> {
    conn.query_row(
        "SELECT id FROM exceptions
         WHERE request_status_id = 2
           AND exception_date = ?
           AND ((class_schedule_id IS NOT NULL AND class_schedule_id = ?)
                OR (class_id IS NOT NULL AND class_id = ?))
           AND id != ?
         LIMIT 1",
        (
            date.to_string(),
            class_schedule_id,
            class_id,
            exclude_id.unwrap_or(""),
        ),
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(ScheduleError::db)
}

fn displaced_booking_for(
    conn: &Connection,
    draft_type: RequestType,
    class_schedule_id: Option<&str>,
) -> Result<Option<WeeklyBooking>, ScheduleError> {
    if draft_type == RequestType::FinalExam {
        return Ok(None);
    }
    let sid = class_schedule_id.ok_or_else(|| missing("classScheduleId"))?;
    let booking = load_weekly_booking(conn, sid)?
        .ok_or_else(|| ScheduleError::new("not_found", format!("weekly booking {} not found", sid)))?;
    Ok(Some(booking))
}

/// Runs every invariant that applies to a create/update of a pending
/// exception. Approval re-runs the conflict side at commit time; this is the
/// user-facing preflight.
pub fn validate_exception_change(
    conn: &Connection,
    draft: &ExceptionDraft,
) -> Result<(), ScheduleError> {
    let request_type = RequestType::from_id(draft.request_type_id).ok_or_else(|| {
        ScheduleError::new(
            "bad_params",
            format!("requestTypeId {} is not an exception type", draft.request_type_id),
        )
    })?;
    let date = draft.exception_date.ok_or_else(|| missing("exceptionDate"))?;

    match request_type {
        RequestType::FinalExam => {
            if draft.class_id.is_none() {
                return Err(missing("classId"));
            }
            if draft.new_time_slot_id.is_none() {
                return Err(missing("newTimeSlotId"));
            }
        }
        _ => {
            let sid = draft
                .class_schedule_id
                .as_deref()
                .ok_or_else(|| missing("classScheduleId"))?;
            let booking = load_weekly_booking(conn, sid)?.ok_or_else(|| {
                ScheduleError::new("not_found", format!("weekly booking {} not found", sid))
            })?;
            if calendar::day_of_week_of(date) != booking.day_of_week {
                return Err(ScheduleError::new(
                    "date_not_on_schedule_day",
                    format!(
                        "{} does not fall on the booking's weekday ({})",
                        date, booking.day_of_week
                    ),
                ));
            }
            if !booking.active_on(date) {
                return Err(ScheduleError::new(
                    "invalid_date",
                    format!("{} is outside the booking's semester window", date),
                ));
            }
        }
    }

    if request_type.uses_moved_to() {
        if draft.moved_to_date.is_none() {
            return Err(missing("movedToDate"));
        }
        if draft.moved_to_time_slot_id.is_none() {
            return Err(missing("movedToTimeSlotId"));
        }
    }

    if let Some(dup) = duplicate_active_exception(
        conn,
        draft.class_schedule_id.as_deref(),
        draft.class_id.as_deref(),
        date,
        draft.id.as_deref(),
    )? {
        return Err(ScheduleError::with_details(
            "duplicate_exception",
            format!("an approved exception already covers this schedule on {}", date),
            json!({ "conflictId": dup }),
        ));
    }
    Ok(())
}

pub fn create_or_update_exception(
    conn: &Connection,
    draft: &ExceptionDraft,
) -> Result<String, ScheduleError> {
    validate_exception_change(conn, draft)?;

    match &draft.id {
        Some(id) => {
            let existing = load_exception(conn, id)?
                .ok_or_else(|| ScheduleError::new("not_found", "exception not found"))?;
            if existing.status != RequestStatus::Pending {
                return Err(ScheduleError::new(
                    "already_processed",
                    "only pending requests can be edited",
                ));
            }
            conn.execute(
                "UPDATE exceptions
                 SET request_type_id = ?, class_schedule_id = ?, class_id = ?,
                     exception_date = ?, teacher_id = ?, new_time_slot_id = ?, new_room_id = ?,
                     moved_to_date = ?, moved_to_time_slot_id = ?, moved_to_room_id = ?,
                     substitute_teacher_id = ?, reason = ?, note = ?, requester_id = ?
                 WHERE id = ?",
                (
                    draft.request_type_id,
                    &draft.class_schedule_id,
                    &draft.class_id,
                    draft.exception_date.map(|d| d.to_string()),
                    &draft.teacher_id,
                    draft.new_time_slot_id,
                    &draft.new_room_id,
                    draft.moved_to_date.map(|d| d.to_string()),
                    draft.moved_to_time_slot_id,
                    &draft.moved_to_room_id,
                    &draft.substitute_teacher_id,
                    &draft.reason,
                    &draft.note,
                    &draft.requester_id,
                    id,
                ),
            )
            .map_err(|e| ScheduleError::new("db_update_failed", e.to_string()))?;
            Ok(id.clone())
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO exceptions(id, request_type_id, class_schedule_id, class_id,
                    exception_date, teacher_id, new_time_slot_id, new_room_id, moved_to_date,
                    moved_to_time_slot_id, moved_to_room_id, substitute_teacher_id,
                    reason, note, requester_id, request_status_id)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)",
                (
                    &id,
                    draft.request_type_id,
                    &draft.class_schedule_id,
                    &draft.class_id,
                    draft.exception_date.map(|d| d.to_string()),
                    &draft.teacher_id,
                    draft.new_time_slot_id,
                    &draft.new_room_id,
                    draft.moved_to_date.map(|d| d.to_string()),
                    draft.moved_to_time_slot_id,
                    &draft.moved_to_room_id,
                    &draft.substitute_teacher_id,
                    &draft.reason,
                    &draft.note,
                    &draft.requester_id,
                ),
            )
            .map_err(|e| ScheduleError::new("db_update_failed", e.to_string()))?;
            Ok(id)
        }
    }
}

fn affected_users(exc: &ExceptionRow, displaced: Option<&WeeklyBooking>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let mut push = |v: Option<&String>| {
        if let Some(v) = v {
            if !ids.contains(v) {
                ids.push(v.clone());
            }
        }
    };
    push(exc.requester_id.as_ref());
    push(displaced.map(|b| &b.teacher_id));
    push(exc.substitute_teacher_id.as_ref());
    push(exc.teacher_id.as_ref());
    ids
}

fn class_size(conn: &Connection, class_id: &str) -> Result<Option<i64>, ScheduleError> {
    conn.query_row("SELECT size FROM classes WHERE id = ?", [class_id], |row| {
        row.get(0)
    })
    .optional()
    .map_err(ScheduleError::db)
}

/// Pending -> Approved. The conflict validator re-runs here, inside one
/// transaction with the status write: first committer wins, the loser gets
/// room_conflict/teacher_conflict and must pick another assignment.
pub fn approve_exception(
    conn: &Connection,
    exception_id: &str,
    assigned_room_id: Option<&str>,
    assigned_teacher_id: Option<&str>,
    approved_by: Option<&str>,
) -> Result<TransitionOutcome, ScheduleError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| ScheduleError::new("db_tx_failed", e.to_string()))?;

    let exc = load_exception(&tx, exception_id)?
        .ok_or_else(|| ScheduleError::new("not_found", "exception not found"))?;
    if exc.status != RequestStatus::Pending {
        return Err(ScheduleError::new(
            "already_processed",
            "only pending requests can be approved",
        ));
    }
    let request_type = exc.request_type;
    let displaced = displaced_booking_for(&tx, request_type, exc.class_schedule_id.as_deref())?;

    let room_id = assigned_room_id.map(str::to_string).or_else(|| {
        if request_type.uses_moved_to() {
            exc.moved_to_room_id.clone()
        } else {
            exc.new_room_id.clone()
        }
    });
    if request_type.requires_room() && room_id.is_none() {
        return Err(ScheduleError::new(
            "missing_room_assignment",
            "this request type needs a room before approval",
        ));
    }
    let substitute = assigned_teacher_id
        .map(str::to_string)
        .or_else(|| exc.substitute_teacher_id.clone());
    if request_type.requires_substitute() && substitute.is_none() {
        return Err(ScheduleError::new(
            "missing_teacher_assignment",
            "a substitute teacher must be assigned before approval",
        ));
    }
    // Optional proctor for exams.
    let proctor = if matches!(request_type, RequestType::MidtermExam | RequestType::FinalExam) {
        assigned_teacher_id.map(str::to_string).or_else(|| exc.teacher_id.clone())
    } else {
        exc.teacher_id.clone()
    };

    if let Some(date) = exc.exception_date {
        if let Some(dup) = duplicate_active_exception(
            &tx,
            exc.class_schedule_id.as_deref(),
            exc.class_id.as_deref(),
            date,
            Some(exception_id),
        )? {
            return Err(ScheduleError::with_details(
                "duplicate_exception",
                format!("an approved exception already covers this schedule on {}", date),
                json!({ "conflictId": dup }),
            ));
        }
    }

    let excl = Exclusions {
        exception_id: Some(exception_id.to_string()),
        schedule_id: exc.class_schedule_id.clone(),
    };

    // The (date, slot) the approval newly occupies, when the type occupies one.
    let target: Option<(NaiveDate, i64)> = match request_type {
        RequestType::Paused | RequestType::SubstituteTeacher => None,
        RequestType::Moved | RequestType::MidtermExam => Some((
            exc.moved_to_date.ok_or_else(|| missing("movedToDate"))?,
            exc.moved_to_time_slot_id
                .ok_or_else(|| missing("movedToTimeSlotId"))?,
        )),
        RequestType::RoomChange => Some((
            exc.exception_date.ok_or_else(|| missing("exceptionDate"))?,
            exc.new_time_slot_id
                .or_else(|| displaced.as_ref().map(|b| b.time_slot_id))
                .ok_or_else(|| missing("newTimeSlotId"))?,
        )),
        RequestType::FinalExam => Some((
            exc.exception_date.ok_or_else(|| missing("exceptionDate"))?,
            exc.new_time_slot_id.ok_or_else(|| missing("newTimeSlotId"))?,
        )),
    };

    if let (Some((date, slot)), Some(room_id)) = (target, room_id.as_deref()) {
        let report = check_room_conflict(&tx, room_id, date, slot, &excl)?;
        if report.has_conflict {
            return Err(ScheduleError::with_details(
                "room_conflict",
                report
                    .conflict_message
                    .unwrap_or_else(|| "room already taken".to_string()),
                json!({
                    "conflictType": report.conflict_type,
                    "conflictId": report.conflict_id,
                }),
            ));
        }

        let room = load_room(&tx, room_id)?
            .ok_or_else(|| ScheduleError::new("not_found", format!("room {} not found", room_id)))?;
        let class_ref = displaced
            .as_ref()
            .map(|b| b.class_id.clone())
            .or_else(|| exc.class_id.clone());
        if let Some(class_id) = class_ref {
            if let Some(size) = class_size(&tx, &class_id)? {
                if room.capacity < size {
                    return Err(ScheduleError::with_details(
                        "capacity_too_small",
                        format!("room {} seats {} but the class has {}", room.name, room.capacity, size),
                        json!({ "capacity": room.capacity, "classSize": size }),
                    ));
                }
            }
        }

        let carried_teacher = proctor
            .clone()
            .or_else(|| displaced.as_ref().map(|b| b.teacher_id.clone()));
        if let Some(teacher_id) = carried_teacher.as_deref() {
            let report = check_teacher_conflict(&tx, teacher_id, date, slot, &excl)?;
            if report.has_conflict {
                return Err(ScheduleError::with_details(
                    "teacher_conflict",
                    report
                        .conflict_message
                        .unwrap_or_else(|| "teacher already booked".to_string()),
                    json!({
                        "conflictType": report.conflict_type,
                        "conflictId": report.conflict_id,
                    }),
                ));
            }
        }
    }

    if let (RequestType::SubstituteTeacher, Some(sub)) = (request_type, substitute.as_deref()) {
        let date = exc.exception_date.ok_or_else(|| missing("exceptionDate"))?;
        let slot = displaced
            .as_ref()
            .map(|b| b.time_slot_id)
            .ok_or_else(|| missing("classScheduleId"))?;
        let report = check_teacher_conflict(&tx, sub, date, slot, &excl)?;
        if report.has_conflict {
            return Err(ScheduleError::with_details(
                "teacher_conflict",
                report
                    .conflict_message
                    .unwrap_or_else(|| "substitute already booked".to_string()),
                json!({
                    "conflictType": report.conflict_type,
                    "conflictId": report.conflict_id,
                }),
            ));
        }
    }

    let room_col = if request_type.uses_moved_to() {
        "moved_to_room_id"
    } else {
        "new_room_id"
    };
    let approved_at = chrono::Utc::now().to_rfc3339();
    tx.execute(
        &format!(
            "UPDATE exceptions
             SET request_status_id = 2, approved_by = ?, approved_at = ?,
                 {} = COALESCE(?, {}), substitute_teacher_id = COALESCE(?, substitute_teacher_id),
                 teacher_id = COALESCE(?, teacher_id)
             WHERE id = ?",
            room_col, room_col
        ),
        (
            approved_by,
            &approved_at,
            &room_id,
            &substitute,
            &proctor,
            exception_id,
        ),
    )
    .map_err(|e| ScheduleError::new("db_update_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| ScheduleError::new("db_commit_failed", e.to_string()))?;

    Ok(TransitionOutcome {
        exception_id: exception_id.to_string(),
        affected_user_ids: affected_users(&exc, displaced.as_ref()),
    })
}

/// Pending -> Rejected. Nothing was ever occupied, so no booking side effects.
pub fn reject_exception(
    conn: &Connection,
    exception_id: &str,
    note: Option<&str>,
) -> Result<TransitionOutcome, ScheduleError> {
    let exc = load_exception(conn, exception_id)?
        .ok_or_else(|| ScheduleError::new("not_found", "exception not found"))?;
    if exc.status != RequestStatus::Pending {
        return Err(ScheduleError::new(
            "already_processed",
            "only pending requests can be rejected",
        ));
    }
    conn.execute(
        "UPDATE exceptions SET request_status_id = 3, note = COALESCE(?, note) WHERE id = ?",
        (note, exception_id),
    )
    .map_err(|e| ScheduleError::new("db_update_failed", e.to_string()))?;
    let displaced = match exc.class_schedule_id.as_deref() {
        Some(sid) => load_weekly_booking(conn, sid)?,
        None => None,
    };
    Ok(TransitionOutcome {
        exception_id: exception_id.to_string(),
        affected_user_ids: affected_users(&exc, displaced.as_ref()),
    })
}

/// Approved -> Reverted. Releases whatever the exception occupied; the
/// displaced weekly booking's default occupancy resumes for that date on the
/// next index build, since the index only consults approved rows.
pub fn revert_exception(
    conn: &Connection,
    exception_id: &str,
) -> Result<TransitionOutcome, ScheduleError> {
    let exc = load_exception(conn, exception_id)?
        .ok_or_else(|| ScheduleError::new("not_found", "exception not found"))?;
    if exc.status != RequestStatus::Approved {
        return Err(ScheduleError::new(
            "already_processed",
            "only approved requests can be reverted",
        ));
    }
    conn.execute(
        "UPDATE exceptions SET request_status_id = 4 WHERE id = ?",
        [exception_id],
    )
    .map_err(|e| ScheduleError::new("db_update_failed", e.to_string()))?;
    let displaced = match exc.class_schedule_id.as_deref() {
        Some(sid) => load_weekly_booking(conn, sid)?,
        None => None,
    };
    Ok(TransitionOutcome {
        exception_id: exception_id.to_string(),
        affected_user_ids: affected_users(&exc, displaced.as_ref()),
    })
}
