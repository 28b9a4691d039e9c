use crate::calendar;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Paused,
    MidtermExam,
    RoomChange,
    Moved,
    SubstituteTeacher,
    FinalExam,
}

impl RequestType {
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            5 => Some(Self::Paused),
            6 => Some(Self::MidtermExam),
            7 => Some(Self::RoomChange),
            8 => Some(Self::Moved),
            9 => Some(Self::SubstituteTeacher),
            10 => Some(Self::FinalExam),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            Self::Paused => 5,
            Self::MidtermExam => 6,
            Self::RoomChange => 7,
            Self::Moved => 8,
            Self::SubstituteTeacher => 9,
            Self::FinalExam => 10,
        }
    }

    /// Types whose approval vacates the displaced weekly booking's room for
    /// the exception date. MidtermExam keeps the regular lesson running, so
    /// it frees nothing.
    pub fn frees_original(self) -> bool {
        matches!(self, Self::Paused | Self::Moved | Self::RoomChange)
    }

    pub fn requires_room(self) -> bool {
        matches!(
            self,
            Self::MidtermExam | Self::RoomChange | Self::Moved | Self::FinalExam
        )
    }

    pub fn requires_substitute(self) -> bool {
        matches!(self, Self::SubstituteTeacher)
    }

    /// Relocations land on the movedTo* triple; everything else occupies via
    /// exceptionDate + newTimeSlotId/newClassRoomId.
    pub fn uses_moved_to(self) -> bool {
        matches!(self, Self::MidtermExam | Self::Moved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Reverted,
}

impl RequestStatus {
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::Pending),
            2 => Some(Self::Approved),
            3 => Some(Self::Rejected),
            4 => Some(Self::Reverted),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            Self::Pending => 1,
            Self::Approved => 2,
            Self::Rejected => 3,
            Self::Reverted => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ScheduleError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct WeeklyBooking {
    pub id: String,
    pub room_id: String,
    pub teacher_id: String,
    pub class_id: String,
    pub day_of_week: i64,
    pub time_slot_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl WeeklyBooking {
    pub fn active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone)]
pub struct ExceptionRow {
    pub id: String,
    pub request_type: RequestType,
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
    pub status: RequestStatus,
    pub reason: Option<String>,
    pub note: Option<String>,
    pub requester_id: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RoomRow {
    pub id: String,
    pub name: String,
    pub room_type_id: Option<i64>,
    pub department_id: Option<String>,
    pub capacity: i64,
}

/// Self-exclusion for re-validating an edit: the named exception and/or the
/// weekly booking it displaces are left out of the index so a request never
/// conflicts with its own prior assignment.
#[derive(Debug, Default, Clone)]
pub struct Exclusions {
    pub exception_id: Option<String>,
    pub schedule_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OccupancySource {
    WeeklyBooking { schedule_id: String },
    Exception { exception_id: String, request_type: RequestType },
}

impl OccupancySource {
    pub fn conflict_type(&self) -> &'static str {
        match self {
            Self::WeeklyBooking { .. } => "weekly-booking",
            Self::Exception { .. } => "exception",
        }
    }

    pub fn conflict_id(&self) -> &str {
        match self {
            Self::WeeklyBooking { schedule_id } => schedule_id,
            Self::Exception { exception_id, .. } => exception_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Occupant {
    pub room_id: Option<String>,
    pub teacher_id: Option<String>,
    pub class_id: Option<String>,
    pub source: OccupancySource,
    /// True when the occupant arrived here through a Moved/MidtermExam
    /// relocation, so the destination room reads as occupied even though it
    /// differs from the displaced booking's room.
    pub moved_in: bool,
}

#[derive(Debug, Clone)]
pub struct FreedEntry {
    pub room_id: String,
    pub exception_id: String,
    pub request_type: RequestType,
    pub schedule_id: String,
    pub class_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
pub struct BookingIndex {
    pub occupants: Vec<Occupant>,
    pub freed: Vec<FreedEntry>,
}

impl BookingIndex {
    pub fn room_occupant(&self, room_id: &str) -> Option<&Occupant> {
        self.occupants
            .iter()
            .find(|o| o.room_id.as_deref() == Some(room_id))
    }

    pub fn teacher_occupant(&self, teacher_id: &str) -> Option<&Occupant> {
        self.occupants
            .iter()
            .find(|o| o.teacher_id.as_deref() == Some(teacher_id))
    }

    pub fn freed_for_room(&self, room_id: &str) -> Option<&FreedEntry> {
        self.freed.iter().find(|f| f.room_id == room_id)
    }
}

fn date_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    calendar::parse_date(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid stored date: {}", s).into(),
        )
    })
}

fn opt_date_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        None => Ok(None),
        Some(s) => calendar::parse_date(&s).map(Some).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                format!("invalid stored date: {}", s).into(),
            )
        }),
    }
}

fn map_booking_row(row: &rusqlite::Row) -> rusqlite::Result<WeeklyBooking> {
    Ok(WeeklyBooking {
        id: row.get(0)?,
        room_id: row.get(1)?,
        teacher_id: row.get(2)?,
        class_id: row.get(3)?,
        day_of_week: row.get(4)?,
        time_slot_id: row.get(5)?,
        start_date: date_col(row, 6)?,
        end_date: date_col(row, 7)?,
    })
}

const BOOKING_COLS: &str =
    "id, room_id, teacher_id, class_id, day_of_week, time_slot_id, start_date, end_date";

pub(crate) fn map_exception_row(row: &rusqlite::Row) -> rusqlite::Result<ExceptionRow> {
    let type_id: i64 = row.get(1)?;
    let status_id: i64 = row.get(12)?;
    let request_type = RequestType::from_id(type_id).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Integer,
            format!("unknown request type: {}", type_id).into(),
        )
    })?;
    let status = RequestStatus::from_id(status_id).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            12,
            rusqlite::types::Type::Integer,
            format!("unknown request status: {}", status_id).into(),
        )
    })?;
    Ok(ExceptionRow {
        id: row.get(0)?,
        request_type,
        class_schedule_id: row.get(2)?,
        class_id: row.get(3)?,
        exception_date: opt_date_col(row, 4)?,
        teacher_id: row.get(5)?,
        new_time_slot_id: row.get(6)?,
        new_room_id: row.get(7)?,
        moved_to_date: opt_date_col(row, 8)?,
        moved_to_time_slot_id: row.get(9)?,
        moved_to_room_id: row.get(10)?,
        substitute_teacher_id: row.get(11)?,
        status,
        reason: row.get(13)?,
        note: row.get(14)?,
        requester_id: row.get(15)?,
        approved_by: row.get(16)?,
        approved_at: row.get(17)?,
    })
}

pub const EXCEPTION_COLS: &str = "id, request_type_id, class_schedule_id, class_id, \
     exception_date, teacher_id, new_time_slot_id, new_room_id, moved_to_date, \
     moved_to_time_slot_id, moved_to_room_id, substitute_teacher_id, request_status_id, \
     reason, note, requester_id, approved_by, approved_at";

pub fn load_weekly_booking(
    conn: &Connection,
    schedule_id: &str,
) -> Result<Option<WeeklyBooking>, ScheduleError> {
    conn.query_row(
        &format!("SELECT {} FROM weekly_bookings WHERE id = ?", BOOKING_COLS),
        [schedule_id],
        map_booking_row,
    )
    .optional()
    .map_err(ScheduleError::db)
}

pub fn load_exception(
    conn: &Connection,
    exception_id: &str,
) -> Result<Option<ExceptionRow>, ScheduleError> {
    conn.query_row(
        &format!("SELECT {} FROM exceptions WHERE id = ?", EXCEPTION_COLS),
        [exception_id],
        map_exception_row,
    )
    .optional()
    .map_err(ScheduleError::db)
}

pub fn load_room(conn: &Connection, room_id: &str) -> Result<Option<RoomRow>, ScheduleError> {
    conn.query_row(
        "SELECT id, name, room_type_id, department_id, capacity FROM rooms WHERE id = ?",
        [room_id],
        |row| {
            Ok(RoomRow {
                id: row.get(0)?,
                name: row.get(1)?,
                room_type_id: row.get(2)?,
                department_id: row.get(3)?,
                capacity: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(ScheduleError::db)
}

/// Where an approved exception newly sits: the (date, slot, room) it occupies,
/// plus the teacher/class it carries there. None for types that occupy
/// nothing (Paused, SubstituteTeacher) and for rows whose assignment is still
/// incomplete.
#[derive(Debug, Clone)]
pub struct ExceptionOccupancy {
    pub date: NaiveDate,
    pub time_slot_id: i64,
    pub room_id: String,
    pub teacher_id: Option<String>,
    pub class_id: Option<String>,
    pub moved_in: bool,
}

pub fn exception_occupancy(
    conn: &Connection,
    exc: &ExceptionRow,
) -> Result<Option<ExceptionOccupancy>, ScheduleError> {
    let displaced = match &exc.class_schedule_id {
        Some(sid) => load_weekly_booking(conn, sid)?,
        None => None,
    };
    let displaced_teacher = displaced.as_ref().map(|b| b.teacher_id.clone());
    let displaced_class = displaced.as_ref().map(|b| b.class_id.clone());
    let carried_teacher = exc.teacher_id.clone().or(displaced_teacher);

    let occ = match exc.request_type {
        RequestType::Paused | RequestType::SubstituteTeacher => None,
        RequestType::Moved | RequestType::MidtermExam => {
            match (&exc.moved_to_date, exc.moved_to_time_slot_id, &exc.moved_to_room_id) {
                (Some(date), Some(slot), Some(room)) => Some(ExceptionOccupancy {
                    date: *date,
                    time_slot_id: slot,
                    room_id: room.clone(),
                    teacher_id: carried_teacher,
                    class_id: displaced_class,
                    moved_in: true,
                }),
                _ => None,
            }
        }
        RequestType::RoomChange => {
            let slot = exc
                .new_time_slot_id
                .or(displaced.as_ref().map(|b| b.time_slot_id));
            match (&exc.exception_date, slot, &exc.new_room_id) {
                (Some(date), Some(slot), Some(room)) => Some(ExceptionOccupancy {
                    date: *date,
                    time_slot_id: slot,
                    room_id: room.clone(),
                    teacher_id: carried_teacher,
                    class_id: displaced_class,
                    moved_in: false,
                }),
                _ => None,
            }
        }
        RequestType::FinalExam => {
            match (&exc.exception_date, exc.new_time_slot_id, &exc.new_room_id) {
                (Some(date), Some(slot), Some(room)) => Some(ExceptionOccupancy {
                    date: *date,
                    time_slot_id: slot,
                    room_id: room.clone(),
                    teacher_id: exc.teacher_id.clone(),
                    class_id: exc.class_id.clone(),
                    moved_in: false,
                }),
                _ => None,
            }
        }
    };
    Ok(occ)
}

fn default_bookings(
    conn: &Connection,
    date: NaiveDate,
    time_slot_id: i64,
    excl: &Exclusions,
) -> Result<Vec<WeeklyBooking>, ScheduleError> {
    let dow = calendar::day_of_week_of(date);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM weekly_bookings
             WHERE day_of_week = ? AND time_slot_id = ? AND start_date <= ? AND end_date >= ?",
            BOOKING_COLS
        ))
        .map_err(ScheduleError::db)?;
    let date_s = date.to_string();
    let rows = stmt
        .query_map((dow, time_slot_id, &date_s, &date_s), map_booking_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ScheduleError::db)?;
    Ok(rows
        .into_iter()
        .filter(|b| excl.schedule_id.as_deref() != Some(b.id.as_str()))
        .collect())
}

fn approved_exceptions_touching(
    conn: &Connection,
    date: NaiveDate,
    excl: &Exclusions,
) -> Result<Vec<ExceptionRow>, ScheduleError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM exceptions
             WHERE request_status_id = 2 AND (exception_date = ? OR moved_to_date = ?)",
            EXCEPTION_COLS
        ))
        .map_err(ScheduleError::db)?;
    let date_s = date.to_string();
    let rows = stmt
        .query_map((&date_s, &date_s), map_exception_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ScheduleError::db)?;
    Ok(rows
        .into_iter()
        .filter(|e| excl.exception_id.as_deref() != Some(e.id.as_str()))
        .collect())
}

/// Derive the occupancy picture for one (date, timeSlot), always fresh from
/// the store. Empty inputs yield empty sets; this never fails on "nothing
/// scheduled".
pub fn build_booking_index(
    conn: &Connection,
    date: NaiveDate,
    time_slot_id: i64,
    excl: &Exclusions,
) -> Result<BookingIndex, ScheduleError> {
    let mut defaults = default_bookings(conn, date, time_slot_id, excl)?;
    let exceptions = approved_exceptions_touching(conn, date, excl)?;

    // Freeing pass: Paused/Moved/RoomChange vacate their displaced booking's
    // room for the exception date.
    let mut freed: Vec<FreedEntry> = Vec::new();
    for exc in &exceptions {
        if !exc.request_type.frees_original() || exc.exception_date != Some(date) {
            continue;
        }
        let Some(sid) = &exc.class_schedule_id else {
            continue;
        };
        if let Some(pos) = defaults.iter().position(|b| &b.id == sid) {
            let b = defaults.remove(pos);
            freed.push(FreedEntry {
                room_id: b.room_id,
                exception_id: exc.id.clone(),
                request_type: exc.request_type,
                schedule_id: b.id,
                class_id: b.class_id,
                reason: exc.reason.clone(),
            });
        }
    }

    // Substitutions replace a surviving default booking's teacher for the date.
    let mut substitutes: HashMap<String, (String, String)> = HashMap::new();
    for exc in &exceptions {
        if exc.request_type != RequestType::SubstituteTeacher || exc.exception_date != Some(date) {
            continue;
        }
        if let (Some(sid), Some(sub)) = (&exc.class_schedule_id, &exc.substitute_teacher_id) {
            substitutes.insert(sid.clone(), (sub.clone(), exc.id.clone()));
        }
    }

    let mut occupants: Vec<Occupant> = Vec::new();
    for b in defaults {
        let substituted = substitutes.get(&b.id).cloned();
        occupants.push(Occupant {
            room_id: Some(b.room_id.clone()),
            // The regular teacher is released for the date when substituted.
            teacher_id: if substituted.is_some() {
                None
            } else {
                Some(b.teacher_id.clone())
            },
            class_id: Some(b.class_id.clone()),
            source: OccupancySource::WeeklyBooking {
                schedule_id: b.id.clone(),
            },
            moved_in: false,
        });
        if let Some((sub_teacher, exc_id)) = substituted {
            occupants.push(Occupant {
                room_id: None,
                teacher_id: Some(sub_teacher),
                class_id: Some(b.class_id.clone()),
                source: OccupancySource::Exception {
                    exception_id: exc_id,
                    request_type: RequestType::SubstituteTeacher,
                },
                moved_in: false,
            });
        }
    }

    for exc in &exceptions {
        let Some(occ) = exception_occupancy(conn, exc)? else {
            continue;
        };
        if occ.date != date || occ.time_slot_id != time_slot_id {
            continue;
        }
        occupants.push(Occupant {
            room_id: Some(occ.room_id),
            teacher_id: occ.teacher_id,
            class_id: occ.class_id,
            source: OccupancySource::Exception {
                exception_id: exc.id.clone(),
                request_type: exc.request_type,
            },
            moved_in: occ.moved_in,
        });
    }

    Ok(BookingIndex { occupants, freed })
}

/// Weekly-recurring occupancy only, for queries with no calendar date.
/// Deliberately weaker: no exception adjustment, which the caller must
/// surface as "unverified against exceptions".
pub fn build_weekly_index(
    conn: &Connection,
    day_of_week: i64,
    time_slot_id: i64,
) -> Result<BookingIndex, ScheduleError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM weekly_bookings WHERE day_of_week = ? AND time_slot_id = ?",
            BOOKING_COLS
        ))
        .map_err(ScheduleError::db)?;
    let rows = stmt
        .query_map((day_of_week, time_slot_id), map_booking_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ScheduleError::db)?;
    let occupants = rows
        .into_iter()
        .map(|b| Occupant {
            room_id: Some(b.room_id),
            teacher_id: Some(b.teacher_id),
            class_id: Some(b.class_id),
            source: OccupancySource::WeeklyBooking { schedule_id: b.id },
            moved_in: false,
        })
        .collect();
    Ok(BookingIndex {
        occupants,
        freed: Vec::new(),
    })
}

#[derive(Debug, Clone)]
pub struct AvailabilityQuery {
    pub time_slot_id: i64,
    pub day_of_week: i64,
    pub date: Option<NaiveDate>,
    pub min_capacity: i64,
    pub room_type_id: Option<i64>,
    pub department_id: Option<String>,
}

#[derive(Debug)]
pub struct AvailabilityView {
    pub normal_rooms: Vec<RoomRow>,
    pub freed_rooms: Vec<(RoomRow, FreedEntry)>,
    pub occupied_rooms: Vec<(RoomRow, Occupant)>,
    pub verified_against_exceptions: bool,
}

fn room_catalog(conn: &Connection, q: &AvailabilityQuery) -> Result<Vec<RoomRow>, ScheduleError> {
    let mut sql = String::from(
        "SELECT id, name, room_type_id, department_id, capacity FROM rooms WHERE capacity >= ?",
    );
    let mut params: Vec<rusqlite::types::Value> = vec![q.min_capacity.into()];
    if let Some(rt) = q.room_type_id {
        sql.push_str(" AND room_type_id = ?");
        params.push(rt.into());
    }
    if let Some(dep) = &q.department_id {
        sql.push_str(" AND department_id = ?");
        params.push(dep.clone().into());
    }
    sql.push_str(" ORDER BY name");
    let mut stmt = conn.prepare(&sql).map_err(ScheduleError::db)?;
    stmt.query_map(rusqlite::params_from_iter(params), |row| {
        Ok(RoomRow {
            id: row.get(0)?,
            name: row.get(1)?,
            room_type_id: row.get(2)?,
            department_id: row.get(3)?,
            capacity: row.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(ScheduleError::db)
}

fn capacity_rank(room: &RoomRow, min_capacity: i64) -> (i64, String) {
    ((room.capacity - min_capacity).abs(), room.name.clone())
}

/// Partition the room catalog for one (date|dayOfWeek, timeSlot) query.
/// A room both freed and re-occupied (e.g. vacated by one exception, filled
/// by a moved-in one) is classified occupied: occupied always wins over
/// freed. Suggestion lists are sorted by capacity fit.
pub fn available_rooms(
    conn: &Connection,
    q: &AvailabilityQuery,
) -> Result<AvailabilityView, ScheduleError> {
    let rooms = room_catalog(conn, q)?;
    let (index, verified) = match q.date {
        Some(date) => (
            build_booking_index(conn, date, q.time_slot_id, &Exclusions::default())?,
            true,
        ),
        None => (
            build_weekly_index(conn, q.day_of_week, q.time_slot_id)?,
            false,
        ),
    };

    let mut normal: Vec<RoomRow> = Vec::new();
    let mut freed: Vec<(RoomRow, FreedEntry)> = Vec::new();
    let mut occupied: Vec<(RoomRow, Occupant)> = Vec::new();
    for room in rooms {
        if let Some(occ) = index.room_occupant(&room.id) {
            occupied.push((room, occ.clone()));
        } else if let Some(fr) = index.freed_for_room(&room.id) {
            freed.push((room, fr.clone()));
        } else {
            normal.push(room);
        }
    }

    normal.sort_by_key(|r| capacity_rank(r, q.min_capacity));
    freed.sort_by_key(|(r, _)| capacity_rank(r, q.min_capacity));
    occupied.sort_by_key(|(r, _)| capacity_rank(r, q.min_capacity));

    Ok(AvailabilityView {
        normal_rooms: normal,
        freed_rooms: freed,
        occupied_rooms: occupied,
        verified_against_exceptions: verified,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub has_conflict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_message: Option<String>,
}

impl ConflictReport {
    fn clear() -> Self {
        Self {
            has_conflict: false,
            conflict_type: None,
            conflict_id: None,
            conflict_message: None,
        }
    }

    fn from_occupant(occ: &Occupant, what: &str) -> Self {
        Self {
            has_conflict: true,
            conflict_type: Some(occ.source.conflict_type().to_string()),
            conflict_id: Some(occ.source.conflict_id().to_string()),
            conflict_message: Some(format!(
                "{} already taken by {} {}",
                what,
                occ.source.conflict_type(),
                occ.source.conflict_id()
            )),
        }
    }
}

pub fn check_room_conflict(
    conn: &Connection,
    room_id: &str,
    date: NaiveDate,
    time_slot_id: i64,
    excl: &Exclusions,
) -> Result<ConflictReport, ScheduleError> {
    let index = build_booking_index(conn, date, time_slot_id, excl)?;
    Ok(match index.room_occupant(room_id) {
        Some(occ) => ConflictReport::from_occupant(occ, "room"),
        None => ConflictReport::clear(),
    })
}

pub fn check_teacher_conflict(
    conn: &Connection,
    teacher_id: &str,
    date: NaiveDate,
    time_slot_id: i64,
    excl: &Exclusions,
) -> Result<ConflictReport, ScheduleError> {
    let index = build_booking_index(conn, date, time_slot_id, excl)?;
    Ok(match index.teacher_occupant(teacher_id) {
        Some(occ) => ConflictReport::from_occupant(occ, "teacher"),
        None => ConflictReport::clear(),
    })
}

/// Every occupant colliding with the given room and/or teacher at
/// (date, slot). With neither filter set, the full occupant list.
pub fn conflicts_for_schedule(
    conn: &Connection,
    date: NaiveDate,
    time_slot_id: i64,
    room_id: Option<&str>,
    teacher_id: Option<&str>,
) -> Result<Vec<Occupant>, ScheduleError> {
    let index = build_booking_index(conn, date, time_slot_id, &Exclusions::default())?;
    Ok(index
        .occupants
        .into_iter()
        .filter(|o| {
            if room_id.is_none() && teacher_id.is_none() {
                return true;
            }
            room_id.is_some() && o.room_id.as_deref() == room_id
                || teacher_id.is_some() && o.teacher_id.as_deref() == teacher_id
        })
        .collect())
}

/// Weekly-grid collision test used when creating a weekly booking: another
/// booking for the same room (or teacher) on the same dayOfWeek + slot with
/// an overlapping semester window.
pub fn weekly_booking_collision(
    conn: &Connection,
    day_of_week: i64,
    time_slot_id: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    room_id: Option<&str>,
    teacher_id: Option<&str>,
    exclude_schedule_id: Option<&str>,
) -> Result<Option<(String, &'static str)>, ScheduleError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM weekly_bookings
             WHERE day_of_week = ? AND time_slot_id = ? AND start_date <= ? AND end_date >= ?",
            BOOKING_COLS
        ))
        .map_err(ScheduleError::db)?;
    let rows = stmt
        .query_map(
            (
                day_of_week,
                time_slot_id,
                end_date.to_string(),
                start_date.to_string(),
            ),
            map_booking_row,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ScheduleError::db)?;
    for b in rows {
        if exclude_schedule_id == Some(b.id.as_str()) {
            continue;
        }
        if room_id == Some(b.room_id.as_str()) {
            return Ok(Some((b.id, "room_conflict")));
        }
        if teacher_id == Some(b.teacher_id.as_str()) {
            return Ok(Some((b.id, "teacher_conflict")));
        }
    }
    Ok(None)
}
