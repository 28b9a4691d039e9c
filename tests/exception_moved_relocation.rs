use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_timetabled");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok for {}: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    expected_code: &str,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected failure for {}: {}",
        method,
        value
    );
    assert_eq!(
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some(expected_code),
        "unexpected error for {}: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or_else(|| json!({}))
}

fn read_event(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read event line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse event json");
    assert!(value.get("event").is_some(), "expected event line: {}", value);
    value
}

/// Monday (dayOfWeek=2) slot 3 in room-101 for class-1/teach-1, spring 2024.
fn seed_timetable(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (id, name) in [(3, "Period 3"), (5, "Period 5")] {
        let _ = request_ok(
            stdin,
            reader,
            "s2",
            "setup.upsertTimeSlot",
            json!({
                "id": id,
                "slotName": name,
                "startTime": "10:00",
                "endTime": "11:30",
                "shift": "morning"
            }),
        );
    }
    let _ = request_ok(
        stdin,
        reader,
        "s3",
        "setup.upsertRoom",
        json!({ "id": "room-101", "name": "101", "roomTypeId": 1, "capacity": 30 }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s4",
        "setup.upsertRoom",
        json!({ "id": "room-205", "name": "205", "roomTypeId": 1, "capacity": 40 }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s5",
        "setup.upsertTeacher",
        json!({ "id": "teach-1", "name": "T. Pham" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s6",
        "setup.upsertTeacher",
        json!({ "id": "teach-2", "name": "H. Tran" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s7",
        "setup.upsertClass",
        json!({ "id": "class-1", "name": "Algebra", "teacherId": "teach-1", "size": 25 }),
    );
    let created = request_ok(
        stdin,
        reader,
        "s8",
        "timetable.createWeeklyBooking",
        json!({
            "roomId": "room-101",
            "teacherId": "teach-1",
            "classId": "class-1",
            "dayOfWeek": 2,
            "timeSlotId": 3,
            "startDate": "2024-01-01",
            "endDate": "2024-06-30"
        }),
    );
    created
        .get("scheduleId")
        .and_then(|v| v.as_str())
        .expect("scheduleId")
        .to_string()
}

fn room_ids(list: &serde_json::Value, key: &str) -> Vec<String> {
    list.get(key)
        .and_then(|v| v.as_array())
        .map(|rooms| {
            rooms
                .iter()
                .filter_map(|r| r.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn moved_exception_frees_origin_and_occupies_destination() {
    let workspace = temp_dir("timetabled-moved");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let schedule_id = seed_timetable(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exception.create",
        json!({
            "requestTypeId": 8,
            "classScheduleId": schedule_id,
            "exceptionDate": "2024-03-04",
            "movedToDate": "2024-03-05",
            "movedToTimeSlotId": 5,
            "movedToClassRoomId": "room-205",
            "requesterId": "teach-1"
        }),
    );
    let exception_id = created["exceptionId"].as_str().expect("exceptionId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exception.approve",
        json!({ "id": exception_id, "assignedRoomId": "room-205", "approvedBy": "admin-1" }),
    );
    let _ = read_event(&mut reader);

    let destination = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.availableRooms",
        json!({ "timeSlotId": 5, "date": "2024-03-05" }),
    );
    assert!(room_ids(&destination, "occupiedRooms").contains(&"room-205".to_string()));
    let occupied_entry = destination["occupiedRooms"]
        .as_array()
        .expect("occupiedRooms")
        .iter()
        .find(|r| r["id"].as_str() == Some("room-205"))
        .expect("room-205 entry")
        .clone();
    let occupied_by = occupied_entry.get("occupiedBy").expect("occupiedBy");
    assert_eq!(
        occupied_by["source"]["kind"].as_str(),
        Some("exception"),
        "{}",
        occupied_by
    );
    assert_eq!(occupied_by["source"]["id"].as_str(), Some(exception_id.as_str()));
    assert_eq!(occupied_by["movedIn"].as_bool(), Some(true));
    assert_eq!(occupied_by["classId"].as_str(), Some("class-1"));

    let origin = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.availableRooms",
        json!({ "timeSlotId": 3, "date": "2024-03-04" }),
    );
    assert!(room_ids(&origin, "freedRooms").contains(&"room-101".to_string()));
    assert!(!room_ids(&origin, "occupiedRooms").contains(&"room-101".to_string()));

    // The destination occupant also shows in the by-slot listing, with the
    // displaced teacher carried along.
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.byTimeSlotAndDate",
        json!({ "timeSlotId": 5, "date": "2024-03-05" }),
    );
    let occupants = listing["occupants"].as_array().expect("occupants");
    assert!(occupants.iter().any(|o| {
        o["roomId"].as_str() == Some("room-205") && o["teacherId"].as_str() == Some("teach-1")
    }));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn midterm_exam_keeps_the_regular_lesson_and_adds_a_booking() {
    let workspace = temp_dir("timetabled-midterm");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let schedule_id = seed_timetable(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exception.create",
        json!({
            "requestTypeId": 6,
            "classScheduleId": schedule_id,
            "exceptionDate": "2024-03-04",
            "movedToDate": "2024-03-05",
            "movedToTimeSlotId": 5
        }),
    );
    let exception_id = created["exceptionId"].as_str().expect("exceptionId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exception.approve",
        json!({ "id": exception_id, "assignedRoomId": "room-205" }),
    );
    let _ = read_event(&mut reader);

    // Exam slot occupied.
    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.availableRooms",
        json!({ "timeSlotId": 5, "date": "2024-03-05" }),
    );
    assert!(room_ids(&exam, "occupiedRooms").contains(&"room-205".to_string()));

    // The regular Monday lesson is untouched: nothing freed.
    let regular = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.availableRooms",
        json!({ "timeSlotId": 3, "date": "2024-03-04" }),
    );
    assert!(room_ids(&regular, "occupiedRooms").contains(&"room-101".to_string()));
    assert!(room_ids(&regular, "freedRooms").is_empty());

    drop(stdin);
    let _ = child.wait();
}
