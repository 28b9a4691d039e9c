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
fn final_exam_lifecycle_from_draft_to_revert() {
    let workspace = temp_dir("timetabled-final-exam");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seed_timetable(&mut stdin, &mut reader, &workspace);

    // Exams are not tied to a weekly booking; they need a class and a slot.
    let verdict = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exception.validate",
        json!({
            "requestTypeId": 10,
            "classId": "class-1",
            "exceptionDate": "2024-06-10"
        }),
    );
    assert_eq!(verdict["isValid"].as_bool(), Some(false));
    assert_eq!(verdict["errorCode"].as_str(), Some("missing_field"));

    let verdict = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exception.validate",
        json!({
            "requestTypeId": 10,
            "exceptionDate": "2024-06-10",
            "newTimeSlotId": 5
        }),
    );
    assert_eq!(verdict["isValid"].as_bool(), Some(false));
    assert_eq!(verdict["errorCode"].as_str(), Some("missing_field"));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exception.create",
        json!({
            "requestTypeId": 10,
            "classId": "class-1",
            "exceptionDate": "2024-06-10",
            "newTimeSlotId": 5,
            "teacherId": "teach-2",
            "requesterId": "teach-1"
        }),
    );
    let exam_id = created["exceptionId"].as_str().expect("exceptionId").to_string();

    // A rival exam request for the same class and date may sit pending.
    let rival = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "exception.create",
        json!({
            "requestTypeId": 10,
            "classId": "class-1",
            "exceptionDate": "2024-06-10",
            "newTimeSlotId": 5
        }),
    );
    let rival_id = rival["exceptionId"].as_str().expect("exceptionId").to_string();

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "exception.approve",
        json!({ "id": exam_id }),
        "missing_room_assignment",
    );

    // class-1 has 25 students; a 10-seat room is refused.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.upsertRoom",
        json!({ "id": "room-12", "name": "12", "roomTypeId": 1, "capacity": 10 }),
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "exception.approve",
        json!({ "id": exam_id, "assignedRoomId": "room-12" }),
        "capacity_too_small",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "exception.approve",
        json!({ "id": exam_id, "assignedRoomId": "room-205", "approvedBy": "admin-1" }),
    );
    let event = read_event(&mut reader);
    let user_ids: Vec<&str> = event["userIds"]
        .as_array()
        .expect("userIds")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(user_ids.contains(&"teach-1"), "{}", event);
    assert!(user_ids.contains(&"teach-2"), "{}", event);

    let rooms = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "schedule.availableRooms",
        json!({ "timeSlotId": 5, "date": "2024-06-10" }),
    );
    assert!(room_ids(&rooms, "occupiedRooms").contains(&"room-205".to_string()));
    let exam_room = rooms["occupiedRooms"]
        .as_array()
        .expect("occupiedRooms")
        .iter()
        .find(|r| r["id"].as_str() == Some("room-205"))
        .expect("room-205 entry")
        .clone();
    let occupied_by = exam_room.get("occupiedBy").expect("occupiedBy");
    assert_eq!(occupied_by["source"]["kind"].as_str(), Some("exception"));
    assert_eq!(occupied_by["source"]["requestTypeId"].as_i64(), Some(10));
    assert_eq!(occupied_by["source"]["id"].as_str(), Some(exam_id.as_str()));
    assert_eq!(occupied_by["classId"].as_str(), Some("class-1"));
    assert_eq!(occupied_by["movedIn"].as_bool(), Some(false));

    // With one exam approved, the class+date is locked: the rival loses at
    // approval time and a fresh draft is refused outright.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "exception.approve",
        json!({ "id": rival_id, "assignedRoomId": "room-101" }),
        "duplicate_exception",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "exception.create",
        json!({
            "requestTypeId": 10,
            "classId": "class-1",
            "exceptionDate": "2024-06-10",
            "newTimeSlotId": 5
        }),
        "duplicate_exception",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "exception.revert",
        json!({ "id": exam_id }),
    );
    let _ = read_event(&mut reader);

    let rooms = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "schedule.availableRooms",
        json!({ "timeSlotId": 5, "date": "2024-06-10" }),
    );
    assert!(room_ids(&rooms, "occupiedRooms").is_empty());
    assert!(room_ids(&rooms, "normalRooms").contains(&"room-205".to_string()));

    let verdict = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "exception.validate",
        json!({
            "requestTypeId": 10,
            "classId": "class-1",
            "exceptionDate": "2024-06-10",
            "newTimeSlotId": 5
        }),
    );
    assert_eq!(verdict["isValid"].as_bool(), Some(true));

    drop(stdin);
    let _ = child.wait();
}
