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
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
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
    let payload = json!({ "id": id, "method": method, "params": params });
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
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
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn s(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, result))
        .to_string()
}

struct Seed {
    teacher_user: String,
    division_id: String,
    course_id: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Seed {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let year = request_ok(stdin, reader, "y", "catalog.yearCreate", json!({ "year": "2024-25" }));
    let year_id = s(&year, "yearId");
    let sem = request_ok(
        stdin,
        reader,
        "sem",
        "catalog.semesterCreate",
        json!({ "yearId": year_id, "number": 3 }),
    );
    let semester_id = s(&sem, "semesterId");
    let branch = request_ok(
        stdin,
        reader,
        "b",
        "catalog.branchCreate",
        json!({ "name": "Computer Science", "code": "CS" }),
    );
    let branch_id = s(&branch, "branchId");
    let division = request_ok(
        stdin,
        reader,
        "d",
        "catalog.divisionCreate",
        json!({ "name": "A", "branchId": branch_id, "yearId": year_id }),
    );
    let division_id = s(&division, "divisionId");

    let user = request_ok(
        stdin,
        reader,
        "u",
        "users.create",
        json!({ "username": "tmeyer", "fullName": "T. Meyer" }),
    );
    let teacher_user = s(&user, "userId");
    let teacher = request_ok(
        stdin,
        reader,
        "t",
        "teachers.create",
        json!({ "userId": teacher_user, "employeeId": "EMP-100", "branchId": branch_id }),
    );
    let teacher_id = s(&teacher, "teacherId");

    let course = request_ok(
        stdin,
        reader,
        "c",
        "catalog.courseCreate",
        json!({
            "name": "Data Structures",
            "code": "CS301",
            "branchId": branch_id,
            "yearId": year_id,
            "semesterId": semester_id,
            "teacherId": teacher_id
        }),
    );
    let course_id = s(&course, "courseId");

    for (id, first, last, prn) in [
        ("STU-1", "Asha", "Rao", 101),
        ("STU-2", "Vikram", "Shah", 102),
    ] {
        let _ = request_ok(
            stdin,
            reader,
            &format!("s-{}", id),
            "students.create",
            json!({
                "id": id,
                "first": first,
                "last": last,
                "email": format!("{}@campus.test", id),
                "prn": prn,
                "divisionId": division_id,
                "yearId": year_id,
                "branchId": branch_id,
                "semesterId": semester_id
            }),
        );
        let _ = request_ok(
            stdin,
            reader,
            &format!("e-{}", id),
            "enroll.add",
            json!({ "courseId": course_id, "studentId": id }),
        );
    }

    Seed {
        teacher_user,
        division_id,
        course_id,
    }
}

#[test]
fn reconciliation_reports_present_and_no_record() {
    let workspace = temp_dir("campusd-reconcile");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    // Record S1 present on 2024-09-01; leave S2 untouched.
    let rec = request_ok(
        &mut stdin,
        &mut reader,
        "rec",
        "teacher.attendanceRecord",
        json!({
            "userId": seed.teacher_user,
            "courseId": seed.course_id,
            "date": "2024-09-01",
            "entries": [{ "studentId": "STU-1", "present": true }]
        }),
    );
    assert_eq!(rec.get("recorded").and_then(|v| v.as_u64()), Some(1));

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "view",
        "teacher.courseAttendance",
        json!({
            "userId": seed.teacher_user,
            "courseId": seed.course_id,
            "divisionId": seed.division_id,
            "date": "2024-09-01"
        }),
    );
    let entries = view
        .get("entries")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("entries");
    assert_eq!(entries.len(), 2, "one entry per roster student: {}", view);

    let status_of = |id: &str| {
        entries
            .iter()
            .find(|e| e.get("studentId").and_then(|v| v.as_str()) == Some(id))
            .and_then(|e| e.get("status").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .unwrap_or_else(|| panic!("no entry for {}", id))
    };
    assert_eq!(status_of("STU-1"), "present");
    assert_eq!(status_of("STU-2"), "no_record");
}

#[test]
fn reconciliation_distinguishes_absent_from_no_record() {
    let workspace = temp_dir("campusd-reconcile-absent");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "rec",
        "teacher.attendanceRecord",
        json!({
            "userId": seed.teacher_user,
            "courseId": seed.course_id,
            "date": "2024-09-02",
            "entries": [{ "studentId": "STU-2", "present": false }]
        }),
    );
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "view",
        "teacher.courseAttendance",
        json!({
            "userId": seed.teacher_user,
            "courseId": seed.course_id,
            "divisionId": seed.division_id,
            "date": "2024-09-02"
        }),
    );
    let entries = view.get("entries").and_then(|v| v.as_array()).cloned().expect("entries");
    let by_id: Vec<(String, String)> = entries
        .iter()
        .map(|e| {
            (
                e.get("studentId").and_then(|v| v.as_str()).unwrap().to_string(),
                e.get("status").and_then(|v| v.as_str()).unwrap().to_string(),
            )
        })
        .collect();
    assert!(by_id.contains(&("STU-2".to_string(), "absent".to_string())));
    assert!(by_id.contains(&("STU-1".to_string(), "no_record".to_string())));
}

#[test]
fn batch_record_is_atomic_on_bad_row() {
    let workspace = temp_dir("campusd-batch-atomic");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    // STU-9 is not enrolled: the whole batch must roll back, including the
    // valid STU-1 row ahead of it.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad",
        "teacher.attendanceRecord",
        json!({
            "userId": seed.teacher_user,
            "courseId": seed.course_id,
            "date": "2024-09-03",
            "entries": [
                { "studentId": "STU-1", "present": true },
                { "studentId": "STU-9", "present": true }
            ]
        }),
    );
    assert_eq!(code, "bad_params");

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "view",
        "teacher.courseAttendance",
        json!({
            "userId": seed.teacher_user,
            "courseId": seed.course_id,
            "divisionId": seed.division_id,
            "date": "2024-09-03"
        }),
    );
    let entries = view.get("entries").and_then(|v| v.as_array()).cloned().expect("entries");
    assert!(
        entries
            .iter()
            .all(|e| e.get("status").and_then(|v| v.as_str()) == Some("no_record")),
        "partial batch leaked: {}",
        view
    );
}

#[test]
fn rerecording_a_day_updates_in_place() {
    let workspace = temp_dir("campusd-rerecord");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    for (req_id, present) in [("r1", true), ("r2", false)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            req_id,
            "teacher.attendanceRecord",
            json!({
                "userId": seed.teacher_user,
                "courseId": seed.course_id,
                "date": "2024-09-04",
                "entries": [{ "studentId": "STU-1", "present": present }]
            }),
        );
    }
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "view",
        "teacher.courseAttendance",
        json!({
            "userId": seed.teacher_user,
            "courseId": seed.course_id,
            "divisionId": seed.division_id,
            "date": "2024-09-04"
        }),
    );
    let entries = view.get("entries").and_then(|v| v.as_array()).cloned().expect("entries");
    let s1 = entries
        .iter()
        .find(|e| e.get("studentId").and_then(|v| v.as_str()) == Some("STU-1"))
        .expect("STU-1 entry");
    assert_eq!(s1.get("status").and_then(|v| v.as_str()), Some("absent"));
}

#[test]
fn malformed_date_is_rejected_not_ignored() {
    let workspace = temp_dir("campusd-bad-date");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "q",
        "teacher.courseAttendance",
        json!({
            "userId": seed.teacher_user,
            "courseId": seed.course_id,
            "divisionId": seed.division_id,
            "date": "01/09/2024"
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "w",
        "teacher.attendanceRecord",
        json!({
            "userId": seed.teacher_user,
            "courseId": seed.course_id,
            "date": "yesterday",
            "entries": [{ "studentId": "STU-1", "present": true }]
        }),
    );
    assert_eq!(code, "bad_params");
}
