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

fn open_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

#[test]
fn resolution_order_is_teacher_then_student_then_unlinked() {
    let workspace = temp_dir("campusd-resolve-order");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let user_id = s(
        &request_ok(
            &mut stdin,
            &mut reader,
            "u",
            "users.create",
            json!({ "username": "dual" }),
        ),
        "userId",
    );

    let unlinked = request_ok(
        &mut stdin,
        &mut reader,
        "r0",
        "auth.resolve",
        json!({ "userId": user_id }),
    );
    assert_eq!(unlinked.get("role").and_then(|v| v.as_str()), Some("unlinked"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "students.create",
        json!({
            "id": "STU-1",
            "first": "Asha",
            "last": "Rao",
            "email": "asha@campus.test",
            "prn": 101,
            "userId": user_id
        }),
    );
    let as_student = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "auth.resolve",
        json!({ "userId": user_id }),
    );
    assert_eq!(as_student.get("role").and_then(|v| v.as_str()), Some("student"));
    assert_eq!(
        as_student
            .get("student")
            .and_then(|st| st.get("id"))
            .and_then(|v| v.as_str()),
        Some("STU-1")
    );

    // Linking a teacher profile to the same account flips resolution:
    // teacher is checked first.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "t",
        "teachers.create",
        json!({ "userId": user_id, "employeeId": "EMP-1" }),
    );
    let as_teacher = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "auth.resolve",
        json!({ "userId": user_id }),
    );
    assert_eq!(as_teacher.get("role").and_then(|v| v.as_str()), Some("teacher"));
}

#[test]
fn unknown_account_is_not_found_not_unlinked() {
    let workspace = temp_dir("campusd-resolve-unknown");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "r",
        "auth.resolve",
        json!({ "userId": "no-such-user" }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn teacher_requires_an_account_and_dies_with_it() {
    let workspace = temp_dir("campusd-teacher-account");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    // No account: the NOT NULL + FK pair rejects the row.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "t0",
        "teachers.create",
        json!({ "userId": "missing", "employeeId": "EMP-1" }),
    );
    assert_eq!(code, "integrity_violation");

    let user_id = s(
        &request_ok(
            &mut stdin,
            &mut reader,
            "u",
            "users.create",
            json!({ "username": "tmeyer" }),
        ),
        "userId",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "teachers.create",
        json!({ "userId": user_id, "employeeId": "EMP-1" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "users.delete",
        json!({ "userId": user_id }),
    );
    let teachers = request_ok(&mut stdin, &mut reader, "tl", "teachers.list", json!({}));
    assert_eq!(
        teachers.get("teachers").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0),
        "deleting the account must cascade to the teacher row"
    );
}

#[test]
fn duplicate_profile_links_are_integrity_violations() {
    let workspace = temp_dir("campusd-dup-links");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let user_id = s(
        &request_ok(
            &mut stdin,
            &mut reader,
            "u",
            "users.create",
            json!({ "username": "tmeyer" }),
        ),
        "userId",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "teachers.create",
        json!({ "userId": user_id, "employeeId": "EMP-1" }),
    );
    // Same account twice: the 1:1 link is unique.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "t2",
        "teachers.create",
        json!({ "userId": user_id, "employeeId": "EMP-2" }),
    );
    assert_eq!(code, "integrity_violation");

    // Same employee id on a fresh account: unique as well.
    let other = s(
        &request_ok(
            &mut stdin,
            &mut reader,
            "u2",
            "users.create",
            json!({ "username": "other" }),
        ),
        "userId",
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "t3",
        "teachers.create",
        json!({ "userId": other, "employeeId": "EMP-1" }),
    );
    assert_eq!(code, "integrity_violation");
}

#[test]
fn student_claim_and_release_of_an_account() {
    let workspace = temp_dir("campusd-claim");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    // Pre-provisioned student with no login yet.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "students.create",
        json!({
            "id": "STU-1",
            "first": "Asha",
            "last": "Rao",
            "email": "asha@campus.test",
            "prn": 101
        }),
    );
    let user_id = s(
        &request_ok(
            &mut stdin,
            &mut reader,
            "u",
            "users.create",
            json!({ "username": "asha" }),
        ),
        "userId",
    );
    let before = request_ok(
        &mut stdin,
        &mut reader,
        "r0",
        "auth.resolve",
        json!({ "userId": user_id }),
    );
    assert_eq!(before.get("role").and_then(|v| v.as_str()), Some("unlinked"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "link",
        "students.linkUser",
        json!({ "studentId": "STU-1", "userId": user_id }),
    );
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "auth.resolve",
        json!({ "userId": user_id }),
    );
    assert_eq!(after.get("role").and_then(|v| v.as_str()), Some("student"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "unlink",
        "students.linkUser",
        json!({ "studentId": "STU-1", "userId": null }),
    );
    let released = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "auth.resolve",
        json!({ "userId": user_id }),
    );
    assert_eq!(released.get("role").and_then(|v| v.as_str()), Some("unlinked"));
}
