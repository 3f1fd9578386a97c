use crate::ipc::error::{err, ok, HandlerErr, WriteKind};
use crate::ipc::helpers::{get_opt_str, get_required_i64, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::scope::{self, Identity};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn user_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let full_name = get_opt_str(params, "fullName")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, full_name) VALUES(?, ?, ?)",
        (&id, &username, &full_name),
    )
    .map_err(HandlerErr::write(WriteKind::Insert, "users"))?;
    Ok(json!({ "userId": id, "username": username }))
}

fn user_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let deleted = conn
        .execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(HandlerErr::write(WriteKind::Delete, "users"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("user"));
    }
    Ok(json!({ "ok": true }))
}

fn student_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    // The id is the registrar's, never generated here.
    let id = get_required_str(params, "id")?;
    let first = get_required_str(params, "first")?;
    let last = get_required_str(params, "last")?;
    let email = get_required_str(params, "email")?;
    let prn = get_required_i64(params, "prn")?;
    let division_id = get_opt_str(params, "divisionId")?;
    let year_id = get_opt_str(params, "yearId")?;
    let branch_id = get_opt_str(params, "branchId")?;
    let semester_id = get_opt_str(params, "semesterId")?;
    let user_id = get_opt_str(params, "userId")?;
    conn.execute(
        "INSERT INTO students(
            id, first_name, last_name, email, prn,
            division_id, academic_year_id, branch_id, semester_id, user_id
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &first,
            &last,
            &email,
            prn,
            &division_id,
            &year_id,
            &branch_id,
            &semester_id,
            &user_id,
        ),
    )
    .map_err(HandlerErr::write(WriteKind::Insert, "students"))?;
    Ok(json!({ "studentId": id }))
}

fn student_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, email, prn, division_id, branch_id, user_id
             FROM students
             ORDER BY last_name, first_name",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "last": r.get::<_, String>(1)?,
                "first": r.get::<_, String>(2)?,
                "email": r.get::<_, String>(3)?,
                "prn": r.get::<_, i64>(4)?,
                "divisionId": r.get::<_, Option<String>>(5)?,
                "branchId": r.get::<_, Option<String>>(6)?,
                "userId": r.get::<_, Option<String>>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "students": students }))
}

fn student_link_user(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let user_id = get_opt_str(params, "userId")?;
    let updated = conn
        .execute(
            "UPDATE students SET user_id = ? WHERE id = ?",
            (&user_id, &student_id),
        )
        .map_err(HandlerErr::write(WriteKind::Update, "students"))?;
    if updated == 0 {
        return Err(HandlerErr::not_found("student"));
    }
    Ok(json!({ "ok": true }))
}

fn teacher_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let employee_id = get_required_str(params, "employeeId")?;
    let phone = get_opt_str(params, "phone")?;
    let branch_id = get_opt_str(params, "branchId")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, user_id, employee_id, phone, branch_id)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &user_id, &employee_id, &phone, &branch_id),
    )
    .map_err(HandlerErr::write(WriteKind::Insert, "teachers"))?;
    Ok(json!({ "teacherId": id, "employeeId": employee_id }))
}

fn teacher_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT t.id, t.employee_id, t.phone, t.branch_id, u.username, u.full_name
             FROM teachers t
             JOIN users u ON u.id = t.user_id
             ORDER BY t.employee_id",
        )
        .map_err(HandlerErr::query)?;
    let teachers = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "employeeId": r.get::<_, String>(1)?,
                "phone": r.get::<_, Option<String>>(2)?,
                "branchId": r.get::<_, Option<String>>(3)?,
                "username": r.get::<_, String>(4)?,
                "fullName": r.get::<_, Option<String>>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "teachers": teachers }))
}

fn enroll_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let student_id = get_required_str(params, "studentId")?;
    // The FK would reject a dangling student anyway, but report the
    // friendlier outcome for an id that simply does not exist.
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student"));
    }
    conn.execute(
        "INSERT INTO enrollments(course_id, student_id) VALUES(?, ?)
         ON CONFLICT(course_id, student_id) DO NOTHING",
        (&course_id, &student_id),
    )
    .map_err(HandlerErr::write(WriteKind::Insert, "enrollments"))?;
    Ok(json!({ "ok": true }))
}

fn enroll_remove(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let student_id = get_required_str(params, "studentId")?;
    conn.execute(
        "DELETE FROM enrollments WHERE course_id = ? AND student_id = ?",
        (&course_id, &student_id),
    )
    .map_err(HandlerErr::write(WriteKind::Delete, "enrollments"))?;
    Ok(json!({ "ok": true }))
}

fn auth_resolve(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let identity = scope::resolve_identity(conn, &user_id).map_err(HandlerErr::query)?;
    let Some(identity) = identity else {
        return Err(HandlerErr::not_found("user"));
    };
    Ok(match identity {
        Identity::Teacher(t) => json!({
            "role": "teacher",
            "teacher": {
                "id": t.id,
                "employeeId": t.employee_id,
                "phone": t.phone,
                "branchId": t.branch_id
            }
        }),
        Identity::Student(s) => json!({
            "role": "student",
            "student": {
                "id": s.id,
                "first": s.first_name,
                "last": s.last_name,
                "email": s.email,
                "prn": s.prn
            }
        }),
        Identity::Unlinked => json!({ "role": "unlinked" }),
    })
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "users.create" => user_create,
        "users.delete" => user_delete,
        "students.create" => student_create,
        "students.list" => student_list,
        "students.linkUser" => student_link_user,
        "teachers.create" => teacher_create,
        "teachers.list" => teacher_list,
        "enroll.add" => enroll_add,
        "enroll.remove" => enroll_remove,
        "auth.resolve" => auth_resolve,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match handler(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
