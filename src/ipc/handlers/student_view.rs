use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::scope::{self, StudentProfile};
use rusqlite::Connection;
use serde_json::json;

/// "Current student" is only ever the row whose login link equals the
/// authenticated account. An account with no linked row gets no_profile,
/// never somebody else's record.
fn current_student(conn: &Connection, params: &serde_json::Value) -> Result<StudentProfile, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    scope::student_by_user(conn, &user_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::no_profile("no student profile linked to this account"))
}

fn profile(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student = current_student(conn, params)?;
    let (division, year, branch, semester_label) = conn
        .query_row(
            "SELECT d.name, y.year, b.name, sem.number
             FROM students s
             LEFT JOIN divisions d ON d.id = s.division_id
             LEFT JOIN academic_years y ON y.id = s.academic_year_id
             LEFT JOIN branches b ON b.id = s.branch_id
             LEFT JOIN semesters sem ON sem.id = s.semester_id
             WHERE s.id = ?",
            [&student.id],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, Option<i64>>(3)?.map(scope::semester_label),
                ))
            },
        )
        .map_err(HandlerErr::query)?;
    Ok(json!({
        "student": {
            "id": student.id,
            "first": student.first_name,
            "last": student.last_name,
            "email": student.email,
            "prn": student.prn,
            "division": division,
            "year": year,
            "branch": branch,
            "semester": semester_label
        }
    }))
}

fn courses(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student = current_student(conn, params)?;
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, c.code, b.name, y.year, s.number
             FROM courses c
             JOIN enrollments e ON e.course_id = c.id
             JOIN branches b ON b.id = c.branch_id
             JOIN academic_years y ON y.id = c.academic_year_id
             JOIN semesters s ON s.id = c.semester_id
             WHERE e.student_id = ?
             ORDER BY c.name",
        )
        .map_err(HandlerErr::query)?;
    let courses = stmt
        .query_map([&student.id], |r| {
            let number: i64 = r.get(5)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "branchName": r.get::<_, String>(3)?,
                "year": r.get::<_, String>(4)?,
                "semesterLabel": scope::semester_label(number)
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "courses": courses }))
}

fn grades(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student = current_student(conn, params)?;
    let mut stmt = conn
        .prepare(
            "SELECT c.code, c.name, g.score, g.letter
             FROM grades g
             JOIN courses c ON c.id = g.course_id
             WHERE g.student_id = ?
             ORDER BY c.code",
        )
        .map_err(HandlerErr::query)?;
    let grades = stmt
        .query_map([&student.id], |r| {
            Ok(json!({
                "courseCode": r.get::<_, String>(0)?,
                "courseName": r.get::<_, String>(1)?,
                "score": r.get::<_, f64>(2)?,
                "letter": r.get::<_, Option<String>>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "grades": grades }))
}

fn attendance(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student = current_student(conn, params)?;
    let mut stmt = conn
        .prepare(
            "SELECT a.date, c.code, a.present
             FROM attendance a
             JOIN courses c ON c.id = a.course_id
             WHERE a.student_id = ?
             ORDER BY a.date DESC, c.code",
        )
        .map_err(HandlerErr::query)?;
    let records = stmt
        .query_map([&student.id], |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "courseCode": r.get::<_, String>(1)?,
                "present": r.get::<_, i64>(2)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "records": records }))
}

fn assignments(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student = current_student(conn, params)?;
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.title, a.description, a.due_at, a.max_score, c.code
             FROM assignments a
             JOIN enrollments e ON e.course_id = a.course_id
             JOIN courses c ON c.id = a.course_id
             WHERE e.student_id = ?
             ORDER BY a.due_at, a.id",
        )
        .map_err(HandlerErr::query)?;
    let assignments = stmt
        .query_map([&student.id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "dueAt": r.get::<_, String>(3)?,
                "maxScore": r.get::<_, f64>(4)?,
                "courseCode": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "assignments": assignments }))
}

type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "student.profile" => profile,
        "student.courses" => courses,
        "student.grades" => grades,
        "student.attendance" => attendance,
        "student.assignments" => assignments,
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
