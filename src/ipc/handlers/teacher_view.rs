use crate::ipc::error::{err, ok, HandlerErr, WriteKind};
use crate::ipc::helpers::{get_opt_str, get_required_f64, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::scope::{self, RosterStudent, TeacherProfile};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct CourseRow {
    id: String,
    name: String,
    code: String,
}

fn current_teacher(conn: &Connection, params: &serde_json::Value) -> Result<TeacherProfile, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    scope::teacher_by_user(conn, &user_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::no_profile("no teacher profile linked to this account"))
}

/// Course lookups are always filtered by the requesting instructor. A
/// course that exists but belongs to someone else is indistinguishable
/// from one that does not exist.
fn scoped_course(
    conn: &Connection,
    teacher_id: &str,
    course_id: &str,
) -> Result<CourseRow, HandlerErr> {
    conn.query_row(
        "SELECT id, name, code FROM courses WHERE id = ? AND teacher_id = ?",
        (course_id, teacher_id),
        |r| {
            Ok(CourseRow {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found("course"))
}

fn course_json(course: &CourseRow) -> serde_json::Value {
    json!({ "id": course.id, "name": course.name, "code": course.code })
}

fn enrolled(conn: &Connection, course_id: &str, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM enrollments WHERE course_id = ? AND student_id = ?",
        (course_id, student_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn dashboard(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher = current_teacher(conn, params)?;
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, c.code, b.name, y.year, s.number,
                    (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id)
             FROM courses c
             JOIN branches b ON b.id = c.branch_id
             JOIN academic_years y ON y.id = c.academic_year_id
             JOIN semesters s ON s.id = c.semester_id
             WHERE c.teacher_id = ?
             ORDER BY c.name",
        )
        .map_err(HandlerErr::query)?;
    let courses = stmt
        .query_map([&teacher.id], |r| {
            let number: i64 = r.get(5)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "branchName": r.get::<_, String>(3)?,
                "year": r.get::<_, String>(4)?,
                "semesterLabel": scope::semester_label(number),
                "enrolledCount": r.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({
        "teacher": {
            "id": teacher.id,
            "employeeId": teacher.employee_id,
            "phone": teacher.phone,
            "branchId": teacher.branch_id
        },
        "courses": courses
    }))
}

fn course_detail(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher = current_teacher(conn, params)?;
    let course_id = get_required_str(params, "courseId")?;
    let course = scoped_course(conn, &teacher.id, &course_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name, s.email, s.prn, d.name
             FROM students s
             JOIN enrollments e ON e.student_id = s.id
             LEFT JOIN divisions d ON d.id = s.division_id
             WHERE e.course_id = ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&course.id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "last": r.get::<_, String>(1)?,
                "first": r.get::<_, String>(2)?,
                "email": r.get::<_, String>(3)?,
                "prn": r.get::<_, i64>(4)?,
                "division": r.get::<_, Option<String>>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "course": course_json(&course), "students": students }))
}

fn course_grades(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher = current_teacher(conn, params)?;
    let course_id = get_required_str(params, "courseId")?;
    let course = scoped_course(conn, &teacher.id, &course_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name, g.score, g.letter
             FROM grades g
             JOIN students s ON s.id = g.student_id
             WHERE g.course_id = ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(HandlerErr::query)?;
    let grades = stmt
        .query_map([&course.id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "last": r.get::<_, String>(1)?,
                "first": r.get::<_, String>(2)?,
                "score": r.get::<_, f64>(3)?,
                "letter": r.get::<_, Option<String>>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "course": course_json(&course), "grades": grades }))
}

fn division_roster(
    conn: &Connection,
    course_id: &str,
    division_id: &str,
) -> Result<Vec<RosterStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name
             FROM students s
             JOIN enrollments e ON e.student_id = s.id
             WHERE e.course_id = ? AND s.division_id = ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map((course_id, division_id), |r| {
        Ok(RosterStudent {
            id: r.get(0)?,
            last_name: r.get(1)?,
            first_name: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn course_attendance(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = current_teacher(conn, params)?;
    let course_id = get_required_str(params, "courseId")?;
    let course = scoped_course(conn, &teacher.id, &course_id)?;

    // Only divisions that actually have students in this course.
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT d.id, d.name
             FROM divisions d
             JOIN students s ON s.division_id = d.id
             JOIN enrollments e ON e.student_id = s.id
             WHERE e.course_id = ?
             ORDER BY d.name",
        )
        .map_err(HandlerErr::query)?;
    let divisions = stmt
        .query_map([&course.id], |r| {
            Ok(json!({ "id": r.get::<_, String>(0)?, "name": r.get::<_, String>(1)? }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut result = json!({
        "course": course_json(&course),
        "availableDivisions": divisions
    });

    let Some(division_id) = get_opt_str(params, "divisionId")? else {
        return Ok(result);
    };
    let division_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM divisions WHERE id = ?", [&division_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::query)?;
    if division_exists.is_none() {
        return Err(HandlerErr::not_found("division"));
    }

    let roster = division_roster(conn, &course.id, &division_id)?;

    let Some(date_raw) = get_opt_str(params, "date")? else {
        let students: Vec<serde_json::Value> = roster
            .iter()
            .map(|s| json!({ "id": s.id, "last": s.last_name, "first": s.first_name }))
            .collect();
        result["students"] = json!(students);
        return Ok(result);
    };
    let date = scope::parse_date(&date_raw)
        .ok_or_else(|| HandlerErr::bad_params("date must be YYYY-MM-DD"))?;
    let date_str = date.format("%Y-%m-%d").to_string();

    let mut stmt = conn
        .prepare(
            "SELECT a.student_id, a.present
             FROM attendance a
             JOIN students s ON s.id = a.student_id
             WHERE a.course_id = ? AND a.date = ? AND s.division_id = ?",
        )
        .map_err(HandlerErr::query)?;
    let recorded = stmt
        .query_map((&course.id, &date_str, &division_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let entries: Vec<serde_json::Value> = scope::reconcile_attendance(&roster, &recorded)
        .into_iter()
        .map(|e| {
            json!({
                "studentId": e.student.id,
                "last": e.student.last_name,
                "first": e.student.first_name,
                "status": e.status.as_str()
            })
        })
        .collect();
    result["date"] = json!(date_str);
    result["entries"] = json!(entries);
    Ok(result)
}

fn course_assignments(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = current_teacher(conn, params)?;
    let course_id = get_required_str(params, "courseId")?;
    let course = scoped_course(conn, &teacher.id, &course_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, title, description, due_at, max_score
             FROM assignments
             WHERE course_id = ?
             ORDER BY due_at, id",
        )
        .map_err(HandlerErr::query)?;
    let assignments = stmt
        .query_map([&course.id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "dueAt": r.get::<_, String>(3)?,
                "maxScore": r.get::<_, f64>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "course": course_json(&course), "assignments": assignments }))
}

fn grade_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher = current_teacher(conn, params)?;
    let course_id = get_required_str(params, "courseId")?;
    let course = scoped_course(conn, &teacher.id, &course_id)?;
    let student_id = get_required_str(params, "studentId")?;
    let score = get_required_f64(params, "score")?;
    if !scope::score_in_range(score) {
        return Err(HandlerErr::bad_params("score must be within 0..=999.99"));
    }
    let score = scope::round_score_2dp(score);
    let letter = get_opt_str(params, "letter")?;

    if !enrolled(conn, &course.id, &student_id)? {
        return Err(HandlerErr::bad_params("student not enrolled in course"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grades(id, student_id, course_id, score, letter)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, course_id) DO UPDATE SET
           score = excluded.score,
           letter = excluded.letter",
        (&id, &student_id, &course.id, score, &letter),
    )
    .map_err(HandlerErr::write(WriteKind::Insert, "grades"))?;
    Ok(json!({ "studentId": student_id, "score": score, "letter": letter }))
}

fn attendance_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = current_teacher(conn, params)?;
    let course_id = get_required_str(params, "courseId")?;
    let course = scoped_course(conn, &teacher.id, &course_id)?;
    let date_raw = get_required_str(params, "date")?;
    let date = scope::parse_date(&date_raw)
        .ok_or_else(|| HandlerErr::bad_params("date must be YYYY-MM-DD"))?;
    let date_str = date.format("%Y-%m-%d").to_string();

    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries"));
    };

    // The whole roster for one day is one logical write: any bad row
    // aborts the batch rather than leaving it half-recorded.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let mut recorded = 0usize;
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params("entry missing studentId"));
        };
        let Some(present) = entry.get("present").and_then(|v| v.as_bool()) else {
            return Err(HandlerErr::bad_params("entry missing present"));
        };
        let is_enrolled: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM enrollments WHERE course_id = ? AND student_id = ?",
                (&course.id, student_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::query)?;
        if is_enrolled.is_none() {
            return Err(HandlerErr {
                code: "bad_params",
                message: "student not enrolled in course".to_string(),
                details: Some(json!({ "studentId": student_id })),
            });
        }
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO attendance(id, student_id, course_id, date, present)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(student_id, course_id, date) DO UPDATE SET
               present = excluded.present",
            (&id, student_id, &course.id, &date_str, present as i64),
        )
        .map_err(HandlerErr::write(WriteKind::Insert, "attendance"))?;
        recorded += 1;
    }
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "date": date_str, "recorded": recorded }))
}

fn assignment_fields(
    params: &serde_json::Value,
) -> Result<(Option<String>, Option<String>, Option<String>, Option<f64>), HandlerErr> {
    let title = get_opt_str(params, "title")?;
    let description = get_opt_str(params, "description")?;
    let due_at = match get_opt_str(params, "dueAt")? {
        Some(raw) => {
            let parsed = scope::parse_due_at(&raw).ok_or_else(|| {
                HandlerErr::bad_params("dueAt must be YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD HH:MM")
            })?;
            Some(parsed.format("%Y-%m-%dT%H:%M:%S").to_string())
        }
        None => None,
    };
    let max_score = match params.get("maxScore") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let n = v
                .as_f64()
                .ok_or_else(|| HandlerErr::bad_params("maxScore must be numeric"))?;
            if !scope::score_in_range(n) {
                return Err(HandlerErr::bad_params("maxScore must be within 0..=999.99"));
            }
            Some(scope::round_score_2dp(n))
        }
    };
    Ok((title, description, due_at, max_score))
}

fn assignment_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = current_teacher(conn, params)?;
    let course_id = get_required_str(params, "courseId")?;
    let course = scoped_course(conn, &teacher.id, &course_id)?;
    let (title, description, due_at, max_score) = assignment_fields(params)?;
    let Some(title) = title else {
        return Err(HandlerErr::bad_params("missing title"));
    };
    let Some(due_at) = due_at else {
        return Err(HandlerErr::bad_params("missing dueAt"));
    };
    let Some(max_score) = max_score else {
        return Err(HandlerErr::bad_params("missing maxScore"));
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assignments(id, course_id, title, description, due_at, max_score)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &course.id, &title, &description, &due_at, max_score),
    )
    .map_err(HandlerErr::write(WriteKind::Insert, "assignments"))?;
    Ok(json!({ "assignmentId": id, "title": title, "dueAt": due_at }))
}

fn assignment_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = current_teacher(conn, params)?;
    let course_id = get_required_str(params, "courseId")?;
    let course = scoped_course(conn, &teacher.id, &course_id)?;
    let assignment_id = get_required_str(params, "assignmentId")?;

    let existing = conn
        .query_row(
            "SELECT title, description, due_at, max_score
             FROM assignments
             WHERE id = ? AND course_id = ?",
            (&assignment_id, &course.id),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, f64>(3)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((cur_title, cur_description, cur_due_at, cur_max_score)) = existing else {
        return Err(HandlerErr::not_found("assignment"));
    };

    let (title, description, due_at, max_score) = assignment_fields(params)?;
    let title = title.unwrap_or(cur_title);
    let description = description.or(cur_description);
    let due_at = due_at.unwrap_or(cur_due_at);
    let max_score = max_score.unwrap_or(cur_max_score);

    conn.execute(
        "UPDATE assignments
         SET title = ?, description = ?, due_at = ?, max_score = ?
         WHERE id = ? AND course_id = ?",
        (&title, &description, &due_at, max_score, &assignment_id, &course.id),
    )
    .map_err(HandlerErr::write(WriteKind::Update, "assignments"))?;
    Ok(json!({
        "assignmentId": assignment_id,
        "title": title,
        "dueAt": due_at,
        "maxScore": max_score
    }))
}

type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "teacher.dashboard" => dashboard,
        "teacher.courseDetail" => course_detail,
        "teacher.courseGrades" => course_grades,
        "teacher.courseAttendance" => course_attendance,
        "teacher.courseAssignments" => course_assignments,
        "teacher.gradeUpsert" => grade_upsert,
        "teacher.attendanceRecord" => attendance_record,
        "teacher.assignmentCreate" => assignment_create,
        "teacher.assignmentUpdate" => assignment_update,
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
