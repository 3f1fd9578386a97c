use crate::ipc::error::{err, ok, HandlerErr, WriteKind};
use crate::ipc::helpers::{get_opt_str, get_required_i64, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::scope;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn year_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let year = get_required_str(params, "year")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO academic_years(id, year) VALUES(?, ?)",
        (&id, &year),
    )
    .map_err(HandlerErr::write(WriteKind::Insert, "academic_years"))?;
    Ok(json!({ "yearId": id, "year": year }))
}

fn year_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, year FROM academic_years ORDER BY year")
        .map_err(HandlerErr::query)?;
    let years = stmt
        .query_map([], |r| {
            Ok(json!({ "id": r.get::<_, String>(0)?, "year": r.get::<_, String>(1)? }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "years": years }))
}

fn semester_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let year_id = get_required_str(params, "yearId")?;
    let number = get_required_i64(params, "number")?;
    if !(1..=8).contains(&number) {
        return Err(HandlerErr::bad_params("semester number must be 1..=8"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO semesters(id, number, academic_year_id) VALUES(?, ?, ?)",
        (&id, number, &year_id),
    )
    .map_err(HandlerErr::write(WriteKind::Insert, "semesters"))?;
    Ok(json!({
        "semesterId": id,
        "number": number,
        "label": scope::semester_label(number)
    }))
}

fn semester_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let year_id = get_required_str(params, "yearId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, number FROM semesters
             WHERE academic_year_id = ?
             ORDER BY number",
        )
        .map_err(HandlerErr::query)?;
    let semesters = stmt
        .query_map([&year_id], |r| {
            let number: i64 = r.get(1)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "number": number,
                "label": scope::semester_label(number)
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "semesters": semesters }))
}

fn branch_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let code = get_required_str(params, "code")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO branches(id, name, code) VALUES(?, ?, ?)",
        (&id, &name, &code),
    )
    .map_err(HandlerErr::write(WriteKind::Insert, "branches"))?;
    Ok(json!({ "branchId": id, "name": name, "code": code }))
}

fn branch_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, code FROM branches ORDER BY code")
        .map_err(HandlerErr::query)?;
    let branches = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "branches": branches }))
}

fn branch_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let branch_id = get_required_str(params, "branchId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM branches WHERE id = ?", [&branch_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::query)?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("branch"));
    }
    // Divisions and courses under the branch go with it; student and
    // teacher branch links are nulled. Declared per-relation in the schema.
    conn.execute("DELETE FROM branches WHERE id = ?", [&branch_id])
        .map_err(HandlerErr::write(WriteKind::Delete, "branches"))?;
    Ok(json!({ "ok": true }))
}

fn division_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let branch_id = get_required_str(params, "branchId")?;
    let year_id = get_required_str(params, "yearId")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO divisions(id, name, branch_id, academic_year_id) VALUES(?, ?, ?, ?)",
        (&id, &name, &branch_id, &year_id),
    )
    .map_err(HandlerErr::write(WriteKind::Insert, "divisions"))?;
    Ok(json!({ "divisionId": id, "name": name }))
}

fn division_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let branch_id = get_opt_str(params, "branchId")?;
    let year_id = get_opt_str(params, "yearId")?;
    let mut stmt = conn
        .prepare(
            "SELECT d.id, d.name, b.code, y.year
             FROM divisions d
             JOIN branches b ON b.id = d.branch_id
             JOIN academic_years y ON y.id = d.academic_year_id
             WHERE (?1 IS NULL OR d.branch_id = ?1)
               AND (?2 IS NULL OR d.academic_year_id = ?2)
             ORDER BY d.name",
        )
        .map_err(HandlerErr::query)?;
    let divisions = stmt
        .query_map((&branch_id, &year_id), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "branchCode": r.get::<_, String>(2)?,
                "year": r.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "divisions": divisions }))
}

fn course_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let code = get_required_str(params, "code")?;
    let branch_id = get_required_str(params, "branchId")?;
    let year_id = get_required_str(params, "yearId")?;
    let semester_id = get_required_str(params, "semesterId")?;
    let teacher_id = get_opt_str(params, "teacherId")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, name, code, branch_id, academic_year_id, semester_id, teacher_id)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&id, &name, &code, &branch_id, &year_id, &semester_id, &teacher_id),
    )
    .map_err(HandlerErr::write(WriteKind::Insert, "courses"))?;
    Ok(json!({ "courseId": id, "name": name, "code": code }))
}

fn course_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, c.code, b.code, y.year, s.number, c.teacher_id
             FROM courses c
             JOIN branches b ON b.id = c.branch_id
             JOIN academic_years y ON y.id = c.academic_year_id
             JOIN semesters s ON s.id = c.semester_id
             ORDER BY c.code",
        )
        .map_err(HandlerErr::query)?;
    let courses = stmt
        .query_map([], |r| {
            let number: i64 = r.get(5)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "branchCode": r.get::<_, String>(3)?,
                "year": r.get::<_, String>(4)?,
                "semesterLabel": scope::semester_label(number),
                "teacherId": r.get::<_, Option<String>>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "courses": courses }))
}

fn course_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::query)?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("course"));
    }
    conn.execute("DELETE FROM courses WHERE id = ?", [&course_id])
        .map_err(HandlerErr::write(WriteKind::Delete, "courses"))?;
    Ok(json!({ "ok": true }))
}

fn course_assign_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let teacher_id = get_opt_str(params, "teacherId")?;
    let updated = conn
        .execute(
            "UPDATE courses SET teacher_id = ? WHERE id = ?",
            (&teacher_id, &course_id),
        )
        .map_err(HandlerErr::write(WriteKind::Update, "courses"))?;
    if updated == 0 {
        return Err(HandlerErr::not_found("course"));
    }
    Ok(json!({ "ok": true }))
}

type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: Handler = match req.method.as_str() {
        "catalog.yearCreate" => year_create,
        "catalog.yearList" => year_list,
        "catalog.semesterCreate" => semester_create,
        "catalog.semesterList" => semester_list,
        "catalog.branchCreate" => branch_create,
        "catalog.branchList" => branch_list,
        "catalog.branchDelete" => branch_delete,
        "catalog.divisionCreate" => division_create,
        "catalog.divisionList" => division_list,
        "catalog.courseCreate" => course_create,
        "catalog.courseList" => course_list,
        "catalog.courseDelete" => course_delete,
        "catalog.courseAssignTeacher" => course_assign_teacher,
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
