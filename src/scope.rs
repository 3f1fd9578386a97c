use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone)]
pub struct TeacherProfile {
    pub id: String,
    pub user_id: String,
    pub employee_id: String,
    pub phone: Option<String>,
    pub branch_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StudentProfile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub prn: i64,
    pub division_id: Option<String>,
    pub academic_year_id: Option<String>,
    pub branch_id: Option<String>,
    pub semester_id: Option<String>,
    pub user_id: Option<String>,
}

/// What an authenticated account resolves to. Teacher wins over Student when
/// an account somehow carries both profiles; an account with neither is
/// surfaced as Unlinked, never guessed.
#[derive(Debug, Clone)]
pub enum Identity {
    Teacher(TeacherProfile),
    Student(StudentProfile),
    Unlinked,
}

pub fn teacher_by_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<TeacherProfile>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, user_id, employee_id, phone, branch_id
         FROM teachers
         WHERE user_id = ?",
        [user_id],
        |r| {
            Ok(TeacherProfile {
                id: r.get(0)?,
                user_id: r.get(1)?,
                employee_id: r.get(2)?,
                phone: r.get(3)?,
                branch_id: r.get(4)?,
            })
        },
    )
    .optional()
}

pub fn student_by_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<StudentProfile>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, first_name, last_name, email, prn,
                division_id, academic_year_id, branch_id, semester_id, user_id
         FROM students
         WHERE user_id = ?",
        [user_id],
        |r| {
            Ok(StudentProfile {
                id: r.get(0)?,
                first_name: r.get(1)?,
                last_name: r.get(2)?,
                email: r.get(3)?,
                prn: r.get(4)?,
                division_id: r.get(5)?,
                academic_year_id: r.get(6)?,
                branch_id: r.get(7)?,
                semester_id: r.get(8)?,
                user_id: r.get(9)?,
            })
        },
    )
    .optional()
}

/// Returns None when the account itself does not exist.
pub fn resolve_identity(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<Identity>, rusqlite::Error> {
    let account: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()?;
    if account.is_none() {
        return Ok(None);
    }
    if let Some(t) = teacher_by_user(conn, user_id)? {
        return Ok(Some(Identity::Teacher(t)));
    }
    if let Some(s) = student_by_user(conn, user_id)? {
        return Ok(Some(Identity::Student(s)));
    }
    Ok(Some(Identity::Unlinked))
}

pub fn semester_label(number: i64) -> String {
    match number {
        1 => "1st".to_string(),
        2 => "2nd".to_string(),
        3 => "3rd".to_string(),
        n => format!("{}th", n),
    }
}

/// Half-up rounding to two decimals, the precision grades are stored at.
pub fn round_score_2dp(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

pub fn score_in_range(x: f64) -> bool {
    (0.0..=999.99).contains(&x)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn parse_due_at(raw: &str) -> Option<NaiveDateTime> {
    let t = raw.trim();
    NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M"))
        .ok()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    NoRecord,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::NoRecord => "no_record",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub last_name: String,
    pub first_name: String,
}

#[derive(Debug, Clone)]
pub struct ReconciledEntry {
    pub student: RosterStudent,
    pub status: AttendanceStatus,
}

/// One entry per roster student, in roster order. A student with no
/// recorded row for the day stays NoRecord; absence is never assumed.
pub fn reconcile_attendance(
    roster: &[RosterStudent],
    recorded: &[(String, bool)],
) -> Vec<ReconciledEntry> {
    roster
        .iter()
        .map(|s| {
            let status = recorded
                .iter()
                .find(|(sid, _)| *sid == s.id)
                .map(|(_, present)| {
                    if *present {
                        AttendanceStatus::Present
                    } else {
                        AttendanceStatus::Absent
                    }
                })
                .unwrap_or(AttendanceStatus::NoRecord);
            ReconciledEntry {
                student: s.clone(),
                status,
            }
        })
        .collect()
}
