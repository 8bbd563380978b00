use crate::engine::{AttendanceLedger, AttendanceRecord};
use crate::ipc::error::err;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &'static str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn required_date(params: &serde_json::Value, key: &str) -> Result<chrono::NaiveDate, HandlerErr> {
    let raw = required_str(params, key)?;
    parse_date(&raw, key)
}

pub fn parse_date(raw: &str, key: &str) -> Result<chrono::NaiveDate, HandlerErr> {
    // Accept a bare date or a timestamp; only the day matters.
    let day_part = raw.split(['T', ' ']).next().unwrap_or(raw);
    day_part.parse().map_err(|_| {
        HandlerErr::with_details(
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            json!({ key: raw }),
        )
    })
}

pub fn course_exists(conn: &Connection, course_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

pub fn require_course(conn: &Connection, course_id: &str) -> Result<(), HandlerErr> {
    if !course_exists(conn, course_id)? {
        return Err(HandlerErr::new("not_found", "course not found"));
    }
    Ok(())
}

/// Resolves an enrollment id, distinguishing "not enrolled" from zero-data.
pub fn require_enrollment(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT id FROM enrollments WHERE course_id = ? AND student_id = ?",
        (course_id, student_id),
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_enrolled", "student not enrolled in this course"))
}

/// One grouped scan of the course's attendance rows; every per-student
/// summary a request needs is derived from this single ledger.
pub fn load_attendance_ledger(
    conn: &Connection,
    course_id: &str,
) -> Result<AttendanceLedger, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT student_id, date, present FROM attendance WHERE course_id = ?")
        .map_err(HandlerErr::db)?;
    let records = stmt
        .query_map([course_id], |r| {
            Ok(AttendanceRecord {
                student_id: r.get(0)?,
                date: r.get(1)?,
                present: r.get::<_, i64>(2)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(AttendanceLedger::from_records(records))
}
