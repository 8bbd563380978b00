use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    load_attendance_ledger, required_date, required_str, require_course, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// Upserts one presence flag per listed student for a single calendar day.
/// Marking the same day again overwrites the earlier flags.
fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let date = required_date(params, "date")?;
    require_course(conn, &course_id)?;

    let Some(students) = params.get("students").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing students"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut marked = 0usize;
    for entry in students {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::new("bad_params", "students[].studentId must be a string"));
        };
        let Some(present) = entry.get("present").and_then(|v| v.as_bool()) else {
            return Err(HandlerErr::new("bad_params", "students[].present must be a boolean"));
        };
        tx.execute(
            "INSERT INTO attendance(id, course_id, student_id, date, present)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(course_id, student_id, date) DO UPDATE SET
               present = excluded.present",
            (
                Uuid::new_v4().to_string(),
                &course_id,
                student_id,
                date.to_string(),
                present as i64,
            ),
        )
        .map_err(|e| {
            HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "attendance" }))
        })?;
        marked += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "date": date.to_string(), "marked": marked }))
}

fn attendance_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let student_id = required_str(params, "studentId")?;
    require_course(conn, &course_id)?;

    let ledger = load_attendance_ledger(conn, &course_id)?;
    let summary = ledger.summary_for(&student_id);
    serde_json::to_value(summary).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn attendance_history(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_course(conn, &course_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT student_id, date, present
             FROM attendance
             WHERE course_id = ?
             ORDER BY date, student_id",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "date": r.get::<_, String>(1)?,
                "present": r.get::<_, i64>(2)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "records": rows }))
}

fn attendance_by_date(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let date = required_date(params, "date")?;
    require_course(conn, &course_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT student_id, present
             FROM attendance
             WHERE course_id = ? AND date = ?
             ORDER BY student_id",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((&course_id, date.to_string()), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "present": r.get::<_, i64>(1)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "date": date.to_string(), "records": rows }))
}

fn attendance_delete_by_date(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let date = required_date(params, "date")?;
    require_course(conn, &course_id)?;

    let removed = conn
        .execute(
            "DELETE FROM attendance WHERE course_id = ? AND date = ?",
            (&course_id, date.to_string()),
        )
        .map_err(|e| {
            HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "attendance" }))
        })?;
    Ok(json!({ "date": date.to_string(), "removed": removed }))
}

fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.summary" => Some(with_conn(state, req, attendance_summary)),
        "attendance.history" => Some(with_conn(state, req, attendance_history)),
        "attendance.byDate" => Some(with_conn(state, req, attendance_by_date)),
        "attendance.deleteByDate" => Some(with_conn(state, req, attendance_delete_by_date)),
        _ => None,
    }
}
