use crate::engine::QuizPolicy;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_str, require_course, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn courses_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = required_str(params, "title")?;
    let code = required_str(params, "code")?;
    if title.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "title must not be empty"));
    }

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, title, code) VALUES(?, ?, ?)",
        (&course_id, title.trim(), code.trim()),
    )
    .map_err(|e| HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "courses" })))?;

    Ok(json!({ "courseId": course_id }))
}

fn courses_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, title, code, grading_pick_count FROM courses ORDER BY title")
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            let pick: i64 = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "policy": { "pickCount": pick }
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "courses": rows }))
}

/// Accepts the structured form `{ "pickCount": 3 }`, or the legacy prose
/// label `{ "policy": "Best 3 of 4 Quizzes" }` which is converted here, once,
/// and never re-parsed at score-computation time.
fn courses_set_policy(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_course(conn, &course_id)?;

    let policy = match params.get("pickCount") {
        Some(v) => {
            let Some(n) = v.as_u64() else {
                return Err(HandlerErr::new("bad_params", "pickCount must be a positive integer"));
            };
            QuizPolicy::new(n as u32).map_err(|e| HandlerErr::new("bad_params", e.message))?
        }
        None => match optional_str(params, "policy") {
            Some(label) => QuizPolicy::from_label(&label),
            None => return Err(HandlerErr::new("bad_params", "missing pickCount or policy")),
        },
    };

    conn.execute(
        "UPDATE courses SET grading_pick_count = ? WHERE id = ?",
        (policy.pick_count as i64, &course_id),
    )
    .map_err(|e| HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "courses" })))?;

    Ok(json!({ "courseId": course_id, "policy": { "pickCount": policy.pick_count } }))
}

fn enrollments_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let student_id = required_str(params, "studentId")?;
    let student_name = required_str(params, "studentName")?;
    let status = optional_str(params, "status").unwrap_or_else(|| "Regular".to_string());
    if status != "Regular" && status != "Retake" {
        return Err(HandlerErr::with_details(
            "bad_params",
            "status must be one of: Regular, Retake",
            json!({ "status": status }),
        ));
    }
    require_course(conn, &course_id)?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM enrollments WHERE course_id = ? AND student_id = ?",
            (&course_id, &student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if let Some(id) = existing {
        // Re-enrolling only updates status; the enrollment id is the anchor
        // for behavior reviews and must stay stable.
        conn.execute(
            "UPDATE enrollments SET status = ?, student_name = ? WHERE id = ?",
            (&status, &student_name, &id),
        )
        .map_err(|e| HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "enrollments" })))?;
        return Ok(json!({ "enrollmentId": id, "created": false }));
    }

    let enrollment_id = Uuid::new_v4().to_string();
    let enrolled_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO enrollments(id, course_id, student_id, student_name, status, enrolled_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&enrollment_id, &course_id, &student_id, &student_name, &status, &enrolled_at),
    )
    .map_err(|e| HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "enrollments" })))?;

    Ok(json!({ "enrollmentId": enrollment_id, "created": true }))
}

fn enrollments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_course(conn, &course_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, student_name, status, enrolled_at
             FROM enrollments
             WHERE course_id = ?
             ORDER BY student_name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "enrollmentId": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "enrolledAt": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "enrollments": rows }))
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
        "courses.create" => Some(with_conn(state, req, courses_create)),
        "courses.list" => Some(with_conn(state, req, |c, _| courses_list(c))),
        "courses.setPolicy" => Some(with_conn(state, req, courses_set_policy)),
        "enrollments.add" => Some(with_conn(state, req, enrollments_add)),
        "enrollments.list" => Some(with_conn(state, req, enrollments_list)),
        _ => None,
    }
}
