use crate::engine::AssessmentKind;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_date, required_str, require_course, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn assessments_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let title = required_str(params, "title")?;
    let kind_raw = required_str(params, "kind")?;
    let date = required_date(params, "date")?;
    require_course(conn, &course_id)?;

    let Some(kind) = AssessmentKind::parse(&kind_raw) else {
        return Err(HandlerErr::with_details(
            "bad_params",
            "kind must be one of: attendance, quiz, midterm, final_exam, assignment",
            json!({ "kind": kind_raw }),
        ));
    };
    let max_marks = params.get("maxMarks").and_then(|v| v.as_f64()).unwrap_or(0.0);
    if max_marks < 0.0 {
        return Err(HandlerErr::new("bad_params", "maxMarks must not be negative"));
    }
    let weightage = params.get("weightage").and_then(|v| v.as_f64()).unwrap_or(0.0);

    if kind == AssessmentKind::Attendance {
        // The attendance column is singular per course; its marks are always
        // recomputed live, so a second one would just disagree with the first.
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM assessments WHERE course_id = ? AND kind = 'attendance'",
                [&course_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db)?;
        if let Some(id) = existing {
            return Err(HandlerErr::with_details(
                "bad_params",
                "course already has an attendance assessment",
                json!({ "assessmentId": id }),
            ));
        }
    }

    let assessment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assessments(id, course_id, title, kind, max_marks, weightage, date)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &assessment_id,
            &course_id,
            title.trim(),
            kind.as_str(),
            max_marks,
            weightage,
            date.to_string(),
        ),
    )
    .map_err(|e| HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "assessments" })))?;

    Ok(json!({ "assessmentId": assessment_id }))
}

fn assessments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_course(conn, &course_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, title, kind, max_marks, weightage, date
             FROM assessments
             WHERE course_id = ?
             ORDER BY date, title",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "kind": r.get::<_, String>(2)?,
                "maxMarks": r.get::<_, f64>(3)?,
                "weightage": r.get::<_, f64>(4)?,
                "date": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "assessments": rows }))
}

fn assessments_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assessment_id = required_str(params, "assessmentId")?;
    let exists: Option<String> = conn
        .query_row("SELECT id FROM assessments WHERE id = ?", [&assessment_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "assessment not found"));
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM grades WHERE assessment_id = ?", [&assessment_id])
        .map_err(|e| HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "grades" })))?;
    tx.execute("DELETE FROM assessments WHERE id = ?", [&assessment_id])
        .map_err(|e| HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "assessments" })))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "deleted": true }))
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
        "assessments.create" => Some(with_conn(state, req, assessments_create)),
        "assessments.list" => Some(with_conn(state, req, assessments_list)),
        "assessments.delete" => Some(with_conn(state, req, assessments_delete)),
        _ => None,
    }
}
