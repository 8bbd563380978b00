use crate::engine::{percent_of, round1, AssessmentKind, AttendanceLedger};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    load_attendance_ledger, required_str, require_course, require_enrollment, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const BULK_UPDATE_MAX_EDITS: usize = 5000;

#[derive(Debug, Clone)]
struct AssessmentRow {
    id: String,
    title: String,
    kind: AssessmentKind,
    max_marks: f64,
    date: Option<String>,
}

fn load_assessments(conn: &Connection, course_id: &str) -> Result<Vec<AssessmentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, kind, max_marks, date
             FROM assessments
             WHERE course_id = ?
             ORDER BY date, title",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([course_id], |r| {
        let kind_raw: String = r.get(2)?;
        Ok(AssessmentRow {
            id: r.get(0)?,
            title: r.get(1)?,
            kind: AssessmentKind::parse(&kind_raw).unwrap_or(AssessmentKind::Assignment),
            max_marks: r.get(3)?,
            date: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn grades_bulk_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(edits) = params.get("grades").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing grades"));
    };
    if edits.len() > BULK_UPDATE_MAX_EDITS {
        return Err(HandlerErr::with_details(
            "bad_params",
            format!("too many edits (max {})", BULK_UPDATE_MAX_EDITS),
            json!({ "count": edits.len() }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut updated = 0usize;
    for edit in edits {
        let Some(assessment_id) = edit.get("assessmentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::new("bad_params", "grades[].assessmentId must be a string"));
        };
        let Some(student_id) = edit.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::new("bad_params", "grades[].studentId must be a string"));
        };
        let marks = edit.get("marksObtained").and_then(|v| v.as_f64()).unwrap_or(0.0);
        if marks < 0.0 {
            return Err(HandlerErr::with_details(
                "bad_params",
                "negative marks are not allowed",
                json!({ "marksObtained": marks }),
            ));
        }
        let exists = tx
            .query_row("SELECT 1 FROM assessments WHERE id = ?", [assessment_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(HandlerErr::db)?
            .is_some();
        if !exists {
            return Err(HandlerErr::with_details(
                "not_found",
                "assessment not found",
                json!({ "assessmentId": assessment_id }),
            ));
        }
        tx.execute(
            "INSERT INTO grades(id, assessment_id, student_id, marks_obtained, entered_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(assessment_id, student_id) DO UPDATE SET
               marks_obtained = excluded.marks_obtained,
               entered_at = excluded.entered_at",
            (
                Uuid::new_v4().to_string(),
                assessment_id,
                student_id,
                marks,
                chrono::Utc::now().to_rfc3339(),
            ),
        )
        .map_err(|e| HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "grades" })))?;
        updated += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "updated": updated }))
}

/// The full teacher-facing gradebook: assessments, students, and grade rows
/// with the attendance column overridden by live-computed points. Stored
/// attendance grades are display-only; the ledger is authoritative.
fn gradebook_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    require_course(conn, &course_id)?;

    let assessments = load_assessments(conn, &course_id)?;
    let assessment_ids: Vec<&str> = assessments.iter().map(|a| a.id.as_str()).collect();

    let mut stmt = conn
        .prepare(
            "SELECT e.student_id, e.student_name, e.status
             FROM enrollments e
             WHERE e.course_id = ?
             ORDER BY e.student_name",
        )
        .map_err(HandlerErr::db)?;
    let students: Vec<(String, String, String)> = stmt
        .query_map([&course_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    // grade rows keyed by (assessment, student) so the attendance override
    // can replace in place.
    let mut grade_map: HashMap<(String, String), f64> = HashMap::new();
    if !assessment_ids.is_empty() {
        let placeholders = std::iter::repeat("?")
            .take(assessment_ids.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT assessment_id, student_id, marks_obtained
             FROM grades
             WHERE assessment_id IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(assessment_ids.iter()), |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, f64>(2)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db)?;
        for (aid, sid, marks) in rows {
            grade_map.insert((aid, sid), marks);
        }
    }

    let attendance_assessment = assessments
        .iter()
        .find(|a| a.kind == AssessmentKind::Attendance);
    let mut skipped: Vec<serde_json::Value> = Vec::new();
    if let Some(att) = attendance_assessment {
        match load_attendance_ledger(conn, &course_id) {
            Ok(ledger) => {
                for (student_id, _, _) in &students {
                    let points = ledger.summary_for(student_id).grade_points;
                    grade_map.insert((att.id.clone(), student_id.clone()), points);
                }
            }
            Err(e) => {
                // Attendance injection failing must not take the gradebook
                // down with it; the stored rows are still returned.
                skipped.push(json!({
                    "assessmentId": att.id,
                    "code": e.code,
                    "message": e.message,
                }));
            }
        }
    }

    let assessments_json: Vec<serde_json::Value> = assessments
        .iter()
        .map(|a| {
            json!({
                "id": a.id,
                "title": a.title,
                "kind": a.kind.as_str(),
                "maxMarks": a.max_marks,
                "date": a.date,
            })
        })
        .collect();
    let students_json: Vec<serde_json::Value> = students
        .iter()
        .map(|(id, name, status)| json!({ "studentId": id, "studentName": name, "status": status }))
        .collect();
    let grades_json: Vec<serde_json::Value> = grade_map
        .iter()
        .map(|((aid, sid), marks)| {
            json!({ "assessmentId": aid, "studentId": sid, "marksObtained": marks })
        })
        .collect();

    Ok(json!({
        "assessments": assessments_json,
        "students": students_json,
        "grades": grades_json,
        "skipped": skipped,
    }))
}

fn gap_entry(
    conn: &Connection,
    a: &AssessmentRow,
    student_id: &str,
    enrolled_ids: &[String],
    ledger: &AttendanceLedger,
) -> Result<serde_json::Value, HandlerErr> {
    let (my_mark, class_avg_mark) = if a.kind == AssessmentKind::Attendance {
        let my = ledger.summary_for(student_id).grade_points;
        // Per-student derivation from the shared ledger; a student with no
        // rows contributes zero rather than failing the cohort mean.
        let total: f64 = enrolled_ids
            .iter()
            .map(|id| ledger.summary_for(id).grade_points)
            .sum();
        let avg = if enrolled_ids.is_empty() {
            0.0
        } else {
            total / enrolled_ids.len() as f64
        };
        (my, avg)
    } else {
        let my: f64 = conn
            .query_row(
                "SELECT marks_obtained FROM grades WHERE assessment_id = ? AND student_id = ?",
                (&a.id, student_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db)?
            .unwrap_or(0.0);
        // Cohort mean over every grade row for the assessment, not filtered
        // to current enrollments.
        let avg: f64 = conn
            .query_row(
                "SELECT AVG(marks_obtained) FROM grades WHERE assessment_id = ?",
                [&a.id],
                |r| r.get::<_, Option<f64>>(0),
            )
            .map_err(HandlerErr::db)?
            .unwrap_or(0.0);
        (my, avg)
    };

    Ok(json!({
        "assessmentTitle": a.title,
        "myPercentage": round1(percent_of(my_mark, a.max_marks)),
        "classAveragePercentage": round1(percent_of(class_avg_mark, a.max_marks)),
    }))
}

fn gap_analysis(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let student_id = required_str(params, "studentId")?;
    require_course(conn, &course_id)?;
    require_enrollment(conn, &course_id, &student_id)?;

    let assessments = load_assessments(conn, &course_id)?;
    let mut stmt = conn
        .prepare("SELECT student_id FROM enrollments WHERE course_id = ?")
        .map_err(HandlerErr::db)?;
    let enrolled_ids: Vec<String> = stmt
        .query_map([&course_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let ledger = load_attendance_ledger(conn, &course_id)?;

    let mut entries: Vec<serde_json::Value> = Vec::new();
    let mut skipped: Vec<serde_json::Value> = Vec::new();
    for a in &assessments {
        // One bad assessment must not sink the rest of the comparison.
        match gap_entry(conn, a, &student_id, &enrolled_ids, &ledger) {
            Ok(entry) => entries.push(entry),
            Err(e) => skipped.push(json!({
                "assessmentId": a.id,
                "assessmentTitle": a.title,
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    Ok(json!({ "entries": entries, "skipped": skipped }))
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
        "grades.bulkUpdate" => Some(with_conn(state, req, grades_bulk_update)),
        "gradebook.open" => Some(with_conn(state, req, gradebook_open)),
        "grades.gapAnalysis" => Some(with_conn(state, req, gap_analysis)),
        _ => None,
    }
}
