use crate::engine::{
    composite_score, health_status, quiz_component, round1, AssessmentKind, QuizPolicy,
    DEFAULT_WEIGHT_SPLIT,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    load_attendance_ledger, required_str, require_enrollment, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::timeline::{build_timeline, ReviewSnapshot, TimelineAssessment};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

struct DashboardInputs {
    course_title: String,
    policy: QuizPolicy,
    assessments: Vec<(String, String, AssessmentKind, f64, Option<String>)>,
    grades_by_assessment: HashMap<String, f64>,
    live_attendance_points: f64,
    enrollment_id: String,
}

fn load_inputs(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<DashboardInputs, HandlerErr> {
    let course: Option<(String, i64)> = conn
        .query_row(
            "SELECT title, grading_pick_count FROM courses WHERE id = ?",
            [course_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((course_title, pick_count)) = course else {
        return Err(HandlerErr::new("not_found", "course not found"));
    };
    let enrollment_id = require_enrollment(conn, course_id, student_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, title, kind, max_marks, date
             FROM assessments
             WHERE course_id = ?
             ORDER BY date, title",
        )
        .map_err(HandlerErr::db)?;
    let assessments: Vec<(String, String, AssessmentKind, f64, Option<String>)> = stmt
        .query_map([course_id], |r| {
            let kind_raw: String = r.get(2)?;
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                AssessmentKind::parse(&kind_raw).unwrap_or(AssessmentKind::Assignment),
                r.get::<_, f64>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare(
            "SELECT g.assessment_id, g.marks_obtained
             FROM grades g
             JOIN assessments a ON a.id = g.assessment_id
             WHERE a.course_id = ? AND g.student_id = ?",
        )
        .map_err(HandlerErr::db)?;
    let grades_by_assessment: HashMap<String, f64> = stmt
        .query_map((course_id, student_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(HandlerErr::db)?;

    let ledger = load_attendance_ledger(conn, course_id)?;
    let live_attendance_points = ledger.summary_for(student_id).grade_points;

    // Stored pick count is trusted; it was validated when set.
    let policy = QuizPolicy::new(pick_count.clamp(1, 10) as u32)
        .unwrap_or_default();

    Ok(DashboardInputs {
        course_title,
        policy,
        assessments,
        grades_by_assessment,
        live_attendance_points,
        enrollment_id,
    })
}

/// Every quiz assessment contributes a score, with an ungraded quiz counting
/// as zero so the policy's dilution rule sees the full pool.
fn quiz_scores(inputs: &DashboardInputs) -> Vec<f64> {
    inputs
        .assessments
        .iter()
        .filter(|(_, _, kind, _, _)| *kind == AssessmentKind::Quiz)
        .map(|(id, _, _, _, _)| inputs.grades_by_assessment.get(id).copied().unwrap_or(0.0))
        .collect()
}

fn final_exam_marks(inputs: &DashboardInputs) -> f64 {
    inputs
        .assessments
        .iter()
        .find(|(_, _, kind, _, _)| *kind == AssessmentKind::FinalExam)
        .and_then(|(id, _, _, _, _)| inputs.grades_by_assessment.get(id).copied())
        .unwrap_or(0.0)
}

fn performance_dashboard(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let student_id = required_str(params, "studentId")?;
    let inputs = load_inputs(conn, &course_id, &student_id)?;

    let quiz_avg = quiz_component(&quiz_scores(&inputs), inputs.policy);
    let final_marks = final_exam_marks(&inputs);
    let current = round1(
        (inputs.live_attendance_points + quiz_avg + final_marks).min(100.0),
    );

    let timeline_assessments: Vec<TimelineAssessment> = inputs
        .assessments
        .iter()
        .filter_map(|(id, title, kind, max_marks, date)| {
            let date: chrono::NaiveDate = date.as_deref()?.parse().ok()?;
            Some(TimelineAssessment {
                title: title.clone(),
                kind: *kind,
                max_marks: *max_marks,
                date,
                marks: inputs.grades_by_assessment.get(id).copied(),
            })
        })
        .collect();

    let mut stmt = conn
        .prepare(
            "SELECT discipline, participation, collaboration, recorded_at
             FROM soft_skill_reviews
             WHERE enrollment_id = ?
             ORDER BY recorded_at",
        )
        .map_err(HandlerErr::db)?;
    let reviews: Vec<ReviewSnapshot> = stmt
        .query_map([&inputs.enrollment_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?
        .into_iter()
        .filter_map(|(discipline, participation, collaboration, recorded_at)| {
            let day_part = recorded_at.split(['T', ' ']).next().unwrap_or(&recorded_at);
            let date: chrono::NaiveDate = day_part.parse().ok()?;
            Some(ReviewSnapshot {
                date,
                discipline,
                participation,
                collaboration,
            })
        })
        .collect();

    let timeline = build_timeline(&timeline_assessments, inputs.live_attendance_points, &reviews);
    let timeline_json =
        serde_json::to_value(&timeline).map_err(|e| HandlerErr::new("internal", e.to_string()))?;

    Ok(json!({
        "studentId": student_id,
        "courseId": course_id,
        "courseName": inputs.course_title,
        "currentPercentage": current,
        "academicHealthStatus": health_status(current),
        "timeline": timeline_json,
    }))
}

fn performance_composite(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let student_id = required_str(params, "studentId")?;
    let inputs = load_inputs(conn, &course_id, &student_id)?;

    let quiz_avg = quiz_component(&quiz_scores(&inputs), inputs.policy);
    let final_marks = final_exam_marks(&inputs);
    let score = composite_score(inputs.live_attendance_points, quiz_avg, final_marks);

    let score_json =
        serde_json::to_value(&score).map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    let split_json = serde_json::to_value(DEFAULT_WEIGHT_SPLIT)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;

    Ok(json!({
        "studentId": student_id,
        "courseId": course_id,
        "policy": { "pickCount": inputs.policy.pick_count },
        "weightSplit": split_json,
        "score": score_json,
    }))
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
        "performance.dashboard" => Some(with_conn(state, req, performance_dashboard)),
        "performance.composite" => Some(with_conn(state, req, performance_composite)),
        _ => None,
    }
}
