use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn rating(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    let Some(v) = params.get(key).and_then(|v| v.as_i64()) else {
        return Err(HandlerErr::new("bad_params", format!("missing {}", key)));
    };
    if !(1..=5).contains(&v) {
        return Err(HandlerErr::with_details(
            "bad_params",
            format!("{} must be between 1 and 5", key),
            json!({ key: v }),
        ));
    }
    Ok(v)
}

/// Appends a review snapshot. Reviews are a time series per enrollment;
/// earlier entries are never overwritten, they feed the weekly timeline.
fn softskills_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let enrollment_id = required_str(params, "enrollmentId")?;
    let discipline = rating(params, "discipline")?;
    let participation = rating(params, "participation")?;
    let collaboration = rating(params, "collaboration")?;

    let exists = conn
        .query_row("SELECT 1 FROM enrollments WHERE id = ?", [&enrollment_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db)?
        .is_some();
    if !exists {
        return Err(HandlerErr::new("not_found", "enrollment not found"));
    }

    // Callers may backdate a review; otherwise stamp now.
    let recorded_at = match optional_str(params, "recordedAt") {
        Some(raw) => {
            crate::ipc::helpers::parse_date(&raw, "recordedAt")?;
            raw
        }
        None => chrono::Utc::now().to_rfc3339(),
    };

    let review_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO soft_skill_reviews(id, enrollment_id, discipline, participation, collaboration, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&review_id, &enrollment_id, discipline, participation, collaboration, &recorded_at),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_update_failed", e.to_string(), json!({ "table": "soft_skill_reviews" }))
    })?;

    Ok(json!({ "reviewId": review_id, "recordedAt": recorded_at }))
}

fn softskills_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let enrollment_id = required_str(params, "enrollmentId")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, discipline, participation, collaboration, recorded_at
             FROM soft_skill_reviews
             WHERE enrollment_id = ?
             ORDER BY recorded_at",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&enrollment_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "discipline": r.get::<_, i64>(1)?,
                "participation": r.get::<_, i64>(2)?,
                "collaboration": r.get::<_, i64>(3)?,
                "recordedAt": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "reviews": rows }))
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
        "softskills.record" => Some(with_conn(state, req, softskills_record)),
        "softskills.list" => Some(with_conn(state, req, softskills_list)),
        _ => None,
    }
}
