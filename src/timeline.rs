use crate::engine::{percent_of, round1, AssessmentKind};
use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

/// Seed for the behavior line before the first recorded review.
pub const BEHAVIOR_BASELINE: f64 = 3.0;

#[derive(Debug, Clone)]
pub struct TimelineAssessment {
    pub title: String,
    pub kind: AssessmentKind,
    pub max_marks: f64,
    pub date: NaiveDate,
    /// The student's stored marks, if any. Ignored for attendance-kind
    /// assessments, whose marks are always derived live.
    pub marks: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ReviewSnapshot {
    pub date: NaiveDate,
    pub discipline: i64,
    pub participation: i64,
    pub collaboration: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub event_name: String,
    pub date: String,
    pub grade_percentage: Option<f64>,
    pub soft_skill_rating: Option<f64>,
}

/// Snap a review date onto the Friday anchoring its week. Sundays move
/// forward to the coming Friday; every other weekday lands on the Friday
/// of its own calendar week (Saturday resolves to the day before).
fn snap_to_week_friday(date: NaiveDate) -> NaiveDate {
    let friday = chrono::Weekday::Fri.num_days_from_sunday() as i64;
    let mut diff = friday - date.weekday().num_days_from_sunday() as i64;
    if diff < -1 {
        diff += 7;
    }
    if diff >= 0 {
        date.checked_add_days(Days::new(diff as u64)).unwrap_or(date)
    } else {
        date.checked_sub_days(Days::new((-diff) as u64))
            .unwrap_or(date)
    }
}

/// Merges per-assessment grade events and weekly behavior reviews into one
/// chronological series. The behavior line is forward-filled so it is
/// plottable as a continuous curve; grade percentages stay null on events
/// that have no grade (and on pure-behavior points).
pub fn build_timeline(
    assessments: &[TimelineAssessment],
    live_attendance_points: f64,
    reviews: &[ReviewSnapshot],
) -> Vec<TimelinePoint> {
    struct RawPoint {
        event_name: String,
        date: NaiveDate,
        grade_percentage: Option<f64>,
        soft_skill_rating: Option<f64>,
    }

    let mut points: Vec<RawPoint> = Vec::new();

    for a in assessments {
        let pct = match a.kind {
            AssessmentKind::Attendance => {
                // Recomputed live; never read from a stored grade row.
                if a.max_marks > 0.0 {
                    Some(round1(percent_of(live_attendance_points, a.max_marks)))
                } else {
                    Some(0.0)
                }
            }
            _ => match a.marks {
                Some(m) if a.max_marks > 0.0 => Some(round1(percent_of(m, a.max_marks))),
                _ => None,
            },
        };
        points.push(RawPoint {
            event_name: a.title.clone(),
            date: a.date,
            grade_percentage: pct,
            soft_skill_rating: None,
        });
    }

    // Bucket reviews by their snapped Friday; each bucket becomes one
    // "Week {n} Review" point averaging the three ratings per review.
    let mut weekly: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for r in reviews {
        let key = snap_to_week_friday(r.date);
        let combined = (r.discipline + r.participation + r.collaboration) as f64 / 3.0;
        weekly.entry(key).or_default().push(combined);
    }
    for (week_no, (date, ratings)) in weekly.into_iter().enumerate() {
        let avg = ratings.iter().sum::<f64>() / ratings.len() as f64;
        points.push(RawPoint {
            event_name: format!("Week {} Review", week_no + 1),
            date,
            grade_percentage: None,
            soft_skill_rating: Some(round1(avg)),
        });
    }

    // Date ascending; on the same day grade events come before behavior
    // events so the academic line is drawn first.
    points.sort_by_key(|p| (p.date, if p.grade_percentage.is_some() { 0 } else { 1 }));

    let mut last_behavior = BEHAVIOR_BASELINE;
    points
        .into_iter()
        .map(|p| {
            let rating = match p.soft_skill_rating {
                Some(r) => {
                    last_behavior = r;
                    r
                }
                None => last_behavior,
            };
            TimelinePoint {
                event_name: p.event_name,
                date: p.date.to_string(),
                grade_percentage: p.grade_percentage,
                soft_skill_rating: Some(rating),
            }
        })
        .collect()
}
