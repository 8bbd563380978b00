use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Threshold on the 100-point composite below which a student fails.
pub const PASS_THRESHOLD: f64 = 40.0;

pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EngineError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentKind {
    Attendance,
    Quiz,
    Midterm,
    FinalExam,
    Assignment,
}

impl AssessmentKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "attendance" => Some(AssessmentKind::Attendance),
            "quiz" => Some(AssessmentKind::Quiz),
            "midterm" => Some(AssessmentKind::Midterm),
            "final_exam" | "finalexam" => Some(AssessmentKind::FinalExam),
            "assignment" => Some(AssessmentKind::Assignment),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssessmentKind::Attendance => "attendance",
            AssessmentKind::Quiz => "quiz",
            AssessmentKind::Midterm => "midterm",
            AssessmentKind::FinalExam => "final_exam",
            AssessmentKind::Assignment => "assignment",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub total_classes: i64,
    pub attended_classes: i64,
    pub percentage: f64,
    pub grade_points: f64,
}

#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub date: String,
    pub present: bool,
}

/// One grouped pass over a course's attendance rows. A class day is any date
/// with at least one record for the course, regardless of which student it
/// belongs to; per-student summaries are then derived without rescanning.
#[derive(Debug, Clone, Default)]
pub struct AttendanceLedger {
    class_dates: BTreeSet<String>,
    present_by_student: HashMap<String, i64>,
}

impl AttendanceLedger {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = AttendanceRecord>,
    {
        let mut ledger = AttendanceLedger::default();
        for rec in records {
            ledger.class_dates.insert(rec.date);
            if rec.present {
                *ledger
                    .present_by_student
                    .entry(rec.student_id)
                    .or_insert(0) += 1;
            }
        }
        ledger
    }

    pub fn total_classes(&self) -> i64 {
        self.class_dates.len() as i64
    }

    pub fn summary_for(&self, student_id: &str) -> AttendanceSummary {
        let total = self.total_classes();
        if total == 0 {
            // No class days held yet: everything is zero, never an error.
            return AttendanceSummary::default();
        }
        let attended = self
            .present_by_student
            .get(student_id)
            .copied()
            .unwrap_or(0);
        let percentage = attended as f64 / total as f64 * 100.0;
        AttendanceSummary {
            total_classes: total,
            attended_classes: attended,
            percentage: round2(percentage),
            // Linear 0-10 contribution: round(pct / 100 * 10).
            grade_points: (percentage / 100.0 * 10.0).round(),
        }
    }
}

/// How many top quiz scores count toward the quiz component. Stored as a
/// validated integer; the legacy "Best K of N Quizzes" label is only ever
/// interpreted once, at course-setup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizPolicy {
    pub pick_count: u32,
}

impl Default for QuizPolicy {
    fn default() -> Self {
        QuizPolicy { pick_count: 2 }
    }
}

impl QuizPolicy {
    pub const MIN_PICK: u32 = 1;
    pub const MAX_PICK: u32 = 10;

    pub fn new(pick_count: u32) -> Result<Self, EngineError> {
        if !(Self::MIN_PICK..=Self::MAX_PICK).contains(&pick_count) {
            return Err(EngineError::new(
                "bad_params",
                format!(
                    "pickCount must be between {} and {}",
                    Self::MIN_PICK,
                    Self::MAX_PICK
                ),
            ));
        }
        Ok(QuizPolicy { pick_count })
    }

    pub fn from_label(label: &str) -> Self {
        if label.contains("Best 3") {
            QuizPolicy { pick_count: 3 }
        } else {
            QuizPolicy::default()
        }
    }
}

/// Averages the top `pick_count` quiz scores. A missing grade has already
/// been materialized as 0.0 by the caller; an incomplete quiz set still
/// divides by `pick_count`, which dilutes rather than curves.
pub fn quiz_component(scores: &[f64], policy: QuizPolicy) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    let k = policy.pick_count as usize;
    let sum: f64 = sorted.iter().take(k).sum();
    sum / k as f64
}

/// Intended marks split across the three composite buckets. The calculator
/// itself just sums raw marks and clamps; course setup is expected to keep
/// each category's maxMarks total consistent with this split.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightSplit {
    pub attendance: f64,
    pub quiz: f64,
    pub exam: f64,
}

pub const DEFAULT_WEIGHT_SPLIT: WeightSplit = WeightSplit {
    attendance: 10.0,
    quiz: 20.0,
    exam: 70.0,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeScore {
    pub attendance: f64,
    pub quizzes: f64,
    pub final_exam: f64,
    pub total: f64,
    pub passed: bool,
}

pub fn composite_total(attendance_points: f64, quiz_avg: f64, final_marks: f64) -> f64 {
    (attendance_points + quiz_avg + final_marks).clamp(0.0, 100.0)
}

pub fn composite_score(attendance_points: f64, quiz_avg: f64, final_marks: f64) -> CompositeScore {
    let total = composite_total(attendance_points, quiz_avg, final_marks);
    CompositeScore {
        attendance: round2(attendance_points),
        quizzes: round2(quiz_avg),
        final_exam: round2(final_marks),
        total: round2(total),
        passed: total >= PASS_THRESHOLD,
    }
}

pub fn health_status(current_percentage: f64) -> &'static str {
    if current_percentage >= 70.0 {
        "On Track"
    } else if current_percentage >= 40.0 {
        "Needs Improvement"
    } else {
        "At Risk"
    }
}

/// Marks over max as a percentage, guarding zero/negative maxMarks.
pub fn percent_of(marks: f64, max_marks: f64) -> f64 {
    if max_marks > 0.0 {
        marks / max_marks * 100.0
    } else {
        0.0
    }
}
