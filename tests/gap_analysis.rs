use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_edupulsed");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn edupulsed");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "request {} failed: {}",
        id,
        value
    );
    value.get("result").cloned().unwrap_or(json!({}))
}

fn create_assessment(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    course_id: &str,
    title: &str,
    kind: &str,
    max_marks: f64,
    date: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        id,
        "assessments.create",
        json!({
            "courseId": course_id,
            "title": title,
            "kind": kind,
            "maxMarks": max_marks,
            "date": date
        }),
    );
    result
        .get("assessmentId")
        .and_then(|v| v.as_str())
        .expect("assessmentId")
        .to_string()
}

#[test]
fn gap_analysis_compares_marks_against_class_average() {
    let workspace = temp_dir("edupulse-gap-basic");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "courses.create",
        json!({ "title": "Networks", "code": "NET301" }),
    );
    let course_id = created
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    for (i, student) in ["stu-1", "stu-2", "stu-3"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("e{}", i),
            "enrollments.add",
            json!({
                "courseId": course_id,
                "studentId": student,
                "studentName": format!("Student {}", student)
            }),
        );
    }

    // Two quizzes created out of date order; entries must come back by date.
    let quiz_b = create_assessment(
        &mut stdin, &mut reader, "qb", &course_id, "Quiz B", "quiz", 20.0, "2026-04-10",
    );
    let quiz_a = create_assessment(
        &mut stdin, &mut reader, "qa", &course_id, "Quiz A", "quiz", 20.0, "2026-04-03",
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g",
        "grades.bulkUpdate",
        json!({
            "grades": [
                { "assessmentId": quiz_a, "studentId": "stu-1", "marksObtained": 10 },
                { "assessmentId": quiz_a, "studentId": "stu-2", "marksObtained": 20 },
                { "assessmentId": quiz_a, "studentId": "stu-3", "marksObtained": 15 },
                { "assessmentId": quiz_b, "studentId": "stu-1", "marksObtained": 18 }
            ]
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "gap",
        "grades.gapAnalysis",
        json!({ "courseId": course_id, "studentId": "stu-1" }),
    );
    let entries = result
        .get("entries")
        .and_then(|v| v.as_array())
        .expect("entries array");
    assert_eq!(entries.len(), 2);
    assert_eq!(
        result.get("skipped").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // Quiz A first by date: mine 10/20 = 50, class avg (10+20+15)/3 = 15 -> 75.
    assert_eq!(
        entries[0].get("assessmentTitle").and_then(|v| v.as_str()),
        Some("Quiz A")
    );
    assert_eq!(
        entries[0].get("myPercentage").and_then(|v| v.as_f64()),
        Some(50.0)
    );
    assert_eq!(
        entries[0]
            .get("classAveragePercentage")
            .and_then(|v| v.as_f64()),
        Some(75.0)
    );

    // Quiz B: only one grade row exists, so the class average covers it alone.
    assert_eq!(
        entries[1].get("assessmentTitle").and_then(|v| v.as_str()),
        Some("Quiz B")
    );
    assert_eq!(
        entries[1].get("myPercentage").and_then(|v| v.as_f64()),
        Some(90.0)
    );
    assert_eq!(
        entries[1]
            .get("classAveragePercentage")
            .and_then(|v| v.as_f64()),
        Some(90.0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn gap_analysis_attendance_entry_uses_live_ledger() {
    let workspace = temp_dir("edupulse-gap-attendance");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "courses.create",
        json!({ "title": "Algorithms", "code": "ALG210" }),
    );
    let course_id = created
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    for (i, student) in ["stu-1", "stu-2"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("e{}", i),
            "enrollments.add",
            json!({
                "courseId": course_id,
                "studentId": student,
                "studentName": format!("Student {}", student)
            }),
        );
    }

    let _ = create_assessment(
        &mut stdin,
        &mut reader,
        "att",
        &course_id,
        "Attendance",
        "attendance",
        10.0,
        "2026-06-30",
    );

    // Two class days. stu-1 present both (100% -> 10 points), stu-2 present
    // once (50% -> 5 points). Ledger average: 7.5 points -> 75%.
    for (i, date) in ["2026-03-02", "2026-03-03"].iter().enumerate() {
        let students = if i == 0 {
            json!([
                { "studentId": "stu-1", "present": true },
                { "studentId": "stu-2", "present": true }
            ])
        } else {
            json!([
                { "studentId": "stu-1", "present": true },
                { "studentId": "stu-2", "present": false }
            ])
        };
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "attendance.mark",
            json!({ "courseId": course_id, "date": date, "students": students }),
        );
    }

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "gap",
        "grades.gapAnalysis",
        json!({ "courseId": course_id, "studentId": "stu-1" }),
    );
    let entries = result
        .get("entries")
        .and_then(|v| v.as_array())
        .expect("entries array");
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].get("assessmentTitle").and_then(|v| v.as_str()),
        Some("Attendance")
    );
    assert_eq!(
        entries[0].get("myPercentage").and_then(|v| v.as_f64()),
        Some(100.0)
    );
    assert_eq!(
        entries[0]
            .get("classAveragePercentage")
            .and_then(|v| v.as_f64()),
        Some(75.0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn gap_analysis_zero_max_marks_yields_zero_percentages() {
    let workspace = temp_dir("edupulse-gap-zero-max");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "courses.create",
        json!({ "title": "Seminar", "code": "SEM100" }),
    );
    let course_id = created
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "e",
        "enrollments.add",
        json!({ "courseId": course_id, "studentId": "stu-1", "studentName": "Solo" }),
    );

    let quiz = create_assessment(
        &mut stdin,
        &mut reader,
        "q",
        &course_id,
        "Ungradeable",
        "quiz",
        0.0,
        "2026-05-01",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g",
        "grades.bulkUpdate",
        json!({
            "grades": [{ "assessmentId": quiz, "studentId": "stu-1", "marksObtained": 0 }]
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "gap",
        "grades.gapAnalysis",
        json!({ "courseId": course_id, "studentId": "stu-1" }),
    );
    let entries = result
        .get("entries")
        .and_then(|v| v.as_array())
        .expect("entries array");
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].get("myPercentage").and_then(|v| v.as_f64()),
        Some(0.0)
    );
    assert_eq!(
        entries[0]
            .get("classAveragePercentage")
            .and_then(|v| v.as_f64()),
        Some(0.0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
