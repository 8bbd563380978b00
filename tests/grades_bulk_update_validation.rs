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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn setup(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> (String, String) {
    let _ = request_ok(
        stdin,
        reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        stdin,
        reader,
        "c",
        "courses.create",
        json!({ "title": "Chemistry", "code": "CHM110" }),
    );
    let course_id = created
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "e",
        "enrollments.add",
        json!({ "courseId": course_id, "studentId": "stu-1", "studentName": "Ravi" }),
    );
    let assessment = request_ok(
        stdin,
        reader,
        "a",
        "assessments.create",
        json!({
            "courseId": course_id,
            "title": "Quiz 1",
            "kind": "quiz",
            "maxMarks": 20,
            "date": "2026-03-06"
        }),
    );
    let assessment_id = assessment
        .get("assessmentId")
        .and_then(|v| v.as_str())
        .expect("assessmentId")
        .to_string();
    (course_id, assessment_id)
}

#[test]
fn negative_marks_are_rejected() {
    let workspace = temp_dir("edupulse-bulk-negative");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (_course_id, assessment_id) = setup(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "g",
        "grades.bulkUpdate",
        json!({
            "grades": [{ "assessmentId": assessment_id, "studentId": "stu-1", "marksObtained": -1 }]
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&resp), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_assessment_is_not_found() {
    let workspace = temp_dir("edupulse-bulk-missing");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = setup(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "g",
        "grades.bulkUpdate",
        json!({
            "grades": [{ "assessmentId": "no-such-assessment", "studentId": "stu-1", "marksObtained": 5 }]
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&resp), Some("not_found"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn regrading_a_cell_upserts_in_place() {
    let workspace = temp_dir("edupulse-bulk-upsert");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (course_id, assessment_id) = setup(&mut stdin, &mut reader, &workspace);

    for (i, marks) in [12.0, 18.0].iter().enumerate() {
        let result = request_ok(
            &mut stdin,
            &mut reader,
            &format!("g{}", i),
            "grades.bulkUpdate",
            json!({
                "grades": [{ "assessmentId": assessment_id, "studentId": "stu-1", "marksObtained": marks }]
            }),
        );
        assert_eq!(result.get("updated").and_then(|v| v.as_u64()), Some(1));
    }

    let gradebook = request_ok(
        &mut stdin,
        &mut reader,
        "gb",
        "gradebook.open",
        json!({ "courseId": course_id }),
    );
    let grades = gradebook
        .get("grades")
        .and_then(|v| v.as_array())
        .expect("grades array");
    assert_eq!(grades.len(), 1);
    assert_eq!(
        grades[0].get("marksObtained").and_then(|v| v.as_f64()),
        Some(18.0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn oversized_batches_are_rejected() {
    let workspace = temp_dir("edupulse-bulk-limit");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (_course_id, assessment_id) = setup(&mut stdin, &mut reader, &workspace);

    let edits: Vec<serde_json::Value> = (0..5001)
        .map(|i| {
            json!({
                "assessmentId": assessment_id,
                "studentId": format!("stu-{}", i),
                "marksObtained": 10
            })
        })
        .collect();
    let resp = request(
        &mut stdin,
        &mut reader,
        "g",
        "grades.bulkUpdate",
        json!({ "grades": edits }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&resp), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
