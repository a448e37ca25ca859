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
    let exe = env!("CARGO_BIN_EXE_studenttrackd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn studenttrackd");
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
        value.get("success").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("data").cloned().unwrap_or_else(|| json!({}))
}

fn student_params(name: &str, email: &str) -> serde_json::Value {
    json!({
        "name": name, "email": email,
        "phone": "0555554544", "address": "Somewhere 5", "birth_date": "2000-01-15",
        "birth_place": "Algiers", "enrollment_year": "2023-09-01",
        "gradeId": 1, "specialtyId": 1
    })
}

fn with_code(mut params: serde_json::Value, code: &str) -> serde_json::Value {
    params["code"] = json!(code);
    params
}

fn create_activity(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
) -> i64 {
    let data = request_ok(
        stdin,
        reader,
        id,
        "activity.create",
        json!({ "name": name, "description": "for tests", "type": "WORKSHOP" }),
    );
    data["activity"]["id"].as_i64().expect("activity id")
}

#[test]
fn crud_round_trip_with_duplicate_code_rejection() {
    let workspace = temp_dir("studenttrack-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "student.create",
        with_code(student_params("Jane Doe", "jane@example.com"), "STU100"),
    );

    let dup = request(
        &mut stdin,
        &mut reader,
        "3",
        "student.create",
        with_code(student_params("Other", "other@example.com"), "STU100"),
    );
    assert_eq!(dup["success"].as_bool(), Some(false));
    assert_eq!(dup["status"].as_i64(), Some(400));

    let shown = request_ok(&mut stdin, &mut reader, "4", "student.show", json!({ "code": "STU100" }));
    assert_eq!(shown["name"].as_str(), Some("Jane Doe"));
    assert_eq!(shown["grade"]["name"].as_str(), Some("L1"));
    assert!(shown["evaluations"].as_array().expect("evaluations").is_empty());

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "student.update",
        with_code(student_params("Jane Smith", "jane.smith@example.com"), "STU100"),
    );
    let updated = request_ok(&mut stdin, &mut reader, "6", "student.show", json!({ "code": "STU100" }));
    assert_eq!(updated["name"].as_str(), Some("Jane Smith"));
    assert_eq!(updated["email"].as_str(), Some("jane.smith@example.com"));

    let index = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "student.index",
        json!({ "page": 1, "query": "smith" }),
    );
    let students = index["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["code"].as_str(), Some("STU100"));
    assert_eq!(index["meta"]["total"].as_i64(), Some(1));

    request_ok(&mut stdin, &mut reader, "8", "student.delete", json!({ "code": "STU100" }));
    let gone = request(&mut stdin, &mut reader, "9", "student.show", json!({ "code": "STU100" }));
    assert_eq!(gone["success"].as_bool(), Some(false));
    assert_eq!(gone["status"].as_i64(), Some(404));
}

#[test]
fn update_activities_applies_the_set_difference() {
    let workspace = temp_dir("studenttrack-activities");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let robotics = create_activity(&mut stdin, &mut reader, "2", "Robotics Club");
    let debate = create_activity(&mut stdin, &mut reader, "3", "Debate Team");
    let chess = create_activity(&mut stdin, &mut reader, "4", "Chess Circle");

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "student.create",
        with_code(student_params("Jane Doe", "jane@example.com"), "STU110"),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "student.updateActivities",
        json!({ "code": "STU110", "activityIds": [robotics, debate] }),
    );
    let mut ids: Vec<i64> = first["activities"]
        .as_array()
        .expect("activities")
        .iter()
        .map(|a| a["id"].as_i64().expect("id"))
        .collect();
    ids.sort();
    assert_eq!(ids, vec![robotics, debate]);

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "student.updateActivities",
        json!({ "code": "STU110", "activityIds": [debate, chess] }),
    );
    let mut ids: Vec<i64> = second["activities"]
        .as_array()
        .expect("activities")
        .iter()
        .map(|a| a["id"].as_i64().expect("id"))
        .collect();
    ids.sort();
    assert_eq!(ids, vec![debate, chess]);

    let invalid = request(
        &mut stdin,
        &mut reader,
        "8",
        "student.updateActivities",
        json!({ "code": "STU110", "activityIds": [debate, 999999] }),
    );
    assert_eq!(invalid["success"].as_bool(), Some(false));
    assert_eq!(invalid["status"].as_i64(), Some(400));

    // Failed request must not have disturbed the attached set.
    let shown = request_ok(&mut stdin, &mut reader, "9", "student.show", json!({ "code": "STU110" }));
    let mut ids: Vec<i64> = shown["activities"]
        .as_array()
        .expect("activities")
        .iter()
        .map(|a| a["id"].as_i64().expect("id"))
        .collect();
    ids.sort();
    assert_eq!(ids, vec![debate, chess]);
}
