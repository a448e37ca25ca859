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

#[test]
fn health_answers_before_and_after_workspace_selection() {
    let workspace = temp_dir("studenttrack-health");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let bare = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(bare["version"].as_str().is_some());
    assert!(bare["workspacePath"].is_null());

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let selected = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(
        selected["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );
}

#[test]
fn seeded_admin_logs_in_and_bad_credentials_are_distinguished() {
    let workspace = temp_dir("studenttrack-auth");
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
        "auth.login",
        json!({ "username": "admin", "password": "admin1234" }),
    );

    let wrong_password = request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.login",
        json!({ "username": "admin", "password": "nope" }),
    );
    assert_eq!(wrong_password["success"].as_bool(), Some(false));
    assert_eq!(wrong_password["status"].as_i64(), Some(401));

    let unknown_user = request(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "username": "ghost", "password": "admin1234" }),
    );
    assert_eq!(unknown_user["success"].as_bool(), Some(false));
    assert_eq!(unknown_user["status"].as_i64(), Some(404));
}

#[test]
fn seeded_catalog_pairs_every_specialty_with_every_grade() {
    let workspace = temp_dir("studenttrack-catalog");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let data = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "catalog.specialtiesWithGrades",
        json!({}),
    );
    let specialties = data["specialties"].as_array().expect("specialties");
    assert_eq!(specialties.len(), 13);
    for specialty in specialties {
        let grades = specialty["grades"].as_array().expect("grades");
        assert_eq!(grades.len(), 6, "specialty {} grades", specialty["name"]);
    }
}

#[test]
fn skill_names_are_unique_case_insensitively_and_deletes_respect_references() {
    let workspace = temp_dir("studenttrack-skills");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let skill = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "skill.create",
        json!({ "name": "Rust", "description": "systems", "type": "HARD" }),
    )["skill"]["id"]
        .as_i64()
        .expect("skill id");

    let dup = request(
        &mut stdin,
        &mut reader,
        "3",
        "skill.create",
        json!({ "name": "rust", "description": "again", "type": "HARD" }),
    );
    assert_eq!(dup["success"].as_bool(), Some(false));
    assert_eq!(dup["status"].as_i64(), Some(400));

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "student.create",
        json!({
            "code": "STU200", "name": "Jane Doe", "email": "jane@example.com",
            "phone": "0555554544", "address": "Somewhere 5", "birth_date": "2000-01-15",
            "birth_place": "Algiers", "enrollment_year": "2023-09-01",
            "gradeId": 1, "specialtyId": 1
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "evaluation.create",
        json!({
            "code": "STU200",
            "comment": null,
            "skillEvaluations": [ { "skillId": skill, "score": 150 } ]
        }),
    );

    // A referenced skill cannot be removed.
    let blocked = request(
        &mut stdin,
        &mut reader,
        "6",
        "skill.delete",
        json!({ "skillId": skill }),
    );
    assert_eq!(blocked["success"].as_bool(), Some(false));
    assert_eq!(blocked["status"].as_i64(), Some(400));

    // Out-of-range input was clamped, not rejected.
    let shown = request_ok(&mut stdin, &mut reader, "7", "student.show", json!({ "code": "STU200" }));
    let score = shown["evaluations"][0]["skillEvaluations"][0]["score"].as_f64();
    assert_eq!(score, Some(100.0));
}
