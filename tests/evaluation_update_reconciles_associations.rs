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

fn create_skill(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
) -> i64 {
    let data = request_ok(
        stdin,
        reader,
        id,
        "skill.create",
        json!({ "name": name, "description": "for tests", "type": "HARD" }),
    );
    data["skill"]["id"].as_i64().expect("skill id")
}

fn association_pairs(evaluation: &serde_json::Value) -> Vec<(i64, Option<f64>)> {
    evaluation["skillEvaluations"]
        .as_array()
        .expect("skillEvaluations")
        .iter()
        .map(|a| {
            (
                a["skillId"].as_i64().expect("skillId"),
                a["score"].as_f64(),
            )
        })
        .collect()
}

#[test]
fn update_replaces_the_association_set_and_is_idempotent() {
    let workspace = temp_dir("studenttrack-reconcile");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let rust = create_skill(&mut stdin, &mut reader, "2", "Rust");
    let sql = create_skill(&mut stdin, &mut reader, "3", "SQL");
    let teamwork = create_skill(&mut stdin, &mut reader, "4", "Teamwork");

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "student.create",
        json!({
            "code": "STU001", "name": "Jane Doe", "email": "jane@example.com",
            "phone": "0555554544", "address": "Somewhere 5", "birth_date": "2000-01-15",
            "birth_place": "Algiers", "enrollment_year": "2023-09-01",
            "gradeId": 1, "specialtyId": 1
        }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "evaluation.create",
        json!({
            "code": "STU001",
            "comment": "initial",
            "skillEvaluations": [
                { "skillId": rust, "score": 80 },
                { "skillId": sql, "score": 70 }
            ]
        }),
    );
    let evaluation_id = created["evaluation"]["id"].as_str().expect("id").to_string();

    // Replace {rust, sql} with {sql, teamwork}; sql's score must be overwritten.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "evaluation.update",
        json!({
            "evaluationId": evaluation_id,
            "comment": "revised",
            "skillEvaluations": [
                { "skillId": sql, "score": 65 },
                { "skillId": teamwork, "score": 90 }
            ]
        }),
    );
    let mut pairs = association_pairs(&updated["evaluation"]);
    pairs.sort_by_key(|&(skill_id, _)| skill_id);
    assert_eq!(pairs, vec![(sql, Some(65.0)), (teamwork, Some(90.0))]);
    assert_eq!(
        updated["evaluation"]["comment"].as_str(),
        Some("revised")
    );

    // Same target set again: stored state must not change.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "evaluation.update",
        json!({
            "evaluationId": updated["evaluation"]["id"],
            "comment": "revised",
            "skillEvaluations": [
                { "skillId": sql, "score": 65 },
                { "skillId": teamwork, "score": 90 }
            ]
        }),
    );
    let mut pairs_again = association_pairs(&again["evaluation"]);
    pairs_again.sort_by_key(|&(skill_id, _)| skill_id);
    assert_eq!(pairs, pairs_again);
}

#[test]
fn duplicate_skill_ids_resolve_to_the_last_entry() {
    let workspace = temp_dir("studenttrack-reconcile-dup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let skill = create_skill(&mut stdin, &mut reader, "2", "Rust");
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "student.create",
        json!({
            "code": "STU002", "name": "John Doe", "email": "john@example.com",
            "phone": "0555554544", "address": "Somewhere 6", "birth_date": "2001-02-16",
            "birth_place": "Oran", "enrollment_year": "2023-09-01",
            "gradeId": 1, "specialtyId": 1
        }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "evaluation.create",
        json!({ "code": "STU002", "comment": null, "skillEvaluations": [] }),
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "evaluation.update",
        json!({
            "evaluationId": created["evaluation"]["id"],
            "comment": null,
            "skillEvaluations": [
                { "skillId": skill, "score": 80 },
                { "skillId": skill, "score": 60 }
            ]
        }),
    );
    let pairs = association_pairs(&updated["evaluation"]);
    assert_eq!(pairs, vec![(skill, Some(60.0))]);
}
