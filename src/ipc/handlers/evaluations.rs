use crate::error::ServiceError;
use crate::ipc::envelope::{created, fail, fail_err, ok};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{self, ScoreMode, SkillEntry};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// Parse `skillEvaluations` into entries with scores clamped into [0,100].
fn parse_entries(req: &Request) -> Result<Vec<SkillEntry>, String> {
    let raw = req
        .params
        .get("skillEvaluations")
        .cloned()
        .unwrap_or_else(|| json!([]));
    let mut entries: Vec<SkillEntry> =
        serde_json::from_value(raw).map_err(|e| format!("invalid skillEvaluations: {e}"))?;
    for entry in &mut entries {
        entry.score = entry.score.map(reconcile::clamp_score);
    }
    Ok(entries)
}

fn param_comment(req: &Request) -> Option<String> {
    req.params
        .get("comment")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .filter(|v| !v.trim().is_empty())
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };
    let Some(code) = req
        .params
        .get("code")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return fail(&req.id, 400, "missing code");
    };
    let entries = match parse_entries(req) {
        Ok(v) => v,
        Err(m) => return fail(&req.id, 400, m),
    };
    let comment = param_comment(req);

    let student_id: Option<String> = match conn
        .query_row("SELECT id FROM students WHERE code = ?", [code], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };
    let Some(student_id) = student_id else {
        return fail(&req.id, 404, "student not found");
    };

    if let Err(e) = reconcile::verify_skills_exist(conn, &entries) {
        return fail_err(&req.id, &e);
    }

    let evaluation_id = Uuid::new_v4().to_string();
    let result = (|| -> Result<(), ServiceError> {
        let tx = conn.unchecked_transaction()?;
        let applied = (|| -> Result<(), rusqlite::Error> {
            tx.execute(
                "INSERT INTO evaluations(id, student_id, comment, created_at) VALUES(?, ?, ?, ?)",
                (
                    &evaluation_id,
                    &student_id,
                    &comment,
                    chrono::Utc::now().to_rfc3339(),
                ),
            )?;
            // Duplicate skill ids collapse with last-write-wins, same as update.
            let plan = reconcile::plan(&[], &entries);
            let mut stmt = tx.prepare(
                "INSERT INTO skill_evaluations(evaluation_id, skill_id, score) VALUES(?, ?, ?)",
            )?;
            for entry in &plan.to_upsert {
                stmt.execute((&evaluation_id, entry.skill_id, entry.score))?;
            }
            Ok(())
        })();
        match applied {
            Ok(()) => tx
                .commit()
                .map_err(|e| ServiceError::TransactionFailed(e.to_string())),
            Err(e) => {
                let _ = tx.rollback();
                Err(ServiceError::TransactionFailed(e.to_string()))
            }
        }
    })();
    if let Err(e) = result {
        return fail_err(&req.id, &e);
    }

    match reconcile::evaluation_json(conn, &evaluation_id) {
        Ok(Some(evaluation)) => created(
            &req.id,
            "evaluation created successfully",
            Some(json!({ "evaluation": evaluation })),
        ),
        Ok(None) => fail(&req.id, 500, "evaluation vanished after create"),
        Err(e) => fail(&req.id, 500, e.to_string()),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };
    let Some(evaluation_id) = req
        .params
        .get("evaluationId")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
    else {
        return fail(&req.id, 400, "missing evaluationId");
    };
    let entries = match parse_entries(req) {
        Ok(v) => v,
        Err(m) => return fail(&req.id, 400, m),
    };
    let comment = param_comment(req);

    if let Err(e) = reconcile::reconcile(
        conn,
        &evaluation_id,
        &entries,
        Some(comment),
        ScoreMode::Overwrite,
    ) {
        return fail_err(&req.id, &e);
    }

    match reconcile::evaluation_json(conn, &evaluation_id) {
        Ok(Some(evaluation)) => ok(
            &req.id,
            "evaluation updated successfully",
            Some(json!({ "evaluation": evaluation })),
        ),
        Ok(None) => fail(&req.id, 404, "evaluation not found"),
        Err(e) => fail(&req.id, 500, e.to_string()),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };
    let Some(evaluation_id) = req
        .params
        .get("evaluationId")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
    else {
        return fail(&req.id, 400, "missing evaluationId");
    };

    // Snapshot before deleting so the caller sees what went away.
    let evaluation = match reconcile::evaluation_json(conn, &evaluation_id) {
        Ok(Some(v)) => v,
        Ok(None) => return fail(&req.id, 404, "evaluation not found"),
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM skill_evaluations WHERE evaluation_id = ?",
        [&evaluation_id],
    ) {
        let _ = tx.rollback();
        return fail(&req.id, 500, e.to_string());
    }
    if let Err(e) = tx.execute("DELETE FROM evaluations WHERE id = ?", [&evaluation_id]) {
        let _ = tx.rollback();
        return fail(&req.id, 500, e.to_string());
    }
    if let Err(e) = tx.commit() {
        return fail(&req.id, 500, format!("transaction failed: {e}"));
    }

    ok(
        &req.id,
        "evaluation deleted successfully",
        Some(json!({ "evaluation": evaluation })),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluation.create" => Some(handle_create(state, req)),
        "evaluation.update" => Some(handle_update(state, req)),
        "evaluation.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
