//! Association reconciliation: bring the stored skill associations of an
//! evaluation in line with a caller-supplied target set, as one transaction.
//!
//! The planner is pure; the apply step runs inside a rusqlite transaction so
//! a failure anywhere leaves the prior state untouched.

use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Transaction};
use serde::Deserialize;
use serde_json::json;

use crate::error::ServiceError;

/// One incoming association: a skill id plus an optional score.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillEntry {
    #[serde(rename = "skillId")]
    pub skill_id: i64,
    #[serde(default)]
    pub score: Option<f64>,
}

/// How upserts treat rows that already exist for the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMode {
    /// Caller-supplied score (or NULL) overwrites the stored one.
    Overwrite,
    /// Existing rows keep their stored score; new rows insert unscored.
    Preserve,
}

#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub to_delete: Vec<i64>,
    pub to_upsert: Vec<SkillEntry>,
}

/// Scores are clamped into [0,100] at the request-parsing boundary,
/// never silently dropped.
pub fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// Compute the minimal delete/upsert set.
///
/// Duplicate skill ids in `incoming` collapse to one entry: the last
/// occurrence in input order wins for the score, while the first occurrence
/// fixes the position. This is a documented tie-break, not an accident of
/// map construction.
pub fn plan(current_ids: &[i64], incoming: &[SkillEntry]) -> ReconcilePlan {
    let mut order: Vec<i64> = Vec::new();
    let mut latest: std::collections::HashMap<i64, Option<f64>> = std::collections::HashMap::new();
    for entry in incoming {
        if !latest.contains_key(&entry.skill_id) {
            order.push(entry.skill_id);
        }
        latest.insert(entry.skill_id, entry.score);
    }

    let to_delete = current_ids
        .iter()
        .copied()
        .filter(|id| !latest.contains_key(id))
        .collect();
    let to_upsert = order
        .into_iter()
        .map(|skill_id| SkillEntry {
            skill_id,
            score: latest[&skill_id],
        })
        .collect();

    ReconcilePlan {
        to_delete,
        to_upsert,
    }
}

pub fn evaluation_exists(conn: &Connection, evaluation_id: &str) -> Result<bool, rusqlite::Error> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM evaluations WHERE id = ?",
            [evaluation_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Every incoming skill id must already exist; otherwise the whole call
/// fails before anything is written.
pub fn verify_skills_exist(conn: &Connection, entries: &[SkillEntry]) -> Result<(), ServiceError> {
    let mut stmt = conn.prepare("SELECT 1 FROM skills WHERE id = ?")?;
    for entry in entries {
        if !stmt.exists([entry.skill_id])? {
            return Err(ServiceError::InvalidReference {
                kind: "skill",
                id: entry.skill_id,
            });
        }
    }
    Ok(())
}

pub fn current_skill_ids(
    conn: &Connection,
    evaluation_id: &str,
) -> Result<Vec<i64>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT skill_id FROM skill_evaluations WHERE evaluation_id = ?")?;
    let ids = stmt
        .query_map([evaluation_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn apply(
    tx: &Transaction<'_>,
    evaluation_id: &str,
    plan: &ReconcilePlan,
    mode: ScoreMode,
) -> Result<(), rusqlite::Error> {
    if !plan.to_delete.is_empty() {
        let placeholders = vec!["?"; plan.to_delete.len()].join(",");
        let sql = format!(
            "DELETE FROM skill_evaluations WHERE evaluation_id = ? AND skill_id IN ({})",
            placeholders
        );
        let mut params: Vec<Value> = Vec::with_capacity(plan.to_delete.len() + 1);
        params.push(Value::Text(evaluation_id.to_string()));
        params.extend(plan.to_delete.iter().map(|id| Value::Integer(*id)));
        tx.execute(&sql, params_from_iter(params))?;
    }

    let sql = match mode {
        ScoreMode::Overwrite => {
            "INSERT INTO skill_evaluations(evaluation_id, skill_id, score) VALUES(?, ?, ?)
             ON CONFLICT(evaluation_id, skill_id) DO UPDATE SET score = excluded.score"
        }
        ScoreMode::Preserve => {
            "INSERT INTO skill_evaluations(evaluation_id, skill_id, score) VALUES(?, ?, ?)
             ON CONFLICT(evaluation_id, skill_id) DO NOTHING"
        }
    };
    let mut stmt = tx.prepare(sql)?;
    for entry in &plan.to_upsert {
        stmt.execute((evaluation_id, entry.skill_id, entry.score))?;
    }

    Ok(())
}

/// Replace the association set of `evaluation_id` with `incoming`, optionally
/// updating the evaluation comment in the same transaction. Idempotent:
/// re-running with the same target set is a stored no-op.
pub fn reconcile(
    conn: &Connection,
    evaluation_id: &str,
    incoming: &[SkillEntry],
    comment: Option<Option<String>>,
    mode: ScoreMode,
) -> Result<(), ServiceError> {
    if !evaluation_exists(conn, evaluation_id)? {
        return Err(ServiceError::NotFound("evaluation".to_string()));
    }
    verify_skills_exist(conn, incoming)?;

    let current = current_skill_ids(conn, evaluation_id)?;
    let plan = plan(&current, incoming);

    let tx = conn.unchecked_transaction()?;
    let applied = apply(&tx, evaluation_id, &plan, mode).and_then(|()| {
        if let Some(comment) = &comment {
            tx.execute(
                "UPDATE evaluations SET comment = ? WHERE id = ?",
                (comment.as_deref(), evaluation_id),
            )?;
        }
        Ok(())
    });

    match applied {
        Ok(()) => tx
            .commit()
            .map_err(|e| ServiceError::TransactionFailed(e.to_string())),
        Err(e) => {
            let _ = tx.rollback();
            Err(ServiceError::TransactionFailed(e.to_string()))
        }
    }
}

/// Post-state read: the full association set joined with skill metadata.
pub fn load_associations(
    conn: &Connection,
    evaluation_id: &str,
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT se.skill_id, se.score, s.name, s.description, s.type
         FROM skill_evaluations se
         JOIN skills s ON s.id = se.skill_id
         WHERE se.evaluation_id = ?
         ORDER BY s.name, se.skill_id",
    )?;
    let rows = stmt
        .query_map([evaluation_id], |row| {
            let skill_id: i64 = row.get(0)?;
            let score: Option<f64> = row.get(1)?;
            let name: String = row.get(2)?;
            let description: Option<String> = row.get(3)?;
            let skill_type: String = row.get(4)?;
            Ok(json!({
                "skillId": skill_id,
                "score": score,
                "skill": {
                    "id": skill_id,
                    "name": name,
                    "description": description,
                    "type": skill_type
                }
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn evaluation_json(
    conn: &Connection,
    evaluation_id: &str,
) -> Result<Option<serde_json::Value>, rusqlite::Error> {
    let head: Option<(String, Option<String>, String)> = conn
        .query_row(
            "SELECT student_id, comment, created_at FROM evaluations WHERE id = ?",
            [evaluation_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((student_id, comment, created_at)) = head else {
        return Ok(None);
    };
    let associations = load_associations(conn, evaluation_id)?;
    Ok(Some(json!({
        "id": evaluation_id,
        "studentId": student_id,
        "comment": comment,
        "createdAt": created_at,
        "skillEvaluations": associations
    })))
}
