use crate::ipc::envelope::{created, fail, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

const SKILL_TYPES: [&str; 2] = ["SOFT", "HARD"];

fn handle_index(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };

    let mut stmt = match conn.prepare("SELECT id, name, description, type FROM skills ORDER BY name ASC")
    {
        Ok(s) => s,
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let skill_type: String = row.get(3)?;
            Ok(json!({ "id": id, "name": name, "description": description, "type": skill_type }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(skills) => ok(
            &req.id,
            "successfully fetched skills",
            Some(json!({ "skills": skills })),
        ),
        Err(e) => fail(&req.id, 500, e.to_string()),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return fail(&req.id, 400, "missing name"),
    };
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string());
    let skill_type = match req.params.get("type").and_then(|v| v.as_str()) {
        Some(t) if SKILL_TYPES.contains(&t) => t.to_string(),
        _ => return fail(&req.id, 400, "type must be one of: SOFT, HARD"),
    };

    // Case-insensitive duplicate name check.
    let existing: Option<i64> = match conn
        .query_row(
            "SELECT id FROM skills WHERE name = ? COLLATE NOCASE",
            [&name],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };
    if existing.is_some() {
        return fail(&req.id, 400, "a skill with this name already exists");
    }

    if let Err(e) = conn.execute(
        "INSERT INTO skills(name, description, type) VALUES(?, ?, ?)",
        (&name, &description, &skill_type),
    ) {
        return fail(&req.id, 500, e.to_string());
    }
    let id = conn.last_insert_rowid();

    created(
        &req.id,
        "successfully created skill",
        Some(json!({
            "skill": { "id": id, "name": name, "description": description, "type": skill_type }
        })),
    )
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };

    let Some(skill_id) = req.params.get("skillId").and_then(|v| v.as_i64()) else {
        return fail(&req.id, 400, "missing skillId");
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM skills WHERE id = ?", [skill_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };
    if exists.is_none() {
        return fail(&req.id, 404, "skill not found");
    }

    // Skill identity is immutable once referenced by associations.
    let referenced: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM skill_evaluations WHERE skill_id = ? LIMIT 1",
            [skill_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };
    if referenced.is_some() {
        return fail(&req.id, 400, "skill is referenced by existing evaluations");
    }

    if let Err(e) = conn.execute("DELETE FROM skills WHERE id = ?", [skill_id]) {
        return fail(&req.id, 500, e.to_string());
    }
    ok(&req.id, "successfully deleted skill", None)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "skill.index" => Some(handle_index(state, req)),
        "skill.create" => Some(handle_create(state, req)),
        "skill.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
