use crate::ipc::envelope::{created, fail, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

const ACTIVITY_TYPES: [&str; 4] = ["INTERNSHIP", "EVENT", "WORKSHOP", "SPORT"];
const PAGE_SIZE: i64 = 10;

fn activity_json(row: &rusqlite::Row<'_>) -> Result<serde_json::Value, rusqlite::Error> {
    let id: i64 = row.get(0)?;
    let name: String = row.get(1)?;
    let description: Option<String> = row.get(2)?;
    let activity_type: String = row.get(3)?;
    Ok(json!({ "id": id, "name": name, "description": description, "type": activity_type }))
}

fn handle_index(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };

    let page = req.params.get("page").and_then(|v| v.as_i64());

    let result = (|| -> Result<serde_json::Value, rusqlite::Error> {
        match page {
            None => {
                let mut stmt =
                    conn.prepare("SELECT id, name, description, type FROM activities")?;
                let activities = stmt
                    .query_map([], |row| activity_json(row))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(json!({ "activities": activities }))
            }
            Some(page) => {
                let page = page.max(1);
                let mut stmt = conn.prepare(
                    "SELECT id, name, description, type FROM activities
                     ORDER BY id LIMIT ? OFFSET ?",
                )?;
                let activities = stmt
                    .query_map([PAGE_SIZE, (page - 1) * PAGE_SIZE], |row| activity_json(row))?
                    .collect::<Result<Vec<_>, _>>()?;
                let total: i64 =
                    conn.query_row("SELECT COUNT(*) FROM activities", [], |r| r.get(0))?;
                Ok(json!({
                    "activities": activities,
                    "meta": {
                        "currentPage": page,
                        "perPage": PAGE_SIZE,
                        "total": total,
                        "lastPage": (total + PAGE_SIZE - 1) / PAGE_SIZE
                    }
                }))
            }
        }
    })();

    match result {
        Ok(data) => ok(&req.id, "successfully fetched activities", Some(data)),
        Err(e) => fail(&req.id, 500, e.to_string()),
    }
}

fn parse_activity_params(req: &Request) -> Result<(String, String, String), String> {
    let name = req
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or("missing name")?;
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or("missing description")?;
    let activity_type = req
        .params
        .get("type")
        .and_then(|v| v.as_str())
        .filter(|t| ACTIVITY_TYPES.contains(t))
        .map(|t| t.to_string())
        .ok_or("type must be one of: INTERNSHIP, EVENT, WORKSHOP, SPORT")?;
    Ok((name, description, activity_type))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };

    let (name, description, activity_type) = match parse_activity_params(req) {
        Ok(v) => v,
        Err(m) => return fail(&req.id, 400, m),
    };

    if let Err(e) = conn.execute(
        "INSERT INTO activities(name, description, type) VALUES(?, ?, ?)",
        (&name, &description, &activity_type),
    ) {
        return fail(&req.id, 500, e.to_string());
    }
    let id = conn.last_insert_rowid();

    created(
        &req.id,
        "created",
        Some(json!({
            "activity": { "id": id, "name": name, "description": description, "type": activity_type }
        })),
    )
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };

    let Some(activity_id) = req.params.get("id").and_then(|v| v.as_i64()) else {
        return fail(&req.id, 400, "missing id");
    };
    let (name, description, activity_type) = match parse_activity_params(req) {
        Ok(v) => v,
        Err(m) => return fail(&req.id, 400, m),
    };

    let updated = match conn.execute(
        "UPDATE activities SET name = ?, description = ?, type = ? WHERE id = ?",
        (&name, &description, &activity_type, activity_id),
    ) {
        Ok(n) => n,
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };
    if updated == 0 {
        return fail(&req.id, 404, "activity not found");
    }

    ok(
        &req.id,
        "updated",
        Some(json!({
            "activity": { "id": activity_id, "name": name, "description": description, "type": activity_type }
        })),
    )
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };

    let Some(activity_id) = req.params.get("id").and_then(|v| v.as_i64()) else {
        return fail(&req.id, 400, "missing id");
    };

    let activity = match conn
        .query_row(
            "SELECT id, name, description, type FROM activities WHERE id = ?",
            [activity_id],
            |row| activity_json(row),
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return fail(&req.id, 404, "activity not found"),
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };
    // Detach from students before removing the activity itself.
    if let Err(e) = tx.execute(
        "DELETE FROM student_activities WHERE activity_id = ?",
        [activity_id],
    ) {
        let _ = tx.rollback();
        return fail(&req.id, 500, e.to_string());
    }
    if let Err(e) = tx.execute("DELETE FROM activities WHERE id = ?", [activity_id]) {
        let _ = tx.rollback();
        return fail(&req.id, 500, e.to_string());
    }
    if let Err(e) = tx.commit() {
        return fail(&req.id, 500, format!("transaction failed: {e}"));
    }

    ok(&req.id, "deleted", Some(json!({ "activity": activity })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "activity.index" => Some(handle_index(state, req)),
        "activity.create" => Some(handle_create(state, req)),
        "activity.update" => Some(handle_update(state, req)),
        "activity.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
