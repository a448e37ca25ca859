use crate::db;
use crate::ipc::envelope::{fail, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return fail(&req.id, 400, "missing username"),
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return fail(&req.id, 400, "missing password"),
    };

    let stored: Option<String> = match conn
        .query_row(
            "SELECT password_hash FROM admins WHERE username = ?",
            [&username],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };

    let Some(stored) = stored else {
        return fail(&req.id, 404, "user not found");
    };
    if stored != db::password_hash(&password) {
        return fail(&req.id, 401, "invalid password");
    }

    ok(&req.id, "login successful", None)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        _ => None,
    }
}
