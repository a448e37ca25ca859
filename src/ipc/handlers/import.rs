use crate::import;
use crate::ipc::envelope::{fail, fail_err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::Path;

fn handle_import_bulk(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };
    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return fail(&req.id, 400, "missing params.path");
    };

    let file_name = req
        .params
        .get("fileName")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            Path::new(path)
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => return fail(&req.id, 400, format!("failed to read {path}: {e}")),
    };

    match import::import_bulk(conn, &file_name, &bytes) {
        Ok(report) => {
            let message = format!(
                "import completed: {} success, {} failed",
                report.success, report.failed
            );
            match serde_json::to_value(&report) {
                Ok(data) => ok(&req.id, message, Some(data)),
                Err(e) => fail(&req.id, 500, e.to_string()),
            }
        }
        Err(e) => fail_err(&req.id, &e),
    }
}

fn handle_template(_state: &mut AppState, req: &Request) -> serde_json::Value {
    // Write to the given path when provided; otherwise hand back the bytes.
    if let Some(path) = req.params.get("path").and_then(|v| v.as_str()) {
        if let Err(e) = std::fs::write(path, import::TEMPLATE_CSV) {
            return fail(&req.id, 500, format!("failed to write template: {e}"));
        }
        return ok(&req.id, "saved", Some(json!({ "path": path })));
    }
    ok(
        &req.id,
        "template",
        Some(json!({ "fileName": "student_template.csv", "content": import::TEMPLATE_CSV })),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "student.importBulk" => Some(handle_import_bulk(state, req)),
        "student.template" => Some(handle_template(state, req)),
        _ => None,
    }
}
