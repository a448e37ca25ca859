//! Uniform response envelope: {success, message, data?, status} plus the
//! request id for correlation on the line protocol.

use serde_json::{json, Value};

use crate::error::ServiceError;

pub fn ok(id: &str, message: impl Into<String>, data: Option<Value>) -> Value {
    envelope(id, true, 200, message, data)
}

pub fn created(id: &str, message: impl Into<String>, data: Option<Value>) -> Value {
    envelope(id, true, 201, message, data)
}

pub fn fail(id: &str, status: i64, message: impl Into<String>) -> Value {
    envelope(id, false, status, message, None)
}

pub fn fail_err(id: &str, e: &ServiceError) -> Value {
    fail(id, e.status(), e.to_string())
}

fn envelope(
    id: &str,
    success: bool,
    status: i64,
    message: impl Into<String>,
    data: Option<Value>,
) -> Value {
    let mut value = json!({
        "id": id,
        "success": success,
        "status": status,
        "message": message.into(),
    });
    if let Some(data) = data {
        value["data"] = data;
    }
    value
}
