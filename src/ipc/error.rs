use serde_json::json;

use crate::error::QueryError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Query failures tell the shell whether a retry can help.
pub fn query_err(id: &str, screen_id: Option<&str>, e: &QueryError) -> serde_json::Value {
    err(
        id,
        e.code(),
        e.to_string(),
        Some(json!({
            "screenId": screen_id,
            "retryable": e.is_retryable(),
        })),
    )
}
