use serde_json::json;

/// HTTP status the shell should surface for a given error code.
fn http_status(code: &str) -> u16 {
    match code {
        "bad_params" | "invalid_transition" | "enrollment_closed" => 422,
        "unauthorized" => 401,
        "forbidden" => 403,
        "not_found" => 404,
        "conflict" | "section_full" => 409,
        "maintenance_mode" => 503,
        "no_workspace" => 400,
        _ => 500,
    }
}

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
        "httpStatus": http_status(code),
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
