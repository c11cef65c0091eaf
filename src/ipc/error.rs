use serde_json::json;

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

/// Handler-level failure carrying a stable code. Handlers build these with
/// `?` and the router-facing wrappers turn them into the error envelope.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> HandlerErr {
        HandlerErr::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> HandlerErr {
        HandlerErr::new("not_found", message)
    }

    pub fn db(e: rusqlite::Error) -> HandlerErr {
        HandlerErr::new("db_query_failed", e.to_string())
    }

    pub fn db_update(e: rusqlite::Error, table: &str) -> HandlerErr {
        HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> HandlerErr {
        HandlerErr::db(e)
    }
}

pub fn get_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_bool(params: &serde_json::Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

pub fn get_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}
