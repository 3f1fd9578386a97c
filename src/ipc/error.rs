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

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn not_found(what: &str) -> Self {
        HandlerErr {
            code: "not_found",
            message: format!("{} not found", what),
            details: None,
        }
    }

    pub fn no_profile(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "no_profile",
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn query(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn tx(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_tx_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn commit(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_commit_failed",
            message: e.to_string(),
            details: None,
        }
    }

    /// Constraint failures (dangling parents, duplicate unique keys) are a
    /// distinct outcome; everything else stays an insert/update failure.
    pub fn write(kind: WriteKind, table: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |e| {
            if is_constraint_violation(&e) {
                return HandlerErr {
                    code: "integrity_violation",
                    message: e.to_string(),
                    details: Some(json!({ "table": table })),
                };
            }
            HandlerErr {
                code: kind.code(),
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            }
        }
    }
}

#[derive(Clone, Copy)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

impl WriteKind {
    fn code(self) -> &'static str {
        match self {
            WriteKind::Insert => "db_insert_failed",
            WriteKind::Update => "db_update_failed",
            WriteKind::Delete => "db_delete_failed",
        }
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
}
