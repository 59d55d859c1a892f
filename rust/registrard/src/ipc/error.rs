use crate::domain::ValidationError;
use crate::policy::PolicyError;
use crate::rules::{SlipViolation, WindowError};
use rusqlite::ErrorCode;
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

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("not_found", format!("{} not found", what))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    pub fn no_workspace() -> Self {
        Self::new("no_workspace", "select a workspace first")
    }

    /// Generic message to the client; the cause only goes to the log.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        tracing::error!(error = %cause, "internal failure");
        Self::new("internal", "internal error")
    }

    pub fn violations(message: impl Into<String>, violations: &[SlipViolation]) -> Self {
        Self::new("validation_failed", message).with_details(json!({ "violations": violations }))
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(f, msg) = &e {
            if f.code == ErrorCode::ConstraintViolation {
                let message = match f.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                        "record is referenced by, or references, a missing or dependent record"
                            .to_string()
                    }
                    _ => msg
                        .clone()
                        .map(|m| format!("record already exists ({})", m))
                        .unwrap_or_else(|| "record already exists".to_string()),
                };
                return Self::conflict(message);
            }
        }
        Self::internal(e)
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        Self::internal(e)
    }
}

impl From<ValidationError> for HandlerErr {
    fn from(e: ValidationError) -> Self {
        Self::new("validation_failed", e.to_string()).with_details(json!({
            "violations": [{ "field": e.field, "errors": [e.message] }]
        }))
    }
}

impl From<WindowError> for HandlerErr {
    fn from(e: WindowError) -> Self {
        let code = match e {
            WindowError::NotStarted => "registration_not_started",
            WindowError::Closed => "registration_closed",
        };
        Self::new(code, e.to_string())
    }
}

impl From<PolicyError> for HandlerErr {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::Unauthenticated => Self::new("unauthenticated", e.to_string()),
            PolicyError::Forbidden { .. } | PolicyError::OutOfScope(_) => {
                tracing::warn!(reason = %e, "request denied");
                Self::forbidden(e.to_string())
            }
        }
    }
}
