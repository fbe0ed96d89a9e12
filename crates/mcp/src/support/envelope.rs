#![forbid(unsafe_code)]

use serde_json::{Value, json};

/// Successful tool payload. `data` rides under its own key so drivers
/// parse it without scraping the message text.
pub(crate) fn success(data: Value, message: impl Into<String>) -> Value {
    json!({
        "status": "success",
        "data": data,
        "message": message.into(),
    })
}

pub(crate) fn is_success(envelope: &Value) -> bool {
    envelope.get("status").and_then(Value::as_str) == Some("success")
}

/// Every dispatched reply must be one of the two envelope shapes.
pub(crate) fn well_formed(envelope: &Value) -> bool {
    let Some(fields) = envelope.as_object() else {
        return false;
    };
    match fields.get("status").and_then(Value::as_str) {
        Some("success") => fields.contains_key("data") && fields.contains_key("message"),
        Some("error") => {
            fields.contains_key("error_code")
                && fields.contains_key("message")
                && fields.contains_key("tool")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::errors::ToolError;

    #[test]
    fn success_envelope_is_well_formed() {
        let envelope = success(json!({ "n": 1 }), "done");
        assert!(is_success(&envelope));
        assert!(well_formed(&envelope));
    }

    #[test]
    fn error_envelope_is_well_formed_and_not_success() {
        let envelope = ToolError::invalid("`title` is required").render("plan_task");
        assert!(!is_success(&envelope));
        assert!(well_formed(&envelope));
        assert_eq!(envelope["error_code"], "invalid_argument");
        assert_eq!(envelope["tool"], "plan_task");
    }

    #[test]
    fn foreign_shapes_are_rejected() {
        assert!(!well_formed(&json!("plain string")));
        assert!(!well_formed(&json!({ "status": "partial" })));
        assert!(!well_formed(&json!({ "status": "success" })));
    }
}
