#![forbid(unsafe_code)]

//! Event type strings carry their category as a prefix: `state:active`,
//! `lifecycle:archived`, `error:failed`, `audit:created`.

use crate::model::TaskStatus;

pub const EVENT_CREATED: &str = "audit:created";
pub const EVENT_MOVED: &str = "audit:moved";
pub const EVENT_DEPENDENCY_ADDED: &str = "audit:dependency_added";
pub const EVENT_SPECIALIST_FALLBACK: &str = "audit:specialist_fallback";
pub const EVENT_ARCHIVED: &str = "lifecycle:archived";
pub const EVENT_REVISION_REQUESTED: &str = "state:revision_requested";

pub const EVENT_CATEGORIES: &[&str] = &["state", "lifecycle", "error", "audit"];

/// The event emitted by a transition into `status`.
pub fn status_event(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "state:pending",
        TaskStatus::Active => "state:active",
        TaskStatus::InProgress => "state:in_progress",
        TaskStatus::Blocked => "state:blocked",
        TaskStatus::Completed => "state:completed",
        TaskStatus::Failed => "error:failed",
        TaskStatus::Cancelled => "state:cancelled",
        TaskStatus::Archived => EVENT_ARCHIVED,
    }
}

pub fn category_of(event_type: &str) -> Option<&'static str> {
    let prefix = event_type.split(':').next()?;
    EVENT_CATEGORIES.iter().copied().find(|c| *c == prefix)
}

pub fn format_event_id(seq: i64) -> String {
    format!("evt_{seq:016}")
}

pub fn parse_event_id(value: &str) -> Option<i64> {
    let raw = value.strip_prefix("evt_")?;
    if raw.len() != 16 {
        return None;
    }
    raw.parse::<i64>().ok()
}
