#![forbid(unsafe_code)]

use crate::model::{LifecycleStage, TaskStatus};

/// Legal status transitions. Everything not listed here is rejected.
pub fn legal_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    match from {
        Pending => matches!(to, Active | Cancelled | Archived),
        Active => matches!(to, InProgress | Completed | Failed | Blocked | Cancelled),
        InProgress => matches!(to, Completed | Failed | Blocked | Cancelled),
        Blocked => matches!(to, Active | Cancelled | Archived),
        Completed => matches!(to, Archived),
        Failed => matches!(to, Blocked | Archived),
        Cancelled => matches!(to, Archived),
        Archived => false,
    }
}

pub fn allowed_targets(from: TaskStatus) -> Vec<TaskStatus> {
    use TaskStatus::*;
    let all = [
        Pending, Active, InProgress, Blocked, Completed, Failed, Cancelled, Archived,
    ];
    all.into_iter()
        .filter(|to| legal_transition(from, *to))
        .collect()
}

/// The coarse stage stored alongside status for cleanup queries.
pub fn stage_of(status: TaskStatus) -> LifecycleStage {
    match status {
        TaskStatus::Pending => LifecycleStage::Created,
        TaskStatus::Active | TaskStatus::InProgress => LifecycleStage::Active,
        TaskStatus::Blocked => LifecycleStage::Blocked,
        TaskStatus::Completed => LifecycleStage::Completed,
        TaskStatus::Failed | TaskStatus::Cancelled => LifecycleStage::Failed,
        TaskStatus::Archived => LifecycleStage::Archived,
    }
}
