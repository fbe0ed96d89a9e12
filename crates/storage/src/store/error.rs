#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    Json(serde_json::Error),
    InvalidInput(&'static str),
    UnknownTask,
    UnknownArtifact,
    DuplicateTask,
    UpdateConflict {
        expected: i64,
        actual: i64,
    },
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },
    CycleDetected,
    DependencyExists,
    DependencyUnsatisfied {
        task_id: String,
        unmet: Vec<String>,
    },
    NotReady {
        reason: String,
    },
    DepthExceeded {
        max: usize,
    },
    SubtaskLimitExceeded {
        max: usize,
    },
    TitleTooLong {
        max: usize,
    },
    HasDependents {
        count: usize,
    },
    ArtifactNotFinalized,
    ArtifactTooLarge {
        size: u64,
        max: u64,
    },
    ArtifactSessionLost {
        reason: String,
    },
    SchemaIncompatible {
        found: i64,
        expected: i64,
    },
    LockHeld {
        pid: u32,
        age_ms: i64,
    },
    CorruptSnapshot {
        detail: String,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Json(err) => write!(f, "json: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UnknownTask => write!(f, "unknown task"),
            Self::UnknownArtifact => write!(f, "unknown artifact"),
            Self::DuplicateTask => write!(f, "task already exists"),
            Self::UpdateConflict { expected, actual } => write!(
                f,
                "update conflict (expected updated_at={expected}, actual={actual})"
            ),
            Self::IllegalTransition { from, to } => {
                write!(f, "illegal status transition ({from} -> {to})")
            }
            Self::CycleDetected => write!(f, "dependency cycle detected"),
            Self::DependencyExists => write!(f, "dependency already exists"),
            Self::DependencyUnsatisfied { task_id, unmet } => write!(
                f,
                "dependencies unsatisfied for {task_id} ({})",
                unmet.join(", ")
            ),
            Self::NotReady { reason } => write!(f, "task not ready: {reason}"),
            Self::DepthExceeded { max } => write!(f, "hierarchy depth exceeds {max}"),
            Self::SubtaskLimitExceeded { max } => {
                write!(f, "subtask count exceeds {max}")
            }
            Self::TitleTooLong { max } => write!(f, "title exceeds {max} characters"),
            Self::HasDependents { count } => {
                write!(f, "{count} task(s) still depend on this task")
            }
            Self::ArtifactNotFinalized => write!(f, "artifact is not finalized"),
            Self::ArtifactTooLarge { size, max } => {
                write!(f, "artifact size {size} exceeds limit {max}")
            }
            Self::ArtifactSessionLost { reason } => {
                write!(f, "artifact session lost: {reason}")
            }
            Self::SchemaIncompatible { found, expected } => write!(
                f,
                "schema version {found} is newer than supported {expected}"
            ),
            Self::LockHeld { pid, age_ms } => {
                write!(f, "state lock held by pid {pid} (age {age_ms}ms)")
            }
            Self::CorruptSnapshot { detail } => write!(f, "corrupt snapshot: {detail}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
