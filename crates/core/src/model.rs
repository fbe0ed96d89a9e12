#![forbid(unsafe_code)]

pub const MAX_TITLE_LEN: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Active,
    InProgress,
    Blocked,
    Completed,
    Failed,
    Cancelled,
    Archived,
}

pub const TASK_STATUSES: &[&str] = &[
    "pending",
    "active",
    "in_progress",
    "blocked",
    "completed",
    "failed",
    "cancelled",
    "archived",
];

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "active" => Some(TaskStatus::Active),
            "in_progress" => Some(TaskStatus::InProgress),
            "blocked" => Some(TaskStatus::Blocked),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            "archived" => Some(TaskStatus::Archived),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Archived
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleStage {
    Created,
    Active,
    Blocked,
    Completed,
    Failed,
    Archived,
}

impl LifecycleStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStage::Created => "created",
            LifecycleStage::Active => "active",
            LifecycleStage::Blocked => "blocked",
            LifecycleStage::Completed => "completed",
            LifecycleStage::Failed => "failed",
            LifecycleStage::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(LifecycleStage::Created),
            "active" => Some(LifecycleStage::Active),
            "blocked" => Some(LifecycleStage::Blocked),
            "completed" => Some(LifecycleStage::Completed),
            "failed" => Some(LifecycleStage::Failed),
            "archived" => Some(LifecycleStage::Archived),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskType {
    Breakdown,
    Standard,
    Research,
    Implementation,
    Testing,
    Documentation,
    Review,
    Maintenance,
}

pub const TASK_TYPES: &[&str] = &[
    "breakdown",
    "standard",
    "research",
    "implementation",
    "testing",
    "documentation",
    "review",
    "maintenance",
];

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Breakdown => "breakdown",
            TaskType::Standard => "standard",
            TaskType::Research => "research",
            TaskType::Implementation => "implementation",
            TaskType::Testing => "testing",
            TaskType::Documentation => "documentation",
            TaskType::Review => "review",
            TaskType::Maintenance => "maintenance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "breakdown" => Some(TaskType::Breakdown),
            "standard" => Some(TaskType::Standard),
            "research" => Some(TaskType::Research),
            "implementation" => Some(TaskType::Implementation),
            "testing" => Some(TaskType::Testing),
            "documentation" => Some(TaskType::Documentation),
            "review" => Some(TaskType::Review),
            "maintenance" => Some(TaskType::Maintenance),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

pub const COMPLEXITIES: &[&str] = &["trivial", "simple", "moderate", "complex", "very_complex"];

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Trivial => "trivial",
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
            Complexity::VeryComplex => "very_complex",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "trivial" => Some(Complexity::Trivial),
            "simple" => Some(Complexity::Simple),
            "moderate" => Some(Complexity::Moderate),
            "complex" => Some(Complexity::Complex),
            "very_complex" => Some(Complexity::VeryComplex),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyType {
    Completion,
    Data,
    Approval,
    Prerequisite,
}

pub const DEPENDENCY_TYPES: &[&str] = &["completion", "data", "approval", "prerequisite"];

impl DependencyType {
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyType::Completion => "completion",
            DependencyType::Data => "data",
            DependencyType::Approval => "approval",
            DependencyType::Prerequisite => "prerequisite",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completion" => Some(DependencyType::Completion),
            "data" => Some(DependencyType::Data),
            "approval" => Some(DependencyType::Approval),
            "prerequisite" => Some(DependencyType::Prerequisite),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyStatus {
    Pending,
    Satisfied,
    Failed,
    Waived,
}

pub const DEPENDENCY_STATUSES: &[&str] = &["pending", "satisfied", "failed", "waived"];

impl DependencyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyStatus::Pending => "pending",
            DependencyStatus::Satisfied => "satisfied",
            DependencyStatus::Failed => "failed",
            DependencyStatus::Waived => "waived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(DependencyStatus::Pending),
            "satisfied" => Some(DependencyStatus::Satisfied),
            "failed" => Some(DependencyStatus::Failed),
            "waived" => Some(DependencyStatus::Waived),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactType {
    Code,
    Documentation,
    Analysis,
    Design,
    Test,
    Config,
    General,
}

pub const ARTIFACT_TYPES: &[&str] = &[
    "code",
    "documentation",
    "analysis",
    "design",
    "test",
    "config",
    "general",
];

impl ArtifactType {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactType::Code => "code",
            ArtifactType::Documentation => "documentation",
            ArtifactType::Analysis => "analysis",
            ArtifactType::Design => "design",
            ArtifactType::Test => "test",
            ArtifactType::Config => "config",
            ArtifactType::General => "general",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "code" => Some(ArtifactType::Code),
            "documentation" => Some(ArtifactType::Documentation),
            "analysis" => Some(ArtifactType::Analysis),
            "design" => Some(ArtifactType::Design),
            "test" => Some(ArtifactType::Test),
            "config" => Some(ArtifactType::Config),
            "general" => Some(ArtifactType::General),
            _ => None,
        }
    }
}

/// What the driver wants to happen to a task after reporting work on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextAction {
    Continue,
    NeedsRevision,
    Blocked,
    Complete,
}

pub const NEXT_ACTIONS: &[&str] = &["continue", "needs_revision", "blocked", "complete"];

impl NextAction {
    pub fn as_str(self) -> &'static str {
        match self {
            NextAction::Continue => "continue",
            NextAction::NeedsRevision => "needs_revision",
            NextAction::Blocked => "blocked",
            NextAction::Complete => "complete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "continue" => Some(NextAction::Continue),
            "needs_revision" => Some(NextAction::NeedsRevision),
            "blocked" => Some(NextAction::Blocked),
            "complete" => Some(NextAction::Complete),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Task {
    pub task_id: String,
    pub parent_task_id: Option<String>,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub specialist_type: String,
    pub status: TaskStatus,
    pub lifecycle_stage: LifecycleStage,
    pub complexity: Complexity,
    pub hierarchy_path: String,
    pub hierarchy_level: i64,
    pub position_in_parent: i64,
    pub estimated_effort: Option<String>,
    pub result: Option<String>,
    pub summary: Option<String>,
    pub context_json: Option<String>,
    pub artifact_ids: Vec<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub deleted_at_ms: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct Dependency {
    pub dependent_task_id: String,
    pub prerequisite_task_id: String,
    pub dependency_type: DependencyType,
    pub mandatory: bool,
    pub status: DependencyStatus,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct TaskEvent {
    pub seq: i64,
    pub task_id: String,
    pub event_type: String,
    pub triggered_by: String,
    pub timestamp_ms: i64,
    pub data_json: Option<String>,
}

impl TaskEvent {
    pub fn event_id(&self) -> String {
        crate::events::format_event_id(self.seq)
    }
}

#[derive(Clone, Debug)]
pub struct TaskAttribute {
    pub task_id: String,
    pub name: String,
    pub value: String,
    pub indexed: bool,
}

#[derive(Clone, Debug)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub task_id: String,
    pub artifact_type: ArtifactType,
    pub file_path: String,
    pub size_bytes: i64,
    pub digest: String,
    pub created_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for name in TASK_STATUSES {
            let status = TaskStatus::parse(name).expect("known status");
            assert_eq!(status.as_str(), *name);
        }
        assert!(TaskStatus::parse("finished").is_none());
        assert!(TaskStatus::parse("Pending").is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Archived.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Active.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn enum_round_trips() {
        for name in TASK_TYPES {
            assert_eq!(TaskType::parse(name).expect("known type").as_str(), *name);
        }
        for name in COMPLEXITIES {
            assert_eq!(
                Complexity::parse(name).expect("known complexity").as_str(),
                *name
            );
        }
        for name in DEPENDENCY_TYPES {
            assert_eq!(
                DependencyType::parse(name).expect("known kind").as_str(),
                *name
            );
        }
        for name in DEPENDENCY_STATUSES {
            assert_eq!(
                DependencyStatus::parse(name).expect("known status").as_str(),
                *name
            );
        }
        for name in ARTIFACT_TYPES {
            assert_eq!(
                ArtifactType::parse(name).expect("known type").as_str(),
                *name
            );
        }
        for name in NEXT_ACTIONS {
            assert_eq!(
                NextAction::parse(name).expect("known action").as_str(),
                *name
            );
        }
    }

    #[test]
    fn complexity_orders_by_weight() {
        assert!(Complexity::Trivial < Complexity::Simple);
        assert!(Complexity::Complex < Complexity::VeryComplex);
    }
}
