#![forbid(unsafe_code)]

use tl_core::model::{Complexity, DependencyType, Task, TaskStatus, TaskType};

#[derive(Clone, Debug)]
pub struct CreateTaskRequest {
    pub parent_task_id: Option<String>,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub specialist_type: String,
    pub complexity: Complexity,
    pub estimated_effort: Option<String>,
    pub context_json: Option<String>,
    pub attributes: Vec<AttributeSpec>,
    pub triggered_by: String,
}

#[derive(Clone, Debug)]
pub struct AttributeSpec {
    pub name: String,
    pub value: String,
    pub indexed: bool,
}

/// One subtask inside a plan. Dependencies reference sibling titles; the
/// store resolves them to task ids while creating the breakdown.
#[derive(Clone, Debug)]
pub struct SubtaskSpec {
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub specialist_type: String,
    pub complexity: Complexity,
    pub estimated_effort: Option<String>,
    pub depends_on_titles: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct CreateBreakdownRequest {
    pub title: String,
    pub description: String,
    pub context_json: Option<String>,
    pub subtasks: Vec<SubtaskSpec>,
    pub triggered_by: String,
}

#[derive(Clone, Debug)]
pub struct Breakdown {
    pub parent: Task,
    pub subtasks: Vec<Task>,
    /// Topological levels of subtask ids: everything in level k only
    /// depends on earlier levels.
    pub execution_order: Vec<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct UpdateTaskRequest {
    pub task_id: String,
    /// Optimistic concurrency token from a prior read. `None` means
    /// last-writer-wins.
    pub expected_updated_at_ms: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub specialist_type: Option<String>,
    pub complexity: Option<Complexity>,
    pub estimated_effort: Option<String>,
    pub status: Option<TaskStatus>,
    /// JSON object merged key-by-key into the stored context.
    pub context_patch: Option<String>,
    pub triggered_by: String,
}

#[derive(Clone, Debug)]
pub struct MoveTaskRequest {
    pub task_id: String,
    /// `None` turns the task into a root.
    pub new_parent_task_id: Option<String>,
    pub position: Option<i64>,
    pub triggered_by: String,
}

#[derive(Clone, Debug)]
pub struct DeleteTaskRequest {
    pub task_id: String,
    pub soft: bool,
    pub force: bool,
    pub triggered_by: String,
}

#[derive(Clone, Debug)]
pub struct DeleteOutcome {
    pub removed_task_ids: Vec<String>,
    pub soft: bool,
}

#[derive(Clone, Debug)]
pub struct AddDependencyRequest {
    pub dependent_task_id: String,
    pub prerequisite_task_id: String,
    pub dependency_type: DependencyType,
    pub mandatory: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryOrder {
    CreatedAt,
    UpdatedAt,
    Title,
    Hierarchy,
}

impl QueryOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryOrder::CreatedAt => "created_at",
            QueryOrder::UpdatedAt => "updated_at",
            QueryOrder::Title => "title",
            QueryOrder::Hierarchy => "hierarchy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created_at" => Some(QueryOrder::CreatedAt),
            "updated_at" => Some(QueryOrder::UpdatedAt),
            "title" => Some(QueryOrder::Title),
            "hierarchy" => Some(QueryOrder::Hierarchy),
            _ => None,
        }
    }
}

pub const QUERY_ORDERS: &[&str] = &["created_at", "updated_at", "title", "hierarchy"];

#[derive(Clone, Debug)]
pub struct QueryTasksRequest {
    pub statuses: Vec<TaskStatus>,
    pub task_types: Vec<TaskType>,
    pub specialists: Vec<String>,
    pub complexities: Vec<Complexity>,
    pub parent_task_id: Option<String>,
    pub text: Option<String>,
    pub created_after_ms: Option<i64>,
    pub created_before_ms: Option<i64>,
    pub include_archived: bool,
    pub order_by: QueryOrder,
    pub descending: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Default for QueryTasksRequest {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            task_types: Vec::new(),
            specialists: Vec::new(),
            complexities: Vec::new(),
            parent_task_id: None,
            text: None,
            created_after_ms: None,
            created_before_ms: None,
            include_archived: false,
            order_by: QueryOrder::CreatedAt,
            descending: false,
            limit: crate::store::MAX_QUERY_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueryPage {
    pub tasks: Vec<Task>,
    pub total: i64,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Debug)]
pub struct ArtifactAttachment {
    pub artifact_id: String,
    pub artifact_type: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub digest: String,
}

#[derive(Clone, Debug)]
pub struct CompleteTaskRequest {
    pub task_id: String,
    pub result: Option<String>,
    pub summary: Option<String>,
    pub artifacts: Vec<ArtifactAttachment>,
    pub triggered_by: String,
}

#[derive(Clone, Debug)]
pub struct ParentProgress {
    pub parent_task_id: String,
    pub completed_children: i64,
    pub total_children: i64,
}

#[derive(Clone, Debug)]
pub struct CompletionOutcome {
    pub task: Task,
    pub newly_ready: Vec<String>,
    pub parent_progress: Option<ParentProgress>,
}

#[derive(Clone, Debug)]
pub struct DependencyCheck {
    pub prerequisite_task_id: String,
    pub dependency_type: String,
    pub mandatory: bool,
    pub edge_status: String,
    pub prerequisite_status: String,
    pub satisfied: bool,
}

#[derive(Clone, Debug)]
pub struct DependencyReport {
    pub task_id: String,
    pub satisfied: bool,
    pub checks: Vec<DependencyCheck>,
}

#[derive(Clone, Debug)]
pub struct DependencyLinks {
    pub task_id: String,
    /// Edges where this task is the dependent.
    pub prerequisites: Vec<tl_core::model::Dependency>,
    /// Edges where this task is the prerequisite.
    pub dependents: Vec<tl_core::model::Dependency>,
}

#[derive(Clone, Debug)]
pub struct StaleThresholds {
    pub hours_by_specialist: Vec<(String, f64)>,
    pub default_hours: f64,
}

impl StaleThresholds {
    pub fn hours_for(&self, specialist: &str) -> f64 {
        self.hours_by_specialist
            .iter()
            .find(|(name, _)| name == specialist)
            .map(|(_, hours)| *hours)
            .unwrap_or(self.default_hours)
    }
}

#[derive(Clone, Debug)]
pub struct StaleTask {
    pub task_id: String,
    pub title: String,
    pub specialist_type: String,
    pub status: String,
    pub age_hours: f64,
    pub threshold_hours: f64,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct TaskView {
    pub task: Task,
    pub children: Option<Vec<Task>>,
    pub events: Option<Vec<tl_core::model::TaskEvent>>,
}

#[derive(Clone, Debug)]
pub struct ScanScope {
    /// Restrict to a subtree by hierarchy path prefix.
    pub path_prefix: Option<String>,
    /// Restrict to tasks updated at or after this stamp.
    pub updated_since_ms: Option<i64>,
}

impl ScanScope {
    pub fn everything() -> Self {
        Self {
            path_prefix: None,
            updated_since_ms: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Violation {
    pub task_id: String,
    pub check: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}
