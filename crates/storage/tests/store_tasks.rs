#![forbid(unsafe_code)]

use tl_storage::{
    AttributeSpec, CreateBreakdownRequest, CreateTaskRequest, DeleteTaskRequest, MoveTaskRequest,
    QueryOrder, QueryTasksRequest, SqliteStore, StoreError, StoreLimits, SubtaskSpec,
    UpdateTaskRequest,
};
use std::path::PathBuf;
use tl_core::model::{Complexity, TaskStatus, TaskType};

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("tl_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn open_store(dir: &PathBuf) -> SqliteStore {
    SqliteStore::open(dir, StoreLimits::default()).expect("open store")
}

fn new_task(title: &str) -> CreateTaskRequest {
    CreateTaskRequest {
        parent_task_id: None,
        title: title.to_string(),
        description: format!("{title} description"),
        task_type: TaskType::Standard,
        specialist_type: "implementer".to_string(),
        complexity: Complexity::Moderate,
        estimated_effort: None,
        context_json: None,
        attributes: Vec::new(),
        triggered_by: "test".to_string(),
    }
}

fn child_of(parent: &str, title: &str) -> CreateTaskRequest {
    CreateTaskRequest {
        parent_task_id: Some(parent.to_string()),
        ..new_task(title)
    }
}

#[test]
fn create_assigns_paths_levels_and_positions() {
    let dir = temp_dir("create_assigns_paths_levels_and_positions");
    let mut store = open_store(&dir);

    let root = store.create_task(new_task("Root")).expect("create root");
    assert_eq!(root.hierarchy_path, format!("/{}", root.task_id));
    assert_eq!(root.hierarchy_level, 0);
    assert_eq!(root.position_in_parent, 0);
    assert_eq!(root.status, TaskStatus::Pending);

    let first = store
        .create_task(child_of(&root.task_id, "First child"))
        .expect("create first child");
    let second = store
        .create_task(child_of(&root.task_id, "Second child"))
        .expect("create second child");
    assert_eq!(
        first.hierarchy_path,
        format!("{}/{}", root.hierarchy_path, first.task_id)
    );
    assert_eq!(first.hierarchy_level, 1);
    assert_eq!(first.position_in_parent, 0);
    assert_eq!(second.position_in_parent, 1);

    let children = store.children_of(&root.task_id).expect("children");
    let ids: Vec<&str> = children.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, vec![first.task_id.as_str(), second.task_id.as_str()]);
}

#[test]
fn create_validates_title_and_context() {
    let dir = temp_dir("create_validates_title_and_context");
    let mut store = open_store(&dir);

    let err = store
        .create_task(new_task("   "))
        .expect_err("blank title should fail");
    match err {
        StoreError::InvalidInput(msg) => assert_eq!(msg, "title must not be empty"),
        other => panic!("expected InvalidInput, got {other:?}"),
    }

    let err = store
        .create_task(new_task(&"x".repeat(201)))
        .expect_err("long title should fail");
    match err {
        StoreError::TitleTooLong { max } => assert_eq!(max, 200),
        other => panic!("expected TitleTooLong, got {other:?}"),
    }

    let mut request = new_task("Bad context");
    request.context_json = Some("[1, 2, 3]".to_string());
    let err = store
        .create_task(request)
        .expect_err("array context should fail");
    match err {
        StoreError::InvalidInput(msg) => assert_eq!(msg, "context must be a JSON object"),
        other => panic!("expected InvalidInput, got {other:?}"),
    }
}

#[test]
fn create_enforces_depth_and_sibling_limits() {
    let dir = temp_dir("create_enforces_depth_and_sibling_limits");
    let limits = StoreLimits {
        max_depth: 3,
        max_subtasks: 2,
    };
    let mut store = SqliteStore::open(&dir, limits).expect("open store");

    let root = store.create_task(new_task("Root")).expect("root");
    let mid = store
        .create_task(child_of(&root.task_id, "Mid"))
        .expect("mid");
    let leaf = store
        .create_task(child_of(&mid.task_id, "Leaf"))
        .expect("leaf");
    let err = store
        .create_task(child_of(&leaf.task_id, "Too deep"))
        .expect_err("depth limit");
    match err {
        StoreError::DepthExceeded { max } => assert_eq!(max, 3),
        other => panic!("expected DepthExceeded, got {other:?}"),
    }

    store
        .create_task(child_of(&root.task_id, "Second"))
        .expect("second sibling");
    let err = store
        .create_task(child_of(&root.task_id, "Third"))
        .expect_err("sibling limit");
    match err {
        StoreError::SubtaskLimitExceeded { max } => assert_eq!(max, 2),
        other => panic!("expected SubtaskLimitExceeded, got {other:?}"),
    }
}

#[test]
fn update_merges_context_and_detects_conflicts() {
    let dir = temp_dir("update_merges_context_and_detects_conflicts");
    let mut store = open_store(&dir);

    let mut request = new_task("Contextual");
    request.context_json = Some(r#"{"goal": "ship", "speed": "slow"}"#.to_string());
    let task = store.create_task(request).expect("create");

    let updated = store
        .update_task(UpdateTaskRequest {
            task_id: task.task_id.clone(),
            context_patch: Some(r#"{"speed": null, "owner": "alice"}"#.to_string()),
            triggered_by: "test".to_string(),
            ..Default::default()
        })
        .expect("patch context");
    let context: serde_json::Value =
        serde_json::from_str(updated.context_json.as_deref().expect("context")).expect("json");
    assert_eq!(context["goal"], "ship");
    assert_eq!(context["owner"], "alice");
    assert!(context.get("speed").is_none(), "null patch removes the key");

    let err = store
        .update_task(UpdateTaskRequest {
            task_id: task.task_id.clone(),
            title: Some("Renamed".to_string()),
            expected_updated_at_ms: Some(task.updated_at_ms - 1),
            triggered_by: "test".to_string(),
            ..Default::default()
        })
        .expect_err("stale token should conflict");
    match err {
        StoreError::UpdateConflict { actual, .. } => {
            assert_eq!(actual, updated.updated_at_ms);
        }
        other => panic!("expected UpdateConflict, got {other:?}"),
    }

    let err = store
        .update_task(UpdateTaskRequest {
            task_id: task.task_id.clone(),
            triggered_by: "test".to_string(),
            ..Default::default()
        })
        .expect_err("empty update should fail");
    match err {
        StoreError::InvalidInput(msg) => assert_eq!(msg, "no fields to update"),
        other => panic!("expected InvalidInput, got {other:?}"),
    }
}

#[test]
fn move_rebases_the_whole_subtree() {
    let dir = temp_dir("move_rebases_the_whole_subtree");
    let mut store = open_store(&dir);

    let a = store.create_task(new_task("A")).expect("a");
    let b = store.create_task(child_of(&a.task_id, "B")).expect("b");
    let c = store.create_task(child_of(&b.task_id, "C")).expect("c");
    let d = store.create_task(new_task("D")).expect("d");

    let moved = store
        .move_task(MoveTaskRequest {
            task_id: b.task_id.clone(),
            new_parent_task_id: Some(d.task_id.clone()),
            position: None,
            triggered_by: "test".to_string(),
        })
        .expect("move b under d");
    assert_eq!(moved.parent_task_id.as_deref(), Some(d.task_id.as_str()));
    assert_eq!(
        moved.hierarchy_path,
        format!("/{}/{}", d.task_id, b.task_id)
    );
    assert_eq!(moved.hierarchy_level, 1);

    let c_after = store.get_task(&c.task_id, false, false).expect("get c").task;
    assert_eq!(
        c_after.hierarchy_path,
        format!("/{}/{}/{}", d.task_id, b.task_id, c.task_id)
    );
    assert_eq!(c_after.hierarchy_level, 2);

    let err = store
        .move_task(MoveTaskRequest {
            task_id: d.task_id.clone(),
            new_parent_task_id: Some(c.task_id.clone()),
            position: None,
            triggered_by: "test".to_string(),
        })
        .expect_err("moving under own descendant");
    match err {
        StoreError::CycleDetected => {}
        other => panic!("expected CycleDetected, got {other:?}"),
    }
}

#[test]
fn soft_delete_archives_and_is_idempotent() {
    let dir = temp_dir("soft_delete_archives_and_is_idempotent");
    let mut store = open_store(&dir);

    let task = store.create_task(new_task("Disposable")).expect("create");
    let outcome = store
        .delete_task(DeleteTaskRequest {
            task_id: task.task_id.clone(),
            soft: true,
            force: false,
            triggered_by: "test".to_string(),
        })
        .expect("soft delete");
    assert!(outcome.soft);
    assert_eq!(outcome.removed_task_ids, vec![task.task_id.clone()]);

    let view = store.get_task(&task.task_id, false, false).expect("get");
    assert_eq!(view.task.status, TaskStatus::Archived);
    assert!(view.task.deleted_at_ms.is_some());

    let again = store
        .delete_task(DeleteTaskRequest {
            task_id: task.task_id.clone(),
            soft: true,
            force: false,
            triggered_by: "test".to_string(),
        })
        .expect("repeat soft delete");
    assert!(again.removed_task_ids.is_empty(), "second delete is a no-op");
}

#[test]
fn hard_delete_guards_external_dependents() {
    let dir = temp_dir("hard_delete_guards_external_dependents");
    let mut store = open_store(&dir);

    let target = store.create_task(new_task("Target")).expect("target");
    let child = store
        .create_task(child_of(&target.task_id, "Target child"))
        .expect("child");
    let dependent = store.create_task(new_task("Dependent")).expect("dependent");
    store
        .add_dependency(tl_storage::AddDependencyRequest {
            dependent_task_id: dependent.task_id.clone(),
            prerequisite_task_id: target.task_id.clone(),
            dependency_type: tl_core::model::DependencyType::Completion,
            mandatory: true,
        })
        .expect("add dependency");

    let err = store
        .delete_task(DeleteTaskRequest {
            task_id: target.task_id.clone(),
            soft: false,
            force: false,
            triggered_by: "test".to_string(),
        })
        .expect_err("dependent should block");
    match err {
        StoreError::HasDependents { count } => assert_eq!(count, 1),
        other => panic!("expected HasDependents, got {other:?}"),
    }

    let outcome = store
        .delete_task(DeleteTaskRequest {
            task_id: target.task_id.clone(),
            soft: false,
            force: true,
            triggered_by: "test".to_string(),
        })
        .expect("forced hard delete");
    assert_eq!(
        outcome.removed_task_ids,
        vec![child.task_id.clone(), target.task_id.clone()],
        "deepest rows go first"
    );

    let err = store
        .get_task(&target.task_id, false, false)
        .expect_err("row is gone");
    match err {
        StoreError::UnknownTask => {}
        other => panic!("expected UnknownTask, got {other:?}"),
    }
}

#[test]
fn query_filters_sorts_and_paginates() {
    let dir = temp_dir("query_filters_sorts_and_paginates");
    let mut store = open_store(&dir);

    let mut research = new_task("Survey the landscape");
    research.specialist_type = "researcher".to_string();
    let research = store.create_task(research).expect("research");
    for i in 0..3 {
        store
            .create_task(new_task(&format!("Implement part {i}")))
            .expect("implement");
    }

    let page = store
        .query_tasks(&QueryTasksRequest {
            specialists: vec!["researcher".to_string()],
            ..Default::default()
        })
        .expect("query by specialist");
    assert_eq!(page.total, 1);
    assert_eq!(page.tasks[0].task_id, research.task_id);

    let page = store
        .query_tasks(&QueryTasksRequest {
            text: Some("part".to_string()),
            ..Default::default()
        })
        .expect("query by text");
    assert_eq!(page.total, 3);

    let page = store
        .query_tasks(&QueryTasksRequest {
            order_by: QueryOrder::Title,
            limit: 2,
            offset: 2,
            ..Default::default()
        })
        .expect("paginate");
    assert_eq!(page.total, 4);
    assert_eq!(page.tasks.len(), 2);
    assert_eq!(page.tasks[0].title, "Implement part 2");

    // Archived rows stay hidden unless asked for.
    store
        .delete_task(DeleteTaskRequest {
            task_id: research.task_id.clone(),
            soft: true,
            force: false,
            triggered_by: "test".to_string(),
        })
        .expect("archive");
    let page = store
        .query_tasks(&QueryTasksRequest::default())
        .expect("default query");
    assert_eq!(page.total, 3);
    let page = store
        .query_tasks(&QueryTasksRequest {
            statuses: vec![TaskStatus::Archived],
            ..Default::default()
        })
        .expect("archived query");
    assert_eq!(page.total, 1);
}

#[test]
fn attributes_roundtrip_and_indexed_search() {
    let dir = temp_dir("attributes_roundtrip_and_indexed_search");
    let mut store = open_store(&dir);

    let task = store.create_task(new_task("Tagged")).expect("create");
    store
        .set_attributes(
            &task.task_id,
            &[
                AttributeSpec {
                    name: "component".to_string(),
                    value: "parser".to_string(),
                    indexed: true,
                },
                AttributeSpec {
                    name: "note".to_string(),
                    value: "internal only".to_string(),
                    indexed: false,
                },
            ],
        )
        .expect("set attributes");

    let attributes = store.get_attributes(&task.task_id).expect("get attributes");
    let names: Vec<&str> = attributes.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["component", "note"], "ordered by name");

    let hits = store
        .search_by_attribute("component", "parser")
        .expect("search indexed");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].task_id, task.task_id);

    let misses = store
        .search_by_attribute("note", "internal only")
        .expect("search unindexed");
    assert!(misses.is_empty(), "unindexed attributes are not searchable");
}

#[test]
fn breakdown_creates_subtasks_with_dependency_order() {
    let dir = temp_dir("breakdown_creates_subtasks_with_dependency_order");
    let mut store = open_store(&dir);

    let breakdown = store
        .create_breakdown(CreateBreakdownRequest {
            title: "Ship feature".to_string(),
            description: "plan".to_string(),
            context_json: None,
            subtasks: vec![
                SubtaskSpec {
                    title: "Design".to_string(),
                    description: "design".to_string(),
                    task_type: TaskType::Research,
                    specialist_type: "architect".to_string(),
                    complexity: Complexity::Complex,
                    estimated_effort: None,
                    depends_on_titles: Vec::new(),
                },
                SubtaskSpec {
                    title: "Build".to_string(),
                    description: "build".to_string(),
                    task_type: TaskType::Implementation,
                    specialist_type: "implementer".to_string(),
                    complexity: Complexity::Moderate,
                    estimated_effort: None,
                    depends_on_titles: vec!["Design".to_string()],
                },
                SubtaskSpec {
                    title: "Verify".to_string(),
                    description: "verify".to_string(),
                    task_type: TaskType::Testing,
                    specialist_type: "tester".to_string(),
                    complexity: Complexity::Simple,
                    estimated_effort: None,
                    depends_on_titles: vec!["Build".to_string()],
                },
            ],
            triggered_by: "test".to_string(),
        })
        .expect("create breakdown");

    assert_eq!(breakdown.parent.task_type, TaskType::Breakdown);
    assert_eq!(
        breakdown.parent.complexity,
        Complexity::Complex,
        "parent takes the hardest subtask's complexity"
    );
    assert_eq!(breakdown.subtasks.len(), 3);
    assert_eq!(breakdown.execution_order.len(), 3, "three serial waves");
    let design = &breakdown.subtasks[0];
    assert_eq!(breakdown.execution_order[0], vec![design.task_id.clone()]);

    let build = &breakdown.subtasks[1];
    let links = store.list_dependencies(&build.task_id).expect("links");
    assert_eq!(links.prerequisites.len(), 1);
    assert_eq!(links.prerequisites[0].prerequisite_task_id, design.task_id);
    assert!(links.prerequisites[0].mandatory);
}

#[test]
fn breakdown_rejects_bad_dependency_titles() {
    let dir = temp_dir("breakdown_rejects_bad_dependency_titles");
    let mut store = open_store(&dir);

    let err = store
        .create_breakdown(CreateBreakdownRequest {
            title: "Broken plan".to_string(),
            description: "plan".to_string(),
            context_json: None,
            subtasks: vec![SubtaskSpec {
                title: "Only".to_string(),
                description: "only".to_string(),
                task_type: TaskType::Standard,
                specialist_type: "implementer".to_string(),
                complexity: Complexity::Simple,
                estimated_effort: None,
                depends_on_titles: vec!["Ghost".to_string()],
            }],
            triggered_by: "test".to_string(),
        })
        .expect_err("unknown title should fail");
    match err {
        StoreError::InvalidInput(msg) => {
            assert_eq!(msg, "dependency references an unknown subtask title");
        }
        other => panic!("expected InvalidInput, got {other:?}"),
    }

    let total = store
        .query_tasks(&QueryTasksRequest::default())
        .map(|page| page.total)
        .expect("query");
    assert_eq!(total, 0, "failed breakdown leaves nothing behind");
}
