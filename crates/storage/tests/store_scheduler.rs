#![forbid(unsafe_code)]

use tl_storage::{
    AddDependencyRequest, CompleteTaskRequest, CreateTaskRequest, SqliteStore, StaleThresholds,
    StoreError, StoreLimits, UpdateTaskRequest,
};
use rusqlite::{Connection, params};
use std::path::PathBuf;
use tl_core::model::{Complexity, DependencyType, TaskStatus, TaskType};

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

fn edge(dependent: &str, prerequisite: &str) -> AddDependencyRequest {
    AddDependencyRequest {
        dependent_task_id: dependent.to_string(),
        prerequisite_task_id: prerequisite.to_string(),
        dependency_type: DependencyType::Completion,
        mandatory: true,
    }
}

fn completion(task_id: &str, result: &str) -> CompleteTaskRequest {
    CompleteTaskRequest {
        task_id: task_id.to_string(),
        result: Some(result.to_string()),
        summary: None,
        artifacts: Vec::new(),
        triggered_by: "test".to_string(),
    }
}

#[test]
fn ready_order_is_level_then_age_then_id() {
    let dir = temp_dir("ready_order_is_level_then_age_then_id");
    let mut store = open_store(&dir);

    let parent = store.create_task(new_task("Parent")).expect("parent");
    let first = store
        .create_task(child_of(&parent.task_id, "First"))
        .expect("first");
    let second = store
        .create_task(child_of(&parent.task_id, "Second"))
        .expect("second");
    store
        .add_dependency(edge(&second.task_id, &first.task_id))
        .expect("edge");

    let ready = store.ready_tasks(None, None, 10).expect("ready");
    let ids: Vec<&str> = ready.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![parent.task_id.as_str(), first.task_id.as_str()],
        "parent sorts first, gated child is absent"
    );
}

#[test]
fn ready_excludes_subtrees_under_cancelled_ancestors() {
    let dir = temp_dir("ready_excludes_subtrees_under_cancelled_ancestors");
    let mut store = open_store(&dir);

    let root = store.create_task(new_task("Doomed root")).expect("root");
    store
        .cancel(&root.task_id, "descoped", true, "test")
        .expect("cancel root");
    let orphan = store
        .create_task(child_of(&root.task_id, "Late child"))
        .expect("late child");

    let ready = store.ready_tasks(None, None, 10).expect("ready");
    assert!(
        ready.iter().all(|t| t.task_id != orphan.task_id),
        "pending child under a cancelled ancestor is not schedulable"
    );

    let err = store.begin(&orphan.task_id, "test").expect_err("begin");
    match err {
        StoreError::NotReady { reason } => {
            assert_eq!(reason, format!("ancestor {} is cancelled", root.task_id));
        }
        other => panic!("expected NotReady, got {other:?}"),
    }
}

#[test]
fn ready_filters_by_parent_subtree_and_specialist() {
    let dir = temp_dir("ready_filters_by_parent_subtree_and_specialist");
    let mut store = open_store(&dir);

    let alpha = store.create_task(new_task("Alpha")).expect("alpha");
    let beta = store.create_task(new_task("Beta")).expect("beta");
    let mut alpha_child = child_of(&alpha.task_id, "Alpha research");
    alpha_child.specialist_type = "researcher".to_string();
    let alpha_child = store.create_task(alpha_child).expect("alpha child");
    let alpha_impl = store
        .create_task(child_of(&alpha.task_id, "Alpha build"))
        .expect("alpha impl");
    store
        .create_task(child_of(&beta.task_id, "Beta build"))
        .expect("beta child");

    let ready = store
        .ready_tasks(Some(&alpha.task_id), None, 10)
        .expect("subtree ready");
    let ids: Vec<&str> = ready.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![alpha_child.task_id.as_str(), alpha_impl.task_id.as_str()],
        "only strict descendants of the parent"
    );

    let ready = store
        .ready_tasks(Some(&alpha.task_id), Some("researcher"), 10)
        .expect("specialist ready");
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].task_id, alpha_child.task_id);
}

#[test]
fn begin_rechecks_readiness_inside_the_transaction() {
    let dir = temp_dir("begin_rechecks_readiness_inside_the_transaction");
    let mut store = open_store(&dir);

    let prereq = store.create_task(new_task("Prerequisite")).expect("prereq");
    let gated = store.create_task(new_task("Gated")).expect("gated");
    store
        .add_dependency(edge(&gated.task_id, &prereq.task_id))
        .expect("edge");

    let err = store.begin(&gated.task_id, "test").expect_err("gated begin");
    match err {
        StoreError::DependencyUnsatisfied { task_id, unmet } => {
            assert_eq!(task_id, gated.task_id);
            assert_eq!(unmet, vec![prereq.task_id.clone()]);
        }
        other => panic!("expected DependencyUnsatisfied, got {other:?}"),
    }

    let started = store.begin(&prereq.task_id, "test").expect("begin prereq");
    assert_eq!(started.status, TaskStatus::Active);
    assert!(started.started_at_ms.is_some());

    let err = store.begin(&prereq.task_id, "test").expect_err("double begin");
    match err {
        StoreError::NotReady { reason } => assert_eq!(reason, "task is active"),
        other => panic!("expected NotReady, got {other:?}"),
    }
}

#[test]
fn complete_satisfies_edges_and_reports_follow_up_work() {
    let dir = temp_dir("complete_satisfies_edges_and_reports_follow_up_work");
    let mut store = open_store(&dir);

    let parent = store.create_task(new_task("Parent")).expect("parent");
    let first = store
        .create_task(child_of(&parent.task_id, "First"))
        .expect("first");
    let second = store
        .create_task(child_of(&parent.task_id, "Second"))
        .expect("second");
    store
        .add_dependency(edge(&second.task_id, &first.task_id))
        .expect("edge");

    store.begin(&first.task_id, "test").expect("begin");
    let in_progress = store
        .progress(&first.task_id, Some("halfway"), "test")
        .expect("progress");
    assert_eq!(in_progress.status, TaskStatus::InProgress);
    assert_eq!(in_progress.summary.as_deref(), Some("halfway"));

    let outcome = store
        .complete(completion(&first.task_id, "first done"))
        .expect("complete");
    assert_eq!(outcome.task.status, TaskStatus::Completed);
    assert!(outcome.task.completed_at_ms.is_some());
    assert_eq!(outcome.task.result.as_deref(), Some("first done"));
    assert_eq!(outcome.newly_ready, vec![second.task_id.clone()]);
    let progress = outcome.parent_progress.expect("parent progress");
    assert_eq!(progress.parent_task_id, parent.task_id);
    assert_eq!(progress.completed_children, 1);
    assert_eq!(progress.total_children, 2);

    let report = store.check_dependencies(&second.task_id).expect("check");
    assert!(report.satisfied);
}

#[test]
fn complete_rejects_tasks_that_never_started() {
    let dir = temp_dir("complete_rejects_tasks_that_never_started");
    let mut store = open_store(&dir);

    let task = store.create_task(new_task("Unstarted")).expect("create");
    let err = store
        .complete(completion(&task.task_id, "nope"))
        .expect_err("completing pending work");
    match err {
        StoreError::IllegalTransition { from, to } => {
            assert_eq!(from, "pending");
            assert_eq!(to, "completed");
        }
        other => panic!("expected IllegalTransition, got {other:?}"),
    }
}

#[test]
fn revision_parks_blocked_and_keeps_the_partial_result() {
    let dir = temp_dir("revision_parks_blocked_and_keeps_the_partial_result");
    let mut store = open_store(&dir);

    let task = store.create_task(new_task("Draft")).expect("create");
    store.begin(&task.task_id, "test").expect("begin");
    store
        .progress(&task.task_id, Some("drafting"), "test")
        .expect("progress");

    let parked = store
        .request_revision(&task.task_id, "needs polish", Some("draft v1"), &[], "reviewer")
        .expect("request revision");
    assert_eq!(parked.status, TaskStatus::Blocked);
    assert_eq!(parked.result.as_deref(), Some("draft v1"));

    let events = store.list_events(&task.task_id, None, 5).expect("events");
    assert_eq!(events[0].event_type, "state:revision_requested");
    let data: serde_json::Value =
        serde_json::from_str(events[0].data_json.as_deref().expect("data")).expect("json");
    assert_eq!(data["reason"], "needs polish");

    // The parked task is ready again and can be picked back up.
    let ready = store.ready_tasks(None, None, 10).expect("ready");
    assert!(ready.iter().any(|t| t.task_id == task.task_id));
    let resumed = store.begin(&task.task_id, "test").expect("begin again");
    assert_eq!(resumed.status, TaskStatus::Active);
}

#[test]
fn park_blocked_records_a_plain_blocked_transition() {
    let dir = temp_dir("park_blocked_records_a_plain_blocked_transition");
    let mut store = open_store(&dir);

    let task = store.create_task(new_task("Waiting on input")).expect("create");
    store.begin(&task.task_id, "test").expect("begin");
    let parked = store
        .park_blocked(
            &task.task_id,
            "waiting for credentials",
            Some("partial notes"),
            &[],
            "test",
        )
        .expect("park");
    assert_eq!(parked.status, TaskStatus::Blocked);
    assert_eq!(parked.result.as_deref(), Some("partial notes"));

    let events = store.list_events(&task.task_id, None, 5).expect("events");
    assert_eq!(events[0].event_type, "state:blocked");
}

#[test]
fn fail_flips_edges_and_blocks_running_dependents() {
    let dir = temp_dir("fail_flips_edges_and_blocks_running_dependents");
    let mut store = open_store(&dir);

    let prereq = store.create_task(new_task("Fragile")).expect("prereq");
    let running = store.create_task(new_task("Running dependent")).expect("running");
    let waiting = store.create_task(new_task("Waiting dependent")).expect("waiting");

    // The dependent starts before the edge exists, so it can be running
    // when the prerequisite fails.
    store.begin(&running.task_id, "test").expect("begin running");
    store
        .add_dependency(edge(&running.task_id, &prereq.task_id))
        .expect("edge to running");
    store
        .add_dependency(edge(&waiting.task_id, &prereq.task_id))
        .expect("edge to waiting");
    store.begin(&prereq.task_id, "test").expect("begin prereq");

    let (failed, blocked) = store
        .fail(&prereq.task_id, "exploded", "test")
        .expect("fail");
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.completed_at_ms.is_some());
    assert_eq!(blocked, vec![running.task_id.clone()]);

    let running_after = store
        .get_task(&running.task_id, false, false)
        .expect("get running")
        .task;
    assert_eq!(running_after.status, TaskStatus::Blocked);
    let waiting_after = store
        .get_task(&waiting.task_id, false, false)
        .expect("get waiting")
        .task;
    assert_eq!(
        waiting_after.status,
        TaskStatus::Pending,
        "a pending dependent is held by the failed edge, not a transition"
    );

    let links = store.list_dependencies(&running.task_id).expect("links");
    assert_eq!(
        links.prerequisites[0].status,
        tl_core::model::DependencyStatus::Failed
    );

    let ready = store.ready_tasks(None, None, 10).expect("ready");
    assert!(
        ready.iter().all(|t| t.task_id != waiting.task_id),
        "failed prerequisite keeps dependents out of the ready set"
    );
}

#[test]
fn update_into_failed_propagates_like_fail() {
    let dir = temp_dir("update_into_failed_propagates_like_fail");
    let mut store = open_store(&dir);

    let prereq = store.create_task(new_task("Shaky")).expect("prereq");
    let dependent = store.create_task(new_task("Dependent")).expect("dependent");
    store.begin(&dependent.task_id, "test").expect("begin dependent");
    store
        .add_dependency(edge(&dependent.task_id, &prereq.task_id))
        .expect("edge");
    store.begin(&prereq.task_id, "test").expect("begin prereq");

    let failed = store
        .update_task(UpdateTaskRequest {
            task_id: prereq.task_id.clone(),
            status: Some(TaskStatus::Failed),
            summary: Some("build broke".to_string()),
            triggered_by: "test".to_string(),
            ..Default::default()
        })
        .expect("update to failed");
    assert_eq!(failed.status, TaskStatus::Failed);

    let dependent_after = store
        .get_task(&dependent.task_id, false, false)
        .expect("get dependent")
        .task;
    assert_eq!(dependent_after.status, TaskStatus::Blocked);
    let links = store.list_dependencies(&dependent.task_id).expect("links");
    assert_eq!(
        links.prerequisites[0].status,
        tl_core::model::DependencyStatus::Failed
    );
}

#[test]
fn cancel_cascades_without_touching_terminal_descendants() {
    let dir = temp_dir("cancel_cascades_without_touching_terminal_descendants");
    let mut store = open_store(&dir);

    let root = store.create_task(new_task("Campaign")).expect("root");
    let done = store
        .create_task(child_of(&root.task_id, "Done already"))
        .expect("done");
    let open_child = store
        .create_task(child_of(&root.task_id, "Still open"))
        .expect("open");
    store.begin(&done.task_id, "test").expect("begin done");
    store
        .complete(completion(&done.task_id, "finished"))
        .expect("complete done");

    let cancelled = store
        .cancel(&root.task_id, "priorities changed", false, "test")
        .expect("cancel");
    assert_eq!(
        cancelled,
        vec![root.task_id.clone(), open_child.task_id.clone()],
        "parents first, terminal children skipped"
    );

    let done_after = store.get_task(&done.task_id, false, false).expect("get").task;
    assert_eq!(done_after.status, TaskStatus::Completed);

    let attributes = store.get_attributes(&root.task_id).expect("attributes");
    let preserve = attributes
        .iter()
        .find(|a| a.name == "preserve_work")
        .expect("preserve_work attribute");
    assert_eq!(preserve.value, "false");
}

#[test]
fn detect_stale_measures_age_from_creation() {
    let dir = temp_dir("detect_stale_measures_age_from_creation");
    let task_id;
    {
        let mut store = open_store(&dir);
        let task = store.create_task(new_task("Slow research")).expect("create");
        task_id = task.task_id;
    }

    // Age the row ten hours by editing the database directly.
    {
        let conn = Connection::open(dir.join("state.db")).expect("open db");
        let ten_hours_ago = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
            - 10 * 3_600_000;
        conn.execute(
            "UPDATE tasks SET created_at_ms = ?1 WHERE task_id = ?2",
            params![ten_hours_ago, task_id],
        )
        .expect("age task");
    }

    let store = open_store(&dir);
    let thresholds = StaleThresholds {
        hours_by_specialist: vec![("implementer".to_string(), 6.0)],
        default_hours: 24.0,
    };
    let stale = store.detect_stale(&thresholds).expect("detect");
    assert_eq!(stale.len(), 1);
    let record = &stale[0];
    assert_eq!(record.task_id, task_id);
    assert_eq!(record.threshold_hours, 6.0);
    assert_eq!(
        record.reason,
        "implementer task pending for 10.0 hours (>6h threshold)"
    );

    let generous = StaleThresholds {
        hours_by_specialist: Vec::new(),
        default_hours: 24.0,
    };
    assert!(
        store.detect_stale(&generous).expect("detect").is_empty(),
        "under the default threshold nothing is stale"
    );
}

#[test]
fn archive_terminal_sweeps_old_finished_work() {
    let dir = temp_dir("archive_terminal_sweeps_old_finished_work");
    let mut store = open_store(&dir);

    let done = store.create_task(new_task("Finished")).expect("done");
    store.begin(&done.task_id, "test").expect("begin");
    store
        .complete(completion(&done.task_id, "ok"))
        .expect("complete");
    let open_task = store.create_task(new_task("Open")).expect("open");

    let archived = store.archive_terminal(0).expect("archive");
    assert_eq!(archived, vec![done.task_id.clone()]);

    let done_after = store.get_task(&done.task_id, false, false).expect("get").task;
    assert_eq!(done_after.status, TaskStatus::Archived);
    let open_after = store.get_task(&open_task.task_id, false, false).expect("get").task;
    assert_eq!(open_after.status, TaskStatus::Pending);

    let events = store.list_events(&done.task_id, Some("lifecycle"), 5).expect("events");
    assert_eq!(events[0].event_type, "lifecycle:archived");
}

#[test]
fn events_trace_the_whole_lifecycle_newest_first() {
    let dir = temp_dir("events_trace_the_whole_lifecycle_newest_first");
    let mut store = open_store(&dir);

    let task = store.create_task(new_task("Traced")).expect("create");
    store.begin(&task.task_id, "driver").expect("begin");
    store
        .progress(&task.task_id, Some("working"), "driver")
        .expect("progress");
    store
        .complete(completion(&task.task_id, "done"))
        .expect("complete");

    let events = store.list_events(&task.task_id, None, 10).expect("events");
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "state:completed",
            "state:in_progress",
            "state:active",
            "audit:created"
        ]
    );
    assert_eq!(events[2].triggered_by, "driver");
    assert_eq!(events[0].event_id(), format!("evt_{:016}", events[0].seq));

    let count = store.count_events(&task.task_id).expect("count");
    assert_eq!(count, 4);
}
