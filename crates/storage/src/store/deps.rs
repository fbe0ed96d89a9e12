#![forbid(unsafe_code)]

use super::*;
use crate::store::events::insert_event_tx;
use serde_json::json;
use tl_core::events::EVENT_DEPENDENCY_ADDED;
use tl_core::graph;
use tl_core::model::{Dependency, DependencyStatus, DependencyType};

pub(in crate::store) fn insert_dependency_tx(
    tx: &Transaction<'_>,
    dependent_task_id: &str,
    prerequisite_task_id: &str,
    dependency_type: DependencyType,
    mandatory: bool,
    now_ms: i64,
) -> Result<(), StoreError> {
    let insert = tx.execute(
        "INSERT INTO dependencies(
            dependent_task_id, prerequisite_task_id, dependency_type,
            mandatory, status, created_at_ms
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            dependent_task_id,
            prerequisite_task_id,
            dependency_type.as_str(),
            mandatory as i64,
            DependencyStatus::Pending.as_str(),
            now_ms,
        ],
    );
    if let Err(err) = insert {
        if is_constraint_violation(&err) {
            return Err(StoreError::DependencyExists);
        }
        return Err(err.into());
    }
    Ok(())
}

pub(in crate::store) fn all_edges_tx(
    conn: &Connection,
) -> Result<Vec<(String, String)>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT dependent_task_id, prerequisite_task_id FROM dependencies")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut edges = Vec::new();
    for row in rows {
        edges.push(row?);
    }
    Ok(edges)
}

fn dependency_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dependency> {
    let type_raw: String = row.get(2)?;
    let status_raw: String = row.get(4)?;
    Ok(Dependency {
        dependent_task_id: row.get(0)?,
        prerequisite_task_id: row.get(1)?,
        dependency_type: DependencyType::parse(&type_raw)
            .ok_or_else(|| column_error(2, format!("unknown dependency type `{type_raw}`")))?,
        mandatory: row.get::<_, i64>(3)? != 0,
        status: DependencyStatus::parse(&status_raw)
            .ok_or_else(|| column_error(4, format!("unknown dependency status `{status_raw}`")))?,
        created_at_ms: row.get(5)?,
    })
}

const DEPENDENCY_COLUMNS: &str = "dependent_task_id, prerequisite_task_id, dependency_type, \
     mandatory, status, created_at_ms";

impl SqliteStore {
    pub fn add_dependency(&mut self, request: AddDependencyRequest) -> Result<(), StoreError> {
        let AddDependencyRequest {
            dependent_task_id,
            prerequisite_task_id,
            dependency_type,
            mandatory,
        } = request;

        if dependent_task_id == prerequisite_task_id {
            return Err(StoreError::InvalidInput("a task cannot depend on itself"));
        }

        let now = now_ms();
        let tx = self.conn.transaction()?;

        let dependent = load_task(&tx, &dependent_task_id)?;
        let prerequisite = load_task(&tx, &prerequisite_task_id)?;
        if dependent.deleted_at_ms.is_some() || prerequisite.deleted_at_ms.is_some() {
            return Err(StoreError::InvalidInput(
                "dependency endpoints must not be deleted",
            ));
        }

        let edges = all_edges_tx(&tx)?;
        if graph::creates_cycle(&edges, &dependent_task_id, &prerequisite_task_id) {
            return Err(StoreError::CycleDetected);
        }

        insert_dependency_tx(
            &tx,
            &dependent_task_id,
            &prerequisite_task_id,
            dependency_type,
            mandatory,
            now,
        )?;
        insert_event_tx(
            &tx,
            &dependent_task_id,
            EVENT_DEPENDENCY_ADDED,
            "system",
            now,
            Some(&json!({
                "prerequisite_task_id": prerequisite_task_id,
                "dependency_type": dependency_type.as_str(),
                "mandatory": mandatory,
            })),
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn list_dependencies(&self, task_id: &str) -> Result<DependencyLinks, StoreError> {
        load_task(&self.conn, task_id)?;

        let sql = format!(
            "SELECT {DEPENDENCY_COLUMNS} FROM dependencies
             WHERE dependent_task_id = ?1
             ORDER BY created_at_ms ASC, prerequisite_task_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![task_id], dependency_from_row)?;
        let mut prerequisites = Vec::new();
        for row in rows {
            prerequisites.push(row?);
        }

        let sql = format!(
            "SELECT {DEPENDENCY_COLUMNS} FROM dependencies
             WHERE prerequisite_task_id = ?1
             ORDER BY created_at_ms ASC, dependent_task_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![task_id], dependency_from_row)?;
        let mut dependents = Vec::new();
        for row in rows {
            dependents.push(row?);
        }

        Ok(DependencyLinks {
            task_id: task_id.to_string(),
            prerequisites,
            dependents,
        })
    }

    /// A mandatory edge counts as satisfied when the edge itself was
    /// marked satisfied or waived, or when the prerequisite is no longer
    /// runnable work (completed, cancelled or archived). Optional edges
    /// never block; they are reported but always satisfied. The rule here
    /// mirrors the ready-set predicate exactly.
    pub fn check_dependencies(&self, task_id: &str) -> Result<DependencyReport, StoreError> {
        load_task(&self.conn, task_id)?;

        let mut stmt = self.conn.prepare(
            "SELECT d.prerequisite_task_id, d.dependency_type, d.mandatory, d.status, t.status
             FROM dependencies d
             JOIN tasks t ON t.task_id = d.prerequisite_task_id
             WHERE d.dependent_task_id = ?1
             ORDER BY d.created_at_ms ASC, d.prerequisite_task_id ASC",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? != 0,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut checks = Vec::new();
        let mut satisfied = true;
        for row in rows {
            let (prerequisite_task_id, dependency_type, mandatory, edge_status, prerequisite_status) =
                row?;
            let prerequisite_blocks = matches!(
                prerequisite_status.as_str(),
                "pending" | "active" | "in_progress" | "blocked" | "failed"
            );
            let edge_ok = edge_status == DependencyStatus::Satisfied.as_str()
                || edge_status == DependencyStatus::Waived.as_str()
                || !prerequisite_blocks;
            let check_satisfied = !mandatory || edge_ok;
            if mandatory && !edge_ok {
                satisfied = false;
            }
            checks.push(DependencyCheck {
                prerequisite_task_id,
                dependency_type,
                mandatory,
                edge_status,
                prerequisite_status,
                satisfied: check_satisfied,
            });
        }

        Ok(DependencyReport {
            task_id: task_id.to_string(),
            satisfied,
            checks,
        })
    }
}
