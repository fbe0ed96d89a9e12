#![forbid(unsafe_code)]

use super::super::*;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tl_core::model::TaskStatus;

fn push_in_clause(
    clauses: &mut Vec<String>,
    sql_params: &mut Vec<Value>,
    column: &str,
    values: Vec<String>,
) {
    if values.is_empty() {
        return;
    }
    let mut placeholders = Vec::with_capacity(values.len());
    for value in values {
        sql_params.push(Value::Text(value));
        placeholders.push(format!("?{}", sql_params.len()));
    }
    clauses.push(format!("{column} IN ({})", placeholders.join(",")));
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl SqliteStore {
    /// Filtered page plus the total match count. `limit` is clamped to
    /// `MAX_QUERY_LIMIT`; `limit = 0` returns an empty page with the
    /// total, which callers use for count-only probes.
    pub fn query_tasks(&self, request: &QueryTasksRequest) -> Result<QueryPage, StoreError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut sql_params: Vec<Value> = Vec::new();

        let wants_archived = request
            .statuses
            .iter()
            .any(|status| *status == TaskStatus::Archived);
        if !request.include_archived && !wants_archived {
            clauses.push("status <> 'archived'".to_string());
            clauses.push("deleted_at_ms IS NULL".to_string());
        }

        push_in_clause(
            &mut clauses,
            &mut sql_params,
            "status",
            request.statuses.iter().map(|s| s.as_str().to_string()).collect(),
        );
        push_in_clause(
            &mut clauses,
            &mut sql_params,
            "task_type",
            request.task_types.iter().map(|t| t.as_str().to_string()).collect(),
        );
        push_in_clause(
            &mut clauses,
            &mut sql_params,
            "specialist_type",
            request.specialists.clone(),
        );
        push_in_clause(
            &mut clauses,
            &mut sql_params,
            "complexity",
            request.complexities.iter().map(|c| c.as_str().to_string()).collect(),
        );
        if let Some(parent) = &request.parent_task_id {
            sql_params.push(Value::Text(parent.clone()));
            clauses.push(format!("parent_task_id = ?{}", sql_params.len()));
        }
        if let Some(text) = &request.text {
            let pattern = format!("%{}%", escape_like(text));
            sql_params.push(Value::Text(pattern.clone()));
            let title_at = sql_params.len();
            sql_params.push(Value::Text(pattern));
            let description_at = sql_params.len();
            clauses.push(format!(
                "(title LIKE ?{title_at} ESCAPE '\\' OR description LIKE ?{description_at} ESCAPE '\\')"
            ));
        }
        if let Some(after) = request.created_after_ms {
            sql_params.push(Value::Integer(after));
            clauses.push(format!("created_at_ms > ?{}", sql_params.len()));
        }
        if let Some(before) = request.created_before_ms {
            sql_params.push(Value::Integer(before));
            clauses.push(format!("created_at_ms < ?{}", sql_params.len()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM tasks {where_sql}"),
            params_from_iter(sql_params.iter().cloned()),
            |row| row.get(0),
        )?;

        let limit = request.limit.min(MAX_QUERY_LIMIT);
        if limit == 0 {
            return Ok(QueryPage {
                tasks: Vec::new(),
                total,
                limit,
                offset: request.offset,
            });
        }

        let order_column = match request.order_by {
            QueryOrder::CreatedAt => "created_at_ms",
            QueryOrder::UpdatedAt => "updated_at_ms",
            QueryOrder::Title => "title",
            QueryOrder::Hierarchy => "hierarchy_path",
        };
        let direction = if request.descending { "DESC" } else { "ASC" };

        sql_params.push(Value::Integer(limit as i64));
        let limit_at = sql_params.len();
        sql_params.push(Value::Integer(request.offset as i64));
        let offset_at = sql_params.len();

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks {where_sql}
             ORDER BY {order_column} {direction}, task_id ASC
             LIMIT ?{limit_at} OFFSET ?{offset_at}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(sql_params.iter().cloned()), task_from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }

        Ok(QueryPage {
            tasks,
            total,
            limit,
            offset: request.offset,
        })
    }
}
