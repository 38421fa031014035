//! Generic entity mutations with whitelisted identifiers.
//!
//! All dynamic column/table interpolation in the workspace funnels through
//! these helpers; values are always bound, never concatenated. The free
//! functions take a `Connection` (or a `Transaction`, which derefs to one)
//! so multi-step mutations can share one transaction.

use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::{now_rfc3339, sql_param, Row, Store};
use crate::tables::EntityTable;

/// Insert a new entity row from a field map. Unknown columns are rejected;
/// timestamps are stamped here.
pub fn insert_entity(
    conn: &Connection,
    table: EntityTable,
    data: &serde_json::Map<String, Value>,
) -> Result<i64> {
    if data.is_empty() {
        return Err(StoreError::NotFound("no data to insert".into()));
    }

    let mut columns: Vec<&str> = Vec::with_capacity(data.len() + 2);
    let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(data.len() + 2);
    for (key, value) in data {
        if !table.allows_column(key) {
            return Err(StoreError::ForbiddenIdentifier(format!("{table}.{key}")));
        }
        columns.push(key.as_str());
        values.push(sql_param(value));
    }
    let now = now_rfc3339();
    columns.push("created_at");
    values.push(rusqlite::types::Value::Text(now.clone()));
    columns.push("updated_at");
    values.push(rusqlite::types::Value::Text(now));

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.as_str(),
        columns.join(", "),
        placeholders.join(", ")
    );

    let params: Vec<&dyn rusqlite::ToSql> =
        values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
    conn.execute(&sql, params.as_slice())?;
    let id = conn.last_insert_rowid();
    debug!(table = %table, id, "entity inserted");
    Ok(id)
}

/// Apply a change map to one entity row. Only whitelisted columns pass.
pub fn update_entity(
    conn: &Connection,
    table: EntityTable,
    id: i64,
    changes: &serde_json::Map<String, Value>,
) -> Result<usize> {
    if changes.is_empty() {
        return Ok(0);
    }

    let mut assignments: Vec<String> = Vec::with_capacity(changes.len() + 1);
    let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(changes.len() + 2);
    for (i, (key, value)) in changes.iter().enumerate() {
        if !table.allows_column(key) {
            return Err(StoreError::ForbiddenIdentifier(format!("{table}.{key}")));
        }
        assignments.push(format!("{} = ?{}", key, i + 1));
        values.push(sql_param(value));
    }
    let n = values.len();
    assignments.push(format!("updated_at = ?{}", n + 1));
    values.push(rusqlite::types::Value::Text(now_rfc3339()));

    let guard = if table == EntityTable::CalendarEvents {
        ""
    } else {
        " AND deleted_at IS NULL"
    };
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{}{}",
        table.as_str(),
        assignments.join(", "),
        n + 2,
        guard
    );
    values.push(rusqlite::types::Value::Integer(id));

    let params: Vec<&dyn rusqlite::ToSql> =
        values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
    Ok(conn.execute(&sql, params.as_slice())?)
}

/// Mark an entity as completed. People and calendar events carry no status
/// column and are rejected.
pub fn complete_entity(conn: &Connection, table: EntityTable, id: i64) -> Result<usize> {
    if !table.has_status() {
        return Err(StoreError::ForbiddenIdentifier(format!("{table}.status")));
    }
    let sql = format!(
        "UPDATE {} SET status = 'done', updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        table.as_str()
    );
    Ok(conn.execute(&sql, rusqlite::params![now_rfc3339(), id])?)
}

/// Soft-delete an entity row. Hard deletion is reserved for administrative
/// cleanup and never happens here.
pub fn soft_delete_entity(conn: &Connection, table: EntityTable, id: i64) -> Result<usize> {
    // calendar_events has no deleted_at column; remote deletes remove rows
    // through the sync path instead.
    if table == EntityTable::CalendarEvents {
        return Err(StoreError::ForbiddenIdentifier(format!("{table}.deleted_at")));
    }
    let now = now_rfc3339();
    let sql = format!(
        "UPDATE {} SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        table.as_str()
    );
    Ok(conn.execute(&sql, rusqlite::params![now, id])?)
}

impl Store {
    pub fn insert_entity(
        &self,
        table: EntityTable,
        data: &serde_json::Map<String, Value>,
    ) -> Result<i64> {
        self.tx(|tx| insert_entity(tx, table, data))
    }

    pub fn update_entity(
        &self,
        table: EntityTable,
        id: i64,
        changes: &serde_json::Map<String, Value>,
    ) -> Result<usize> {
        self.tx(|tx| update_entity(tx, table, id, changes))
    }

    pub fn complete_entity(&self, table: EntityTable, id: i64) -> Result<usize> {
        self.tx(|tx| complete_entity(tx, table, id))
    }

    pub fn soft_delete_entity(&self, table: EntityTable, id: i64) -> Result<usize> {
        self.tx(|tx| soft_delete_entity(tx, table, id))
    }

    /// Fetch one live entity row by id.
    pub fn get_entity(&self, table: EntityTable, id: i64) -> Result<Option<Row>> {
        let sql = if table == EntityTable::CalendarEvents {
            format!("SELECT * FROM {} WHERE id = ?1", table.as_str())
        } else {
            format!(
                "SELECT * FROM {} WHERE id = ?1 AND deleted_at IS NULL",
                table.as_str()
            )
        };
        self.query_one(&sql, &[&id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RowExt;
    use serde_json::json;

    fn map(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn insert_then_update_then_complete() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .insert_entity(
                EntityTable::Tasks,
                &map(json!({"title": "Rechnung schicken", "priority": 1})),
            )
            .unwrap();

        store
            .update_entity(EntityTable::Tasks, id, &map(json!({"due_date": "2026-01-16"})))
            .unwrap();

        let row = store.get_entity(EntityTable::Tasks, id).unwrap().unwrap();
        assert_eq!(row.str_opt("due_date"), Some("2026-01-16"));
        assert_eq!(row.str_opt("status"), Some("inbox"));

        store.complete_entity(EntityTable::Tasks, id).unwrap();
        let row = store.get_entity(EntityTable::Tasks, id).unwrap().unwrap();
        assert_eq!(row.str_opt("status"), Some("done"));
    }

    #[test]
    fn unknown_column_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .insert_entity(
                EntityTable::Tasks,
                &map(json!({"title": "ok", "sync_status": "synced"})),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::ForbiddenIdentifier(_)));
    }

    #[test]
    fn soft_deleted_rows_are_invisible() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .insert_entity(EntityTable::Projects, &map(json!({"name": "Reibekuchenofen"})))
            .unwrap();

        store.soft_delete_entity(EntityTable::Projects, id).unwrap();
        assert!(store.get_entity(EntityTable::Projects, id).unwrap().is_none());

        // The row still exists for sync reconciliation and audit.
        let raw = store
            .query_one("SELECT deleted_at FROM projects WHERE id = ?1", &[&id])
            .unwrap()
            .unwrap();
        assert!(raw.str_opt("deleted_at").is_some());
    }

    #[test]
    fn multi_step_mutation_shares_one_transaction() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.tx(|tx| {
            let person = insert_entity(tx, EntityTable::People, &map(json!({"name": "Schmidt"})))?;
            insert_entity(
                tx,
                EntityTable::Tasks,
                &map(json!({"title": "Rechnung", "person_id": person})),
            )?;
            Err(StoreError::NotFound("forced rollback".into()))
        });
        assert!(result.is_err());
        assert!(store.query("SELECT id FROM people", &[]).unwrap().is_empty());
        assert!(store.query("SELECT id FROM tasks", &[]).unwrap().is_empty());
    }

    #[test]
    fn completing_a_project_marks_it_done() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .insert_entity(EntityTable::Projects, &map(json!({"name": "Garten"})))
            .unwrap();
        store.complete_entity(EntityTable::Projects, id).unwrap();
        let row = store.get_entity(EntityTable::Projects, id).unwrap().unwrap();
        assert_eq!(row.str_opt("status"), Some("done"));
    }
}
