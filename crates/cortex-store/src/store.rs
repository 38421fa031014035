use std::path::Path;
use std::sync::{Arc, Mutex};

use base64::Engine;
use chrono::Utc;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::schema::init_db;

/// A result row keyed by column name. SQLite values map to JSON:
/// NULL → null, INTEGER → number, REAL → number, TEXT → string,
/// BLOB → base64 string.
pub type Row = serde_json::Map<String, Value>;

/// Pooled, typed access to the SQLite store.
///
/// One `Connection` behind a mutex, shared by clone, the same shape the
/// scheduler handle uses so request handlers and background loops never
/// fight over connection state.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<String>,
}

impl Store {
    /// Open (and bootstrap) the database at `path`, creating parent
    /// directories as needed.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_db(&conn)?;
        crate::schema::seed_defaults(&conn)?;
        info!(%path, "store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_string()),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Run `SELECT 1` to validate the connection before reuse after idle.
    pub fn healthy(&self) -> bool {
        let Ok(conn) = self.conn.lock() else {
            return false;
        };
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|v| v == 1)
            .unwrap_or(false)
    }

    /// Re-open the underlying connection. In-memory stores keep theirs,
    /// since reopening would drop the data.
    pub fn reconnect(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let fresh = Connection::open(path)?;
        fresh.pragma_update(None, "journal_mode", "WAL")?;
        fresh.pragma_update(None, "foreign_keys", "ON")?;
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        *conn = fresh;
        warn!(%path, "store reconnected");
        Ok(())
    }

    /// Run a SELECT and return dictionary-shaped rows.
    pub fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Row>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Row::new();
            for (i, name) in columns.iter().enumerate() {
                map.insert(name.clone(), value_ref_to_json(row.get_ref(i)?));
            }
            out.push(map);
        }
        Ok(out)
    }

    /// Run a SELECT expected to return at most one row.
    pub fn query_one(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Run a mutating statement, returning the affected row count.
    pub fn exec(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(conn.execute(sql, params)?)
    }

    /// Run an INSERT and return the new rowid.
    pub fn insert(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<i64> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(sql, params)?;
        Ok(conn.last_insert_rowid())
    }

    /// Run `f` inside a transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn tx<T>(&self, f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls it back.
                Err(e)
            }
        }
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
    }
}

/// Convert a JSON value into a bindable SQLite value. Arrays and objects are
/// stored as their JSON text.
pub fn sql_param(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Current instant as the RFC 3339 UTC string stored in timestamp columns.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Column accessors for dictionary-shaped rows.
pub trait RowExt {
    fn str_opt(&self, key: &str) -> Option<&str>;
    fn str_or(&self, key: &str, default: &'static str) -> String;
    fn i64_opt(&self, key: &str) -> Option<i64>;
    fn f64_opt(&self, key: &str) -> Option<f64>;
    fn bool_or(&self, key: &str, default: bool) -> bool;
    /// Parse a TEXT column that holds serialised JSON.
    fn json_opt(&self, key: &str) -> Option<Value>;
}

impl RowExt for Row {
    fn str_opt(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn str_or(&self, key: &str, default: &'static str) -> String {
        self.str_opt(key).unwrap_or(default).to_string()
    }

    fn i64_opt(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    fn f64_opt(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().map(|i| i != 0).unwrap_or(default),
            _ => default,
        }
    }

    fn json_opt(&self, key: &str) -> Option<Value> {
        match self.get(key) {
            Some(Value::String(s)) => serde_json::from_str(s).ok(),
            Some(v) if !v.is_null() => Some(v.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_returns_dict_shaped_rows() {
        let store = Store::open_in_memory().unwrap();
        store
            .exec(
                "INSERT INTO projects (name, status, priority, created_at, updated_at)
                 VALUES ('Alpha', 'active', 1, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                &[],
            )
            .unwrap();

        let rows = store
            .query("SELECT id, name, priority FROM projects", &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].str_opt("name"), Some("Alpha"));
        assert_eq!(rows[0].i64_opt("priority"), Some(1));
        assert!(rows[0].i64_opt("id").is_some());
    }

    #[test]
    fn tx_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.tx(|tx| {
            tx.execute(
                "INSERT INTO projects (name, created_at, updated_at)
                 VALUES ('Doomed', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Err(StoreError::NotFound("forced".into()))
        });
        assert!(result.is_err());

        let rows = store.query("SELECT id FROM projects", &[]).unwrap();
        assert!(rows.is_empty(), "rolled-back insert must not be visible");
    }

    #[test]
    fn healthy_reports_live_connection() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.healthy());
    }

    #[test]
    fn json_column_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store
            .exec(
                "INSERT INTO ideas (name, tags, created_at, updated_at)
                 VALUES ('Ofen', '[\"kitchen\",\"diy\"]', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                &[],
            )
            .unwrap();
        let row = store
            .query_one("SELECT tags FROM ideas", &[])
            .unwrap()
            .unwrap();
        let tags = row.json_opt("tags").unwrap();
        assert_eq!(tags, serde_json::json!(["kitchen", "diy"]));
    }
}
