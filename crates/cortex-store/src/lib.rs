//! Storage gateway: typed access to the SQLite store, schema bootstrap,
//! whitelisted entity mutations, and DB-backed configuration.

pub mod entities;
pub mod error;
pub mod schema;
pub mod settings;
pub mod store;
pub mod tables;

pub use error::{Result, StoreError};
pub use settings::ConfigManager;
pub use store::{now_rfc3339, sql_param, Row, RowExt, Store};
pub use tables::EntityTable;
