//! Persistence layer: libSQL-backed storage for contacts, routing cursors and conflicts.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ContactFilter, Database};
