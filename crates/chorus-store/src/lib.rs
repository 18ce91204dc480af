//! Chorus Store: SQLite persistence for chat sessions, prompts and
//! per-model responses.

pub mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::SqliteStore;
pub use types::*;
