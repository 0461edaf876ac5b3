//! Durable state.

mod sqlite;

pub use sqlite::SqliteStateStore;
