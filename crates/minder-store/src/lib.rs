//! # Minder Store
//!
//! SQLite-backed persistence — survives restarts, one file, no server.

pub mod sqlite;

pub use sqlite::SqliteStore;
