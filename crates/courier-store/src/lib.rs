//! # courier-store
//!
//! Durable message log for the Courier relay, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for saving messages,
//! advancing their delivery status, and reading conversation history.
//! Async callers are expected to run these on a blocking thread.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
