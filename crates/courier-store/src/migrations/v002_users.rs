//! v002 -- User directory.
//!
//! Display details for users, refreshed from their credentials each time
//! they connect. History and presence listings join against it.

use rusqlite::Connection;

/// SQL executed when upgrading from version 1 to version 2.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL DEFAULT '',
    email       TEXT NOT NULL DEFAULT '',
    role        TEXT NOT NULL DEFAULT '',
    updated_at  TEXT NOT NULL                   -- RFC-3339, UTC
);
"#;

/// Apply the user directory migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
