use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, params_from_iter};

use crate::database::Database;
use crate::error::Result;
use crate::models::{User, UserId};

impl Database {
    /// Insert or refresh a directory entry.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, email, role, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                role = excluded.role,
                updated_at = excluded.updated_at",
            params![
                user.id.as_str(),
                user.name,
                user.email,
                user.role,
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ],
        )?;
        Ok(())
    }

    /// Directory entries for `ids`. Unknown ids are absent from the map.
    pub fn get_users_by_ids(&self, ids: &[UserId]) -> Result<HashMap<UserId, User>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, name, email, role FROM users WHERE id IN ({placeholders})"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter().map(UserId::as_str)), |row| {
            Ok(User {
                id: UserId(row.get(0)?),
                name: row.get(1)?,
                email: row.get(2)?,
                role: row.get(3)?,
            })
        })?;

        let mut users = HashMap::new();
        for row in rows {
            let user = row?;
            users.insert(user.id.clone(), user);
        }
        Ok(users)
    }
}
