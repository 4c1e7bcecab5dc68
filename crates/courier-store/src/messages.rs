use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageId, MessageStatus, MessageWithUsers, NewMessage, UserId};

impl Database {
    /// Append a message and return it with its assigned id and timestamp.
    pub fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        let created_at = Utc::now().trunc_subsecs(6);
        self.conn().execute(
            "INSERT INTO messages (sender_id, receiver_id, content, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.sender_id.as_str(),
                message.receiver_id.as_str(),
                message.content,
                message.status.as_str(),
                format_ts(&created_at),
            ],
        )?;

        Ok(Message {
            id: self.conn().last_insert_rowid(),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            content: message.content.clone(),
            status: message.status,
            created_at,
        })
    }

    pub fn update_message_status(&self, id: MessageId, status: MessageStatus) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Conversation between two users in both directions, oldest first.
    pub fn get_messages_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, content, status, created_at
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Like [`get_messages_between`](Self::get_messages_between), with each
    /// participant's directory name and email.
    pub fn get_messages_between_with_users(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Vec<MessageWithUsers>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id, m.sender_id, m.receiver_id, m.content, m.status, m.created_at,
                    COALESCE(s.name, ''), COALESCE(s.email, ''),
                    COALESCE(r.name, ''), COALESCE(r.email, '')
             FROM messages m
             LEFT JOIN users s ON s.id = m.sender_id
             LEFT JOIN users r ON r.id = m.receiver_id
             WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                OR (m.sender_id = ?2 AND m.receiver_id = ?1)
             ORDER BY m.created_at ASC, m.id ASC",
        )?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str()], |row| {
            Ok(MessageWithUsers {
                message: row_to_message(row)?,
                sender_name: row.get(6)?,
                sender_email: row.get(7)?,
                receiver_name: row.get(8)?,
                receiver_email: row.get(9)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

// Fixed-width so lexical order in SQLite matches time order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let status_str: String = row.get(4)?;
    let ts_str: String = row.get(5)?;

    let status = status_str.parse::<MessageStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: row.get(0)?,
        sender_id: UserId(row.get(1)?),
        receiver_id: UserId(row.get(2)?),
        content: row.get(3)?,
        status,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(from: &str, to: &str, content: &str) -> NewMessage {
        NewMessage {
            sender_id: UserId::from(from),
            receiver_id: UserId::from(to),
            content: content.to_string(),
            status: MessageStatus::Sent,
        }
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let db = Database::open_in_memory().unwrap();
        let first = db.insert_message(&new_message("A", "B", "one")).unwrap();
        let second = db.insert_message(&new_message("A", "B", "two")).unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.status, MessageStatus::Sent);

        let stored = db
            .get_messages_between(&UserId::from("A"), &UserId::from("B"))
            .unwrap();
        assert_eq!(stored[0].id, first.id);
        assert_eq!(stored[0].content, "one");
        assert_eq!(stored[0].sender_id, UserId::from("A"));
    }

    #[test]
    fn status_update_persists() {
        let db = Database::open_in_memory().unwrap();
        let msg = db.insert_message(&new_message("A", "B", "hi")).unwrap();

        db.update_message_status(msg.id, MessageStatus::Delivered)
            .unwrap();

        let stored = db
            .get_messages_between(&UserId::from("A"), &UserId::from("B"))
            .unwrap();
        assert_eq!(stored[0].status, MessageStatus::Delivered);
    }

    #[test]
    fn status_update_on_missing_row_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .update_message_status(999, MessageStatus::Delivered)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn history_covers_both_directions_in_order() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&new_message("A", "B", "1")).unwrap();
        db.insert_message(&new_message("B", "A", "2")).unwrap();
        db.insert_message(&new_message("A", "C", "other")).unwrap();
        db.insert_message(&new_message("A", "B", "3")).unwrap();

        let history = db
            .get_messages_between(&UserId::from("B"), &UserId::from("A"))
            .unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["1", "2", "3"]);
    }

    #[test]
    fn messages_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");

        let id = {
            let db = Database::open_at(&path).unwrap();
            db.insert_message(&new_message("A", "B", "durable"))
                .unwrap()
                .id
        };

        let db = Database::open_at(&path).unwrap();
        let stored = db
            .get_messages_between(&UserId::from("A"), &UserId::from("B"))
            .unwrap();
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].content, "durable");
    }

    #[test]
    fn history_with_users_fills_known_names() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(&crate::models::User {
            id: UserId::from("A"),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role: "member".to_string(),
        })
        .unwrap();
        let sent = db.insert_message(&new_message("A", "B", "hi")).unwrap();

        let history = db
            .get_messages_between_with_users(&UserId::from("B"), &UserId::from("A"))
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, sent);
        assert_eq!(history[0].sender_name, "Ada");
        assert_eq!(history[0].sender_email, "ada@example.com");
        // B never connected, so it has no directory entry.
        assert_eq!(history[0].receiver_name, "");
    }
}
