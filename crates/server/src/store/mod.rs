//! Persisted Store: the relational collaborator of the fan-out core.
//!
//! SQLite via sqlx. The core calls this once per operation and never
//! retries; a failed call surfaces as `StoreUnavailable` while in-memory
//! fan-out proceeds best-effort.

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{Message, MessageDraft, PrivateMessage, ReactionSummary};
use crate::session::{RoomId, UserId};

const DEFAULT_PROFILE_PIC: &str = "default_profile.png";

/// A user row as the auth layer needs it.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub profile_picture_url: Option<String>,
}

pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    pub async fn new(db_path: &Path) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .context("invalid sqlite path")?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let store = Self { pool };
        store.init_db().await?;
        info!("[Store] Initialized at {:?}", db_path);
        Ok(store)
    }

    async fn init_db(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                profile_picture_url TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                created_by INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (created_by) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS room_members (
                room_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                joined_at TEXT NOT NULL,
                UNIQUE(room_id, user_id),
                FOREIGN KEY (room_id) REFERENCES rooms(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id INTEGER NOT NULL,
                sender_id INTEGER NOT NULL,
                content TEXT,
                media_url TEXT,
                file_type TEXT,
                voice_message_url TEXT,
                parent_message_id INTEGER,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (room_id) REFERENCES rooms(id),
                FOREIGN KEY (sender_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS private_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id INTEGER NOT NULL,
                receiver_id INTEGER NOT NULL,
                content TEXT,
                media_url TEXT,
                file_type TEXT,
                voice_message_url TEXT,
                parent_message_id INTEGER,
                is_read INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (sender_id) REFERENCES users(id),
                FOREIGN KEY (receiver_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                message_id INTEGER,
                private_message_id INTEGER,
                emoji TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_activity (
                user_id INTEGER PRIMARY KEY,
                last_active TEXT NOT NULL,
                is_online INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // --- users ---

    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<UserId> {
        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?, ?, ?)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, profile_picture_url FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| UserRecord {
            id: r.get("id"),
            username: r.get("username"),
            password_hash: r.get("password_hash"),
            profile_picture_url: r.get("profile_picture_url"),
        }))
    }

    /// Username and profile picture, with the default avatar applied.
    pub async fn user_display(&self, user_id: UserId) -> Result<(String, String)> {
        let row = sqlx::query("SELECT username, profile_picture_url FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        let username: String = row.get("username");
        let pic: Option<String> = row.get("profile_picture_url");
        Ok((username, pic.unwrap_or_else(|| DEFAULT_PROFILE_PIC.to_string())))
    }

    // --- rooms and membership ---

    pub async fn create_room(&self, name: &str, created_by: UserId) -> Result<RoomId> {
        let result =
            sqlx::query("INSERT INTO rooms (name, created_by, created_at) VALUES (?, ?, ?)")
                .bind(name)
                .bind(created_by)
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;
        let room_id = result.last_insert_rowid();
        self.join_room(room_id, created_by).await?;
        Ok(room_id)
    }

    pub async fn join_room(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?, ?, ?)",
        )
        .bind(room_id)
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Authorization source for subscribes; never re-checked per message.
    pub async fn is_room_member(&self, user_id: UserId, room_id: RoomId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM room_members WHERE room_id = ? AND user_id = ?")
            .bind(room_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    // --- messages ---

    pub async fn record_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        draft: &MessageDraft,
    ) -> Result<Message> {
        let timestamp = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO messages
                (room_id, sender_id, content, media_url, file_type, voice_message_url, parent_message_id, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(room_id)
        .bind(sender_id)
        .bind(&draft.content)
        .bind(&draft.media_url)
        .bind(&draft.file_type)
        .bind(&draft.voice_url)
        .bind(draft.parent_id)
        .bind(timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let (sender_username, sender_profile_pic) = self.user_display(sender_id).await?;
        Ok(Message {
            id: result.last_insert_rowid(),
            room_id,
            sender_id,
            content: draft.content.clone(),
            media_url: draft.media_url.clone(),
            file_type: draft.file_type.clone(),
            voice_message_url: draft.voice_url.clone(),
            parent_message_id: draft.parent_id,
            timestamp,
            sender_username,
            sender_profile_pic,
            reactions: Vec::new(),
        })
    }

    pub async fn record_private_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        draft: &MessageDraft,
    ) -> Result<PrivateMessage> {
        let timestamp = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO private_messages
                (sender_id, receiver_id, content, media_url, file_type, voice_message_url, parent_message_id, is_read, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(&draft.content)
        .bind(&draft.media_url)
        .bind(&draft.file_type)
        .bind(&draft.voice_url)
        .bind(draft.parent_id)
        .bind(timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let (sender_username, sender_profile_pic) = self.user_display(sender_id).await?;
        Ok(PrivateMessage {
            id: result.last_insert_rowid(),
            sender_id,
            receiver_id,
            content: draft.content.clone(),
            media_url: draft.media_url.clone(),
            file_type: draft.file_type.clone(),
            voice_message_url: draft.voice_url.clone(),
            parent_message_id: draft.parent_id,
            timestamp,
            sender_username,
            sender_profile_pic,
            reactions: Vec::new(),
        })
    }

    pub async fn private_message_count(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM private_messages WHERE sender_id = ? AND receiver_id = ?",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("count"))
    }

    // --- reactions ---

    /// Insert-or-delete a (user, message, emoji) reaction, then return
    /// the message's grouped reaction summaries.
    pub async fn toggle_reaction(
        &self,
        user_id: UserId,
        message_id: i64,
        emoji: &str,
        is_private: bool,
    ) -> Result<Vec<ReactionSummary>> {
        let target_column = if is_private {
            "private_message_id"
        } else {
            "message_id"
        };

        let existing: Option<i64> = sqlx::query(&format!(
            "SELECT id FROM reactions WHERE user_id = ? AND {} = ? AND emoji = ?",
            target_column
        ))
        .bind(user_id)
        .bind(message_id)
        .bind(emoji)
        .fetch_optional(&self.pool)
        .await?
        .map(|r| r.get("id"));

        match existing {
            Some(id) => {
                sqlx::query("DELETE FROM reactions WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query(&format!(
                    "INSERT INTO reactions (user_id, {}, emoji) VALUES (?, ?, ?)",
                    target_column
                ))
                .bind(user_id)
                .bind(message_id)
                .bind(emoji)
                .execute(&self.pool)
                .await?;
            }
        }

        self.reactions_for(message_id, is_private).await
    }

    pub async fn reactions_for(
        &self,
        message_id: i64,
        is_private: bool,
    ) -> Result<Vec<ReactionSummary>> {
        let target_column = if is_private {
            "private_message_id"
        } else {
            "message_id"
        };
        let rows = sqlx::query(&format!(
            r#"
            SELECT r.emoji, GROUP_CONCAT(u.username) AS usernames, COUNT(*) AS count
            FROM reactions r
            JOIN users u ON r.user_id = u.id
            WHERE r.{} = ?
            GROUP BY r.emoji
            "#,
            target_column
        ))
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let usernames: String = r.get("usernames");
                ReactionSummary {
                    emoji: r.get("emoji"),
                    usernames: usernames.split(',').map(str::to_string).collect(),
                    count: r.get("count"),
                }
            })
            .collect())
    }

    // --- presence ---

    pub async fn set_presence(&self, user_id: UserId, is_online: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_activity (user_id, last_active, is_online)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                last_active = excluded.last_active,
                is_online = excluded.is_online
            "#,
        )
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .bind(is_online as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn presence_of(&self, user_id: UserId) -> Result<Option<(bool, DateTime<Utc>)>> {
        let row = sqlx::query("SELECT is_online, last_active FROM user_activity WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => {
                let is_online: i64 = r.get("is_online");
                let last_active: String = r.get("last_active");
                let at = DateTime::parse_from_rfc3339(&last_active)
                    .map_err(|e| Error::Internal(e.to_string()))?
                    .with_timezone(&Utc);
                Ok(Some((is_online != 0, at)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, ChatStore) {
        let dir = TempDir::new().unwrap();
        let store = ChatStore::new(&dir.path().join("chat.sqlite"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn membership_gates_subscription_checks() {
        let (_dir, store) = test_store().await;
        let alice = store.create_user("alice", "x").await.unwrap();
        let bob = store.create_user("bob", "x").await.unwrap();
        let room = store.create_room("general", alice).await.unwrap();

        assert!(store.is_room_member(alice, room).await.unwrap());
        assert!(!store.is_room_member(bob, room).await.unwrap());

        store.join_room(room, bob).await.unwrap();
        assert!(store.is_room_member(bob, room).await.unwrap());
    }

    #[tokio::test]
    async fn record_message_hydrates_sender() {
        let (_dir, store) = test_store().await;
        let alice = store.create_user("alice", "x").await.unwrap();
        let room = store.create_room("general", alice).await.unwrap();

        let draft = MessageDraft {
            content: Some("hi".into()),
            ..Default::default()
        };
        let msg = store.record_message(room, alice, &draft).await.unwrap();
        assert_eq!(msg.sender_username, "alice");
        assert_eq!(msg.sender_profile_pic, "default_profile.png");
        assert_eq!(msg.content.as_deref(), Some("hi"));
        assert!(msg.id > 0);
    }

    #[tokio::test]
    async fn reaction_toggle_inserts_then_removes() {
        let (_dir, store) = test_store().await;
        let alice = store.create_user("alice", "x").await.unwrap();
        let bob = store.create_user("bob", "x").await.unwrap();
        let room = store.create_room("general", alice).await.unwrap();
        let draft = MessageDraft {
            content: Some("hi".into()),
            ..Default::default()
        };
        let msg = store.record_message(room, alice, &draft).await.unwrap();

        let summaries = store
            .toggle_reaction(bob, msg.id, "👍", false)
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].count, 1);
        assert_eq!(summaries[0].usernames, vec!["bob".to_string()]);

        let summaries = store
            .toggle_reaction(alice, msg.id, "👍", false)
            .await
            .unwrap();
        assert_eq!(summaries[0].count, 2);

        // Same user, same emoji again: toggled off.
        let summaries = store
            .toggle_reaction(bob, msg.id, "👍", false)
            .await
            .unwrap();
        assert_eq!(summaries[0].count, 1);
        assert_eq!(summaries[0].usernames, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn presence_upsert_round_trips() {
        let (_dir, store) = test_store().await;
        let alice = store.create_user("alice", "x").await.unwrap();

        store.set_presence(alice, true).await.unwrap();
        let (online, _) = store.presence_of(alice).await.unwrap().unwrap();
        assert!(online);

        store.set_presence(alice, false).await.unwrap();
        let (online, _) = store.presence_of(alice).await.unwrap().unwrap();
        assert!(!online);
    }
}
