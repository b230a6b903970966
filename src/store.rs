use crate::{
    chat::{Message, MessageView, UserId},
    entity::{ExternalIdentity, Presence, PresenceRecord, User},
    error::StoreError,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, Row, SqlitePool};
use std::{path::Path, str::FromStr};

/// Durable, append-only message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(
        &self,
        sender: UserId,
        recipient: UserId,
        text: &str,
    ) -> Result<Message, StoreError>;

    /// Every message exchanged between `a` and `b`, oldest first.
    async fn history(&self, a: UserId, b: UserId) -> Result<Vec<MessageView>, StoreError>;
}

/// Read side of the user directory that the router depends on.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_name(&self, user: UserId) -> Result<String, StoreError>;

    async fn presence_record(&self, user: UserId) -> Result<PresenceRecord, StoreError>;
}

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_name TEXT NOT NULL UNIQUE,
                telegram_id INTEGER NOT NULL DEFAULT 0,
                presence INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id INTEGER NOT NULL,
                recipient_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                sent_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, recipient_id, id);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Register a participant. New users start with no external identity
    /// unless one is given, and are not live until they log in.
    pub async fn create_user(
        &self,
        user_name: &str,
        external_identity: Option<ExternalIdentity>,
    ) -> Result<User, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (user_name, telegram_id, presence)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(user_name)
        .bind(external_identity.map_or(0, |identity| identity.0))
        .bind(Presence::NotLive.as_flag())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::UserNameTaken(user_name.to_string())
            }
            other => StoreError::Database(other),
        })?;

        Ok(User {
            id: UserId(result.last_insert_rowid()),
            user_name: user_name.to_string(),
            external_identity,
            presence: Presence::NotLive,
        })
    }

    pub async fn get_user(&self, user: UserId) -> Result<User, StoreError> {
        let row = sqlx::query("SELECT id, user_name, telegram_id, presence FROM users WHERE id = ?")
            .bind(user.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::UnknownUser(user))?;

        user_from_row(&row)
    }

    /// Login/logout hook: the only writer of the presence flag.
    pub async fn set_presence(&self, user: UserId, presence: Presence) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET presence = ? WHERE id = ?")
            .bind(presence.as_flag())
            .bind(user.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownUser(user));
        }
        Ok(())
    }

    /// Link the fallback channel. `None` stores zero, which unlinks it.
    pub async fn set_external_identity(
        &self,
        user: UserId,
        identity: Option<ExternalIdentity>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET telegram_id = ? WHERE id = ?")
            .bind(identity.map_or(0, |identity| identity.0))
            .bind(user.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownUser(user));
        }
        Ok(())
    }

    /// Users that `user` has sent to or received from, ordered by name.
    pub async fn conversation_partners(&self, user: UserId) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_name, telegram_id, presence
            FROM users
            WHERE id IN (
                SELECT recipient_id FROM messages WHERE sender_id = ?
                UNION
                SELECT sender_id FROM messages WHERE recipient_id = ?
            )
            ORDER BY user_name
            "#,
        )
        .bind(user.0)
        .bind(user.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    /// Everyone but `user`, for picking someone to start a conversation with.
    pub async fn users_except(&self, user: UserId) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_name, telegram_id, presence FROM users WHERE id != ? ORDER BY user_name",
        )
        .bind(user.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<User, StoreError> {
    let record = PresenceRecord::from_raw(row.try_get("telegram_id")?, row.try_get("presence")?);
    Ok(User {
        id: UserId(row.try_get("id")?),
        user_name: row.try_get("user_name")?,
        external_identity: record.external_identity,
        presence: record.presence,
    })
}

#[async_trait]
impl MessageStore for Store {
    async fn append(
        &self,
        sender: UserId,
        recipient: UserId,
        text: &str,
    ) -> Result<Message, StoreError> {
        let sent_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO messages (sender_id, recipient_id, content, sent_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(sender.0)
        .bind(recipient.0)
        .bind(text)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id: result.last_insert_rowid(),
            sender_id: sender,
            recipient_id: recipient,
            text: text.to_string(),
            sent_at,
        })
    }

    async fn history(&self, a: UserId, b: UserId) -> Result<Vec<MessageView>, StoreError> {
        // Row ids follow insertion order, which is send order.
        let rows = sqlx::query(
            r#"
            SELECT m.content, m.sent_at, COALESCE(u.user_name, 'unknown') AS sender_name
            FROM messages m
            LEFT JOIN users u ON u.id = m.sender_id
            WHERE (m.sender_id = ? AND m.recipient_id = ?)
               OR (m.sender_id = ? AND m.recipient_id = ?)
            ORDER BY m.id ASC
            "#,
        )
        .bind(a.0)
        .bind(b.0)
        .bind(b.0)
        .bind(a.0)
        .fetch_all(&self.pool)
        .await?;

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let sent_at: DateTime<Utc> = row.try_get("sent_at")?;
            views.push(MessageView::at(
                row.try_get::<String, _>("content")?,
                row.try_get::<String, _>("sender_name")?,
                sent_at,
            ));
        }

        Ok(views)
    }
}

#[async_trait]
impl UserDirectory for Store {
    async fn display_name(&self, user: UserId) -> Result<String, StoreError> {
        let name: Option<String> = sqlx::query_scalar("SELECT user_name FROM users WHERE id = ?")
            .bind(user.0)
            .fetch_optional(&self.pool)
            .await?;

        name.ok_or(StoreError::UnknownUser(user))
    }

    async fn presence_record(&self, user: UserId) -> Result<PresenceRecord, StoreError> {
        let row = sqlx::query("SELECT telegram_id, presence FROM users WHERE id = ?")
            .bind(user.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::UnknownUser(user))?;

        Ok(PresenceRecord::from_raw(
            row.try_get("telegram_id")?,
            row.try_get("presence")?,
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn test_store() -> Store {
        // The directory outlives the returned store; it is never cleaned up.
        let dir = tempfile::tempdir().unwrap().into_path();
        let db_path = dir.join("test.db");
        let store = Store::new(&db_path).await.unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let store = test_store().await;
        store.init().await.unwrap();
    }

    #[tokio::test]
    async fn create_and_fetch_user() {
        let store = test_store().await;
        let alice = store.create_user("alice", None).await.unwrap();
        let bob = store
            .create_user("bob", Some(ExternalIdentity(555)))
            .await
            .unwrap();

        assert_ne!(alice.id, bob.id);
        assert_eq!(store.get_user(bob.id).await.unwrap(), bob);
        assert_eq!(store.display_name(alice.id).await.unwrap(), "alice");

        let record = store.presence_record(bob.id).await.unwrap();
        assert_eq!(record.external_identity, Some(ExternalIdentity(555)));
        assert_eq!(record.presence, Presence::NotLive);
    }

    #[tokio::test]
    async fn duplicate_user_name_is_rejected() {
        let store = test_store().await;
        store.create_user("alice", None).await.unwrap();
        let err = store.create_user("alice", None).await.unwrap_err();
        assert!(matches!(err, StoreError::UserNameTaken(name) if name == "alice"));
    }

    #[tokio::test]
    async fn unknown_user_lookups_fail() {
        let store = test_store().await;
        let missing = UserId(42);
        assert!(matches!(
            store.display_name(missing).await,
            Err(StoreError::UnknownUser(id)) if id == missing
        ));
        assert!(matches!(
            store.presence_record(missing).await,
            Err(StoreError::UnknownUser(_))
        ));
        assert!(matches!(
            store.set_presence(missing, Presence::Live).await,
            Err(StoreError::UnknownUser(_))
        ));
        assert!(matches!(
            store.set_external_identity(missing, None).await,
            Err(StoreError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn presence_and_identity_updates() {
        let store = test_store().await;
        let alice = store.create_user("alice", None).await.unwrap();

        store.set_presence(alice.id, Presence::Live).await.unwrap();
        store
            .set_external_identity(alice.id, Some(ExternalIdentity(99)))
            .await
            .unwrap();
        let record = store.presence_record(alice.id).await.unwrap();
        assert_eq!(record.presence, Presence::Live);
        assert_eq!(record.external_identity, Some(ExternalIdentity(99)));

        store.set_presence(alice.id, Presence::NotLive).await.unwrap();
        store.set_external_identity(alice.id, None).await.unwrap();
        let record = store.presence_record(alice.id).await.unwrap();
        assert_eq!(record, PresenceRecord::from_raw(0, 0));
    }

    #[tokio::test]
    async fn history_is_chronological_and_symmetric() {
        let store = test_store().await;
        let alice = store.create_user("alice", None).await.unwrap();
        let bob = store.create_user("bob", None).await.unwrap();
        let carol = store.create_user("carol", None).await.unwrap();

        let first = store.append(alice.id, bob.id, "hi").await.unwrap();
        store.append(bob.id, alice.id, "hello").await.unwrap();
        store.append(alice.id, carol.id, "elsewhere").await.unwrap();
        store.append(alice.id, bob.id, "how are you").await.unwrap();

        assert_eq!(first.sender_id, alice.id);
        assert_eq!(first.text, "hi");

        let forward = store.history(alice.id, bob.id).await.unwrap();
        let backward = store.history(bob.id, alice.id).await.unwrap();
        assert_eq!(forward, backward);

        let texts: Vec<_> = forward.iter().map(|v| (v.text(), v.sender_name())).collect();
        assert_eq!(
            texts,
            vec![("hi", "alice"), ("hello", "bob"), ("how are you", "alice")]
        );
        assert_eq!(forward[0].time(), crate::chat::clock_stamp(first.sent_at));
    }

    #[tokio::test]
    async fn conversation_partners_lists_both_directions() {
        let store = test_store().await;
        let alice = store.create_user("alice", None).await.unwrap();
        let bob = store.create_user("bob", None).await.unwrap();
        let carol = store.create_user("carol", None).await.unwrap();
        store.create_user("dave", None).await.unwrap();

        store.append(alice.id, bob.id, "hi").await.unwrap();
        store.append(bob.id, alice.id, "hi back").await.unwrap();
        store.append(carol.id, alice.id, "hey").await.unwrap();

        let partners: Vec<_> = store
            .conversation_partners(alice.id)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.user_name)
            .collect();
        assert_eq!(partners, vec!["bob", "carol"]);
    }

    #[tokio::test]
    async fn users_except_leaves_out_only_the_caller() {
        let store = test_store().await;
        let carol = store.create_user("carol", None).await.unwrap();
        let alice = store.create_user("alice", None).await.unwrap();
        store.create_user("bob", Some(ExternalIdentity(7))).await.unwrap();

        let names: Vec<_> = store
            .users_except(carol.id)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.user_name)
            .collect();
        assert_eq!(names, vec!["alice", "bob"]);

        let others = store.users_except(alice.id).await.unwrap();
        assert!(others.iter().all(|u| u.id != alice.id));
        assert_eq!(others.len(), 2);

        // Nobody to exclude still lists everyone.
        assert_eq!(store.users_except(UserId(404)).await.unwrap().len(), 3);
    }
}
