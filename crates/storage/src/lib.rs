use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::sync::broadcast;
use tracing::debug;

use shared::domain::{ChannelName, MessageId, Timestamp, UserId};

/// Notifications a slow watcher may fall behind by before it observes a lag.
pub const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    changes: broadcast::Sender<ChannelName>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub user_id: UserId,
    pub email: String,
}

/// A message row as persisted. Fields are left loose on purpose: the client
/// adapter decides how blank senders or missing timestamps are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub channel: ChannelName,
    pub sender_id: Option<String>,
    pub body: String,
    pub created_at: Option<Timestamp>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run chat schema migrations")?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self { pool, changes })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Writes (or refreshes) the roster record for a user.
    pub async fn upsert_user(&self, user_id: &UserId, email: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, email) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET email=excluded.email",
        )
        .bind(user_id.as_str())
        .bind(email)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write user record {user_id}"))?;
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<StoredUser>> {
        let rows = sqlx::query("SELECT id, email FROM users ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .context("failed to read users collection")?;

        Ok(rows
            .into_iter()
            .map(|r| StoredUser {
                user_id: UserId(r.get::<String, _>(0)),
                email: r.get::<String, _>(1),
            })
            .collect())
    }

    /// Appends a message and lets the store assign its id and write time.
    ///
    /// The assigned time is `max(now, last assigned + 1)`, so times are strictly
    /// increasing across the whole store even if the wall clock steps back.
    pub async fn append_message(
        &self,
        channel: &ChannelName,
        sender_id: Option<&UserId>,
        body: &str,
    ) -> Result<(MessageId, Timestamp)> {
        let now = Timestamp::from_datetime(Utc::now());
        let rec = sqlx::query(
            "INSERT INTO messages (channel, sender_id, body, created_at)
             SELECT ?, ?, ?, MAX(?, COALESCE((SELECT MAX(created_at) FROM messages), 0) + 1)
             RETURNING id, created_at",
        )
        .bind(channel.as_str())
        .bind(sender_id.map(UserId::as_str))
        .bind(body)
        .bind(now.0)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to append message to channel {channel}"))?;

        let message_id = MessageId(rec.get::<i64, _>(0));
        let created_at = Timestamp(rec.get::<i64, _>(1));
        debug!(
            channel = %channel,
            message_id = message_id.0,
            created_at = created_at.0,
            "store: message appended"
        );
        self.notify_changed(channel);
        Ok((message_id, created_at))
    }

    /// Full message set of a channel, oldest first, ties broken by id.
    pub async fn list_channel_messages(&self, channel: &ChannelName) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, channel, sender_id, body, created_at
             FROM messages
             WHERE channel = ?
             ORDER BY created_at IS NULL, created_at ASC, id ASC",
        )
        .bind(channel.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to read messages for channel {channel}"))?;

        Ok(rows.into_iter().map(stored_message_from_row).collect())
    }

    /// Messages of a channel written after `after`, in the same order as
    /// [`Storage::list_channel_messages`].
    pub async fn list_channel_messages_after(
        &self,
        channel: &ChannelName,
        after: MessageId,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, channel, sender_id, body, created_at
             FROM messages
             WHERE channel = ? AND id > ?
             ORDER BY created_at IS NULL, created_at ASC, id ASC",
        )
        .bind(channel.as_str())
        .bind(after.0)
        .fetch_all(&self.pool)
        .await
        .with_context(|| {
            format!(
                "failed to read messages after {} for channel {channel}",
                after.0
            )
        })?;

        Ok(rows.into_iter().map(stored_message_from_row).collect())
    }

    /// Tells watchers that `channel` changed. Used after every append, and by
    /// writers that modify rows through [`Storage::pool`] directly.
    pub fn notify_changed(&self, channel: &ChannelName) {
        // Nobody listening is fine; the change is already committed.
        let _ = self.changes.send(channel.clone());
    }

    /// Receiver of change notifications; one item per committed append,
    /// naming the channel that changed.
    pub fn watch_changes(&self) -> broadcast::Receiver<ChannelName> {
        self.changes.subscribe()
    }
}

fn stored_message_from_row(r: SqliteRow) -> StoredMessage {
    StoredMessage {
        message_id: MessageId(r.get::<i64, _>(0)),
        channel: ChannelName(r.get::<String, _>(1)),
        sender_id: r.get::<Option<String>, _>(2),
        body: r.get::<String, _>(3),
        created_at: r.get::<Option<i64>, _>(4).map(Timestamp),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
