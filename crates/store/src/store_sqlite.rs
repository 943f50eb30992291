//! SQLite-backed store using sqlx.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    courier_common::types::ConversationPolicy,
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tracing::warn,
};

use crate::{
    Error, Result,
    error::Context,
    store::{ConversationStore, EventStore},
    types::{Conversation, ConversationMeta, Event, UpsertOutcome},
};

/// SQLite-backed persistence for events and conversations.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with its own connection pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    conversation_id: String,
    sender_id: String,
    sender_display_name: String,
    body: String,
    timestamp: i64,
    is_self_authored: bool,
    attachment_ref: Option<String>,
    media_path: Option<String>,
}

impl From<EventRow> for Event {
    fn from(r: EventRow) -> Self {
        Self {
            id: r.id,
            conversation_id: r.conversation_id,
            sender_id: r.sender_id,
            sender_display_name: r.sender_display_name,
            body: r.body,
            timestamp: r.timestamp,
            is_self_authored: r.is_self_authored,
            attachment_ref: r.attachment_ref,
            media_path: r.media_path.map(PathBuf::from),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    conversation_id: String,
    registered: bool,
    name: Option<String>,
    is_group: bool,
    cursor_timestamp: i64,
    policy: String,
    created_at: i64,
    last_seen_at: i64,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = Error;

    fn try_from(r: ConversationRow) -> Result<Self> {
        let policy: ConversationPolicy = serde_json::from_str(&r.policy)
            .with_context(|| format!("invalid policy stored for {}", r.conversation_id))?;
        Ok(Self {
            conversation_id: r.conversation_id,
            registered: r.registered,
            name: r.name,
            is_group: r.is_group,
            cursor_timestamp: r.cursor_timestamp,
            policy,
            created_at: r.created_at,
            last_seen_at: r.last_seen_at,
        })
    }
}

const CONVERSATION_COLUMNS: &str = "conversation_id, registered, name, is_group, \
                                    cursor_timestamp, policy, created_at, last_seen_at";

#[async_trait]
impl EventStore for SqliteStore {
    async fn upsert_event(&self, event: &Event) -> Result<UpsertOutcome> {
        let media_path = event
            .media_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        let result = sqlx::query(
            "INSERT INTO events
             (conversation_id, id, sender_id, sender_display_name, body,
              timestamp, is_self_authored, attachment_ref, media_path)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(conversation_id, id) DO NOTHING",
        )
        .bind(&event.conversation_id)
        .bind(&event.id)
        .bind(&event.sender_id)
        .bind(&event.sender_display_name)
        .bind(&event.body)
        .bind(event.timestamp)
        .bind(event.is_self_authored)
        .bind(&event.attachment_ref)
        .bind(media_path)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            UpsertOutcome::DuplicateIgnored
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn events_since(&self, conversation_id: &str, since: i64) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, conversation_id, sender_id, sender_display_name, body,
                    timestamp, is_self_authored, attachment_ref, media_path
             FROM events
             WHERE conversation_id = ? AND timestamp > ?
             ORDER BY timestamp ASC, seq ASC",
        )
        .bind(conversation_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn attach_media_path(
        &self,
        conversation_id: &str,
        event_id: &str,
        path: &Path,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE events SET media_path = ? WHERE conversation_id = ? AND id = ?")
                .bind(path.to_string_lossy().into_owned())
                .bind(conversation_id)
                .bind(event_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::event_not_found(conversation_id, event_id));
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn observe(
        &self,
        conversation_id: &str,
        meta: &ConversationMeta,
        seen_at: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations
             (conversation_id, name, is_group, created_at, last_seen_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(conversation_id) DO UPDATE SET
                name = COALESCE(excluded.name, conversations.name),
                is_group = excluded.is_group,
                last_seen_at = MAX(conversations.last_seen_at, excluded.last_seen_at)",
        )
        .bind(conversation_id)
        .bind(&meta.name)
        .bind(meta.is_group)
        .bind(seen_at)
        .bind(seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn register(
        &self,
        conversation_id: &str,
        name: Option<&str>,
        policy: &ConversationPolicy,
    ) -> Result<()> {
        let policy = serde_json::to_string(policy)?;
        let now = courier_common::time::now_ms();
        sqlx::query(
            "INSERT INTO conversations
             (conversation_id, registered, name, policy, created_at, last_seen_at)
             VALUES (?, 1, ?, ?, ?, ?)
             ON CONFLICT(conversation_id) DO UPDATE SET
                registered = 1,
                name = COALESCE(excluded.name, conversations.name),
                policy = excluded.policy",
        )
        .bind(conversation_id)
        .bind(name)
        .bind(&policy)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deregister(&self, conversation_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE conversations SET registered = 0 WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_registered(&self, conversation_id: &str) -> Result<bool> {
        let registered = sqlx::query_scalar::<_, bool>(
            "SELECT registered FROM conversations WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(registered.unwrap_or(false))
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE conversation_id = ?"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Conversation::try_from).transpose()
    }

    async fn list_conversations(&self, registered_only: bool) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE registered = 1 OR ? = 0
             ORDER BY conversation_id"
        ))
        .bind(registered_only)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Conversation::try_from).collect()
    }

    async fn cursor(&self, conversation_id: &str) -> Result<i64> {
        let cursor = sqlx::query_scalar::<_, i64>(
            "SELECT cursor_timestamp FROM conversations WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cursor.unwrap_or(0))
    }

    async fn advance_cursor(&self, conversation_id: &str, new_ts: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE conversations SET cursor_timestamp = ?
             WHERE conversation_id = ? AND cursor_timestamp <= ?",
        )
        .bind(new_ts)
        .bind(conversation_id)
        .bind(new_ts)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current = sqlx::query_scalar::<_, i64>(
            "SELECT cursor_timestamp FROM conversations WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        match current {
            None => Err(Error::conversation_not_found(conversation_id)),
            Some(current) => {
                warn!(conversation_id, current, requested = new_ts, "rejected stale cursor");
                Err(Error::StaleCursor {
                    conversation_id: conversation_id.to_string(),
                    current,
                    requested: new_ts,
                })
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn make_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn make_event(id: &str, ts: i64) -> Event {
        Event {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: "u1".into(),
            sender_display_name: "Alice".into(),
            body: format!("body {id}"),
            timestamp: ts,
            is_self_authored: false,
            attachment_ref: None,
            media_path: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = make_store().await;
        let event = make_event("e1", 100);
        assert_eq!(
            store.upsert_event(&event).await.unwrap(),
            UpsertOutcome::Inserted
        );

        let mut replay = event.clone();
        replay.body = "changed".into();
        assert_eq!(
            store.upsert_event(&replay).await.unwrap(),
            UpsertOutcome::DuplicateIgnored
        );

        let events = store.events_since("c1", 0).await.unwrap();
        assert_eq!(events, vec![event]);
    }

    #[tokio::test]
    async fn same_id_in_other_conversation_is_distinct() {
        let store = make_store().await;
        store.upsert_event(&make_event("e1", 100)).await.unwrap();
        let mut other = make_event("e1", 100);
        other.conversation_id = "c2".into();
        assert_eq!(
            store.upsert_event(&other).await.unwrap(),
            UpsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn events_since_orders_by_timestamp_then_insertion() {
        let store = make_store().await;
        store.upsert_event(&make_event("late", 300)).await.unwrap();
        store.upsert_event(&make_event("tie-b", 200)).await.unwrap();
        store.upsert_event(&make_event("tie-a", 200)).await.unwrap();
        store.upsert_event(&make_event("early", 100)).await.unwrap();

        let ids: Vec<_> = store
            .events_since("c1", 100)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, ["tie-b", "tie-a", "late"]);
    }

    #[tokio::test]
    async fn cursor_is_monotonic() {
        let store = make_store().await;
        store
            .observe("c1", &ConversationMeta::default(), 1)
            .await
            .unwrap();
        assert_eq!(store.cursor("c1").await.unwrap(), 0);

        store.advance_cursor("c1", 500).await.unwrap();
        store.advance_cursor("c1", 500).await.unwrap();
        assert_eq!(store.cursor("c1").await.unwrap(), 500);

        let err = store.advance_cursor("c1", 400).await.unwrap_err();
        assert!(matches!(
            err,
            Error::StaleCursor {
                current: 500,
                requested: 400,
                ..
            }
        ));
        assert_eq!(store.cursor("c1").await.unwrap(), 500);
    }

    #[tokio::test]
    async fn cursor_of_unknown_conversation() {
        let store = make_store().await;
        assert_eq!(store.cursor("nope").await.unwrap(), 0);
        assert!(matches!(
            store.advance_cursor("nope", 1).await,
            Err(Error::ConversationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn attach_media_path_updates_event() {
        let store = make_store().await;
        let mut event = make_event("e1", 100);
        event.attachment_ref = Some("ref-1".into());
        store.upsert_event(&event).await.unwrap();

        store
            .attach_media_path("c1", "e1", Path::new("/tmp/media/e1.jpg"))
            .await
            .unwrap();
        let stored = store.events_since("c1", 0).await.unwrap();
        assert_eq!(
            stored[0].media_path.as_deref(),
            Some(Path::new("/tmp/media/e1.jpg"))
        );

        assert!(matches!(
            store.attach_media_path("c1", "missing", Path::new("/x")).await,
            Err(Error::EventNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn corrupt_policy_names_the_conversation() {
        let store = make_store().await;
        sqlx::query(
            "INSERT INTO conversations (conversation_id, registered, policy, created_at, last_seen_at)
             VALUES ('c9', 1, 'not json', 0, 0)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        match store.get_conversation("c9").await {
            Err(Error::Message { message }) => {
                assert!(message.starts_with("invalid policy stored for c9: "), "{message}");
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn observe_then_register_and_deregister() {
        let store = make_store().await;
        let meta = ConversationMeta {
            name: Some("Family".into()),
            is_group: true,
        };
        store.observe("g1", &meta, 10).await.unwrap();
        assert!(!store.is_registered("g1").await.unwrap());

        let policy = ConversationPolicy {
            requires_trigger: true,
            ..Default::default()
        };
        store.register("g1", None, &policy).await.unwrap();
        assert!(store.is_registered("g1").await.unwrap());

        let conv = store.get_conversation("g1").await.unwrap().unwrap();
        assert_eq!(conv.name.as_deref(), Some("Family"));
        assert!(conv.is_group);
        assert!(conv.policy.requires_trigger);
        assert_eq!(conv.last_seen_at, 10);

        store
            .observe("g1", &ConversationMeta::default(), 5)
            .await
            .unwrap();
        let conv = store.get_conversation("g1").await.unwrap().unwrap();
        assert_eq!(conv.name.as_deref(), Some("Family"));
        assert_eq!(conv.last_seen_at, 10);

        assert!(store.deregister("g1").await.unwrap());
        assert!(!store.deregister("unknown").await.unwrap());
        assert!(!store.is_registered("g1").await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_registered() {
        let store = make_store().await;
        store
            .observe("a", &ConversationMeta::default(), 1)
            .await
            .unwrap();
        store
            .register("b", Some("Bee"), &ConversationPolicy::default())
            .await
            .unwrap();

        assert_eq!(store.list_conversations(false).await.unwrap().len(), 2);
        let registered = store.list_conversations(true).await.unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].conversation_id, "b");
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("courier.db").display());

        {
            let store = SqliteStore::new(&url).await.unwrap();
            store
                .register("c1", None, &ConversationPolicy::default())
                .await
                .unwrap();
            store.upsert_event(&make_event("e1", 100)).await.unwrap();
            store.advance_cursor("c1", 100).await.unwrap();
            store.pool().close().await;
        }

        let store = SqliteStore::new(&url).await.unwrap();
        assert_eq!(store.cursor("c1").await.unwrap(), 100);
        assert!(store.events_since("c1", 100).await.unwrap().is_empty());
        assert_eq!(store.events_since("c1", 0).await.unwrap().len(), 1);
    }
}
