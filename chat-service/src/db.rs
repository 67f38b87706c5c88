//! Database operations for the conversation and messaging service

use crate::models::{
    Attachment, Conversation, Identity, LastMessage, Participant, StoredMessage,
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;
use vendora_core::Role;

/// Database wrapper with query methods
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // Identity & Session Operations
    //
    // The identities table is owned by the wider platform; the chat service
    // reads it for authentication, display names, and push tokens. Writes
    // exist here for test seeding and local development only.
    // ========================================================================

    /// Insert or replace an identity record
    pub async fn upsert_identity(&self, identity: &Identity) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO identities (id, role, display_name, language, push_token, is_active)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&identity.id)
        .bind(identity.role.as_str())
        .bind(&identity.display_name)
        .bind(&identity.language)
        .bind(&identity.push_token)
        .bind(identity.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get an identity by ID
    pub async fn get_identity(&self, identity_id: &str) -> anyhow::Result<Option<Identity>> {
        let row = sqlx::query("SELECT * FROM identities WHERE id = ?")
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| self.row_to_identity(&r)))
    }

    /// Issue a session credential for an identity
    pub async fn create_session(&self, identity_id: &str) -> anyhow::Result<String> {
        let token = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO sessions (token, identity_id, created_at) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(identity_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(token)
    }

    /// Resolve a session credential to its active underlying identity.
    ///
    /// Returns None when the session does not exist or the account is
    /// inactive; both cases are indistinguishable to the caller.
    pub async fn identity_for_session(&self, token: &str) -> anyhow::Result<Option<Identity>> {
        let row = sqlx::query(
            r#"
            SELECT i.* FROM sessions s
            INNER JOIN identities i ON i.id = s.identity_id
            WHERE s.token = ? AND i.is_active = 1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| self.row_to_identity(&r)))
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// Create a conversation for a user/vendor pair with both participant
    /// rows seeded at zero unread. Counters move only through messages.
    pub async fn create_conversation(
        &self,
        user_id: &str,
        vendor_id: &str,
    ) -> anyhow::Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let key = Conversation::key_for(vendor_id, user_id);
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO conversations
                (id, conversation_key, user_id, vendor_id, messages_count,
                 last_updated, created_at, is_blocked, is_reported)
            VALUES (?, ?, ?, ?, 0, ?, ?, 0, 0)
            "#,
        )
        .bind(&id)
        .bind(&key)
        .bind(user_id)
        .bind(vendor_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        for (identity_id, role) in [(user_id, Role::User), (vendor_id, Role::Vendor)] {
            sqlx::query(
                r#"
                INSERT INTO conversation_participants
                    (conversation_id, identity_id, role, entity_kind, unread_count)
                VALUES (?, ?, ?, ?, 0)
                "#,
            )
            .bind(&id)
            .bind(identity_id)
            .bind(role.as_str())
            .bind(role.entity_kind().as_str())
            .execute(&self.pool)
            .await?;
        }

        self.get_conversation(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("conversation vanished after insert"))
    }

    /// Get a conversation by primary ID
    pub async fn get_conversation(&self, id: &str) -> anyhow::Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(self.hydrate_conversation(&r).await?)),
            None => Ok(None),
        }
    }

    /// Get a conversation by its composite key
    pub async fn find_by_key(&self, key: &str) -> anyhow::Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE conversation_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(self.hydrate_conversation(&r).await?)),
            None => Ok(None),
        }
    }

    /// Most-recently-updated conversation for a pair, if any.
    /// Duplicates (legacy data) resolve to the freshest record.
    pub async fn find_by_pair(
        &self,
        user_id: &str,
        vendor_id: &str,
    ) -> anyhow::Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM conversations
            WHERE user_id = ? AND vendor_id = ?
            ORDER BY last_updated DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(vendor_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(self.hydrate_conversation(&r).await?)),
            None => Ok(None),
        }
    }

    /// All conversations where an identity participates with a role,
    /// sorted by last activity descending
    pub async fn list_conversations(
        &self,
        identity_id: &str,
        role: Role,
    ) -> anyhow::Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT c.* FROM conversations c
            INNER JOIN conversation_participants p ON p.conversation_id = c.id
            WHERE p.identity_id = ? AND p.role = ?
            ORDER BY c.last_updated DESC
            "#,
        )
        .bind(identity_id)
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in &rows {
            conversations.push(self.hydrate_conversation(row).await?);
        }
        Ok(conversations)
    }

    /// Check if an identity is a participant of a conversation (by key)
    pub async fn is_participant(&self, conversation_key: &str, identity_id: &str) -> anyhow::Result<bool> {
        let count: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM conversation_participants p
            INNER JOIN conversations c ON c.id = p.conversation_id
            WHERE c.conversation_key = ? AND p.identity_id = ?
            "#,
        )
        .bind(conversation_key)
        .bind(identity_id)
        .fetch_one(&self.pool)
        .await?
        .get("count");

        Ok(count > 0)
    }

    /// Apply a new message to the parent conversation summary: bump the
    /// denormalized last-message fields, the message counter, and the
    /// receiver's unread counter. Each statement is a single atomic
    /// increment, so concurrent sends never lose counter updates.
    pub async fn apply_message_to_summary(
        &self,
        conversation_key: &str,
        body: &str,
        sent_at: DateTime<Utc>,
        receiver_id: &str,
        receiver_role: Role,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_text = ?, last_message_at = ?,
                messages_count = messages_count + 1, last_updated = ?
            WHERE conversation_key = ?
            "#,
        )
        .bind(body)
        .bind(sent_at)
        .bind(sent_at)
        .bind(conversation_key)
        .execute(&self.pool)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE conversation_participants
            SET unread_count = unread_count + 1
            WHERE identity_id = ?
              AND conversation_id = (SELECT id FROM conversations WHERE conversation_key = ?)
            "#,
        )
        .bind(receiver_id)
        .bind(conversation_key)
        .execute(&self.pool)
        .await?;

        // Legacy conversations may miss a participant row; seed it at 1.
        if updated.rows_affected() == 0 {
            sqlx::query(
                r#"
                INSERT INTO conversation_participants
                    (conversation_id, identity_id, role, entity_kind, unread_count)
                SELECT id, ?, ?, ?, 1 FROM conversations WHERE conversation_key = ?
                "#,
            )
            .bind(receiver_id)
            .bind(receiver_role.as_str())
            .bind(receiver_role.entity_kind().as_str())
            .bind(conversation_key)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Zero an identity's unread counter. Idempotent.
    pub async fn reset_unread(&self, conversation_id: &str, identity_id: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE conversation_participants
            SET unread_count = 0
            WHERE conversation_id = ? AND identity_id = ?
            "#,
        )
        .bind(conversation_id)
        .bind(identity_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set the block fields on a conversation
    pub async fn set_blocked(
        &self,
        conversation_id: &str,
        actor_id: &str,
        actor_role: Role,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET is_blocked = 1, blocked_by = ?, blocked_by_role = ?, last_updated = ?
            WHERE id = ?
            "#,
        )
        .bind(actor_id)
        .bind(actor_role.as_str())
        .bind(Utc::now())
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Clear block and report state together. Reporting implies blocking,
    /// so unblocking must undo both in one statement.
    pub async fn clear_moderation(&self, conversation_id: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET is_blocked = 0, blocked_by = NULL, blocked_by_role = NULL,
                is_reported = 0, reported_by = NULL, reported_by_role = NULL,
                report_reason = NULL, last_updated = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set report fields and, in the same statement, the block fields
    pub async fn set_reported(
        &self,
        conversation_id: &str,
        actor_id: &str,
        actor_role: Role,
        reason: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET is_reported = 1, reported_by = ?, reported_by_role = ?, report_reason = ?,
                is_blocked = 1, blocked_by = ?, blocked_by_role = ?, last_updated = ?
            WHERE id = ?
            "#,
        )
        .bind(actor_id)
        .bind(actor_role.as_str())
        .bind(reason)
        .bind(actor_id)
        .bind(actor_role.as_str())
        .bind(Utc::now())
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Append a message to a conversation's log
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_message(
        &self,
        conversation_key: &str,
        sender_id: &str,
        sender_role: Role,
        receiver_id: &str,
        receiver_role: Role,
        body: &str,
        attachment: Option<&Attachment>,
    ) -> anyhow::Result<StoredMessage> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO messages
                (id, conversation_key, sender_id, sender_role, receiver_id, receiver_role,
                 body, attachment_url, attachment_type, attachment_name, attachment_size,
                 created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(conversation_key)
        .bind(sender_id)
        .bind(sender_role.as_str())
        .bind(receiver_id)
        .bind(receiver_role.as_str())
        .bind(body)
        .bind(attachment.map(|a| a.url.as_str()))
        .bind(attachment.map(|a| a.content_type.as_str()))
        .bind(attachment.map(|a| a.name.as_str()))
        .bind(attachment.map(|a| a.size))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(StoredMessage {
            id,
            conversation_key: conversation_key.to_string(),
            sender_id: sender_id.to_string(),
            sender_role,
            receiver_id: receiver_id.to_string(),
            receiver_role,
            body: body.to_string(),
            attachment: attachment.cloned(),
            is_read: false,
            created_at: now,
        })
    }

    /// Message history for one identity, excluding messages it soft-deleted.
    ///
    /// Fetches newest-first with an id tie-break for stable ordering, then
    /// reverses so callers receive chronological order.
    pub async fn history(
        &self,
        conversation_key: &str,
        identity_id: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT m.*,
                   EXISTS (
                       SELECT 1 FROM message_reads r
                       WHERE r.message_id = m.id AND r.identity_id = m.receiver_id
                   ) AS is_read
            FROM messages m
            WHERE m.conversation_key = ?
              AND NOT EXISTS (
                  SELECT 1 FROM message_deletions d
                  WHERE d.message_id = m.id AND d.identity_id = ?
              )
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(conversation_key)
        .bind(identity_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<StoredMessage> =
            rows.iter().map(|r| self.row_to_message(r)).collect();
        messages.reverse();
        Ok(messages)
    }

    /// Soft-delete every message in a conversation for one identity.
    /// The other participant's view is untouched.
    pub async fn soft_delete_all(
        &self,
        conversation_key: &str,
        identity_id: &str,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO message_deletions (message_id, identity_id)
            SELECT id, ? FROM messages WHERE conversation_key = ?
            "#,
        )
        .bind(identity_id)
        .bind(conversation_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Record a read marker on every message in a conversation for one identity
    pub async fn mark_messages_read(
        &self,
        conversation_key: &str,
        identity_id: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO message_reads (message_id, identity_id)
            SELECT id, ? FROM messages WHERE conversation_key = ?
            "#,
        )
        .bind(identity_id)
        .bind(conversation_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Check database health
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    async fn hydrate_conversation(
        &self,
        row: &sqlx::sqlite::SqliteRow,
    ) -> anyhow::Result<Conversation> {
        let id: String = row.get("id");
        let participants = self.participants(&id).await?;
        Ok(self.row_to_conversation(row, participants))
    }

    async fn participants(&self, conversation_id: &str) -> anyhow::Result<Vec<Participant>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM conversation_participants
            WHERE conversation_id = ?
            ORDER BY role ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let role = role_from_db(r.get("role"));
                Participant {
                    identity_id: r.get("identity_id"),
                    role,
                    entity_kind: role.entity_kind(),
                    unread_count: r.get("unread_count"),
                }
            })
            .collect())
    }

    fn row_to_conversation(
        &self,
        row: &sqlx::sqlite::SqliteRow,
        participants: Vec<Participant>,
    ) -> Conversation {
        let last_message_text: Option<String> = row.get("last_message_text");
        let last_message_at: Option<DateTime<Utc>> = row.get("last_message_at");
        let last_message = match (last_message_text, last_message_at) {
            (Some(text), Some(sent_at)) => Some(LastMessage { text, sent_at }),
            _ => None,
        };

        Conversation {
            id: row.get("id"),
            conversation_key: row.get("conversation_key"),
            user_id: row.get("user_id"),
            vendor_id: row.get("vendor_id"),
            last_message,
            messages_count: row.get("messages_count"),
            last_updated: row.get("last_updated"),
            created_at: row.get("created_at"),
            is_blocked: row.get("is_blocked"),
            blocked_by: row.get("blocked_by"),
            blocked_by_role: row
                .get::<Option<String>, _>("blocked_by_role")
                .map(|s| role_from_db(s)),
            is_reported: row.get("is_reported"),
            reported_by: row.get("reported_by"),
            reported_by_role: row
                .get::<Option<String>, _>("reported_by_role")
                .map(|s| role_from_db(s)),
            report_reason: row.get("report_reason"),
            participants,
        }
    }

    fn row_to_message(&self, row: &sqlx::sqlite::SqliteRow) -> StoredMessage {
        let attachment_url: Option<String> = row.get("attachment_url");
        let attachment = attachment_url.map(|url| Attachment {
            url,
            content_type: row.get::<Option<String>, _>("attachment_type").unwrap_or_default(),
            name: row.get::<Option<String>, _>("attachment_name").unwrap_or_default(),
            size: row.get::<Option<i64>, _>("attachment_size").unwrap_or(0),
        });

        StoredMessage {
            id: row.get("id"),
            conversation_key: row.get("conversation_key"),
            sender_id: row.get("sender_id"),
            sender_role: role_from_db(row.get("sender_role")),
            receiver_id: row.get("receiver_id"),
            receiver_role: role_from_db(row.get("receiver_role")),
            body: row.get("body"),
            attachment,
            is_read: row.get("is_read"),
            created_at: row.get("created_at"),
        }
    }

    fn row_to_identity(&self, row: &sqlx::sqlite::SqliteRow) -> Identity {
        Identity {
            id: row.get("id"),
            role: role_from_db(row.get("role")),
            display_name: row.get("display_name"),
            language: row.get("language"),
            push_token: row.get("push_token"),
            is_active: row.get("is_active"),
        }
    }
}

// Stored roles were validated on the way in; unknown values only appear in
// hand-edited data and fall back to the user side.
fn role_from_db(s: String) -> Role {
    Role::parse(&s).unwrap_or(Role::User)
}

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identities (
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            display_name TEXT NOT NULL,
            language TEXT NOT NULL DEFAULT 'en',
            push_token TEXT,
            is_active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            identity_id TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (identity_id) REFERENCES identities(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            conversation_key TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            vendor_id TEXT NOT NULL,
            last_message_text TEXT,
            last_message_at DATETIME,
            messages_count INTEGER NOT NULL DEFAULT 0,
            last_updated DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            is_blocked INTEGER NOT NULL DEFAULT 0,
            blocked_by TEXT,
            blocked_by_role TEXT,
            is_reported INTEGER NOT NULL DEFAULT 0,
            reported_by TEXT,
            reported_by_role TEXT,
            report_reason TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_participants (
            conversation_id TEXT NOT NULL,
            identity_id TEXT NOT NULL,
            role TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            unread_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (conversation_id, identity_id),
            FOREIGN KEY (conversation_id) REFERENCES conversations(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_key TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            sender_role TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            receiver_role TEXT NOT NULL,
            body TEXT NOT NULL,
            attachment_url TEXT,
            attachment_type TEXT,
            attachment_name TEXT,
            attachment_size INTEGER,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_deletions (
            message_id TEXT NOT NULL,
            identity_id TEXT NOT NULL,
            PRIMARY KEY (message_id, identity_id),
            FOREIGN KEY (message_id) REFERENCES messages(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_reads (
            message_id TEXT NOT NULL,
            identity_id TEXT NOT NULL,
            PRIMARY KEY (message_id, identity_id),
            FOREIGN KEY (message_id) REFERENCES messages(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_key)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_participants_identity ON conversation_participants(identity_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_pair ON conversations(user_id, vendor_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Database {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        run_migrations(&pool).await.unwrap();
        Database::new(pool)
    }

    fn identity(id: &str, role: Role) -> Identity {
        Identity {
            id: id.to_string(),
            role,
            display_name: id.to_uppercase(),
            language: "en".to_string(),
            push_token: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_session_resolution() {
        let db = setup_test_db().await;
        db.upsert_identity(&identity("u1", Role::User)).await.unwrap();

        let token = db.create_session("u1").await.unwrap();
        let resolved = db.identity_for_session(&token).await.unwrap().unwrap();
        assert_eq!(resolved.id, "u1");
        assert_eq!(resolved.role, Role::User);

        assert!(db.identity_for_session("no-such-token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_identity_session_rejected() {
        let db = setup_test_db().await;
        let mut vendor = identity("v1", Role::Vendor);
        vendor.is_active = false;
        db.upsert_identity(&vendor).await.unwrap();

        let token = db.create_session("v1").await.unwrap();
        assert!(db.identity_for_session(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_conversation_seeds_two_participants() {
        let db = setup_test_db().await;
        let conversation = db.create_conversation("u1", "v1").await.unwrap();

        assert_eq!(conversation.conversation_key, "v1_u1");
        assert_eq!(conversation.participants.len(), 2);
        assert_eq!(conversation.unread_for("u1"), 0);
        assert_eq!(conversation.unread_for("v1"), 0);
        assert_eq!(conversation.messages_count, 0);
        assert!(!conversation.is_blocked);
    }

    #[tokio::test]
    async fn test_summary_update_increments_counters() {
        let db = setup_test_db().await;
        let conversation = db.create_conversation("u1", "v1").await.unwrap();

        let msg = db
            .insert_message("v1_u1", "u1", Role::User, "v1", Role::Vendor, "hello", None)
            .await
            .unwrap();
        db.apply_message_to_summary("v1_u1", &msg.body, msg.created_at, "v1", Role::Vendor)
            .await
            .unwrap();

        let updated = db.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert_eq!(updated.messages_count, 1);
        assert_eq!(updated.unread_for("v1"), 1);
        assert_eq!(updated.unread_for("u1"), 0);
        assert_eq!(updated.last_message.unwrap().text, "hello");
    }

    #[tokio::test]
    async fn test_reset_unread_is_idempotent() {
        let db = setup_test_db().await;
        let conversation = db.create_conversation("u1", "v1").await.unwrap();

        let msg = db
            .insert_message("v1_u1", "u1", Role::User, "v1", Role::Vendor, "hi", None)
            .await
            .unwrap();
        db.apply_message_to_summary("v1_u1", &msg.body, msg.created_at, "v1", Role::Vendor)
            .await
            .unwrap();

        db.reset_unread(&conversation.id, "v1").await.unwrap();
        db.reset_unread(&conversation.id, "v1").await.unwrap();

        let updated = db.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert_eq!(updated.unread_for("v1"), 0);
    }

    #[tokio::test]
    async fn test_report_sets_block_and_unblock_clears_both() {
        let db = setup_test_db().await;
        let conversation = db.create_conversation("u1", "v1").await.unwrap();

        db.set_reported(&conversation.id, "v1", Role::Vendor, "spam")
            .await
            .unwrap();
        let reported = db.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert!(reported.is_blocked);
        assert!(reported.is_reported);
        assert_eq!(reported.report_reason.as_deref(), Some("spam"));
        assert_eq!(reported.blocked_by.as_deref(), Some("v1"));

        db.clear_moderation(&conversation.id).await.unwrap();
        let cleared = db.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert!(!cleared.is_blocked);
        assert!(!cleared.is_reported);
        assert!(cleared.report_reason.is_none());
    }

    #[tokio::test]
    async fn test_history_excludes_soft_deleted_for_identity_only() {
        let db = setup_test_db().await;
        db.create_conversation("u1", "v1").await.unwrap();

        db.insert_message("v1_u1", "u1", Role::User, "v1", Role::Vendor, "one", None)
            .await
            .unwrap();
        db.insert_message("v1_u1", "v1", Role::Vendor, "u1", Role::User, "two", None)
            .await
            .unwrap();

        let deleted = db.soft_delete_all("v1_u1", "u1").await.unwrap();
        assert_eq!(deleted, 2);

        let user_view = db.history("v1_u1", "u1", 50, 0).await.unwrap();
        assert!(user_view.is_empty());

        let vendor_view = db.history("v1_u1", "v1", 50, 0).await.unwrap();
        assert_eq!(vendor_view.len(), 2);
        assert_eq!(vendor_view[0].body, "one");
        assert_eq!(vendor_view[1].body, "two");
    }

    #[tokio::test]
    async fn test_mark_read_surfaces_read_flag_in_history() {
        let db = setup_test_db().await;
        db.create_conversation("u1", "v1").await.unwrap();

        db.insert_message("v1_u1", "u1", Role::User, "v1", Role::Vendor, "hi", None)
            .await
            .unwrap();
        db.insert_message("v1_u1", "v1", Role::Vendor, "u1", Role::User, "hey", None)
            .await
            .unwrap();

        let before = db.history("v1_u1", "u1", 50, 0).await.unwrap();
        assert!(before.iter().all(|m| !m.is_read));

        // Vendor reads: only messages the vendor received flip
        db.mark_messages_read("v1_u1", "v1").await.unwrap();

        let after = db.history("v1_u1", "u1", 50, 0).await.unwrap();
        assert!(after.iter().find(|m| m.body == "hi").unwrap().is_read);
        assert!(!after.iter().find(|m| m.body == "hey").unwrap().is_read);
    }

    #[tokio::test]
    async fn test_attachment_round_trip() {
        let db = setup_test_db().await;
        db.create_conversation("u1", "v1").await.unwrap();

        let attachment = Attachment {
            url: "https://cdn.example/invoice.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            name: "invoice.pdf".to_string(),
            size: 48213,
        };
        db.insert_message(
            "v1_u1",
            "v1",
            Role::Vendor,
            "u1",
            Role::User,
            "invoice attached",
            Some(&attachment),
        )
        .await
        .unwrap();

        let history = db.history("v1_u1", "u1", 50, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].attachment.as_ref().unwrap(), &attachment);
    }

    #[tokio::test]
    async fn test_list_conversations_sorted_by_activity() {
        let db = setup_test_db().await;
        db.create_conversation("u1", "v1").await.unwrap();
        db.create_conversation("u1", "v2").await.unwrap();

        // Activity on the older conversation moves it to the front
        let msg = db
            .insert_message("v1_u1", "u1", Role::User, "v1", Role::Vendor, "ping", None)
            .await
            .unwrap();
        db.apply_message_to_summary("v1_u1", &msg.body, msg.created_at, "v1", Role::Vendor)
            .await
            .unwrap();

        let list = db.list_conversations("u1", Role::User).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].conversation_key, "v1_u1");

        // Same identity with the wrong role sees nothing
        let as_vendor = db.list_conversations("u1", Role::Vendor).await.unwrap();
        assert!(as_vendor.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_pair_returns_most_recent() {
        let db = setup_test_db().await;
        assert!(db.find_by_pair("u1", "v1").await.unwrap().is_none());

        let created = db.create_conversation("u1", "v1").await.unwrap();
        let found = db.find_by_pair("u1", "v1").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
    }
}
