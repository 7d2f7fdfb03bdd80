use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use channelpulse_common::{Reply, ReplyFeatures, Source};

// ---------------------------------------------------------------------------
// Insert/update parameter structs
// ---------------------------------------------------------------------------

/// Parameters for inserting a new item row.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub external_id: i64,
    pub source_id: i64,
    pub body: Option<String>,
    pub caption: Option<String>,
    pub attachment_kind: Option<String>,
    pub attachment_info: Option<serde_json::Value>,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub reactions: Option<serde_json::Value>,
    pub pinned: bool,
    pub author_signature: Option<String>,
    pub grouped_id: Option<i64>,
    pub reply_to_external_id: Option<i64>,
    pub published_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

/// Parameters for inserting a new reply row.
#[derive(Debug, Clone)]
pub struct NewReply {
    pub external_id: i64,
    pub item_id: i64,
    pub author_id: Option<i64>,
    pub author_handle: Option<String>,
    pub author_name: Option<String>,
    pub body: Option<String>,
    pub caption: Option<String>,
    pub attachment_kind: Option<String>,
    pub attachment_info: Option<serde_json::Value>,
    pub reactions: Option<serde_json::Value>,
    pub reply_to_external_id: Option<i64>,
    pub published_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

/// Remote-owned item state refreshed in place: engagement counters plus the
/// content fields the remote may have edited since ingestion.
///
/// `reply_count` here is the remote-reported total; None leaves the locally
/// maintained counter untouched.
#[derive(Debug, Clone, Default)]
pub struct ItemStats {
    pub body: Option<String>,
    pub caption: Option<String>,
    pub attachment_kind: Option<String>,
    pub attachment_info: Option<serde_json::Value>,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub reply_count: Option<i64>,
    pub reactions: Option<serde_json::Value>,
    pub pinned: bool,
    pub author_signature: Option<String>,
    pub edited_at: Option<DateTime<Utc>>,
}

/// Lightweight (row id, external id) pair for walking a source's items.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct ItemRef {
    pub id: i64,
    pub external_id: i64,
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

/// Pool-backed store. Entry point for sessions and for enrichment reads,
/// which run outside any sync transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Open a transactional session. All sync writes go through it.
    pub async fn begin(&self) -> Result<PgSession> {
        let tx = self.pool.begin().await?;
        Ok(PgSession { tx })
    }

    pub async fn reply_by_id(&self, id: i64) -> Result<Option<Reply>> {
        let row = sqlx::query_as::<_, Reply>("SELECT * FROM replies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn replies_by_ids(&self, ids: &[i64]) -> Result<Vec<Reply>> {
        let rows = sqlx::query_as::<_, Reply>(
            "SELECT * FROM replies WHERE id = ANY($1) ORDER BY id ASC",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Unanalyzed replies, oldest first. `older_than` restricts to rows
    /// created before that instant, `source_id` to one source's threads.
    pub async fn unanalyzed_replies(
        &self,
        limit: i64,
        older_than: Option<DateTime<Utc>>,
        source_id: Option<i64>,
    ) -> Result<Vec<Reply>> {
        let rows = sqlx::query_as::<_, Reply>(
            r#"
            SELECT r.* FROM replies r
            JOIN items i ON i.id = r.item_id
            WHERE r.analyzed_at IS NULL
              AND ($2::timestamptz IS NULL OR r.created_at < $2)
              AND ($3::bigint IS NULL OR i.source_id = $3)
            ORDER BY r.created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(older_than)
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Persist extracted features and mark the reply analyzed.
    pub async fn save_reply_features(&self, id: i64, features: &ReplyFeatures) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE replies
            SET topics = $2, problems = $3, questions = $4, suggestions = $5,
                analyzed_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(serde_json::to_value(&features.topics)?)
        .bind(serde_json::to_value(&features.problems)?)
        .bind(serde_json::to_value(&features.questions)?)
        .bind(serde_json::to_value(&features.suggestions)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PgSession — one refresh, one transaction
// ---------------------------------------------------------------------------

pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

impl PgSession {
    pub async fn active_sources(&mut self) -> Result<Vec<Source>> {
        let rows =
            sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE active ORDER BY id ASC")
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(rows)
    }

    /// Insert or refresh a source from its resolved descriptor.
    pub async fn upsert_source(
        &mut self,
        id: i64,
        handle: Option<&str>,
        title: &str,
        description: Option<&str>,
    ) -> Result<Source> {
        let row = sqlx::query_as::<_, Source>(
            r#"
            INSERT INTO sources (id, handle, title, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET handle = EXCLUDED.handle,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(handle)
        .bind(title)
        .bind(description)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    /// Advance the ingestion cursor. GREATEST keeps it monotonic even if a
    /// caller hands back a stale value.
    pub async fn advance_cursor(&mut self, source_id: i64, cursor: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sources
            SET last_processed_cursor = GREATEST(COALESCE(last_processed_cursor, 0), $2),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(source_id)
        .bind(cursor)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn deactivate_source(&mut self, source_id: i64) -> Result<()> {
        sqlx::query("UPDATE sources SET active = FALSE, updated_at = now() WHERE id = $1")
            .bind(source_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// (row id, external id) for every item of a source, oldest first. This
    /// doubles as the dedup set for item ingestion.
    pub async fn item_refs(&mut self, source_id: i64) -> Result<Vec<ItemRef>> {
        let rows = sqlx::query_as::<_, ItemRef>(
            "SELECT id, external_id FROM items WHERE source_id = $1 ORDER BY external_id ASC",
        )
        .bind(source_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    pub async fn insert_item(&mut self, item: &NewItem) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO items
                (external_id, source_id, body, caption, attachment_kind, attachment_info,
                 views, forwards, reactions, pinned, author_signature, grouped_id,
                 reply_to_external_id, published_at, edited_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING id
            "#,
        )
        .bind(item.external_id)
        .bind(item.source_id)
        .bind(&item.body)
        .bind(&item.caption)
        .bind(&item.attachment_kind)
        .bind(&item.attachment_info)
        .bind(item.views)
        .bind(item.forwards)
        .bind(&item.reactions)
        .bind(item.pinned)
        .bind(&item.author_signature)
        .bind(item.grouped_id)
        .bind(item.reply_to_external_id)
        .bind(item.published_at)
        .bind(item.edited_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    pub async fn update_item_stats(&mut self, item_id: i64, stats: &ItemStats) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE items
            SET body = $2, caption = $3, attachment_kind = $4, attachment_info = $5,
                views = $6, forwards = $7, reactions = $8,
                reply_count = COALESCE($9, reply_count),
                pinned = $10, author_signature = $11, edited_at = $12,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(item_id)
        .bind(&stats.body)
        .bind(&stats.caption)
        .bind(&stats.attachment_kind)
        .bind(&stats.attachment_info)
        .bind(stats.views)
        .bind(stats.forwards)
        .bind(&stats.reactions)
        .bind(stats.reply_count)
        .bind(stats.pinned)
        .bind(&stats.author_signature)
        .bind(stats.edited_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// External ids of every reply already stored under an item.
    pub async fn reply_external_ids(&mut self, item_id: i64) -> Result<HashSet<i64>> {
        let rows = sqlx::query_as::<_, (i64,)>(
            "SELECT external_id FROM replies WHERE item_id = $1",
        )
        .bind(item_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn insert_reply(&mut self, reply: &NewReply) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO replies
                (external_id, item_id, author_id, author_handle, author_name,
                 body, caption, attachment_kind, attachment_info, reactions,
                 reply_to_external_id, published_at, edited_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(reply.external_id)
        .bind(reply.item_id)
        .bind(reply.author_id)
        .bind(&reply.author_handle)
        .bind(&reply.author_name)
        .bind(&reply.body)
        .bind(&reply.caption)
        .bind(&reply.attachment_kind)
        .bind(&reply.attachment_info)
        .bind(&reply.reactions)
        .bind(reply.reply_to_external_id)
        .bind(reply.published_at)
        .bind(reply.edited_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    /// Bump the locally maintained reply counter by the number of rows the
    /// collector just inserted.
    pub async fn increment_reply_count(&mut self, item_id: i64, delta: i64) -> Result<()> {
        sqlx::query(
            "UPDATE items SET reply_count = reply_count + $2, updated_at = now() WHERE id = $1",
        )
        .bind(item_id)
        .bind(delta)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Land the session's writes. A session dropped without committing
    /// rolls back implicitly.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
