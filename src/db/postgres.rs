use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use crate::{
    db::store::{RecommendationStore, SessionStore},
    error::{AppError, AppResult},
    models::{
        Candidate, Category, EnrichedRecommendation, RecommendationFilter, RecommendationView,
        RoundStatus, SessionFields, SessionKey, SessionUpdate,
    },
};

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Applies the bundled schema migrations
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Session store backed by the `session_fields` table
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_field<T: serde::de::DeserializeOwned>(
    field: &str,
    value: serde_json::Value,
) -> AppResult<T> {
    serde_json::from_value(value).map_err(|e| {
        AppError::Internal(format!("Malformed session field '{}': {}", field, e))
    })
}

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn get(&self, key: &SessionKey) -> AppResult<SessionFields> {
        let rows = sqlx::query(
            r#"
            SELECT field, value
            FROM session_fields
            WHERE session_id = $1 AND category = $2 AND partition_key = $3
            "#,
        )
        .bind(&key.session_id)
        .bind(key.category.token())
        .bind(key.partition_or_empty())
        .fetch_all(&self.pool)
        .await?;

        let mut fields = SessionFields::default();
        for row in rows {
            let field: String = row.try_get("field")?;
            let value: serde_json::Value = row.try_get("value")?;
            match field.as_str() {
                "status" => fields.status = decode_field(&field, value)?,
                "page" => fields.page = decode_field(&field, value)?,
                "fetch_intent" => fields.fetch_intent = decode_field(&field, value)?,
                "last_location" => fields.last_location = decode_field(&field, value)?,
                "tag_switched_id" => fields.tag_switched_id = decode_field(&field, value)?,
                other => {
                    tracing::warn!(field = %other, key = %key, "Ignoring unknown session field");
                }
            }
        }

        Ok(fields)
    }

    async fn set(&self, key: &SessionKey, update: SessionUpdate) -> AppResult<()> {
        let value = update
            .to_value()
            .map_err(|e| AppError::Internal(format!("Session field serialization error: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO session_fields (session_id, category, partition_key, field, value, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (session_id, category, partition_key, field)
            DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(&key.session_id)
        .bind(key.category.token())
        .bind(key.partition_or_empty())
        .bind(update.field_name())
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn try_claim(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> AppResult<bool> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| AppError::Internal(format!("Invalid processing lease: {}", e)))?;
        let value = serde_json::to_value(RoundStatus::Processing { since: now })
            .map_err(|e| AppError::Internal(format!("Status serialization error: {}", e)))?;

        // The conditional DO UPDATE makes check-and-set a single statement
        let claimed = sqlx::query(
            r#"
            INSERT INTO session_fields (session_id, category, partition_key, field, value, updated_at)
            VALUES ($1, $2, $3, 'status', $4, now())
            ON CONFLICT (session_id, category, partition_key, field)
            DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            WHERE session_fields.value->>'state' IS DISTINCT FROM 'processing'
               OR (session_fields.value->>'since')::timestamptz <= $5
            RETURNING field
            "#,
        )
        .bind(&key.session_id)
        .bind(key.category.token())
        .bind(key.partition_or_empty())
        .bind(value)
        .bind(now - lease)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }
}

/// Recommendation store backed by the `recommendations` table
#[derive(Clone)]
pub struct PgRecommendationStore {
    pool: PgPool,
}

impl PgRecommendationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecommendationStore for PgRecommendationStore {
    async fn insert(&self, record: EnrichedRecommendation) -> AppResult<String> {
        let id = Uuid::new_v4();
        let candidate = serde_json::to_value(&record.candidate)
            .map_err(|e| AppError::Internal(format!("Recommendation serialization error: {}", e)))?;
        let raw_tags = serde_json::to_value(&record.candidate.raw_tags)
            .map_err(|e| AppError::Internal(format!("Tag serialization error: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO recommendations (
                id, session_id, recommendation_category, cleaned_user_message, tag_id,
                user_message, entity_id, title, candidate, raw_tags, context, score, error, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(id)
        .bind(&record.session_id)
        .bind(record.recommendation_category.token())
        .bind(&record.cleaned_user_message)
        .bind(&record.tag_id)
        .bind(&record.user_message)
        .bind(&record.candidate.entity_id)
        .bind(&record.candidate.title)
        .bind(candidate)
        .bind(raw_tags)
        .bind(&record.context)
        .bind(i16::from(record.score))
        .bind(&record.error)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(id.to_string())
    }

    async fn query(
        &self,
        filter: &RecommendationFilter,
        skip: u64,
        limit: u64,
    ) -> AppResult<(Vec<RecommendationView>, u64)> {
        // raw_tags is never selected on the read path
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, recommendation_category, cleaned_user_message, tag_id,
                   user_message, candidate, context, score, error, created_at,
                   COUNT(*) OVER () AS total
            FROM recommendations
            WHERE session_id = $1
              AND recommendation_category = $2
              AND cleaned_user_message IS NOT DISTINCT FROM $3
              AND tag_id IS NOT DISTINCT FROM $4
            ORDER BY seq
            OFFSET $5 LIMIT $6
            "#,
        )
        .bind(&filter.session_id)
        .bind(filter.category.token())
        .bind(&filter.cleaned_user_message)
        .bind(&filter.tag_id)
        .bind(skip as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut total = rows
            .first()
            .map(|row| row.try_get::<i64, _>("total"))
            .transpose()?
            .unwrap_or(0) as u64;

        // An offset past the end returns no rows, so the window count is missing
        if rows.is_empty() && skip > 0 {
            let count: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*)
                FROM recommendations
                WHERE session_id = $1
                  AND recommendation_category = $2
                  AND cleaned_user_message IS NOT DISTINCT FROM $3
                  AND tag_id IS NOT DISTINCT FROM $4
                "#,
            )
            .bind(&filter.session_id)
            .bind(filter.category.token())
            .bind(&filter.cleaned_user_message)
            .bind(&filter.tag_id)
            .fetch_one(&self.pool)
            .await?;
            total = count as u64;
        }

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let candidate: serde_json::Value = row.try_get("candidate")?;
            let candidate: Candidate = serde_json::from_value(candidate).map_err(|e| {
                AppError::Internal(format!("Malformed stored recommendation {}: {}", id, e))
            })?;
            let category: String = row.try_get("recommendation_category")?;
            let score: i16 = row.try_get("score")?;

            let record = EnrichedRecommendation {
                candidate,
                context: row.try_get("context")?,
                score: u8::try_from(score).unwrap_or_default(),
                session_id: row.try_get("session_id")?,
                user_message: row.try_get("user_message")?,
                cleaned_user_message: row.try_get("cleaned_user_message")?,
                recommendation_category: category
                    .parse::<Category>()
                    .map_err(AppError::Internal)?,
                tag_id: row.try_get("tag_id")?,
                error: row.try_get("error")?,
                created_at: row.try_get("created_at")?,
            };
            views.push(RecommendationView::from_record(id.to_string(), record));
        }

        Ok((views, total))
    }
}
