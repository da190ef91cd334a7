use std::str::FromStr;
use std::time::Duration;

use meetly_contracts::{
    AnalysisFields, FeedbackRecord, MeetingPreview, MeetingRecord, SharedMeeting, summary_preview,
};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

/// Database path that selects a private, process-local in-memory database.
pub const IN_MEMORY: &str = ":memory:";

const SHARE_TOKEN_BYTES: usize = 24;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation timed out")]
    Timeout,
    #[error("record not found")]
    NotFound,
    #[error("record is owned by another subject")]
    Forbidden,
    #[error("store sql error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("store migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub struct NewMeeting<'a> {
    pub owner_id: &'a str,
    pub owner_contact: Option<&'a str>,
    pub title: Option<&'a str>,
    pub occurred_on: Option<&'a str>,
    pub transcript: &'a str,
    pub fields: &'a AnalysisFields,
}

pub struct NewFeedback<'a> {
    pub owner_id: &'a str,
    pub contact: &'a str,
    pub message: &'a str,
}

#[derive(Clone)]
pub struct MeetingStore {
    pool: SqlitePool,
    op_timeout: Duration,
}

impl MeetingStore {
    pub async fn connect(db_path: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let (options, max_connections) = if db_path.trim() == IN_MEMORY {
            // Every in-memory connection is its own database, so the pool holds exactly one.
            (SqliteConnectOptions::from_str("sqlite::memory:")?, 1)
        } else {
            (
                SqliteConnectOptions::new()
                    .filename(db_path.trim())
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(op_timeout),
                8,
            )
        };

        let pool = tokio::time::timeout(
            Duration::from_secs(2),
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self { pool, op_timeout })
    }

    pub async fn connect_and_migrate(
        db_path: &str,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self::connect(db_path, op_timeout).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            Duration::from_secs(10),
            sqlx::migrate!("./migrations").run(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn insert_meeting(&self, meeting: NewMeeting<'_>) -> Result<i64, StoreError> {
        let summary_json = encode_json(&meeting.fields.summary, "[]");
        let action_items_json = encode_json(&meeting.fields.action_items, "[]");
        let decisions_json = encode_json(&meeting.fields.decisions, "[]");
        let sentiment_json = encode_json(
            &meeting.fields.sentiment,
            r#"{"sentiment":"neutral","score":0.0}"#,
        );

        let result = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "INSERT INTO meetings (owner_id, owner_contact, title, occurred_on, transcript, summary_json, action_items_json, decisions_json, sentiment_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(meeting.owner_id)
            .bind(meeting.owner_contact)
            .bind(meeting.title)
            .bind(meeting.occurred_on)
            .bind(meeting.transcript)
            .bind(&summary_json)
            .bind(&action_items_json)
            .bind(&decisions_json)
            .bind(&sentiment_json)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(result.last_insert_rowid())
    }

    /// Newest first; summaries are cut down to a preview of the first bullets.
    pub async fn list_meetings(
        &self,
        owner_id: &str,
        limit: u32,
    ) -> Result<Vec<MeetingPreview>, StoreError> {
        let rows = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT id, title, occurred_on, summary_json, created_at FROM meetings WHERE owner_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .bind(owner_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        rows.iter()
            .map(|row| {
                let summary: Vec<String> = decode_json(row.try_get("summary_json")?);
                Ok(MeetingPreview {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    occurred_on: row.try_get("occurred_on")?,
                    summary_preview: summary_preview(&summary),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    /// A record owned by someone else is reported exactly like a missing one.
    pub async fn get_meeting(
        &self,
        id: i64,
        owner_id: &str,
    ) -> Result<Option<MeetingRecord>, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT id, owner_id, owner_contact, title, occurred_on, transcript, summary_json, action_items_json, decisions_json, sentiment_json, share_token, created_at FROM meetings WHERE id = ?1 AND owner_id = ?2",
            )
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        row.as_ref()
            .map(meeting_from_row)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Returns the record's share token, minting one on first use.
    ///
    /// The write only lands while `share_token IS NULL`, so two concurrent callers
    /// converge on whichever token was stored first.
    pub async fn issue_share_token(&self, id: i64, owner_id: &str) -> Result<String, StoreError> {
        if let Some(token) = self.existing_share_token(id, owner_id).await? {
            return Ok(token);
        }

        let candidate = new_share_token();
        let updated = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "UPDATE meetings SET share_token = ?1 WHERE id = ?2 AND owner_id = ?3 AND share_token IS NULL",
            )
            .bind(&candidate)
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        if updated.rows_affected() == 1 {
            tracing::debug!(meeting_id = id, "share token minted");
            return Ok(candidate);
        }

        self.existing_share_token(id, owner_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn existing_share_token(
        &self,
        id: i64,
        owner_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT owner_id, share_token FROM meetings WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let Some(row) = row else {
            return Err(StoreError::NotFound);
        };

        let stored_owner: String = row.try_get("owner_id")?;
        if stored_owner != owner_id {
            return Err(StoreError::Forbidden);
        }

        Ok(row.try_get("share_token")?)
    }

    /// Token possession is the only check here.
    pub async fn get_shared_meeting(
        &self,
        token: &str,
    ) -> Result<Option<SharedMeeting>, StoreError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }

        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT id, owner_id, owner_contact, title, occurred_on, transcript, summary_json, action_items_json, decisions_json, sentiment_json, share_token, created_at FROM meetings WHERE share_token = ?1",
            )
            .bind(token)
            .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        row.as_ref()
            .map(|row| meeting_from_row(row).map(|record| record.shared_view()))
            .transpose()
            .map_err(StoreError::from)
    }

    pub async fn insert_feedback(&self, feedback: NewFeedback<'_>) -> Result<i64, StoreError> {
        let result = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("INSERT INTO feedback (owner_id, contact, message) VALUES (?1, ?2, ?3)")
                .bind(feedback.owner_id)
                .bind(feedback.contact)
                .bind(feedback.message)
                .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(result.last_insert_rowid())
    }

    pub async fn list_feedback(&self, owner_id: &str) -> Result<Vec<FeedbackRecord>, StoreError> {
        let rows = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "SELECT id, contact, message, created_at FROM feedback WHERE owner_id = ?1 ORDER BY id DESC",
            )
            .bind(owner_id)
            .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        rows.iter()
            .map(|row| {
                Ok(FeedbackRecord {
                    id: row.try_get("id")?,
                    contact: row.try_get("contact")?,
                    message: row.try_get("message")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn meeting_from_row(row: &SqliteRow) -> Result<MeetingRecord, sqlx::Error> {
    Ok(MeetingRecord {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        owner_contact: row.try_get("owner_contact")?,
        title: row.try_get("title")?,
        occurred_on: row.try_get("occurred_on")?,
        transcript: row.try_get("transcript")?,
        summary: decode_json(row.try_get("summary_json")?),
        action_items: decode_json(row.try_get("action_items_json")?),
        decisions: decode_json(row.try_get("decisions_json")?),
        sentiment: decode_json(row.try_get("sentiment_json")?),
        share_token: row.try_get("share_token")?,
        created_at: row.try_get("created_at")?,
    })
}

fn encode_json<T: serde::Serialize>(value: &T, fallback: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| fallback.to_string())
}

fn decode_json<T: DeserializeOwned + Default>(raw: Option<String>) -> T {
    raw.and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn new_share_token() -> String {
    hex::encode(rand::random::<[u8; SHARE_TOKEN_BYTES]>())
}
