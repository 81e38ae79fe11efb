//! Frame CRUD (spec.md §3, §4.2) — the row a capture produces immediately
//! at ingest time (`processing_status = pending`) and that the processing
//! queue later updates in place once OCR completes.

use chrono::{DateTime, Utc};
use retrace_core::types::{CorpusSource, EncodingStatus, ProcessingStatus};
use serde::Serialize;
use sqlx::Row;

use crate::{DatabaseManager, DbError};

#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub segment_id: Option<i64>,
    pub video_id: Option<i64>,
    pub video_frame_index: Option<i64>,
    pub encoding_status: EncodingStatus,
    pub processing_status: ProcessingStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub app_bundle_id: Option<String>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub browser_url: Option<String>,
    pub display_index: i64,
    pub source: CorpusSource,
}

/// What the ingest coordinator knows about a frame the instant it's
/// captured, before a segment or OCR result exists for it.
#[derive(Debug, Clone, Default)]
pub struct NewFrame {
    pub segment_id: Option<i64>,
    pub app_bundle_id: Option<String>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub browser_url: Option<String>,
    pub display_index: i64,
}

impl DatabaseManager {
    fn row_to_frame(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Frame, DbError> {
        let created_at = match self.config.encoding {
            crate::TimestampEncoding::EpochMillis => {
                let millis: i64 = row.try_get("created_at")?;
                self.config.parse_date_millis(millis)
            }
            crate::TimestampEncoding::Iso8601Text => {
                let text: String = row.try_get("created_at")?;
                self.config
                    .parse_date_text(&text)
                    .map_err(|e| DbError::ParseFailed(e.to_string()))?
            }
        };

        let encoding_status: String = row.try_get("encoding_status")?;
        let processing_status: String = row.try_get("processing_status")?;
        let source: String = row.try_get("source")?;

        Ok(Frame {
            id: row.try_get("id")?,
            created_at,
            segment_id: row.try_get("segment_id")?,
            video_id: row.try_get("video_id")?,
            video_frame_index: row.try_get("video_frame_index")?,
            encoding_status: encoding_status
                .parse()
                .map_err(|_| DbError::ParseFailed(format!("bad encoding_status {encoding_status}")))?,
            processing_status: processing_status.parse().map_err(|_| {
                DbError::ParseFailed(format!("bad processing_status {processing_status}"))
            })?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            app_bundle_id: row.try_get("app_bundle_id")?,
            app_name: row.try_get("app_name")?,
            window_title: row.try_get("window_title")?,
            browser_url: row.try_get("browser_url")?,
            display_index: row.try_get("display_index")?,
            source: match source.as_str() {
                "secondary" => CorpusSource::Secondary,
                _ => CorpusSource::Primary,
            },
        })
    }

    /// Insert a frame at capture time: no video yet, `processing_status =
    /// pending`. The ingest coordinator attaches `video_id`/`video_frame_index`
    /// once the owning segment is finalized.
    pub async fn insert_pending_frame(
        &self,
        captured_at: DateTime<Utc>,
        new_frame: &NewFrame,
    ) -> Result<i64, DbError> {
        let mut args = sqlx::sqlite::SqliteArguments::default();
        use sqlx::Arguments;
        self.config.bind_date(&mut args, captured_at);
        let _ = args.add(new_frame.segment_id);
        let _ = args.add(new_frame.app_bundle_id.clone());
        let _ = args.add(new_frame.app_name.clone());
        let _ = args.add(new_frame.window_title.clone());
        let _ = args.add(new_frame.browser_url.clone());
        let _ = args.add(new_frame.display_index);

        let row = sqlx::query_with(
            "INSERT INTO frame
                (created_at, segment_id, app_bundle_id, app_name, window_title, browser_url, display_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             RETURNING id",
            args,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    /// Called once the owning segment has been finalized and inserted.
    pub async fn attach_frame_to_video(
        &self,
        frame_id: i64,
        video_id: i64,
        video_frame_index: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE frame SET video_id = ?1, video_frame_index = ?2, encoding_status = 'success'
             WHERE id = ?3",
        )
        .bind(video_id)
        .bind(video_frame_index)
        .bind(frame_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_frame_encoding_failed(&self, frame_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE frame SET encoding_status = 'failed' WHERE id = ?1")
            .bind(frame_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_frame(&self, frame_id: i64) -> Result<Frame, DbError> {
        let row = sqlx::query("SELECT * FROM frame WHERE id = ?1")
            .bind(frame_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::FrameNotFound(frame_id))?;
        self.row_to_frame(&row)
    }

    /// Atomically claim up to `limit` `pending` frames for processing,
    /// transitioning them to `processing` in the same statement so two
    /// workers can never claim the same row (spec.md §5, queue worker
    /// exclusivity).
    pub async fn claim_pending_frames(&self, limit: i64) -> Result<Vec<Frame>, DbError> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM frame WHERE processing_status = 'pending' AND video_id IS NOT NULL
             ORDER BY created_at ASC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "UPDATE frame SET processing_status = 'processing' WHERE id IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql);
        for id in &ids {
            q = q.bind(id);
        }
        q.execute(&mut *tx).await?;

        let select_sql = format!("SELECT * FROM frame WHERE id IN ({placeholders})");
        let mut q = sqlx::query(&select_sql);
        for id in &ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&mut *tx).await?;
        tx.commit().await?;

        rows.iter().map(|r| self.row_to_frame(r)).collect()
    }

    pub async fn mark_frame_completed(&self, frame_id: i64) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE frame SET processing_status = 'completed', last_error = NULL WHERE id = ?1",
        )
        .bind(frame_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bump `retry_count` and return to `pending` (retryable failure) or
    /// park at `failed` (retries exhausted).
    pub async fn mark_frame_retry_or_failed(
        &self,
        frame_id: i64,
        error: &str,
        max_retry_attempts: i64,
    ) -> Result<ProcessingStatus, DbError> {
        let retry_count: i64 =
            sqlx::query_scalar("SELECT retry_count FROM frame WHERE id = ?1")
                .bind(frame_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(DbError::FrameNotFound(frame_id))?;

        let next_status = if retry_count + 1 >= max_retry_attempts {
            ProcessingStatus::Failed
        } else {
            ProcessingStatus::Pending
        };

        sqlx::query(
            "UPDATE frame SET processing_status = ?1, retry_count = retry_count + 1, last_error = ?2
             WHERE id = ?3",
        )
        .bind(next_status.as_str())
        .bind(error)
        .bind(frame_id)
        .execute(&self.pool)
        .await?;

        Ok(next_status)
    }

    /// Crash recovery: any frame stuck in `processing` at startup was
    /// claimed by a worker that never finished, so it goes back to
    /// `pending` without counting against its retry budget.
    pub async fn reset_processing_to_pending(&self) -> Result<u64, DbError> {
        let result = sqlx::query(
            "UPDATE frame SET processing_status = 'pending' WHERE processing_status = 'processing'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_frame(&self, frame_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM frame WHERE id = ?1")
            .bind(frame_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Frames within `[start, end]`, most recent first, optionally
    /// restricted to a set of app bundle ids.
    pub async fn frames_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        app_bundle_ids: Option<&[String]>,
        limit: i64,
    ) -> Result<Vec<Frame>, DbError> {
        let mut args = sqlx::sqlite::SqliteArguments::default();
        use sqlx::Arguments;
        self.config.bind_date(&mut args, start);
        self.config.bind_date(&mut args, end);

        let mut sql = String::from(
            "SELECT * FROM frame WHERE created_at >= ?1 AND created_at <= ?2",
        );
        if let Some(ids) = app_bundle_ids {
            if !ids.is_empty() {
                let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                sql.push_str(&format!(" AND app_bundle_id IN ({placeholders})"));
                for id in ids {
                    let _ = args.add(id.clone());
                }
            }
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");
        let _ = args.add(limit);

        let rows = sqlx::query_with(&sql, args).fetch_all(&self.pool).await?;
        rows.iter().map(|r| self.row_to_frame(r)).collect()
    }
}
