//! `VideoSegment` and `AppSession` CRUD (spec.md §3, §4.2).
//!
//! Only one `AppSession` may be open (`end_date IS NULL`) at a time — the
//! ingest coordinator closes the previous session before opening the next
//! whenever the focused app, window, or URL changes.

use chrono::{DateTime, Utc};
use retrace_core::types::{AppSession, CorpusSource, SessionType, VideoSegment};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Arguments, Row};

use crate::{DatabaseManager, DbError};

impl DatabaseManager {
    pub async fn insert_video_segment(&self, segment: &VideoSegment) -> Result<i64, DbError> {
        let mut args = SqliteArguments::default();
        self.config.bind_date(&mut args, segment.start_time);
        self.config.bind_date(&mut args, segment.end_time);
        let _ = args.add(segment.frame_count);
        let _ = args.add(segment.file_size_bytes);
        let _ = args.add(segment.relative_path.clone());
        let _ = args.add(segment.width as i64);
        let _ = args.add(segment.height as i64);

        let row = sqlx::query_with(
            "INSERT INTO video (start_date, end_date, frame_count, file_size_bytes, relative_path, width, height)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             RETURNING id",
            args,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    pub async fn get_video_segment(&self, video_id: i64) -> Result<VideoSegment, DbError> {
        let row = sqlx::query("SELECT * FROM video WHERE id = ?1")
            .bind(video_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::VideoSegmentNotFound(video_id))?;
        self.row_to_video_segment(&row)
    }

    pub async fn delete_video_segment(&self, video_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM video WHERE id = ?1")
            .bind(video_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Video segments whose window overlaps `[start, end]`, oldest first.
    pub async fn video_segments_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<VideoSegment>, DbError> {
        let mut args = SqliteArguments::default();
        self.config.bind_date(&mut args, end);
        self.config.bind_date(&mut args, start);
        let rows = sqlx::query_with(
            "SELECT * FROM video WHERE start_date <= ?1 AND end_date >= ?2 ORDER BY start_date ASC",
            args,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| self.row_to_video_segment(r)).collect()
    }

    fn row_to_video_segment(&self, row: &sqlx::sqlite::SqliteRow) -> Result<VideoSegment, DbError> {
        let start_time = self.decode_date(row, "start_date")?;
        let end_time = self.decode_date(row, "end_date")?;
        let source: String = row.try_get("source")?;
        let width: i64 = row.try_get("width")?;
        let height: i64 = row.try_get("height")?;
        Ok(VideoSegment {
            id: row.try_get("id")?,
            start_time,
            end_time,
            frame_count: row.try_get("frame_count")?,
            file_size_bytes: row.try_get("file_size_bytes")?,
            relative_path: row.try_get("relative_path")?,
            width: width as u32,
            height: height as u32,
            source: if source == "secondary" {
                CorpusSource::Secondary
            } else {
                CorpusSource::Primary
            },
        })
    }

    /// Close whatever session is currently open (if any), then open a new
    /// one. Returns the new session's id.
    pub async fn open_app_session(
        &self,
        started_at: DateTime<Utc>,
        bundle_id: &str,
        window_name: Option<&str>,
        browser_url: Option<&str>,
        session_type: SessionType,
    ) -> Result<i64, DbError> {
        let mut tx = self.pool.begin().await?;

        let mut close_args = SqliteArguments::default();
        self.config.bind_date(&mut close_args, started_at);
        sqlx::query_with(
            "UPDATE segment SET end_date = ?1 WHERE end_date IS NULL",
            close_args,
        )
        .execute(&mut *tx)
        .await?;

        let mut insert_args = SqliteArguments::default();
        let _ = insert_args.add(bundle_id.to_string());
        self.config.bind_date(&mut insert_args, started_at);
        let _ = insert_args.add(window_name.map(str::to_string));
        let _ = insert_args.add(browser_url.map(str::to_string));
        let _ = insert_args.add(session_type.as_str());

        let row = sqlx::query_with(
            "INSERT INTO segment (bundle_id, start_date, window_name, browser_url, type)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id",
            insert_args,
        )
        .fetch_one(&mut *tx)
        .await?;
        let id: i64 = row.try_get("id")?;

        tx.commit().await?;
        Ok(id)
    }

    pub async fn close_active_session(&self, ended_at: DateTime<Utc>) -> Result<(), DbError> {
        let mut args = SqliteArguments::default();
        self.config.bind_date(&mut args, ended_at);
        sqlx::query_with(
            "UPDATE segment SET end_date = ?1 WHERE end_date IS NULL",
            args,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_active_session(&self) -> Result<Option<AppSession>, DbError> {
        let row = sqlx::query("SELECT * FROM segment WHERE end_date IS NULL LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| self.row_to_app_session(&r)).transpose()
    }

    pub async fn app_sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AppSession>, DbError> {
        let mut args = SqliteArguments::default();
        self.config.bind_date(&mut args, end);
        self.config.bind_date(&mut args, start);
        let rows = sqlx::query_with(
            "SELECT * FROM segment WHERE start_date <= ?1 AND (end_date IS NULL OR end_date >= ?2)
             ORDER BY start_date ASC",
            args,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| self.row_to_app_session(r)).collect()
    }

    fn row_to_app_session(&self, row: &sqlx::sqlite::SqliteRow) -> Result<AppSession, DbError> {
        let start_date = self.decode_date(row, "start_date")?;
        let end_date: Option<_> = if self.column_is_null(row, "end_date")? {
            None
        } else {
            Some(self.decode_date(row, "end_date")?)
        };
        let session_type: String = row.try_get("type")?;
        let source: String = row.try_get("source")?;

        Ok(AppSession {
            id: row.try_get("id")?,
            bundle_id: row.try_get("bundle_id")?,
            start_date,
            end_date,
            window_name: row.try_get("window_name")?,
            browser_url: row.try_get("browser_url")?,
            session_type: session_type.parse().unwrap_or(SessionType::Application),
            source: if source == "secondary" {
                CorpusSource::Secondary
            } else {
                CorpusSource::Primary
            },
        })
    }

    fn column_is_null(&self, row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<bool, DbError> {
        match self.config.encoding {
            crate::TimestampEncoding::EpochMillis => {
                Ok(row.try_get::<Option<i64>, _>(column)?.is_none())
            }
            crate::TimestampEncoding::Iso8601Text => {
                Ok(row.try_get::<Option<String>, _>(column)?.is_none())
            }
        }
    }

    fn decode_date(&self, row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<DateTime<Utc>, DbError> {
        match self.config.encoding {
            crate::TimestampEncoding::EpochMillis => {
                let millis: i64 = row.try_get(column)?;
                Ok(self.config.parse_date_millis(millis))
            }
            crate::TimestampEncoding::Iso8601Text => {
                let text: String = row.try_get(column)?;
                self.config
                    .parse_date_text(&text)
                    .map_err(|e| DbError::ParseFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatabaseConfig;

    async fn manager() -> DatabaseManager {
        let tmp = tempfile::TempDir::new().unwrap();
        DatabaseManager::open(DatabaseConfig::primary(tmp.path().to_path_buf()))
            .await
            .unwrap()
    }

    fn sample_segment() -> VideoSegment {
        VideoSegment {
            id: 0,
            start_time: Utc::now(),
            end_time: Utc::now(),
            frame_count: 10,
            file_size_bytes: 1024,
            relative_path: "chunks/202601/1".into(),
            width: 1920,
            height: 1080,
            source: CorpusSource::Primary,
        }
    }

    #[tokio::test]
    async fn insert_and_get_video_segment_round_trips() {
        let db = manager().await;
        let id = db.insert_video_segment(&sample_segment()).await.unwrap();
        let fetched = db.get_video_segment(id).await.unwrap();
        assert_eq!(fetched.frame_count, 10);
        assert_eq!(fetched.relative_path, "chunks/202601/1");
    }

    #[tokio::test]
    async fn opening_a_session_closes_the_previous_one() {
        let db = manager().await;
        let t0 = Utc::now();
        let first = db
            .open_app_session(t0, "com.example.a", None, None, SessionType::Application)
            .await
            .unwrap();

        let t1 = t0 + chrono::Duration::seconds(30);
        let second = db
            .open_app_session(t1, "com.example.b", None, None, SessionType::Application)
            .await
            .unwrap();

        assert_ne!(first, second);
        let active = db.get_active_session().await.unwrap().unwrap();
        assert_eq!(active.id, second);
        assert_eq!(active.bundle_id, "com.example.b");
    }

    #[tokio::test]
    async fn deleting_a_video_segment_cascades_to_frames() {
        let db = manager().await;
        let video_id = db.insert_video_segment(&sample_segment()).await.unwrap();
        let frame_id = db
            .insert_pending_frame(Utc::now(), &crate::frames::NewFrame::default())
            .await
            .unwrap();
        db.attach_frame_to_video(frame_id, video_id, 0).await.unwrap();

        db.delete_video_segment(video_id).await.unwrap();
        let err = db.get_frame(frame_id).await.unwrap_err();
        assert!(matches!(err, DbError::FrameNotFound(_)));
    }
}
