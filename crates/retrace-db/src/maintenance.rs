//! Housekeeping: retention deletes, vacuum, and the stats the retention
//! task and the CLI report (spec.md §4.2, §4.8).

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteArguments;

use crate::{DatabaseManager, DbError};

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StorageStats {
    pub frame_count: i64,
    pub video_count: i64,
    pub session_count: i64,
    pub total_video_bytes: i64,
}

impl DatabaseManager {
    /// Delete frames whose own `createdAt` is older than `cutoff` —
    /// timestamp is the source of truth for retention, not the video
    /// segment's span (spec.md §3, §4.8). Cascades via the schema's
    /// foreign keys and triggers to the frame's `node`, `document`,
    /// `doc_segment`, and `search_ranking` rows.
    pub async fn delete_frames_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        let mut args = SqliteArguments::default();
        self.config.bind_date(&mut args, cutoff);
        let result = sqlx::query_with("DELETE FROM frame WHERE created_at < ?1", args)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Video segments with zero remaining frame references, swept after
    /// `delete_frames_before` so a segment spanning both a deleted and a
    /// surviving frame is kept rather than dropped wholesale by its own
    /// `end_date` (spec.md §4.8, §8 scenario 5). Returns the deleted
    /// segments' relative paths so the caller can remove the backing
    /// files — the database and filesystem are never made consistent by
    /// the same transaction.
    pub async fn delete_orphan_video_segments(&self) -> Result<Vec<String>, DbError> {
        let paths: Vec<String> = sqlx::query_scalar(
            "SELECT relative_path FROM video
             WHERE id NOT IN (SELECT video_id FROM frame WHERE video_id IS NOT NULL)",
        )
        .fetch_all(&self.pool)
        .await?;

        sqlx::query(
            "DELETE FROM video
             WHERE id NOT IN (SELECT video_id FROM frame WHERE video_id IS NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        Ok(paths)
    }

    /// App sessions that ended before `cutoff` (spec.md §4.8 retention).
    /// Frames referencing a deleted session have `segment_id` set to `NULL`
    /// rather than being deleted themselves (`ON DELETE SET NULL`).
    pub async fn delete_sessions_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        let mut args = SqliteArguments::default();
        self.config.bind_date(&mut args, cutoff);
        let result = sqlx::query_with(
            "DELETE FROM segment WHERE end_date IS NOT NULL AND end_date < ?1",
            args,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Defensive sweep for `node` rows whose frame no longer exists. Normal
    /// deletes cascade via `ON DELETE CASCADE`, so this should ordinarily
    /// find nothing; it exists to catch rows left behind by a schema
    /// predating the cascade or a direct `DELETE FROM frame` outside this
    /// crate (spec.md §4.8).
    pub async fn delete_orphan_nodes(&self) -> Result<u64, DbError> {
        let result = sqlx::query(
            "DELETE FROM node WHERE frame_id NOT IN (SELECT id FROM frame)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<StorageStats, DbError> {
        let frame_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM frame")
            .fetch_one(&self.pool)
            .await?;
        let video_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM video")
            .fetch_one(&self.pool)
            .await?;
        let session_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM segment")
            .fetch_one(&self.pool)
            .await?;
        let total_video_bytes: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(file_size_bytes), 0) FROM video")
                .fetch_one(&self.pool)
                .await?;

        Ok(StorageStats {
            frame_count,
            video_count,
            session_count,
            total_video_bytes,
        })
    }

    /// `ANALYZE` plus a `PRAGMA wal_checkpoint` — run after a retention pass
    /// removes a meaningful fraction of rows (spec.md §4.8 retention task).
    pub async fn vacuum(&self) -> Result<(), DbError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::NewFrame;
    use crate::segments::*;
    use crate::DatabaseConfig;
    use retrace_core::types::{CorpusSource, VideoSegment};

    async fn manager() -> DatabaseManager {
        let tmp = tempfile::TempDir::new().unwrap();
        DatabaseManager::open(DatabaseConfig::primary(tmp.path().to_path_buf()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn delete_frames_before_cutoff_cascades_to_nodes_and_documents() {
        let db = manager().await;
        let old_frame = db
            .insert_pending_frame(Utc::now() - chrono::Duration::days(40), &NewFrame::default())
            .await
            .unwrap();
        let new_frame = db
            .insert_pending_frame(Utc::now(), &NewFrame::default())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO node (frame_id, node_order, text_offset, text_length, left_x, top_y, width, height, window_index)
             VALUES (?1, 0, 0, 1, 0.0, 0.0, 1.0, 1.0, 0)",
        )
        .bind(old_frame)
        .execute(db.pool())
        .await
        .unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        let deleted = db.delete_frames_before(cutoff).await.unwrap();
        assert_eq!(deleted, 1);

        assert!(db.get_frame(old_frame).await.is_err());
        assert!(db.get_frame(new_frame).await.is_ok());
        let orphan_nodes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM node WHERE frame_id = ?1")
            .bind(old_frame)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(orphan_nodes, 0);
    }

    #[tokio::test]
    async fn delete_orphan_video_segments_keeps_segments_with_a_remaining_frame() {
        let db = manager().await;
        let segment = VideoSegment {
            id: 0,
            start_time: Utc::now() - chrono::Duration::days(1),
            end_time: Utc::now(),
            frame_count: 1,
            file_size_bytes: 10,
            relative_path: "chunks/referenced".into(),
            width: 1,
            height: 1,
            source: CorpusSource::Primary,
        };
        let orphan_segment = VideoSegment {
            relative_path: "chunks/orphan".into(),
            ..segment.clone()
        };
        let video_id = db.insert_video_segment(&segment).await.unwrap();
        db.insert_video_segment(&orphan_segment).await.unwrap();

        let frame_id = db.insert_pending_frame(Utc::now(), &NewFrame::default()).await.unwrap();
        db.attach_frame_to_video(frame_id, video_id, 0).await.unwrap();

        let deleted = db.delete_orphan_video_segments().await.unwrap();
        assert_eq!(deleted, vec!["chunks/orphan".to_string()]);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM video")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn stats_reports_current_counts() {
        let db = manager().await;
        db.insert_pending_frame(Utc::now(), &NewFrame::default()).await.unwrap();
        let stats = db.stats().await.unwrap();
        assert_eq!(stats.frame_count, 1);
        assert_eq!(stats.video_count, 0);
    }

    #[tokio::test]
    async fn delete_sessions_before_cutoff_leaves_open_and_recent_sessions() {
        let db = manager().await;
        let old_start = Utc::now() - chrono::Duration::days(40);
        let old_end = Utc::now() - chrono::Duration::days(39);
        db.open_app_session(old_start, "com.example.old", None, None, retrace_core::types::SessionType::Application)
            .await
            .unwrap();
        db.close_active_session(old_end).await.unwrap();

        db.open_app_session(Utc::now(), "com.example.current", None, None, retrace_core::types::SessionType::Application)
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        let deleted = db.delete_sessions_before(cutoff).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM segment")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn delete_orphan_nodes_removes_rows_whose_frame_is_gone() {
        let db = manager().await;
        let frame_id = db.insert_pending_frame(Utc::now(), &NewFrame::default()).await.unwrap();

        // Do the insert/delete-without-cascade dance on one held connection,
        // since foreign_keys is a per-connection PRAGMA and the pool could
        // otherwise hand the cascade-sensitive DELETE to a different
        // connection than the one with the PRAGMA toggled off.
        let mut conn = db.pool().acquire().await.unwrap();
        sqlx::query(
            "INSERT INTO node (frame_id, node_order, text_offset, text_length, left_x, top_y, width, height)
             VALUES (?1, 0, 0, 0, 0.0, 0.0, 1.0, 1.0)",
        )
        .bind(frame_id)
        .execute(&mut *conn)
        .await
        .unwrap();
        sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await.unwrap();
        sqlx::query("DELETE FROM frame WHERE id = ?1").bind(frame_id).execute(&mut *conn).await.unwrap();
        sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await.unwrap();
        drop(conn);

        let deleted = db.delete_orphan_nodes().await.unwrap();
        assert_eq!(deleted, 1);
    }
}
