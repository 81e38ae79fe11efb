//! `IndexedDocument` and `OcrNode` writes (spec.md §3, §4.2).
//!
//! A document is keyed by `frame_id` (its `INTEGER PRIMARY KEY` doubles as
//! the FTS5 `content_rowid`), which is what gives the schema its
//! `UNIQUE(frame_id)` invariant for free — inserting a second document for
//! the same frame is a primary-key conflict, not an application-level
//! check. Writing the row is what populates `search_ranking`: the
//! `document_ai`/`document_ad`/`document_au` triggers in [`crate::schema`]
//! do that, never application code.

use chrono::{DateTime, Utc};
use retrace_core::types::OcrNode;
use serde::Serialize;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Arguments, Row};

use crate::{DatabaseManager, DbError};

#[derive(Debug, Clone, Serialize)]
pub struct IndexedDocument {
    pub frame_id: i64,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub chrome_text: String,
    pub app_name: Option<String>,
    pub window_name: Option<String>,
    pub url: Option<String>,
}

impl DatabaseManager {
    /// Insert the document and its OCR nodes for one frame and transition
    /// it to `completed`, all in a single transaction (spec.md §4.3: "Steps
    /// 4–6 occur in one transaction"). A frame either ends up fully
    /// indexed and `completed`, or none of this is visible at all — a
    /// crash between the node/document writes and the status flip can
    /// never leave a frame `processing` with a document already committed,
    /// which is what makes crash recovery's reset-to-`pending` safe to
    /// retry without hitting `UNIQUE(frame_id)` on the second attempt.
    pub async fn insert_document_with_nodes(
        &self,
        doc: &IndexedDocument,
        nodes: &[OcrNode],
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        let mut doc_args = SqliteArguments::default();
        let _ = doc_args.add(doc.frame_id);
        self.config.bind_date(&mut doc_args, doc.created_at);
        let _ = doc_args.add(doc.content.clone());
        let _ = doc_args.add(doc.chrome_text.clone());
        let _ = doc_args.add(doc.app_name.clone());
        let _ = doc_args.add(doc.window_name.clone());
        let _ = doc_args.add(doc.url.clone());

        sqlx::query_with(
            "INSERT INTO document (frame_id, created_at, content, chrome_text, app_name, window_name, url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            doc_args,
        )
        .execute(&mut *tx)
        .await?;

        for node in nodes {
            sqlx::query(
                "INSERT INTO node (frame_id, node_order, text_offset, text_length, left_x, top_y, width, height, window_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(doc.frame_id)
            .bind(node.node_order)
            .bind(node.text_offset)
            .bind(node.text_length)
            .bind(node.left_x)
            .bind(node.top_y)
            .bind(node.width)
            .bind(node.height)
            .bind(node.window_index)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE frame SET processing_status = 'completed', last_error = NULL WHERE id = ?1",
        )
        .bind(doc.frame_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_document(&self, frame_id: i64) -> Result<Option<IndexedDocument>, DbError> {
        let row = sqlx::query("SELECT * FROM document WHERE frame_id = ?1")
            .bind(frame_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| self.row_to_document(&r)).transpose()
    }

    pub async fn get_nodes_for_frame(&self, frame_id: i64) -> Result<Vec<OcrNode>, DbError> {
        let rows = sqlx::query("SELECT * FROM node WHERE frame_id = ?1 ORDER BY node_order ASC")
            .bind(frame_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(OcrNode {
                    frame_id: row.try_get("frame_id")?,
                    node_order: row.try_get("node_order")?,
                    text_offset: row.try_get("text_offset")?,
                    text_length: row.try_get("text_length")?,
                    left_x: row.try_get("left_x")?,
                    top_y: row.try_get("top_y")?,
                    width: row.try_get("width")?,
                    height: row.try_get("height")?,
                    window_index: row.try_get("window_index")?,
                })
            })
            .collect()
    }

    fn row_to_document(&self, row: &sqlx::sqlite::SqliteRow) -> Result<IndexedDocument, DbError> {
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

        Ok(IndexedDocument {
            frame_id: row.try_get("frame_id")?,
            created_at,
            content: row.try_get("content")?,
            chrome_text: row.try_get("chrome_text")?,
            app_name: row.try_get("app_name")?,
            window_name: row.try_get("window_name")?,
            url: row.try_get("url")?,
        })
    }
}
