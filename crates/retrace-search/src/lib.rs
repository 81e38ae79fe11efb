//! The query planner over FTS + metadata (spec.md §4.6).
//!
//! `SearchEngine` holds a non-owning reference to one `retrace_db::DatabaseManager`
//! (primary or secondary — it doesn't care which) and answers `SearchQuery`s
//! against it. `retrace-federation` is the thing that owns more than one of
//! these and merges their results across a cutoff.

pub mod filters;
pub mod query_prep;

pub use filters::SearchFilters;

use chrono::{DateTime, Utc};
use retrace_core::types::CorpusSource;
use retrace_db::DatabaseManager;
use serde::Serialize;
use sqlx::Row;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),
    #[error("database error: {0}")]
    Db(#[from] retrace_db::DbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Ranked by BM25 within a bounded relevance window, then filtered.
    Relevant,
    /// Filtered first over a bounded recency window, then ranked by time.
    All,
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub filters: SearchFilters,
    pub mode: SearchMode,
    pub limit: i64,
    pub offset: i64,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            filters: SearchFilters::default(),
            mode: SearchMode::Relevant,
            limit: 20,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub frame_id: i64,
    pub timestamp: DateTime<Utc>,
    /// Context window around the match, `<mark>` tags stripped.
    pub snippet: String,
    /// The same context window with `<mark>`/`</mark>` tags intact, for
    /// callers that want to highlight the match themselves.
    pub matched_text: String,
    /// `|bm25| / (1 + |bm25|)` — 0 when no text match was performed (the
    /// "all" mode without a text filter), otherwise higher is more relevant.
    pub relevance: f64,
    pub app_name: Option<String>,
    pub window_name: Option<String>,
    pub url: Option<String>,
    pub segment_id: Option<i64>,
    pub video_id: Option<i64>,
    pub source: CorpusSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub results: Vec<SearchResult>,
    pub total_count: i64,
    pub search_time_ms: u64,
}

impl SearchResults {
    fn empty(started: Instant) -> Self {
        Self {
            results: Vec::new(),
            total_count: 0,
            search_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Candidates considered by the "relevant" mode's phase 1 before metadata
/// filters are applied. Kept small so a pathological query can't force a
/// full-corpus BM25 sort.
const RELEVANCE_WINDOW: i64 = 50;

/// Frames considered by the "all" mode before the FTS join, oldest bound.
const RECENCY_WINDOW: i64 = 10_000;

fn normalize_rank(rank: f64) -> f64 {
    let abs = rank.abs();
    abs / (1.0 + abs)
}

struct FrameMetaRow {
    id: i64,
    created_at: DateTime<Utc>,
    app_name: Option<String>,
    window_title: Option<String>,
    browser_url: Option<String>,
    segment_id: Option<i64>,
    video_id: Option<i64>,
    source: CorpusSource,
}

pub struct SearchEngine<'a> {
    db: &'a DatabaseManager,
}

impl<'a> SearchEngine<'a> {
    pub fn new(db: &'a DatabaseManager) -> Self {
        Self { db }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResults, SearchError> {
        let started = Instant::now();

        if query.limit <= 0 || query.filters.is_impossible() {
            return Ok(SearchResults::empty(started));
        }

        let match_query = query_prep::prepare_match_query(&query.text);

        let mut results = match query.mode {
            SearchMode::Relevant => self.search_relevant(&match_query, query).await?,
            SearchMode::All => self.search_all(&match_query, query).await?,
        };
        results.search_time_ms = started.elapsed().as_millis() as u64;
        Ok(results)
    }

    async fn search_relevant(
        &self,
        match_query: &str,
        query: &SearchQuery,
    ) -> Result<SearchResults, SearchError> {
        if match_query.is_empty() {
            // "relevant" without a text filter has nothing to rank by —
            // degrade to the most recent matches within the same window.
            return self.search_all("", query).await;
        }

        #[derive(sqlx::FromRow)]
        struct Candidate {
            rowid: i64,
            rank: f64,
            snip: String,
        }

        let candidates: Vec<Candidate> = sqlx::query_as(
            "SELECT rowid, bm25(search_ranking, 3.0, 1.0, 2.0) AS rank,
                    snippet(search_ranking, 0, '<mark>', '</mark>', '...', 12) AS snip
             FROM search_ranking
             WHERE search_ranking MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )
        .bind(match_query)
        .bind(RELEVANCE_WINDOW)
        .fetch_all(self.db.pool())
        .await?;

        if candidates.is_empty() {
            return Ok(SearchResults::empty(Instant::now()));
        }

        let ids: Vec<i64> = candidates.iter().map(|c| c.rowid).collect();
        let metas = self.fetch_frame_metas(&ids, &query.filters).await?;

        let mut scored: Vec<(SearchResult, f64)> = Vec::new();
        for candidate in &candidates {
            let Some(meta) = metas.get(&candidate.rowid) else {
                continue;
            };
            let score = normalize_rank(candidate.rank);
            scored.push((
                SearchResult {
                    frame_id: meta.id,
                    timestamp: meta.created_at,
                    snippet: query_prep::strip_marks(&candidate.snip),
                    matched_text: candidate.snip.clone(),
                    relevance: score,
                    app_name: meta.app_name.clone(),
                    window_name: meta.window_title.clone(),
                    url: meta.browser_url.clone(),
                    segment_id: meta.segment_id,
                    video_id: meta.video_id,
                    source: meta.source,
                },
                score,
            ));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let total_count = scored.len() as i64;
        let page = scored
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit as usize)
            .map(|(r, _)| r)
            .collect();

        Ok(SearchResults {
            results: page,
            total_count,
            search_time_ms: 0,
        })
    }

    async fn search_all(
        &self,
        match_query: &str,
        query: &SearchQuery,
    ) -> Result<SearchResults, SearchError> {
        use sqlx::Arguments;
        let config = self.db.config();

        let build_recent_cte = || {
            let mut sql = String::from(
                "WITH recent AS (
                    SELECT id, created_at, app_name, window_title, browser_url, segment_id, video_id, source
                    FROM frame f WHERE 1=1",
            );
            let mut args = sqlx::sqlite::SqliteArguments::default();
            query.filters.push_sql(&mut sql, &mut args, config, "f");
            sql.push_str(" ORDER BY f.created_at DESC LIMIT ?)");
            let _ = args.add(RECENCY_WINDOW);
            (sql, args)
        };

        let (mut select_sql, mut select_args) = build_recent_cte();
        let (mut count_sql, mut count_args) = build_recent_cte();

        if match_query.is_empty() {
            select_sql.push_str(
                " SELECT id, created_at, app_name, window_title, browser_url, segment_id, video_id, source, NULL AS snip, 0.0 AS rank
                  FROM recent ORDER BY created_at DESC LIMIT ? OFFSET ?",
            );
            let _ = select_args.add(query.limit);
            let _ = select_args.add(query.offset.max(0));
            count_sql.push_str(" SELECT COUNT(*) FROM recent");
        } else {
            select_sql.push_str(
                " SELECT r.id, r.created_at, r.app_name, r.window_title, r.browser_url, r.segment_id, r.video_id, r.source,
                         snippet(sr, 0, '<mark>', '</mark>', '...', 12) AS snip,
                         bm25(sr, 3.0, 1.0, 2.0) AS rank
                  FROM recent r JOIN search_ranking sr ON sr.rowid = r.id
                  WHERE search_ranking MATCH ?
                  ORDER BY r.created_at DESC LIMIT ? OFFSET ?",
            );
            let _ = select_args.add(match_query);
            let _ = select_args.add(query.limit);
            let _ = select_args.add(query.offset.max(0));

            count_sql.push_str(
                " SELECT COUNT(*) FROM recent r JOIN search_ranking sr ON sr.rowid = r.id WHERE search_ranking MATCH ?",
            );
            let _ = count_args.add(match_query);
        }

        let rows = sqlx::query_with(&select_sql, select_args)
            .fetch_all(self.db.pool())
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let source: String = row.try_get("source")?;
            let snip: Option<String> = row.try_get("snip")?;
            let rank: Option<f64> = row.try_get("rank")?;
            let created_at = self.decode_created_at(row)?;

            results.push(SearchResult {
                frame_id: row.try_get("id")?,
                timestamp: created_at,
                snippet: snip
                    .as_deref()
                    .map(query_prep::strip_marks)
                    .unwrap_or_default(),
                matched_text: snip.unwrap_or_default(),
                relevance: rank.map(normalize_rank).unwrap_or(0.0),
                app_name: row.try_get("app_name")?,
                window_name: row.try_get("window_title")?,
                url: row.try_get("browser_url")?,
                segment_id: row.try_get("segment_id")?,
                video_id: row.try_get("video_id")?,
                source: if source == "secondary" {
                    CorpusSource::Secondary
                } else {
                    CorpusSource::Primary
                },
            });
        }

        let total_count: i64 = sqlx::query_scalar_with(&count_sql, count_args)
            .fetch_one(self.db.pool())
            .await?;

        Ok(SearchResults {
            results,
            total_count,
            search_time_ms: 0,
        })
    }

    fn decode_created_at(&self, row: &sqlx::sqlite::SqliteRow) -> Result<DateTime<Utc>, SearchError> {
        match self.db.config().encoding {
            retrace_db::TimestampEncoding::EpochMillis => {
                let millis: i64 = row.try_get("created_at")?;
                Ok(self.db.config().parse_date_millis(millis))
            }
            retrace_db::TimestampEncoding::Iso8601Text => {
                let text: String = row.try_get("created_at")?;
                self.db
                    .config()
                    .parse_date_text(&text)
                    .map_err(|e| SearchError::Db(retrace_db::DbError::ParseFailed(e.to_string())))
            }
        }
    }

    async fn fetch_frame_metas(
        &self,
        ids: &[i64],
        filters: &SearchFilters,
    ) -> Result<std::collections::HashMap<i64, FrameMetaRow>, SearchError> {
        use sqlx::Arguments;
        let config = self.db.config();

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let mut sql = format!(
            "SELECT id, created_at, app_name, window_title, browser_url, segment_id, video_id, source
             FROM frame WHERE id IN ({placeholders})"
        );
        let mut args = sqlx::sqlite::SqliteArguments::default();
        for id in ids {
            let _ = args.add(*id);
        }
        filters.push_sql(&mut sql, &mut args, config, "frame");

        let rows = sqlx::query_with(&sql, args).fetch_all(self.db.pool()).await?;

        let mut map = std::collections::HashMap::with_capacity(rows.len());
        for row in &rows {
            let source: String = row.try_get("source")?;
            let created_at = self.decode_created_at(row)?;
            let id: i64 = row.try_get("id")?;
            map.insert(
                id,
                FrameMetaRow {
                    id,
                    created_at,
                    app_name: row.try_get("app_name")?,
                    window_title: row.try_get("window_title")?,
                    browser_url: row.try_get("browser_url")?,
                    segment_id: row.try_get("segment_id")?,
                    video_id: row.try_get("video_id")?,
                    source: if source == "secondary" {
                        CorpusSource::Secondary
                    } else {
                        CorpusSource::Primary
                    },
                },
            );
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_db::documents::IndexedDocument;
    use retrace_db::frames::NewFrame;
    use retrace_db::DatabaseConfig;

    async fn seeded_db() -> (tempfile::TempDir, DatabaseManager) {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = DatabaseManager::open(DatabaseConfig::primary(tmp.path().to_path_buf()))
            .await
            .unwrap();
        (tmp, db)
    }

    async fn index(db: &DatabaseManager, created_at: DateTime<Utc>, content: &str, app: &str) -> i64 {
        let frame_id = db
            .insert_pending_frame(
                created_at,
                &NewFrame {
                    app_bundle_id: Some(app.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        db.insert_document_with_nodes(
            &IndexedDocument {
                frame_id,
                created_at,
                content: content.to_string(),
                chrome_text: String::new(),
                app_name: Some(app.to_string()),
                window_name: None,
                url: None,
            },
            &[],
        )
        .await
        .unwrap();
        frame_id
    }

    #[tokio::test]
    async fn empty_store_returns_empty_never_errors() {
        let (_tmp, db) = seeded_db().await;
        let engine = SearchEngine::new(&db);
        let results = engine.search(&SearchQuery::default()).await.unwrap();
        assert!(results.results.is_empty());
        assert_eq!(results.total_count, 0);
    }

    #[tokio::test]
    async fn scenario_ingest_then_query_world_and_time_range() {
        let (_tmp, db) = seeded_db().await;
        let t0 = Utc::now() - chrono::Duration::seconds(300);
        index(&db, t0, "Hello world", "com.example.Browser").await;
        let t1 = t0 + chrono::Duration::seconds(50);
        index(&db, t1, "Goodbye world", "com.example.Browser").await;
        let t2 = t1 + chrono::Duration::seconds(100);
        index(&db, t2, "Searchable content", "com.example.Browser").await;

        let engine = SearchEngine::new(&db);
        let results = engine
            .search(&SearchQuery {
                text: "world".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.results.len(), 2);

        let ranged = engine
            .search(&SearchQuery {
                text: String::new(),
                filters: SearchFilters {
                    start_date: Some(t1 - chrono::Duration::seconds(10)),
                    end_date: Some(t1 + chrono::Duration::seconds(10)),
                    ..Default::default()
                },
                mode: SearchMode::All,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ranged.results.len(), 1);
        assert_eq!(ranged.results[0].timestamp, t1);
    }

    #[tokio::test]
    async fn inverted_range_returns_empty() {
        let (_tmp, db) = seeded_db().await;
        let now = Utc::now();
        index(&db, now, "anything", "com.example.a").await;
        let engine = SearchEngine::new(&db);
        let results = engine
            .search(&SearchQuery {
                filters: SearchFilters {
                    start_date: Some(now),
                    end_date: Some(now - chrono::Duration::seconds(5)),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(results.results.is_empty());
    }

    #[tokio::test]
    async fn limit_zero_returns_empty() {
        let (_tmp, db) = seeded_db().await;
        index(&db, Utc::now(), "hello", "com.example.a").await;
        let engine = SearchEngine::new(&db);
        let results = engine
            .search(&SearchQuery {
                text: "hello".into(),
                limit: 0,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(results.results.is_empty());
    }

    #[tokio::test]
    async fn offset_beyond_population_returns_empty() {
        let (_tmp, db) = seeded_db().await;
        index(&db, Utc::now(), "hello", "com.example.a").await;
        let engine = SearchEngine::new(&db);
        let results = engine
            .search(&SearchQuery {
                text: "hello".into(),
                offset: 500,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(results.results.is_empty());
    }

    #[tokio::test]
    async fn excluded_app_set_filters_out_matches() {
        let (_tmp, db) = seeded_db().await;
        index(&db, Utc::now(), "quarterly report", "com.example.a").await;
        let engine = SearchEngine::new(&db);
        let results = engine
            .search(&SearchQuery {
                text: "quarterly".into(),
                filters: SearchFilters {
                    exclude_apps: Some(vec!["com.example.a".into()]),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(results.results.is_empty());
    }

    #[tokio::test]
    async fn all_mode_is_most_recent_first() {
        let (_tmp, db) = seeded_db().await;
        let t0 = Utc::now() - chrono::Duration::seconds(10);
        let t1 = Utc::now();
        index(&db, t0, "alpha searchable", "com.example.a").await;
        index(&db, t1, "beta searchable", "com.example.a").await;

        let engine = SearchEngine::new(&db);
        let results = engine
            .search(&SearchQuery {
                text: "searchable".into(),
                mode: SearchMode::All,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.results.len(), 2);
        assert!(results.results[0].timestamp >= results.results[1].timestamp);
    }
}
