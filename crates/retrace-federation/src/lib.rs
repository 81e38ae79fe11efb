//! Federated query layer (spec.md §4.7).
//!
//! Holds one primary (writable, no cutoff) and zero-or-more secondary
//! (read-only, historical) `DatabaseManager` handles, and answers range
//! queries, session listings, frame-image lookups, and searches by routing
//! each to the source(s) whose cutoff windows overlap the request, then
//! merging. All handles are non-owning (`Arc`) — this layer never owns a
//! store's lifecycle, matching spec.md §9's "store owned by the container"
//! guidance.

use chrono::{DateTime, Utc};
use retrace_core::types::CorpusSource;
use retrace_db::{DatabaseManager, Frame};
use retrace_search::{SearchEngine, SearchQuery, SearchResult, SearchResults};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FederationError {
    #[error("database error: {0}")]
    Db(#[from] retrace_db::DbError),
    #[error("search failed: {0}")]
    Search(#[from] retrace_search::SearchError),
    #[error("frame {0} has no owning video segment")]
    FrameNotFound(i64),
    #[error("storage error: {0}")]
    Storage(#[from] retrace_storage::ReadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One read-only historical corpus plus the cutoff that bounds it: rows at
/// or after `cutoff` belong to the primary instead (spec.md §4.7).
pub struct SecondarySource {
    pub db: Arc<DatabaseManager>,
    pub cutoff: DateTime<Utc>,
}

/// One (store, sub-range) pair to query as part of a federated range
/// request — the output of splitting `[start, end]` across cutoffs.
struct RangePlan {
    db: Arc<DatabaseManager>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

pub struct FederatedQueryLayer {
    primary: Arc<DatabaseManager>,
    secondaries: Vec<SecondarySource>,
    session_cache: moka::future::Cache<(i64, i64), Arc<Vec<retrace_core::types::AppSession>>>,
}

impl FederatedQueryLayer {
    pub fn new(primary: Arc<DatabaseManager>, secondaries: Vec<SecondarySource>) -> Self {
        let session_cache = moka::future::Cache::builder()
            .time_to_live(std::time::Duration::from_secs(5 * 60))
            .max_capacity(256)
            .build();
        Self {
            primary,
            secondaries,
            session_cache,
        }
    }

    /// Split `[start, end]` across every source whose cutoff overlaps it
    /// (spec.md §4.7 steps 1-2): each secondary answers
    /// `[start, min(end, cutoff)]` when `start < cutoff`; the primary
    /// answers whatever remains at or after the latest cutoff consulted.
    fn plan_ranges(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<RangePlan> {
        let mut plans = Vec::new();
        let mut max_cutoff: Option<DateTime<Utc>> = None;

        for secondary in &self.secondaries {
            if start < secondary.cutoff {
                let sub_end = end.min(secondary.cutoff);
                if sub_end > start {
                    plans.push(RangePlan {
                        db: secondary.db.clone(),
                        start,
                        end: sub_end,
                    });
                }
                max_cutoff = Some(max_cutoff.map_or(secondary.cutoff, |m| m.max(secondary.cutoff)));
            }
        }

        let primary_start = match max_cutoff {
            Some(c) => start.max(c),
            None => start,
        };
        if primary_start < end {
            plans.push(RangePlan {
                db: self.primary.clone(),
                start: primary_start,
                end,
            });
        }

        plans
    }

    /// Frames across `[start, end]`, merged from every overlapping source
    /// and sorted in `direction`, truncated to `limit`.
    pub async fn query_frames_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
        direction: SortDirection,
    ) -> Result<Vec<Frame>, FederationError> {
        if end < start || limit <= 0 {
            return Ok(Vec::new());
        }

        let plans = self.plan_ranges(start, end);
        let mut merged = Vec::new();
        for plan in plans {
            match plan.db.frames_in_range(plan.start, plan.end, None, limit).await {
                Ok(frames) => merged.extend(frames),
                Err(e) => {
                    tracing::warn!(error = %e, "federated range query: source unavailable, continuing");
                }
            }
        }

        match direction {
            SortDirection::Ascending => merged.sort_by_key(|f| f.created_at),
            SortDirection::Descending => merged.sort_by_key(|f| std::cmp::Reverse(f.created_at)),
        }
        merged.truncate(limit as usize);
        Ok(merged)
    }

    /// The `n` most recent frames across every source — primary wins ties
    /// since it is consulted last within `plan_ranges` but sorted purely by
    /// timestamp here (spec.md §8 scenario 6).
    pub async fn get_most_recent_frames(&self, n: i64) -> Result<Vec<Frame>, FederationError> {
        let earliest = DateTime::<Utc>::from_timestamp(0, 0).unwrap_or(Utc::now());
        self.query_frames_range(earliest, Utc::now(), n, SortDirection::Descending)
            .await
    }

    /// Merged `AppSession` list for `[start, end]`, cached for ~5 minutes
    /// per distinct range (spec.md §4.7).
    pub async fn get_app_sessions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Arc<Vec<retrace_core::types::AppSession>>, FederationError> {
        if end < start {
            return Ok(Arc::new(Vec::new()));
        }

        let key = (start.timestamp_millis(), end.timestamp_millis());
        if let Some(cached) = self.session_cache.get(&key).await {
            return Ok(cached);
        }

        let plans = self.plan_ranges(start, end);
        let mut merged = Vec::new();
        for plan in plans {
            match plan.db.app_sessions_in_range(plan.start, plan.end).await {
                Ok(sessions) => merged.extend(sessions),
                Err(e) => {
                    tracing::warn!(error = %e, "federated session query: source unavailable, continuing");
                }
            }
        }
        merged.sort_by_key(|s| s.start_date);

        let merged = Arc::new(merged);
        self.session_cache.insert(key, merged.clone()).await;
        Ok(merged)
    }

    /// Called by anything that writes a session (coordinator session
    /// transitions) — the cache has no write path of its own, so a writer
    /// must invalidate it explicitly (spec.md §4.7).
    pub fn secondary_count(&self) -> usize {
        self.secondaries.len()
    }

    /// Look up a single frame by id, trying the primary first and then
    /// every secondary in turn — a frame-image request only has the id to
    /// go on, not which corpus it came from.
    pub async fn get_frame(&self, frame_id: i64) -> Result<Frame, FederationError> {
        if let Ok(frame) = self.primary.get_frame(frame_id).await {
            return Ok(frame);
        }
        for secondary in &self.secondaries {
            if let Ok(frame) = secondary.db.get_frame(frame_id).await {
                return Ok(frame);
            }
        }
        Err(FederationError::FrameNotFound(frame_id))
    }

    pub async fn invalidate_session_cache(&self) {
        self.session_cache.invalidate_all();
    }

    /// Route a frame-image read by the frame's `source` tag to the store(s)
    /// that could own its video segment (spec.md §4.7). `CorpusSource` only
    /// distinguishes primary from secondary, not which secondary, so a
    /// `Secondary` frame is resolved by trying each configured secondary in
    /// turn until one owns the segment.
    pub async fn read_frame_image(&self, frame: &Frame) -> Result<image::DynamicImage, FederationError> {
        let video_id = frame.video_id.ok_or(FederationError::FrameNotFound(frame.id))?;
        let video_frame_index = frame
            .video_frame_index
            .ok_or(FederationError::FrameNotFound(frame.id))?;

        let candidates: Vec<&Arc<DatabaseManager>> = match frame.source {
            CorpusSource::Primary => vec![&self.primary],
            CorpusSource::Secondary => self.secondaries.iter().map(|s| &s.db).collect(),
        };

        let mut last_err = None;
        for db in candidates {
            match db.get_video_segment(video_id).await {
                Ok(segment) => {
                    let absolute_path = db.config().storage_root.join(&segment.relative_path);
                    let image = retrace_storage::read_frame_at(&absolute_path, video_frame_index as u32)?;
                    return Ok(image);
                }
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) => Err(FederationError::Db(e)),
            None => Err(FederationError::FrameNotFound(frame.id)),
        }
    }

    /// Search every source whose window overlaps the query's time filter
    /// (constraining each source to its cutoff window), then merge and
    /// re-sort by the selected mode (spec.md §4.7).
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResults, FederationError> {
        let earliest = DateTime::<Utc>::from_timestamp(0, 0).unwrap_or(Utc::now());
        let far_future = Utc::now() + chrono::Duration::days(365 * 100);
        let user_start = query.filters.start_date.unwrap_or(earliest);
        let user_end = query.filters.end_date.unwrap_or(far_future);

        if user_end < user_start {
            return Ok(SearchResults {
                results: Vec::new(),
                total_count: 0,
                search_time_ms: 0,
            });
        }

        let started = std::time::Instant::now();
        let per_source_limit = query.limit + query.offset;
        let plans = self.plan_ranges(user_start, user_end);

        let mut all_results: Vec<SearchResult> = Vec::new();
        let mut total_count = 0i64;

        for plan in plans {
            let mut sub_query = query.clone();
            sub_query.filters.start_date = Some(plan.start);
            sub_query.filters.end_date = Some(plan.end);
            sub_query.limit = per_source_limit.max(1);
            sub_query.offset = 0;

            let engine = SearchEngine::new(&plan.db);
            match engine.search(&sub_query).await {
                Ok(results) => {
                    total_count += results.total_count;
                    all_results.extend(results.results);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "federated search: source unavailable, continuing");
                }
            }
        }

        match query.mode {
            retrace_search::SearchMode::Relevant => {
                all_results.sort_by(|a, b| {
                    b.relevance
                        .partial_cmp(&a.relevance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            retrace_search::SearchMode::All => {
                all_results.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
            }
        }

        let page = all_results
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect();

        Ok(SearchResults {
            results: page,
            total_count,
            search_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}
