//! Command-line entry points (spec.md §7): `serve` runs the long-lived
//! service; `search` and `stats` are one-shot commands against an already
//! running (or just-opened) store, mirroring the teacher's search CLI but
//! against `retrace_search::SearchQuery` instead of a content-type union.

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use retrace_search::{SearchFilters, SearchMode, SearchQuery};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "retrace", version, about = "A personal screen-memory engine")]
pub struct Cli {
    /// Storage root, defaults to `~/.retrace`.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the capture/ingest/search service in the foreground.
    Serve,
    /// Search the indexed corpus from the command line.
    Search(SearchArgs),
    /// Print storage statistics.
    Stats,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SearchArgs {
    pub query: String,

    #[arg(long)]
    pub from: Option<String>,
    #[arg(long)]
    pub to: Option<String>,
    #[arg(long)]
    pub app: Option<String>,
    #[arg(long)]
    pub exclude_app: Option<String>,
    #[arg(long, default_value = "relevant")]
    pub mode: SearchModeArg,
    #[arg(long, default_value_t = 20)]
    pub limit: i64,
    #[arg(long, default_value_t = 0)]
    pub offset: i64,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SearchModeArg {
    Relevant,
    All,
}

impl From<SearchModeArg> for SearchMode {
    fn from(value: SearchModeArg) -> Self {
        match value {
            SearchModeArg::Relevant => SearchMode::Relevant,
            SearchModeArg::All => SearchMode::All,
        }
    }
}

/// Build a `SearchQuery` from parsed CLI args, resolving `--from`/`--to`
/// time specs the way the teacher's search CLI does.
pub fn build_search_query(args: &SearchArgs) -> anyhow::Result<SearchQuery> {
    let start_date = args.from.as_deref().map(parse_time_spec).transpose()?;
    let end_date = args.to.as_deref().map(parse_time_spec).transpose()?;

    Ok(SearchQuery {
        text: args.query.clone(),
        filters: SearchFilters {
            start_date,
            end_date,
            include_apps: args.app.clone().map(|a| vec![a]),
            exclude_apps: args.exclude_app.clone().map(|a| vec![a]),
        },
        mode: args.mode.into(),
        limit: args.limit,
        offset: args.offset,
    })
}

pub fn print_search_results(args: &SearchArgs, results: &retrace_search::SearchResults) {
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "query": args.query,
                "from": args.from,
                "to": args.to,
                "app": args.app,
                "limit": args.limit,
                "offset": args.offset,
                "total": results.total_count,
                "search_time_ms": results.search_time_ms,
                "data": results.results,
            }))
            .unwrap_or_default()
        );
        return;
    }

    if results.results.is_empty() {
        println!("no results");
        return;
    }

    for item in &results.results {
        let app = item.app_name.clone().unwrap_or_else(|| "-".to_string());
        let window = item.window_name.clone().unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {} | {}  {}",
            item.timestamp.to_rfc3339(),
            app,
            window,
            first_line(&item.snippet)
        );
    }
}

fn first_line(s: &str) -> String {
    let s = s.trim();
    let mut line = s.lines().next().unwrap_or("").trim().to_string();
    const MAX: usize = 200;
    if line.len() > MAX {
        line.truncate(MAX);
        line.push_str("...");
    }
    line
}

pub fn resolve_data_dir(custom: &Option<PathBuf>) -> PathBuf {
    custom.clone().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".retrace")
    })
}

/// Parse a time spec: `now`, `today`, `yesterday`, RFC3339, a naive
/// datetime, or a relative duration shorthand like `2h`/`2h ago`.
pub fn parse_time_spec(spec: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw = spec.trim();
    if raw.is_empty() {
        return Err(anyhow::anyhow!("time spec is empty"));
    }

    let s = raw.to_lowercase();
    if s == "now" {
        return Ok(Utc::now());
    }

    if s == "today" {
        let local_now = Local::now();
        let local_midnight = Local
            .with_ymd_and_hms(local_now.year(), local_now.month(), local_now.day(), 0, 0, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("failed to compute local midnight for 'today'"))?;
        return Ok(local_midnight.with_timezone(&Utc));
    }

    if s == "yesterday" {
        let local_now = Local::now() - chrono::Duration::days(1);
        let local_midnight = Local
            .with_ymd_and_hms(local_now.year(), local_now.month(), local_now.day(), 0, 0, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("failed to compute local midnight for 'yesterday'"))?;
        return Ok(local_midnight.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }

    let dur_str = s.strip_suffix(" ago").unwrap_or(&s).trim();
    if let Some(dur) = parse_duration_shorthand(dur_str) {
        let dt = Utc::now() - chrono::Duration::from_std(dur)?;
        return Ok(dt);
    }

    Err(anyhow::anyhow!(
        "invalid time spec '{}'. expected RFC3339, 'today', 'yesterday', 'now', or durations like '2h'/'2h ago'",
        raw
    ))
}

fn parse_duration_shorthand(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (num, unit) = s.split_at(s.len().saturating_sub(1));
    let n: u64 = num.trim().parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(n)),
        "m" => Some(Duration::from_secs(n * 60)),
        "h" => Some(Duration::from_secs(n * 60 * 60)),
        "d" => Some(Duration::from_secs(n * 60 * 60 * 24)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_now_and_relative_shorthand() {
        let now = parse_time_spec("now").unwrap();
        assert!((Utc::now() - now).num_seconds().abs() < 2);

        let two_hours_ago = parse_time_spec("2h ago").unwrap();
        let expected = Utc::now() - chrono::Duration::hours(2);
        assert!((two_hours_ago - expected).num_seconds().abs() < 2);
    }

    #[test]
    fn parses_rfc3339() {
        let dt = parse_time_spec("2026-01-01T00:00:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_time_spec("not a time").is_err());
    }

    #[test]
    fn build_search_query_maps_filters() {
        let args = SearchArgs {
            query: "invoice".to_string(),
            from: Some("2026-01-01T00:00:00Z".to_string()),
            to: None,
            app: Some("com.example.app".to_string()),
            exclude_app: None,
            mode: SearchModeArg::All,
            limit: 10,
            offset: 0,
            json: false,
        };
        let query = build_search_query(&args).unwrap();
        assert_eq!(query.text, "invoice");
        assert_eq!(query.mode, SearchMode::All);
        assert_eq!(query.filters.include_apps, Some(vec!["com.example.app".to_string()]));
    }
}
