//! Time-range and app filters shared by both ranking modes (spec.md §4.6).

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Inclusive app set: only these bundle ids match, when present.
    pub include_apps: Option<Vec<String>>,
    /// Apps to exclude regardless of the inclusive set.
    pub exclude_apps: Option<Vec<String>>,
}

impl SearchFilters {
    /// `true` for a filter combination that can never match anything —
    /// e.g. an inverted time range — so callers can short-circuit straight
    /// to an empty result without touching the database (spec.md §8,
    /// inverted range returns empty).
    pub fn is_impossible(&self) -> bool {
        matches!((self.start_date, self.end_date), (Some(s), Some(e)) if e < s)
    }

    /// Append `AND ...` clauses (time range, app in/exclude) to `sql`,
    /// binding parameters onto `args` in the same order they appear in the
    /// generated SQL text. `frame_alias` is the table alias the generated
    /// SQL joins against (`frame` columns: `created_at`, `app_bundle_id`).
    pub fn push_sql(
        &self,
        sql: &mut String,
        args: &mut sqlx::sqlite::SqliteArguments<'_>,
        config: &retrace_db::DatabaseConfig,
        frame_alias: &str,
    ) {
        use sqlx::Arguments;

        if let Some(start) = self.start_date {
            sql.push_str(&format!(" AND {frame_alias}.created_at >= ?"));
            config.bind_date(args, start);
        }
        if let Some(end) = self.end_date {
            sql.push_str(&format!(" AND {frame_alias}.created_at <= ?"));
            config.bind_date(args, end);
        }
        if let Some(include) = &self.include_apps {
            if include.is_empty() {
                sql.push_str(" AND 0");
            } else {
                let placeholders = include.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                sql.push_str(&format!(" AND {frame_alias}.app_bundle_id IN ({placeholders})"));
                for app in include {
                    let _ = args.add(app.clone());
                }
            }
        }
        if let Some(exclude) = &self.exclude_apps {
            if !exclude.is_empty() {
                let placeholders = exclude.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                sql.push_str(&format!(
                    " AND ({frame_alias}.app_bundle_id IS NULL OR {frame_alias}.app_bundle_id NOT IN ({placeholders}))"
                ));
                for app in exclude {
                    let _ = args.add(app.clone());
                }
            }
        }
    }
}
