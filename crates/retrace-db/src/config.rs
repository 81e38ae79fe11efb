//! `DatabaseConfig` — encapsulates the two timestamp encodings (spec.md §9)
//! so the rest of `retrace-db` (and `retrace-search`/`retrace-federation`,
//! which bind against the same pool) is written once against this
//! abstraction rather than against "integer" or "text" directly.
//!
//! Primary corpus: epoch milliseconds, stored as an SQLite `INTEGER`.
//! Secondary corpus: ISO-8601 text in UTC, matching the foreign schema's
//! native representation.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteArguments;
use sqlx::Arguments;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampEncoding {
    EpochMillis,
    Iso8601Text,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub storage_root: PathBuf,
    /// Override for the sqlite file location when it doesn't live at
    /// `storage_root/retrace.db` — a secondary corpus configured with a
    /// separate `db_path`/`chunks_path` pair (spec.md §6) sets this so
    /// `storage_root` can stay the chunks root that frame-image lookups
    /// join against.
    pub db_file: Option<PathBuf>,
    pub encoding: TimestampEncoding,
    /// `None` for the primary corpus (no cutoff); `Some` for a secondary,
    /// read-only historical corpus — rows at or after this date belong to
    /// the primary instead.
    pub cutoff: Option<DateTime<Utc>>,
    pub read_only: bool,
}

impl DatabaseConfig {
    pub fn primary(storage_root: PathBuf) -> Self {
        Self {
            storage_root,
            db_file: None,
            encoding: TimestampEncoding::EpochMillis,
            cutoff: None,
            read_only: false,
        }
    }

    pub fn secondary(storage_root: PathBuf, cutoff: DateTime<Utc>) -> Self {
        Self {
            storage_root,
            db_file: None,
            encoding: TimestampEncoding::Iso8601Text,
            cutoff: Some(cutoff),
            read_only: true,
        }
    }

    /// A secondary corpus whose sqlite file and chunk directory don't
    /// share a parent, matching `SecondarySourceConfig`'s independent
    /// `db_path`/`chunks_path` fields.
    pub fn secondary_at(db_path: PathBuf, chunks_root: PathBuf, cutoff: DateTime<Utc>) -> Self {
        Self {
            storage_root: chunks_root,
            db_file: Some(db_path),
            encoding: TimestampEncoding::Iso8601Text,
            cutoff: Some(cutoff),
            read_only: true,
        }
    }

    /// Render a timestamp the way this corpus stores it, for embedding in
    /// hand-built SQL fragments (e.g. dynamic filter clauses) where a bound
    /// parameter isn't convenient.
    pub fn format_date(&self, dt: DateTime<Utc>) -> String {
        match self.encoding {
            TimestampEncoding::EpochMillis => dt.timestamp_millis().to_string(),
            TimestampEncoding::Iso8601Text => dt.to_rfc3339(),
        }
    }

    /// Bind a timestamp onto a query argument list in this corpus's native
    /// encoding.
    pub fn bind_date<'q>(&self, args: &mut SqliteArguments<'q>, dt: DateTime<Utc>) {
        match self.encoding {
            TimestampEncoding::EpochMillis => {
                let _ = args.add(dt.timestamp_millis());
            }
            TimestampEncoding::Iso8601Text => {
                let _ = args.add(dt.to_rfc3339());
            }
        }
    }

    /// Parse a raw column value (fetched generically as the column's native
    /// SQL type) back into a `DateTime<Utc>`.
    pub fn parse_date_millis(&self, millis: i64) -> DateTime<Utc> {
        debug_assert!(matches!(self.encoding, TimestampEncoding::EpochMillis));
        Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
    }

    pub fn parse_date_text(&self, text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        debug_assert!(matches!(self.encoding, TimestampEncoding::Iso8601Text));
        DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_file
            .clone()
            .unwrap_or_else(|| self.storage_root.join("retrace.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn primary_formats_as_epoch_millis() {
        let cfg = DatabaseConfig::primary(PathBuf::from("/tmp/x"));
        let dt = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(cfg.format_date(dt), dt.timestamp_millis().to_string());
    }

    #[test]
    fn secondary_formats_as_rfc3339() {
        let cutoff = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let cfg = DatabaseConfig::secondary(PathBuf::from("/tmp/y"), cutoff);
        let dt = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(cfg.format_date(dt), dt.to_rfc3339());
        assert_eq!(cfg.cutoff, Some(cutoff));
        assert!(cfg.read_only);
    }
}
