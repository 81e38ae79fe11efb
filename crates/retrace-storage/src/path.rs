//! Storage path layout (spec.md §6): `<root>/chunks/YYYYMM/<unix-ms>`,
//! extensionless. The relative path is what gets persisted; the root is
//! joined back in at read time so the store is portable across machines.

use chrono::{DateTime, Utc};

pub fn segment_relative_path(started_at: DateTime<Utc>) -> String {
    let month = started_at.format("%Y%m");
    let unix_ms = started_at.timestamp_millis();
    format!("chunks/{month}/{unix_ms}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_year_month_and_unix_millis() {
        let dt = Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap();
        let path = segment_relative_path(dt);
        assert_eq!(path, format!("chunks/202603/{}", dt.timestamp_millis()));
    }

    #[test]
    fn has_no_file_extension() {
        let dt = Utc::now();
        let path = segment_relative_path(dt);
        assert!(std::path::Path::new(&path).extension().is_none());
    }
}
