//! Size-aware rolling log file writer.
//!
//! [`SizedRollingWriter`] implements [`std::io::Write`] and can be passed to
//! [`tracing_appender::non_blocking`] as a drop-in replacement for
//! `RollingFileAppender`. It adds per-file size limits and a total-size cap
//! with automatic cleanup on top of date-based rotation.
//!
//! # File naming
//!
//! `{prefix}.{YYYY-MM-DD}.{index}.{suffix}`, e.g. `retrace.2026-02-17.0.log`.

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub struct SizedRollingWriter {
    dir: PathBuf,
    prefix: String,
    suffix: String,
    max_file_size: u64,
    max_total_size: u64,

    file: File,
    size: u64,
    date_str: String,
    index: u32,
    next_date: SystemTime,
    estimated_total: u64,
}

impl SizedRollingWriter {
    pub fn builder() -> Builder {
        Builder::default()
    }
}

impl Write for SizedRollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if SystemTime::now() >= self.next_date {
            self.rotate_date()?;
        }

        if self.size > 0 && self.size.saturating_add(buf.len() as u64) > self.max_file_size {
            self.rotate_size()?;
        }

        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl SizedRollingWriter {
    fn filename(prefix: &str, suffix: &str, date: &str, index: u32) -> String {
        format!("{}.{}.{}.{}", prefix, date, index, suffix)
    }

    #[cfg(test)]
    fn current_path(&self) -> PathBuf {
        self.dir.join(Self::filename(
            &self.prefix,
            &self.suffix,
            &self.date_str,
            self.index,
        ))
    }

    fn open(
        dir: &Path,
        prefix: &str,
        suffix: &str,
        date: &str,
        index: u32,
    ) -> io::Result<(File, u64)> {
        let path = dir.join(Self::filename(prefix, suffix, date, index));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn rotate_size(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.estimated_total += self.size;
        self.index += 1;

        let (file, size) = Self::open(&self.dir, &self.prefix, &self.suffix, &self.date_str, self.index)?;
        self.file = file;
        self.size = size;

        self.cleanup_if_needed();
        Ok(())
    }

    fn rotate_date(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.estimated_total += self.size;

        self.date_str = today_string();
        self.index = 0;
        self.next_date = next_midnight();

        let (file, size) = Self::open(&self.dir, &self.prefix, &self.suffix, &self.date_str, self.index)?;
        self.file = file;
        self.size = size;

        self.cleanup_if_needed();
        Ok(())
    }

    fn cleanup_if_needed(&mut self) {
        if self.estimated_total <= self.max_total_size {
            return;
        }
        self.cleanup();
    }

    fn cleanup(&mut self) {
        let current_name = Self::filename(&self.prefix, &self.suffix, &self.date_str, self.index);

        let mut files = match collect_log_files(&self.dir, &self.prefix, &self.suffix) {
            Ok(f) => f,
            Err(_) => return,
        };

        files.retain(|f| f.name != current_name);
        files.sort_by_key(|f| f.modified);

        let mut total: u64 = files.iter().map(|f| f.size).sum::<u64>() + self.size;

        for entry in &files {
            if total <= self.max_total_size {
                break;
            }
            if fs::remove_file(&entry.path).is_ok() {
                total -= entry.size;
            }
        }

        self.estimated_total = total;
    }
}

pub struct Builder {
    directory: Option<PathBuf>,
    prefix: String,
    suffix: String,
    max_file_size: u64,
    max_total_size: u64,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            directory: None,
            prefix: "retrace".into(),
            suffix: "log".into(),
            max_file_size: 50 * 1024 * 1024,
            max_total_size: 200 * 1024 * 1024,
        }
    }
}

impl Builder {
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = Some(dir.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn max_total_size(mut self, bytes: u64) -> Self {
        self.max_total_size = bytes;
        self
    }

    pub fn build(self) -> io::Result<SizedRollingWriter> {
        let dir = self
            .directory
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "directory is required"))?;

        fs::create_dir_all(&dir)?;

        let date_str = today_string();
        let (latest_index, estimated_total) = scan_existing(&dir, &self.prefix, &self.suffix, &date_str);

        let index = {
            let path = dir.join(SizedRollingWriter::filename(&self.prefix, &self.suffix, &date_str, latest_index));
            if path.exists() {
                match fs::metadata(&path) {
                    Ok(m) if m.len() >= self.max_file_size => latest_index + 1,
                    _ => latest_index,
                }
            } else {
                latest_index
            }
        };

        let (file, size) = SizedRollingWriter::open(&dir, &self.prefix, &self.suffix, &date_str, index)?;
        let next_date = next_midnight();

        Ok(SizedRollingWriter {
            dir,
            prefix: self.prefix,
            suffix: self.suffix,
            max_file_size: self.max_file_size,
            max_total_size: self.max_total_size,
            file,
            size,
            date_str,
            index,
            next_date,
            estimated_total,
        })
    }
}

fn today_string() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

fn next_midnight() -> SystemTime {
    use chrono::{Duration as CDuration, TimeZone};
    let tomorrow = Local::now().date_naive() + CDuration::days(1);
    let midnight = tomorrow.and_hms_opt(0, 0, 0).expect("valid HMS");
    let dt = Local.from_local_datetime(&midnight).earliest().expect("valid local datetime");
    SystemTime::from(dt)
}

struct LogFileEntry {
    path: PathBuf,
    name: String,
    size: u64,
    modified: SystemTime,
}

fn collect_log_files(dir: &Path, prefix: &str, suffix: &str) -> io::Result<Vec<LogFileEntry>> {
    let dot_prefix = format!("{}.", prefix);
    let dot_suffix = format!(".{}", suffix);

    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&dot_prefix) && name.ends_with(&dot_suffix) {
            if let Ok(meta) = entry.metadata() {
                if meta.is_file() {
                    out.push(LogFileEntry {
                        path: entry.path(),
                        name,
                        size: meta.len(),
                        modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    });
                }
            }
        }
    }
    Ok(out)
}

fn scan_existing(dir: &Path, prefix: &str, suffix: &str, date: &str) -> (u32, u64) {
    let files = match collect_log_files(dir, prefix, suffix) {
        Ok(f) => f,
        Err(_) => return (0, 0),
    };

    let total: u64 = files.iter().map(|f| f.size).sum();

    let today_prefix = format!("{}.{}.", prefix, date);
    let dot_suffix = format!(".{}", suffix);

    let mut max_index: u32 = 0;
    for f in &files {
        if let Some(rest) = f.name.strip_prefix(&today_prefix) {
            if let Some(idx_str) = rest.strip_suffix(&dot_suffix) {
                if let Ok(idx) = idx_str.parse::<u32>() {
                    max_index = max_index.max(idx);
                }
            }
        }
    }

    (max_index, total)
}

/// Install a `tracing_subscriber` pipeline writing to both stdout and a
/// `SizedRollingWriter` rooted at `storage_root/logs` (spec.md §7). Returns
/// the `WorkerGuard` — dropping it flushes the non-blocking writer, so the
/// caller must hold it for the process lifetime.
pub fn init_logging(storage_root: &Path) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let writer = SizedRollingWriter::builder()
        .directory(storage_root.join("logs"))
        .prefix("retrace")
        .suffix("log")
        .build()?;
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_writer(dir: &Path, max_file: u64, max_total: u64) -> SizedRollingWriter {
        SizedRollingWriter::builder()
            .directory(dir)
            .prefix("test")
            .suffix("log")
            .max_file_size(max_file)
            .max_total_size(max_total)
            .build()
            .expect("failed to build writer")
    }

    fn count_log_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|ext| ext.to_str()).map(|ext| ext == "log").unwrap_or(false))
            .count()
    }

    fn total_log_size(dir: &Path) -> u64 {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|ext| ext.to_str()).map(|ext| ext == "log").unwrap_or(false))
            .map(|e| e.metadata().map(|m| m.len()).unwrap_or(0))
            .sum()
    }

    #[test]
    fn basic_write_creates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = test_writer(tmp.path(), 1024, 4096);

        write!(w, "hello world").unwrap();
        w.flush().unwrap();

        assert_eq!(count_log_files(tmp.path()), 1);
        assert_eq!(total_log_size(tmp.path()), 11);
    }

    #[test]
    fn rotates_on_size_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = test_writer(tmp.path(), 50, 10_000);

        w.write_all(&[b'A'; 30]).unwrap();
        assert_eq!(count_log_files(tmp.path()), 1);

        w.write_all(&[b'B'; 30]).unwrap();
        assert_eq!(count_log_files(tmp.path()), 2);

        w.write_all(&[b'C'; 30]).unwrap();
        assert_eq!(count_log_files(tmp.path()), 3);
    }

    #[test]
    fn oversized_single_write_lands_in_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = test_writer(tmp.path(), 10, 10_000);

        w.write_all(&[b'X'; 100]).unwrap();
        w.flush().unwrap();
        assert_eq!(count_log_files(tmp.path()), 1);
        assert_eq!(total_log_size(tmp.path()), 100);

        w.write_all(&[b'Y'; 5]).unwrap();
        w.flush().unwrap();
        assert_eq!(count_log_files(tmp.path()), 2);
    }

    #[test]
    fn cleanup_deletes_oldest_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = test_writer(tmp.path(), 50, 150);

        for _ in 0..6 {
            w.write_all(&[b'Z'; 55]).unwrap();
        }
        w.flush().unwrap();

        let total = total_log_size(tmp.path());
        assert!(total <= 150 + 55);
        let count = count_log_files(tmp.path());
        assert!(count < 6);
    }

    #[test]
    fn active_file_never_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = test_writer(tmp.path(), 10, 15);

        for i in 0u8..5 {
            w.write_all(&[b'A' + i; 12]).unwrap();
        }
        w.flush().unwrap();

        let current = w.current_path();
        assert!(current.exists());
        w.write_all(b"still works").unwrap();
        w.flush().unwrap();
        assert!(current.exists());
    }

    #[test]
    fn resumes_from_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let today = today_string();

        let f0 = tmp.path().join(format!("test.{}.0.log", today));
        let f1 = tmp.path().join(format!("test.{}.1.log", today));
        fs::write(&f0, &[b'A'; 20]).unwrap();
        fs::write(&f1, &[b'B'; 20]).unwrap();

        let mut w = test_writer(tmp.path(), 100, 10_000);
        w.write_all(b"continued").unwrap();
        w.flush().unwrap();

        let content = fs::read(&f1).unwrap();
        assert_eq!(content.len(), 29);
    }

    #[test]
    fn filename_format() {
        let name = SizedRollingWriter::filename("retrace", "log", "2026-02-17", 3);
        assert_eq!(name, "retrace.2026-02-17.3.log");
    }

    #[test]
    fn scan_existing_finds_max_index() {
        let tmp = tempfile::tempdir().unwrap();
        let today = today_string();

        for i in [0, 2, 5] {
            let name = format!("test.{}.{}.log", today, i);
            fs::write(tmp.path().join(name), &[0u8; 10]).unwrap();
        }

        let (max_idx, total) = scan_existing(tmp.path(), "test", "log", &today);
        assert_eq!(max_idx, 5);
        assert_eq!(total, 30);
    }

    #[test]
    fn builder_requires_directory() {
        let result = SizedRollingWriter::builder().prefix("test").suffix("log").build();
        assert!(result.is_err());
    }

    #[test]
    fn writer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SizedRollingWriter>();
    }
}
