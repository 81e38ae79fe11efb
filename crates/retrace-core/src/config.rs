//! Enumerated runtime configuration (spec.md §6).
//!
//! `RetraceConfig` is assembled once (CLI flags over a config file) and
//! handed by reference into every component's constructor — there is no
//! global state (spec.md §9).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One secondary, read-only, historical corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondarySourceConfig {
    pub db_path: PathBuf,
    pub chunks_path: PathBuf,
    /// Passphrase for the AES-compatible sqlite extension. Never logged.
    pub password: String,
    /// Timestamps at or after this date belong to the primary corpus.
    pub cutoff_date: chrono::DateTime<chrono::Utc>,
}

impl std::fmt::Debug for SecondarySourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondarySourceConfig")
            .field("db_path", &self.db_path)
            .field("chunks_path", &self.chunks_path)
            .field("password", &"<redacted>")
            .field("cutoff_date", &self.cutoff_date)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetraceConfig {
    pub storage_root: PathBuf,
    /// `0` means forever.
    pub retention_days: i64,
    pub max_storage_gb: u64,
    pub segment_frames_cap: u32,
    pub worker_count: usize,
    pub max_retry_attempts: u32,
    pub max_queue_size: usize,
    pub ocr_languages: Vec<String>,
    pub minimum_confidence: f32,
    pub secondary_sources: Vec<SecondarySourceConfig>,
}

impl Default for RetraceConfig {
    fn default() -> Self {
        Self {
            storage_root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".retrace"),
            retention_days: 0,
            max_storage_gb: 50,
            segment_frames_cap: 150,
            worker_count: 3,
            max_retry_attempts: 3,
            max_queue_size: 1000,
            ocr_languages: vec!["en".to_string()],
            minimum_confidence: 0.0,
            secondary_sources: Vec::new(),
        }
    }
}

impl RetraceConfig {
    pub fn db_path(&self) -> PathBuf {
        self.storage_root.join("retrace.db")
    }

    pub fn chunks_root(&self) -> PathBuf {
        self.storage_root.join("chunks")
    }

    pub fn models_root(&self) -> PathBuf {
        self.storage_root.join("models")
    }

    /// Load from a TOML file, falling back to defaults for absent fields
    /// is *not* attempted here — callers that want partial overrides should
    /// start from `RetraceConfig::default()` and mutate it; this loader is
    /// for a complete, previously-written config file.
    pub fn load_from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: RetraceConfig = toml::from_str(&raw)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, raw)?;
        Ok(())
    }
}
