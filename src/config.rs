use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard safety ceiling: files larger than this are **always** skipped for
/// indexing, regardless of config. Parsing a multi-megabyte minified bundle
/// costs far more than the symbols it could ever contribute.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 1_048_576; // 1 MiB

/// Controls workspace scanning behavior (what to skip).
///
/// Note: `.gitignore` is always respected by discovery; these are additional
/// hard skips for noisy monorepo content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory *names* to skip anywhere in the tree (e.g. "generated", "tmp").
    ///
    /// These are compared against path components, not full paths.
    pub exclude_dir_names: Vec<String>,

    /// Glob patterns matched against workspace-relative paths (e.g. "**/*.gen.ts").
    pub exclude_globs: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dir_names: vec![],
            exclude_globs: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output_dir: PathBuf,
    /// Enabled language ids; the extractor registry decides which file
    /// extensions each id covers.
    pub languages: Vec<String>,
    /// Settings that govern file discovery and exclusion.
    pub scan: ScanConfig,
    /// Cap on how many discovered files the initial seeding batch may submit.
    pub max_init_files: usize,
    /// Per-file size cap; clamped to [`ABSOLUTE_MAX_FILE_BYTES`].
    pub max_file_bytes: u64,
    /// Debounce window before staged index mutations are physically written.
    pub flush_debounce_ms: u64,
    /// Nominal entry count of the file-artifact eviction cache.
    pub cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(".polysym"),
            languages: vec![
                "rust".to_string(),
                "typescript".to_string(),
                "python".to_string(),
                "go".to_string(),
            ],
            scan: ScanConfig::default(),
            max_init_files: 500,
            max_file_bytes: ABSOLUTE_MAX_FILE_BYTES,
            flush_debounce_ms: 50,
            cache_capacity: 128,
        }
    }
}

impl Config {
    pub fn effective_max_file_bytes(&self) -> u64 {
        self.max_file_bytes.min(ABSOLUTE_MAX_FILE_BYTES)
    }

    pub fn flush_debounce(&self) -> Duration {
        Duration::from_millis(self.flush_debounce_ms)
    }

    pub fn language_enabled(&self, id: &str) -> bool {
        self.languages.iter().any(|l| l == id)
    }
}

pub fn load_config(repo_root: &Path) -> Config {
    let primary = repo_root.join(".polysym.json");

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else { return Config::default() };

    serde_json::from_str::<Config>(&text).unwrap_or_else(|_| Config::default())
}
