//! Application configuration management

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL or path (SQLite)
    /// For SQLite: use DATABASE_PATH or DATABASE_URL with sqlite:// prefix
    pub database_url: String,

    /// Directory scanned for incoming media files
    pub source_dir: PathBuf,

    /// Root of the organized library (hard links are created below this)
    pub target_dir: PathBuf,

    /// Seconds between scans of the source directory
    pub scan_interval_seconds: u64,

    /// Allowed file extensions, lowercase, each with a leading dot
    pub video_extensions: Vec<String>,

    /// Files smaller than this are ignored (0 = no minimum)
    pub min_file_size_mb: u64,

    /// Skip the target directory subtree when it is nested under the source
    pub scan_exclude_target_dir: bool,

    /// Whether the directory walk follows symbolic links
    pub scan_follow_symlinks: bool,

    /// Number of concurrent pipeline workers
    pub worker_count: usize,

    /// TMDB API key
    pub tmdb_api_key: String,

    /// Maximum in-flight TMDB requests across the whole process
    pub tmdb_concurrency: usize,

    /// Language tag for TMDB responses (e.g. "en-US")
    pub tmdb_language: String,

    /// When false the catalogue lookup is skipped and files end up NO_MATCH
    pub enable_tmdb: bool,

    /// When false filenames are not sent to the LLM; a stem-derived guess is used
    pub enable_llm: bool,

    /// OpenAI-compatible API key for filename analysis
    pub openai_api_key: String,

    /// OpenAI-compatible API base URL (proxies are fine)
    pub openai_api_base: String,

    /// Model used for filename analysis
    pub openai_model: String,

    /// Log level for the tracing filter
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // For SQLite, prefer DATABASE_PATH, fall back to DATABASE_URL
        let mut database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "./data/linkarr.db".to_string());
        if !database_url.starts_with("sqlite:") {
            database_url = format!("sqlite://{}", database_url);
        }

        let source_dir = PathBuf::from(
            env::var("SOURCE_DIR").context("SOURCE_DIR must be set")?,
        );
        let target_dir = PathBuf::from(
            env::var("TARGET_DIR").context("TARGET_DIR must be set")?,
        );

        let scan_interval_seconds: u64 = env::var("SCAN_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .context("Invalid SCAN_INTERVAL_SECONDS")?;
        anyhow::ensure!(
            scan_interval_seconds >= 1,
            "SCAN_INTERVAL_SECONDS must be at least 1"
        );

        let video_extensions = parse_video_extensions(
            &env::var("VIDEO_EXTENSIONS")
                .unwrap_or_else(|_| ".mp4,.mkv,.avi,.mov,.wmv,.flv,.webm,.m4v".to_string()),
        )?;

        let min_file_size_mb: u64 = env::var("MIN_FILE_SIZE_MB")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .context("Invalid MIN_FILE_SIZE_MB")?;

        let worker_count: usize = env::var("WORKER_COUNT")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .context("Invalid WORKER_COUNT")?;
        anyhow::ensure!(worker_count >= 1, "WORKER_COUNT must be at least 1");

        let tmdb_concurrency: usize = env::var("TMDB_CONCURRENCY")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("Invalid TMDB_CONCURRENCY")?;
        anyhow::ensure!(tmdb_concurrency >= 1, "TMDB_CONCURRENCY must be at least 1");

        Ok(Self {
            database_url,
            source_dir,
            target_dir,
            scan_interval_seconds,
            video_extensions,
            min_file_size_mb,
            scan_exclude_target_dir: env_bool("SCAN_EXCLUDE_TARGET_DIR", true),
            scan_follow_symlinks: env_bool("SCAN_FOLLOW_SYMLINKS", false),
            worker_count,
            tmdb_api_key: env::var("TMDB_API_KEY").unwrap_or_default(),
            tmdb_concurrency,
            tmdb_language: env::var("TMDB_LANGUAGE").unwrap_or_else(|_| "en-US".to_string()),
            enable_tmdb: env_bool("ENABLE_TMDB", true),
            enable_llm: env_bool("ENABLE_LLM", true),
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            openai_api_base: env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Minimum file size in bytes
    pub fn min_file_size_bytes(&self) -> u64 {
        self.min_file_size_mb * 1024 * 1024
    }
}

/// Parse the comma-separated extension allow-list.
///
/// Each entry must carry a leading dot; entries are lowercased so the
/// scanner can compare case-insensitively. Empty entries are dropped.
pub fn parse_video_extensions(raw: &str) -> Result<Vec<String>> {
    let extensions: Vec<String> = raw
        .split(',')
        .map(|ext| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();

    anyhow::ensure!(!extensions.is_empty(), "VIDEO_EXTENSIONS must not be empty");

    for ext in &extensions {
        anyhow::ensure!(
            ext.starts_with('.') && ext.len() > 1,
            "Extension must start with a dot: {}",
            ext
        );
    }

    Ok(extensions)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_extensions() {
        let exts = parse_video_extensions(".mp4,.MKV, .avi").unwrap();
        assert_eq!(exts, vec![".mp4", ".mkv", ".avi"]);
    }

    #[test]
    fn test_parse_video_extensions_drops_empty_entries() {
        let exts = parse_video_extensions(".mp4,,.mkv,").unwrap();
        assert_eq!(exts, vec![".mp4", ".mkv"]);
    }

    #[test]
    fn test_parse_video_extensions_requires_leading_dot() {
        assert!(parse_video_extensions("mp4").is_err());
        assert!(parse_video_extensions(".mp4,mkv").is_err());
    }

    #[test]
    fn test_parse_video_extensions_rejects_empty_list() {
        assert!(parse_video_extensions("").is_err());
        assert!(parse_video_extensions(" , ,").is_err());
    }

    #[test]
    fn test_bare_dot_is_rejected() {
        assert!(parse_video_extensions(".").is_err());
    }
}
