//! Source directory scanner
//!
//! Walks the source tree on a fixed interval, registers newly discovered
//! video files by their (device_id, inode) identity, and feeds the ids of
//! new registrations into the bounded dispatch channel. A full queue blocks
//! the scanner cooperatively; that backpressure is intentional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::db::{MediaFileRepository, NewMediaFile};

/// Filters applied during a directory walk
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    /// Lowercase extensions with leading dot, e.g. ".mkv"
    pub extensions: Vec<String>,
    /// Minimum size in bytes; a file exactly at the minimum is included
    pub min_file_size: u64,
    pub exclude_target_dir: bool,
    pub follow_symlinks: bool,
}

impl ScanConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_dir: config.source_dir.clone(),
            target_dir: config.target_dir.clone(),
            extensions: config.video_extensions.clone(),
            min_file_size: config.min_file_size_bytes(),
            exclude_target_dir: config.scan_exclude_target_dir,
            follow_symlinks: config.scan_follow_symlinks,
        }
    }
}

/// A candidate file found during a walk
#[derive(Debug, Clone)]
pub struct ProbedFile {
    pub path: PathBuf,
    pub device_id: u64,
    pub inode: u64,
    pub size: u64,
}

/// Counters for one completed scan
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanSummary {
    pub files_seen: usize,
    pub new_files: usize,
}

/// Walk the source directory once and collect candidate files.
///
/// Unreadable entries are logged and skipped; symlink loops are terminated
/// by the walker's ancestor check when following links is enabled.
pub fn probe_directory(config: &ScanConfig) -> Vec<ProbedFile> {
    use std::os::unix::fs::MetadataExt;

    let source_dir = config
        .source_dir
        .canonicalize()
        .unwrap_or_else(|_| config.source_dir.clone());
    if !source_dir.is_dir() {
        warn!(path = %source_dir.display(), "Source directory does not exist or is not a directory");
        return Vec::new();
    }
    let target_dir = config
        .target_dir
        .canonicalize()
        .unwrap_or_else(|_| config.target_dir.clone());

    let mut probed = Vec::new();

    let walker = WalkDir::new(&source_dir)
        .follow_links(config.follow_symlinks)
        .into_iter()
        .filter_entry(|entry| {
            !(config.exclude_target_dir
                && entry.file_type().is_dir()
                && entry.path() == target_dir)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during scan");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !has_allowed_extension(path, &config.extensions) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to stat file, skipping");
                continue;
            }
        };

        if config.min_file_size > 0 && metadata.len() < config.min_file_size {
            debug!(path = %path.display(), size = metadata.len(), "Skipping file below minimum size");
            continue;
        }

        probed.push(ProbedFile {
            path: path.to_path_buf(),
            device_id: metadata.dev(),
            inode: metadata.ino(),
            size: metadata.len(),
        });
    }

    probed
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let dotted = format!(".{}", ext.to_lowercase());
    extensions.iter().any(|allowed| *allowed == dotted)
}

/// Periodic scanner task
pub struct Scanner {
    files: MediaFileRepository,
    scan_config: ScanConfig,
    interval: Duration,
    queue_tx: mpsc::Sender<i64>,
    cancel: CancellationToken,
}

impl Scanner {
    pub fn new(
        files: MediaFileRepository,
        scan_config: ScanConfig,
        interval: Duration,
        queue_tx: mpsc::Sender<i64>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            files,
            scan_config,
            interval,
            queue_tx,
            cancel,
        }
    }

    /// Scan loop: one full walk per interval until cancelled.
    pub async fn run(self) {
        info!(
            source = %self.scan_config.source_dir.display(),
            interval_seconds = self.interval.as_secs(),
            "Scanner started"
        );

        let mut scan_count = 0u64;
        while !self.cancel.is_cancelled() {
            scan_count += 1;
            match self.scan_once().await {
                Ok(summary) => {
                    if summary.new_files > 0 {
                        info!(
                            scan = scan_count,
                            files_seen = summary.files_seen,
                            new_files = summary.new_files,
                            "Scan found new files"
                        );
                    } else {
                        debug!(scan = scan_count, files_seen = summary.files_seen, "Scan found nothing new");
                    }
                }
                Err(e) => {
                    warn!(scan = scan_count, error = %e, "Scan failed");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(scans = scan_count, "Scanner stopped");
    }

    /// One full walk: register every candidate, enqueue the new ids.
    pub async fn scan_once(&self) -> Result<ScanSummary> {
        let scan_config = self.scan_config.clone();
        let probed =
            tokio::task::spawn_blocking(move || probe_directory(&scan_config)).await?;

        let mut summary = ScanSummary {
            files_seen: probed.len(),
            new_files: 0,
        };

        for file in probed {
            if self.cancel.is_cancelled() {
                break;
            }

            let filename = file
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let input = NewMediaFile {
                device_id: file.device_id,
                inode: file.inode,
                original_filepath: file.path.to_string_lossy().to_string(),
                original_filename: filename,
                file_size: file.size,
            };

            let (id, was_new) = match self.files.register_if_new(&input).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "Failed to register file");
                    continue;
                }
            };

            if !was_new {
                continue;
            }

            summary.new_files += 1;
            info!(media_file_id = id, path = %file.path.display(), "Registered new media file");

            // Blocks when the queue is full; that is the backpressure contract
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                sent = self.queue_tx.send(id) => {
                    if sent.is_err() {
                        warn!("Dispatch queue closed, stopping scan early");
                        break;
                    }
                }
            }
        }

        Ok(summary)
    }
}
