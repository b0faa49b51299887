//! Per-file processing pipeline
//!
//! Drives one media file id through claim -> analyse -> match -> path ->
//! link -> finalise. Each external failure is already classified by its
//! client; this module only maps outcomes onto state transitions. Partial
//! results (the guess, the catalogue match) are persisted even on failure so
//! a later retry or a human has something to look at.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::linker::{self, LinkOutcome};
use super::llm::{Guess, LlmClient};
use super::organizer;
use super::status_manager::{StatusManager, Transition};
use super::tmdb::{MediaMatch, TmdbClient};
use crate::db::MediaFileRepository;

/// Terminal result of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    NoMatch,
    Conflict,
    Failed,
    /// The id was already claimed or gone; nothing was done
    Skipped,
}

pub struct MediaProcessor {
    files: MediaFileRepository,
    status: StatusManager,
    llm: Arc<LlmClient>,
    tmdb: Arc<TmdbClient>,
    target_dir: PathBuf,
}

impl MediaProcessor {
    pub fn new(
        files: MediaFileRepository,
        status: StatusManager,
        llm: Arc<LlmClient>,
        tmdb: Arc<TmdbClient>,
        target_dir: PathBuf,
    ) -> Self {
        Self {
            files,
            status,
            llm,
            tmdb,
            target_dir,
        }
    }

    /// Run the full pipeline for one media file id.
    pub async fn process(&self, id: i64, cancel: &CancellationToken) -> Result<ProcessOutcome> {
        // Claim: of all workers holding this id, exactly one proceeds
        if !self.status.claim(id).await?.applied() {
            info!(media_file_id = id, "Claim was stale, skipping");
            return Ok(ProcessOutcome::Skipped);
        }

        let Some(record) = self.files.get(id).await? else {
            warn!(media_file_id = id, "Row disappeared after claim");
            return Ok(ProcessOutcome::Skipped);
        };

        info!(
            media_file_id = id,
            filename = %record.original_filename,
            "Processing media file"
        );

        if cancel.is_cancelled() {
            return self.fail(id, "Cancelled: shutdown while processing", None, None).await;
        }

        // Analyse
        let guess = match self.llm.analyze_filename(&record.original_filename).await {
            Ok(guess) => guess,
            Err(e) => {
                warn!(media_file_id = id, error = %e, "Filename analysis failed");
                return self.fail(id, &e.tagged(), None, None).await;
            }
        };

        if cancel.is_cancelled() {
            return self
                .fail(id, "Cancelled: shutdown while processing", Some(&guess), None)
                .await;
        }

        // Match
        let media = match self.tmdb.search_media(&guess).await {
            Ok(Some(media)) => media,
            Ok(None) => {
                self.finish(id, self.status.no_match(id, &guess).await?);
                return Ok(ProcessOutcome::NoMatch);
            }
            Err(e) => {
                warn!(media_file_id = id, error = %e, "Catalogue search failed");
                return self.fail(id, &e.tagged(), Some(&guess), None).await;
            }
        };

        // Path
        let extension = Path::new(&record.original_filepath)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let destination = match organizer::generate_new_path(&media, extension, &self.target_dir) {
            Ok(path) => path,
            Err(e) => {
                return self
                    .fail(id, &e.tagged(), Some(&guess), Some(&media))
                    .await;
            }
        };

        if cancel.is_cancelled() {
            return self
                .fail(id, "Cancelled: shutdown while processing", Some(&guess), Some(&media))
                .await;
        }

        // Link (blocking filesystem work runs off the scheduler)
        let source = PathBuf::from(&record.original_filepath);
        let link_dest = destination.clone();
        let outcome = match tokio::task::spawn_blocking(move || {
            linker::create_hardlink(&source, &link_dest)
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(media_file_id = id, error = %e, "Link task failed");
                return self
                    .fail(id, "Internal: link task failed", Some(&guess), Some(&media))
                    .await;
            }
        };

        let destination_str = destination.to_string_lossy().to_string();
        match outcome {
            LinkOutcome::Success => {
                info!(
                    media_file_id = id,
                    destination = %destination_str,
                    tmdb_id = media.tmdb_id,
                    "Media file linked"
                );
                self.finish(
                    id,
                    self.status
                        .complete(id, &guess, &media, &destination_str)
                        .await?,
                );
                Ok(ProcessOutcome::Completed)
            }
            LinkOutcome::Conflict => {
                warn!(
                    media_file_id = id,
                    destination = %destination_str,
                    "Destination already exists"
                );
                self.finish(
                    id,
                    self.status
                        .conflict(id, &guess, &media, &destination_str)
                        .await?,
                );
                Ok(ProcessOutcome::Conflict)
            }
            other => {
                let message = other
                    .tagged()
                    .unwrap_or_else(|| "LinkUnknown: unclassified link failure".to_string());
                self.fail(id, &message, Some(&guess), Some(&media)).await
            }
        }
    }

    /// Record a failure for an id whose pipeline panicked.
    pub async fn fail_panicked(&self, id: i64) {
        if let Err(e) = self
            .status
            .fail(id, "Internal: worker panicked while processing", None, None)
            .await
        {
            warn!(media_file_id = id, error = %e, "Failed to record panic failure");
        }
    }

    async fn fail(
        &self,
        id: i64,
        message: &str,
        guess: Option<&Guess>,
        media: Option<&MediaMatch>,
    ) -> Result<ProcessOutcome> {
        warn!(media_file_id = id, error = %message, "Processing failed");
        self.finish(id, self.status.fail(id, message, guess, media).await?);
        Ok(ProcessOutcome::Failed)
    }

    fn finish(&self, id: i64, transition: Transition) {
        if !transition.applied() {
            warn!(
                media_file_id = id,
                "Final transition was stale; row was mutated mid-pipeline"
            );
        }
    }
}
