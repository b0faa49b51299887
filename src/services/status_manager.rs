//! Atomic status transitions for media files
//!
//! Every mutation after registration goes through this manager as a single
//! guarded UPDATE: the WHERE clause names the expected current status, and a
//! zero row count is reported as `Stale` instead of applied blindly. That
//! guard is what gives the pipeline its at-most-once claim: of any number of
//! workers issuing PENDING -> PROCESSING for the same id, exactly one sees
//! a row flip.

use anyhow::Result;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::SqlitePool;
use tracing::debug;

use super::llm::Guess;
use super::tmdb::MediaMatch;

/// Result of a guarded transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The row moved to the requested state
    Applied,
    /// The guard failed: another actor changed the row first
    Stale,
}

impl Transition {
    pub fn applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Clone)]
pub struct StatusManager {
    pool: SqlitePool,
}

impl StatusManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Claim a pending file for processing (PENDING -> PROCESSING).
    ///
    /// A finished attempt always leaves error_message behind (FAILED,
    /// NO_MATCH and CONFLICT all write one, and the retry transition keeps
    /// it), so its presence marks a re-attempt: the claim counts it into
    /// retry_count and clears it in the same statement.
    pub async fn claim(&self, id: i64) -> Result<Transition> {
        let result = sqlx::query(
            r#"
            UPDATE media_files
               SET status = 'PROCESSING',
                   retry_count = retry_count
                       + (CASE WHEN error_message IS NULL THEN 0 ELSE 1 END),
                   error_message = NULL,
                   updated_at = $1
             WHERE id = $2 AND status = 'PENDING'
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(self.outcome(id, "claim", result.rows_affected()))
    }

    /// Record a fully processed file (PROCESSING -> COMPLETED).
    pub async fn complete(
        &self,
        id: i64,
        guess: &Guess,
        media: &MediaMatch,
        new_filepath: &str,
    ) -> Result<Transition> {
        let result = sqlx::query(
            r#"
            UPDATE media_files
               SET status = 'COMPLETED',
                   llm_guess = $1,
                   tmdb_id = $2,
                   media_type = $3,
                   processed_data = $4,
                   new_filepath = $5,
                   error_message = NULL,
                   updated_at = $6
             WHERE id = $7 AND status = 'PROCESSING'
            "#,
        )
        .bind(Json(guess))
        .bind(media.tmdb_id)
        .bind(media.media_type.as_str())
        .bind(Json(media))
        .bind(new_filepath)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(self.outcome(id, "complete", result.rows_affected()))
    }

    /// Record an empty catalogue result (PROCESSING -> NO_MATCH).
    pub async fn no_match(&self, id: i64, guess: &Guess) -> Result<Transition> {
        let result = sqlx::query(
            r#"
            UPDATE media_files
               SET status = 'NO_MATCH',
                   llm_guess = $1,
                   error_message = 'catalogue returned no results',
                   updated_at = $2
             WHERE id = $3 AND status = 'PROCESSING'
            "#,
        )
        .bind(Json(guess))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(self.outcome(id, "no_match", result.rows_affected()))
    }

    /// Record a pre-existing destination (PROCESSING -> CONFLICT).
    pub async fn conflict(
        &self,
        id: i64,
        guess: &Guess,
        media: &MediaMatch,
        new_filepath: &str,
    ) -> Result<Transition> {
        let result = sqlx::query(
            r#"
            UPDATE media_files
               SET status = 'CONFLICT',
                   llm_guess = $1,
                   tmdb_id = $2,
                   media_type = $3,
                   processed_data = $4,
                   new_filepath = $5,
                   error_message = $6,
                   updated_at = $7
             WHERE id = $8 AND status = 'PROCESSING'
            "#,
        )
        .bind(Json(guess))
        .bind(media.tmdb_id)
        .bind(media.media_type.as_str())
        .bind(Json(media))
        .bind(new_filepath)
        .bind(format!("destination exists: {}", new_filepath))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(self.outcome(id, "conflict", result.rows_affected()))
    }

    /// Record a failed attempt (PROCESSING -> FAILED).
    ///
    /// Partial results obtained before the failure are kept: fields passed
    /// as None leave the stored values untouched.
    pub async fn fail(
        &self,
        id: i64,
        error_message: &str,
        guess: Option<&Guess>,
        media: Option<&MediaMatch>,
    ) -> Result<Transition> {
        let result = sqlx::query(
            r#"
            UPDATE media_files
               SET status = 'FAILED',
                   llm_guess = COALESCE($1, llm_guess),
                   tmdb_id = COALESCE($2, tmdb_id),
                   media_type = COALESCE($3, media_type),
                   processed_data = COALESCE($4, processed_data),
                   error_message = $5,
                   updated_at = $6
             WHERE id = $7 AND status = 'PROCESSING'
            "#,
        )
        .bind(guess.map(Json))
        .bind(media.map(|m| m.tmdb_id))
        .bind(media.map(|m| m.media_type.as_str()))
        .bind(media.map(Json))
        .bind(error_message)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(self.outcome(id, "fail", result.rows_affected()))
    }

    /// User-initiated retry ({FAILED, NO_MATCH, CONFLICT} -> PENDING).
    ///
    /// retry_count is not reset, and error_message is deliberately kept so
    /// the next claim can account for the prior attempt.
    pub async fn retry(&self, id: i64) -> Result<Transition> {
        let result = sqlx::query(
            r#"
            UPDATE media_files
               SET status = 'PENDING',
                   updated_at = $1
             WHERE id = $2 AND status IN ('FAILED', 'NO_MATCH', 'CONFLICT')
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(self.outcome(id, "retry", result.rows_affected()))
    }

    fn outcome(&self, id: i64, operation: &str, rows_affected: u64) -> Transition {
        if rows_affected == 1 {
            debug!(media_file_id = id, operation, "Status transition applied");
            Transition::Applied
        } else {
            debug!(media_file_id = id, operation, "Status transition stale");
            Transition::Stale
        }
    }
}
