//! Media files database repository
//!
//! The media_files table is the sole persistent entity of the pipeline:
//! one row per discovered file, identified by its (device_id, inode) pair
//! so that renames and duplicate directory entries do not create new rows.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::SqlitePool;

/// Processing states of a media file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    NoMatch,
    Conflict,
}

impl FileStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::NoMatch => "NO_MATCH",
            Self::Conflict => "CONFLICT",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "NO_MATCH" => Some(Self::NoMatch),
            "CONFLICT" => Some(Self::Conflict),
            _ => None,
        }
    }
}

/// Kind of catalogue entry a file was matched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Tv => "tv",
        }
    }

    pub const fn opposite(self) -> Self {
        match self {
            Self::Movie => Self::Tv,
            Self::Tv => Self::Movie,
        }
    }
}

/// Media file record from the database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MediaFileRecord {
    pub id: i64,
    pub device_id: i64,
    pub inode: i64,
    pub original_filepath: String,
    pub original_filename: String,
    pub file_size: i64,
    pub status: String,
    pub retry_count: i64,
    pub tmdb_id: Option<i64>,
    pub media_type: Option<String>,
    pub llm_guess: Option<Json<serde_json::Value>>,
    pub processed_data: Option<Json<serde_json::Value>>,
    pub new_filepath: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaFileRecord {
    pub fn file_status(&self) -> Option<FileStatus> {
        FileStatus::from_str(&self.status)
    }
}

/// Input for registering a discovered file
#[derive(Debug, Clone)]
pub struct NewMediaFile {
    pub device_id: u64,
    pub inode: u64,
    pub original_filepath: String,
    pub original_filename: String,
    pub file_size: u64,
}

const SELECT_COLUMNS: &str = "id, device_id, inode, original_filepath, original_filename, \
     file_size, status, retry_count, tmdb_id, media_type, llm_guess, processed_data, \
     new_filepath, error_message, created_at, updated_at";

#[derive(Clone)]
pub struct MediaFileRepository {
    pool: SqlitePool,
}

impl MediaFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a discovered file, keyed by its filesystem identity.
    ///
    /// Idempotent under concurrent scans: the UNIQUE (device_id, inode)
    /// constraint absorbs duplicate inserts and the existing id is returned
    /// with `was_new = false`.
    pub async fn register_if_new(&self, input: &NewMediaFile) -> Result<(i64, bool)> {
        let now = Utc::now();
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT OR IGNORE INTO media_files (
                device_id, inode, original_filepath, original_filename,
                file_size, status, retry_count, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6, $7)
            RETURNING id
            "#,
        )
        .bind(input.device_id as i64)
        .bind(input.inode as i64)
        .bind(&input.original_filepath)
        .bind(&input.original_filename)
        .bind(input.file_size as i64)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok((id, true));
        }

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM media_files WHERE device_id = $1 AND inode = $2",
        )
        .bind(input.device_id as i64)
        .bind(input.inode as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok((existing, false))
    }

    /// Get a media file by id
    pub async fn get(&self, id: i64) -> Result<Option<MediaFileRecord>> {
        let record = sqlx::query_as::<_, MediaFileRecord>(&format!(
            "SELECT {SELECT_COLUMNS} FROM media_files WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get a media file by its filesystem identity
    pub async fn get_by_identity(
        &self,
        device_id: u64,
        inode: u64,
    ) -> Result<Option<MediaFileRecord>> {
        let record = sqlx::query_as::<_, MediaFileRecord>(&format!(
            "SELECT {SELECT_COLUMNS} FROM media_files WHERE device_id = $1 AND inode = $2"
        ))
        .bind(device_id as i64)
        .bind(inode as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List all files currently in the given status, oldest first
    pub async fn list_with_status(&self, status: FileStatus) -> Result<Vec<MediaFileRecord>> {
        let records = sqlx::query_as::<_, MediaFileRecord>(&format!(
            "SELECT {SELECT_COLUMNS} FROM media_files WHERE status = $1 ORDER BY created_at, id"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Number of rows in the table
    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM media_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            FileStatus::Pending,
            FileStatus::Processing,
            FileStatus::Completed,
            FileStatus::Failed,
            FileStatus::NoMatch,
            FileStatus::Conflict,
        ] {
            assert_eq!(FileStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(FileStatus::from_str("QUEUED"), None);
    }

    #[test]
    fn test_media_type_opposite() {
        assert_eq!(MediaType::Movie.opposite(), MediaType::Tv);
        assert_eq!(MediaType::Tv.opposite(), MediaType::Movie);
    }

    #[test]
    fn test_media_type_serde() {
        assert_eq!(serde_json::to_string(&MediaType::Tv).unwrap(), "\"tv\"");
        let parsed: MediaType = serde_json::from_str("\"movie\"").unwrap();
        assert_eq!(parsed, MediaType::Movie);
    }
}
