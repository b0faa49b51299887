//! Destination path generation
//!
//! Pure mapping from a catalogue match to the canonical library location:
//! - Movies: `<root>/Movies/Title (Year)/Title (Year).ext`
//! - TV:     `<root>/TV/Title (Year)/Season NN/Title - SNNENN.ext`
//!
//! The year and its parentheses are omitted when unknown. A missing season
//! defaults to 1; a missing episode cannot be defaulted and is an error.

use std::path::{Path, PathBuf};

use super::error::PathError;
use super::tmdb::MediaMatch;
use crate::db::MediaType;

/// Sanitize a title for use as a path component.
///
/// Strips characters reserved on common filesystems, collapses internal
/// whitespace, and trims leading/trailing dots and whitespace.
pub fn sanitize_title(title: &str) -> String {
    let sanitized = sanitize_filename::sanitize(title);
    let collapsed = sanitized.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Generate the destination path for a matched file.
///
/// Deterministic: the same match and extension always produce the same path.
pub fn generate_new_path(
    media: &MediaMatch,
    extension: &str,
    target_dir: &Path,
) -> Result<PathBuf, PathError> {
    let title = sanitize_title(&media.title);
    let folder_name = match media.year {
        Some(year) => format!("{} ({})", title, year),
        None => title.clone(),
    };

    match media.media_type {
        MediaType::Movie => {
            let filename = with_extension(&folder_name, extension);
            Ok(target_dir.join("Movies").join(&folder_name).join(filename))
        }
        MediaType::Tv => {
            let season = media.season.unwrap_or(1);
            let episode = media.episode.ok_or(PathError::MissingEpisode)?;
            let season_folder = format!("Season {:02}", season);
            let filename = with_extension(
                &format!("{} - S{:02}E{:02}", title, season, episode),
                extension,
            );
            Ok(target_dir
                .join("TV")
                .join(&folder_name)
                .join(season_folder)
                .join(filename))
        }
    }
}

fn with_extension(base: &str, extension: &str) -> String {
    if extension.is_empty() {
        base.to_string()
    } else {
        format!("{}.{}", base, extension)
    }
}
