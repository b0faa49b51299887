//! Hard-link creation
//!
//! The linker is the only component that writes to the filesystem. It never
//! overwrites, never retries, and never follows symlinks when checking the
//! destination; every failure mode is a distinct outcome for the caller to
//! map onto a state transition.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

/// EXDEV: attempted cross-filesystem hard link
const CROSS_DEVICE_ERRNO: i32 = 18;

/// Result of a hard-link attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Hard link created at the destination
    Success,
    /// Source does not exist or is not a regular file
    NoSource,
    /// Destination already exists (file, directory, or symlink)
    Conflict,
    /// Source and destination are on different filesystems
    CrossDevice,
    /// Any other filesystem error, message included
    Unknown(String),
}

impl LinkOutcome {
    /// Kind-tagged message persisted to error_message for failed outcomes
    pub fn tagged(&self) -> Option<String> {
        match self {
            Self::Success | Self::Conflict => None,
            Self::NoSource => {
                Some("LinkMissingSource: source file disappeared before linking".to_string())
            }
            Self::CrossDevice => Some(
                "LinkCrossDevice: source and target are on different filesystems".to_string(),
            ),
            Self::Unknown(msg) => Some(format!("LinkUnknown: {}", msg)),
        }
    }
}

/// Create a hard link from `source` to `destination`.
///
/// Checks run in a fixed order: source validity, destination conflict,
/// parent directory creation, then the link syscall itself. The syscall is
/// atomic, so no partial state is left behind on failure.
pub fn create_hardlink(source: &Path, destination: &Path) -> LinkOutcome {
    debug!(source = %source.display(), destination = %destination.display(), "Creating hard link");

    match fs::metadata(source) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            warn!(source = %source.display(), "Source is not a regular file");
            return LinkOutcome::NoSource;
        }
        Err(_) => {
            warn!(source = %source.display(), "Source does not exist");
            return LinkOutcome::NoSource;
        }
    }

    // symlink_metadata: a dangling symlink at the destination still counts
    if fs::symlink_metadata(destination).is_ok() {
        warn!(destination = %destination.display(), "Destination already exists");
        return LinkOutcome::Conflict;
    }

    if let Some(parent) = destination.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!(parent = %parent.display(), error = %e, "Failed to create destination directory");
            return LinkOutcome::Unknown(format!(
                "failed to create directory {}: {}",
                parent.display(),
                e
            ));
        }
    }

    match fs::hard_link(source, destination) {
        Ok(()) => {
            debug!(destination = %destination.display(), "Hard link created");
            LinkOutcome::Success
        }
        Err(e) => classify_link_error(&e, source, destination),
    }
}

fn classify_link_error(e: &io::Error, source: &Path, destination: &Path) -> LinkOutcome {
    if e.raw_os_error() == Some(CROSS_DEVICE_ERRNO) {
        warn!(
            source = %source.display(),
            destination = %destination.display(),
            "Cross-device link attempted"
        );
        return LinkOutcome::CrossDevice;
    }
    warn!(
        source = %source.display(),
        destination = %destination.display(),
        error = %e,
        "Hard link failed"
    );
    LinkOutcome::Unknown(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_successful_link_shares_inode() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mkv");
        fs::write(&source, b"data").unwrap();

        let dest = dir.path().join("library/Movies/Example (2020)/Example (2020).mkv");
        assert_eq!(create_hardlink(&source, &dest), LinkOutcome::Success);

        let src_ino = fs::metadata(&source).unwrap().ino();
        let dst_ino = fs::metadata(&dest).unwrap().ino();
        assert_eq!(src_ino, dst_ino);
    }

    #[test]
    fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = create_hardlink(&dir.path().join("missing.mkv"), &dir.path().join("d.mkv"));
        assert_eq!(outcome, LinkOutcome::NoSource);
    }

    #[test]
    fn test_directory_source_is_not_linkable() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let outcome = create_hardlink(&sub, &dir.path().join("d.mkv"));
        assert_eq!(outcome, LinkOutcome::NoSource);
    }

    #[test]
    fn test_existing_destination_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mkv");
        let dest = dir.path().join("dest.mkv");
        fs::write(&source, b"data").unwrap();
        fs::write(&dest, b"existing").unwrap();

        assert_eq!(create_hardlink(&source, &dest), LinkOutcome::Conflict);
        // pre-existing file untouched
        assert_eq!(fs::read(&dest).unwrap(), b"existing");
    }

    #[test]
    fn test_dangling_symlink_destination_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mkv");
        fs::write(&source, b"data").unwrap();
        let dest = dir.path().join("dest.mkv");
        std::os::unix::fs::symlink(dir.path().join("nowhere"), &dest).unwrap();

        assert_eq!(create_hardlink(&source, &dest), LinkOutcome::Conflict);
    }

    #[test]
    fn test_tagged_messages() {
        assert!(LinkOutcome::Success.tagged().is_none());
        assert!(LinkOutcome::Conflict.tagged().is_none());
        assert!(LinkOutcome::CrossDevice
            .tagged()
            .unwrap()
            .starts_with("LinkCrossDevice:"));
        assert!(LinkOutcome::NoSource
            .tagged()
            .unwrap()
            .starts_with("LinkMissingSource:"));
        assert!(LinkOutcome::Unknown("boom".into())
            .tagged()
            .unwrap()
            .contains("boom"));
    }
}
