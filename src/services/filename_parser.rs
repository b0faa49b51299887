//! Deterministic filename parser for scene-style release names
//!
//! Parses filenames like:
//! - "Chernobyl.S01E02.1080p.WEB.mkv"
//! - "Corner Gas 6x12 Super Sensitive.mkv"
//! - "Inception.2010.1080p.BluRay.mkv"
//!
//! The LLM analyser is the primary source of metadata; this parser fills
//! season/episode when the analyser leaves them out, and supplies the
//! title guess when analysis is disabled entirely.

use regex::Regex;

/// Episode information extracted from a filename
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEpisode {
    pub show_name: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<u32>,
}

/// Parse a filename to extract season/episode tokens
pub fn parse_episode(filename: &str) -> ParsedEpisode {
    let mut result = ParsedEpisode::default();

    // Clean up the filename (replace dots/underscores with spaces)
    let cleaned = filename.replace(['.', '_'], " ");

    // Pattern 1: S01E01 format (most common)
    let sxxexx_re = Regex::new(r"(?i)(.+?)\s*[Ss](\d{1,2})[Ee](\d{1,2})").unwrap();
    if let Some(caps) = sxxexx_re.captures(&cleaned) {
        result.show_name = Some(clean_show_name(caps.get(1).unwrap().as_str()));
        result.season = caps.get(2).and_then(|m| m.as_str().parse().ok());
        result.episode = caps.get(3).and_then(|m| m.as_str().parse().ok());
    }
    // Pattern 2: 1x01 format
    else {
        let nxnn_re = Regex::new(r"(?i)(.+?)\s*(\d{1,2})x(\d{2})").unwrap();
        if let Some(caps) = nxnn_re.captures(&cleaned) {
            result.show_name = Some(clean_show_name(caps.get(1).unwrap().as_str()));
            result.season = caps.get(2).and_then(|m| m.as_str().parse().ok());
            result.episode = caps.get(3).and_then(|m| m.as_str().parse().ok());
        }
    }

    // Year, for disambiguation
    let year_re = Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap();
    if let Some(caps) = year_re.captures(&cleaned) {
        result.year = caps.get(1).and_then(|m| m.as_str().parse().ok());
    }

    result
}

/// Title guess derived from a file stem when no analyser output is available
pub fn stem_title(filename: &str) -> String {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    stem.to_string()
}

/// Clean up an extracted show name
fn clean_show_name(name: &str) -> String {
    let cleaned = name.replace('-', " ");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sxxexx_format() {
        let parsed = parse_episode("Chernobyl.S01E02.mkv");
        assert_eq!(parsed.show_name.as_deref(), Some("Chernobyl"));
        assert_eq!(parsed.season, Some(1));
        assert_eq!(parsed.episode, Some(2));
    }

    #[test]
    fn test_sxxexx_with_quality_noise() {
        let parsed = parse_episode("Chicago.Fire.S14E08.1080p.WEB.h264-ETHEL.mkv");
        assert_eq!(parsed.show_name.as_deref(), Some("Chicago Fire"));
        assert_eq!(parsed.season, Some(14));
        assert_eq!(parsed.episode, Some(8));
    }

    #[test]
    fn test_nxnn_format() {
        let parsed = parse_episode("Corner Gas 6x12 Super Sensitive.mkv");
        assert_eq!(parsed.show_name.as_deref(), Some("Corner Gas"));
        assert_eq!(parsed.season, Some(6));
        assert_eq!(parsed.episode, Some(12));
    }

    #[test]
    fn test_movie_has_no_episode() {
        let parsed = parse_episode("Inception.2010.1080p.mkv");
        assert_eq!(parsed.season, None);
        assert_eq!(parsed.episode, None);
        assert_eq!(parsed.year, Some(2010));
    }

    #[test]
    fn test_year_extraction() {
        let parsed = parse_episode("Fallout.2024.S01E01.1080p.mkv");
        assert_eq!(parsed.year, Some(2024));
        assert_eq!(parsed.season, Some(1));
        assert_eq!(parsed.episode, Some(1));
    }

    #[test]
    fn test_stem_title() {
        assert_eq!(stem_title("home_video_2023.mkv"), "home_video_2023");
        assert_eq!(stem_title("Inception.2010.1080p.mkv"), "Inception.2010.1080p");
    }
}
