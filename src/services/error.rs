//! Error taxonomy for the processing pipeline
//!
//! Every external-call failure is translated into one of these kinds at its
//! client boundary; the worker only ever pattern-matches on the kind to pick
//! the next state transition. The persisted error_message always carries the
//! kind tag so failures remain diagnosable after the fact.

use thiserror::Error;

/// Failure of the filename analyser
#[derive(Debug, Clone, Error)]
pub enum AnalyserError {
    /// Network problems, timeouts, 5xx - worth retrying
    #[error("{0}")]
    Transient(String),

    /// Malformed or schema-violating response - retrying will not help
    #[error("{0}")]
    Permanent(String),
}

impl AnalyserError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "AnalyserTransient",
            Self::Permanent(_) => "AnalyserPermanent",
        }
    }

    /// Kind-tagged message persisted to error_message
    pub fn tagged(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Failure of the catalogue lookup
#[derive(Debug, Clone, Error)]
pub enum CatalogueError {
    /// Network problems, timeouts, 429, 5xx - worth retrying
    #[error("{0}")]
    Transient(String),

    /// 4xx other than 429 (bad key, bad request)
    #[error("{0}")]
    Permanent(String),
}

impl CatalogueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "CatalogueTransient",
            Self::Permanent(_) => "CataloguePermanent",
        }
    }

    pub fn tagged(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Destination path could not be generated from the available metadata
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("episode number is required for a tv layout")]
    MissingEpisode,
}

impl PathError {
    pub fn tagged(&self) -> String {
        format!("PathInsufficient: {}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyser_tagging() {
        let e = AnalyserError::Transient("connection refused".into());
        assert!(e.is_transient());
        assert_eq!(e.tagged(), "AnalyserTransient: connection refused");

        let e = AnalyserError::Permanent("no valid JSON in response".into());
        assert!(!e.is_transient());
        assert!(e.tagged().starts_with("AnalyserPermanent:"));
    }

    #[test]
    fn test_catalogue_tagging() {
        let e = CatalogueError::Permanent("HTTP 401".into());
        assert_eq!(e.tagged(), "CataloguePermanent: HTTP 401");
    }

    #[test]
    fn test_path_tagging() {
        assert_eq!(
            PathError::MissingEpisode.tagged(),
            "PathInsufficient: episode number is required for a tv layout"
        );
    }
}
