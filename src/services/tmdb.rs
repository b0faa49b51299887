//! TMDB (The Movie Database) API client
//!
//! Typed movie/TV search with a hybrid fallback: when the search for the
//! guessed type comes back empty, the opposite type is tried once, which
//! recovers most analyser movie/tv mislabels. In-flight requests across the
//! whole process are capped by a counting semaphore, and transient failures
//! are retried with exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::error::CatalogueError;
use super::llm::Guess;
use super::retry::{retry_async, RetryPolicy};
use crate::db::MediaType;

const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";

/// Configuration for the catalogue client
#[derive(Debug, Clone)]
pub struct TmdbConfig {
    pub api_key: String,
    pub language: String,
    pub base_url: String,
    /// Maximum in-flight requests across the process
    pub concurrency: usize,
    pub timeout_seconds: u64,
    pub enabled: bool,
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            language: "en-US".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            concurrency: 10,
            timeout_seconds: 15,
            enabled: true,
        }
    }
}

/// Catalogue match selected for a file; persisted as processed_data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMatch {
    pub tmdb_id: i64,
    pub media_type: MediaType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MovieSearchResponse {
    results: Vec<MovieResult>,
}

#[derive(Debug, Deserialize)]
struct MovieResult {
    id: i64,
    title: String,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TvSearchResponse {
    results: Vec<TvResult>,
}

#[derive(Debug, Deserialize)]
struct TvResult {
    id: i64,
    name: String,
    first_air_date: Option<String>,
}

/// A single search hit, normalised across the two endpoints
#[derive(Debug, Clone)]
struct TitleHit {
    id: i64,
    title: String,
    year: Option<i32>,
}

/// TMDB client with concurrency capping and retry logic
pub struct TmdbClient {
    client: reqwest::Client,
    config: TmdbConfig,
    semaphore: Semaphore,
    retry: RetryPolicy,
}

impl TmdbClient {
    pub fn new(config: TmdbConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");
        let semaphore = Semaphore::new(config.concurrency.max(1));

        Self {
            client,
            config,
            semaphore,
            retry: RetryPolicy::default(),
        }
    }

    /// Instrumentation hook: permits currently free on the request semaphore
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Search the catalogue for the analysed guess.
    ///
    /// `Ok(None)` means both typed searches came back empty (or lookup is
    /// disabled); errors carry the transient/permanent classification.
    pub async fn search_media(&self, guess: &Guess) -> Result<Option<MediaMatch>, CatalogueError> {
        if !self.config.enabled {
            debug!(title = %guess.title, "Catalogue lookup disabled");
            return Ok(None);
        }

        let primary = guess.media_type;
        let hit = match self.search_typed(primary, guess).await? {
            Some(hit) => Some((primary, hit)),
            None => {
                let fallback = primary.opposite();
                debug!(
                    title = %guess.title,
                    fallback = fallback.as_str(),
                    "Primary search empty, trying opposite type"
                );
                self.search_typed(fallback, guess)
                    .await?
                    .map(|hit| (fallback, hit))
            }
        };

        let Some((media_type, hit)) = hit else {
            info!(title = %guess.title, "No catalogue match for either type");
            return Ok(None);
        };

        info!(
            title = %hit.title,
            tmdb_id = hit.id,
            media_type = media_type.as_str(),
            "Catalogue match found"
        );

        let (season, episode) = match media_type {
            MediaType::Tv => (guess.season, guess.episode),
            MediaType::Movie => (None, None),
        };

        Ok(Some(MediaMatch {
            tmdb_id: hit.id,
            media_type,
            title: hit.title,
            year: hit.year,
            season,
            episode,
        }))
    }

    async fn search_typed(
        &self,
        media_type: MediaType,
        guess: &Guess,
    ) -> Result<Option<TitleHit>, CatalogueError> {
        retry_async(
            || self.search_request(media_type, guess),
            &self.retry,
            CatalogueError::is_transient,
            match media_type {
                MediaType::Movie => "tmdb_search_movie",
                MediaType::Tv => "tmdb_search_tv",
            },
        )
        .await
    }

    async fn search_request(
        &self,
        media_type: MediaType,
        guess: &Guess,
    ) -> Result<Option<TitleHit>, CatalogueError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("semaphore closed");

        let endpoint = match media_type {
            MediaType::Movie => "search/movie",
            MediaType::Tv => "search/tv",
        };
        let url = format!("{}/{}", self.config.base_url, endpoint);

        let mut query: Vec<(&str, String)> = vec![
            ("api_key", self.config.api_key.clone()),
            ("query", guess.title.clone()),
            ("language", self.config.language.clone()),
        ];
        if let Some(year) = guess.year {
            let key = match media_type {
                MediaType::Movie => "year",
                MediaType::Tv => "first_air_date_year",
            };
            query.push((key, year.to_string()));
        }

        debug!(endpoint, title = %guess.title, "Searching catalogue");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("catalogue returned HTTP {}: {}", status.as_u16(), body);
            return if is_transient_status(status.as_u16()) {
                Err(CatalogueError::Transient(message))
            } else {
                Err(CatalogueError::Permanent(message))
            };
        }

        let hit = match media_type {
            MediaType::Movie => {
                let parsed: MovieSearchResponse = response.json().await.map_err(|e| {
                    CatalogueError::Permanent(format!("invalid search response: {}", e))
                })?;
                parsed.results.into_iter().next().map(|m| TitleHit {
                    id: m.id,
                    title: m.title,
                    year: parse_year(m.release_date.as_deref()),
                })
            }
            MediaType::Tv => {
                let parsed: TvSearchResponse = response.json().await.map_err(|e| {
                    CatalogueError::Permanent(format!("invalid search response: {}", e))
                })?;
                parsed.results.into_iter().next().map(|t| TitleHit {
                    id: t.id,
                    title: t.name,
                    year: parse_year(t.first_air_date.as_deref()),
                })
            }
        };

        Ok(hit)
    }
}

fn transport_error(e: reqwest::Error) -> CatalogueError {
    if e.is_decode() || e.is_builder() {
        CatalogueError::Permanent(e.to_string())
    } else {
        CatalogueError::Transient(e.to_string())
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || status == 408 || (500..600).contains(&status)
}

/// Extract the year from a TMDB date string ("2010-07-15")
fn parse_year(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}
