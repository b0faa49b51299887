//! LLM-backed filename analysis
//!
//! Sends the original filename to an OpenAI-compatible chat endpoint and
//! expects strict JSON back with title/year/type/season/episode. Responses
//! are cached by normalised filename, transient failures are retried, and
//! a deterministic regex pass fills season/episode tokens the model missed.
//! With analysis disabled the client degrades to a stem-derived guess.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::AnalyserError;
use super::filename_parser;
use super::retry::{retry_async, RetryPolicy};
use crate::db::MediaType;

const CACHE_CAPACITY: usize = 256;

const SYSTEM_PROMPT: &str = "You are a media filename analyst. Extract key information \
from a movie or TV episode filename and reply with a single JSON object containing: \
\"title\" (string, required), \"year\" (number, if identifiable), \"type\" (\"movie\" or \"tv\"), \
\"season\" (number, tv only), \"episode\" (number, tv only). Reply with JSON only.";

/// Configuration for the analyser client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub enabled: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_seconds: 30,
            enabled: true,
        }
    }
}

/// Structured guess produced by filename analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guess {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Filename analyser client
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    retry: RetryPolicy,
    cache: Mutex<LruCache<String, Guess>>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            config,
            retry: RetryPolicy::default(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero cache capacity"),
            )),
        }
    }

    /// Analyse a filename into a structured guess.
    pub async fn analyze_filename(&self, filename: &str) -> Result<Guess, AnalyserError> {
        if filename.trim().is_empty() {
            return Err(AnalyserError::Permanent("filename is empty".to_string()));
        }

        if !self.config.enabled {
            debug!(filename, "LLM analysis disabled, using stem fallback");
            return Ok(supplement_guess(fallback_guess(filename), filename));
        }

        let cache_key = normalize_filename(filename);
        if let Some(cached) = self.cache.lock().get(&cache_key).cloned() {
            debug!(filename, "Analyser cache hit");
            return Ok(cached);
        }

        let guess = retry_async(
            || self.request_guess(filename),
            &self.retry,
            AnalyserError::is_transient,
            "llm_analyze_filename",
        )
        .await?;

        let guess = supplement_guess(guess, filename);
        info!(filename, title = %guess.title, media_type = guess.media_type.as_str(), "Filename analysed");

        self.cache.lock().put(cache_key, guess.clone());
        Ok(guess)
    }

    async fn request_guess(&self, filename: &str) -> Result<Guess, AnalyserError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Analyse this filename: {}", filename),
                },
            ],
            temperature: 0.1,
            response_format: ResponseFormat {
                format: "json_object",
            },
        };

        let url = format!("{}/chat/completions", self.config.api_base);
        debug!(filename, "Sending filename to analyser");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("analyser returned HTTP {}: {}", status.as_u16(), body);
            return if is_transient_status(status.as_u16()) {
                Err(AnalyserError::Transient(message))
            } else {
                Err(AnalyserError::Permanent(message))
            };
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalyserError::Permanent(format!("invalid response body: {}", e)))?;

        let content = chat
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AnalyserError::Permanent("response carried no content".to_string()))?;

        let json = extract_json(content)?;
        parse_guess(&json)
    }
}

fn transport_error(e: reqwest::Error) -> AnalyserError {
    if e.is_decode() || e.is_builder() {
        AnalyserError::Permanent(e.to_string())
    } else {
        AnalyserError::Transient(e.to_string())
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || status == 408 || (500..600).contains(&status)
}

/// Cache key: case-folded, internal whitespace collapsed
fn normalize_filename(filename: &str) -> String {
    filename
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Minimal guess used when analysis is disabled
fn fallback_guess(filename: &str) -> Guess {
    Guess {
        title: filename_parser::stem_title(filename),
        year: None,
        media_type: MediaType::Movie,
        season: None,
        episode: None,
    }
}

/// Fill missing season/episode from deterministic filename tokens
fn supplement_guess(mut guess: Guess, filename: &str) -> Guess {
    if guess.season.is_none() || guess.episode.is_none() {
        let parsed = filename_parser::parse_episode(filename);
        if guess.season.is_none() {
            guess.season = parsed.season;
        }
        if guess.episode.is_none() {
            guess.episode = parsed.episode;
        }
    }
    guess
}

/// Extract the first balanced JSON object from a response that may carry
/// markdown fences or prose around it.
fn extract_json(response: &str) -> Result<String, AnalyserError> {
    let start = response.find('{').ok_or_else(|| {
        warn!("No JSON object in analyser response: {}", response.trim());
        AnalyserError::Permanent("no JSON object in response".to_string())
    })?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in response[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Ok(response[start..start + offset + c.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }

    warn!("Unbalanced JSON in analyser response: {}", response.trim());
    Err(AnalyserError::Permanent(
        "unbalanced JSON object in response".to_string(),
    ))
}

/// Validate the extracted JSON against the guess schema.
fn parse_guess(json: &str) -> Result<Guess, AnalyserError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| AnalyserError::Permanent(format!("invalid JSON in response: {}", e)))?;

    let title = value
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AnalyserError::Permanent("response is missing a title".to_string()))?
        .to_string();

    let media_type = match value.get("type") {
        None | Some(Value::Null) => MediaType::Movie,
        Some(Value::String(s)) if s == "movie" => MediaType::Movie,
        Some(Value::String(s)) if s == "tv" => MediaType::Tv,
        Some(other) => {
            return Err(AnalyserError::Permanent(format!(
                "unrecognised media type: {}",
                other
            )))
        }
    };

    // Years occasionally come back as strings; tolerate that, drop garbage
    let year = match value.get("year") {
        Some(Value::Number(n)) => n.as_i64().map(|y| y as i32),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };

    let season = value.get("season").and_then(Value::as_u64).map(|n| n as u32);
    let episode = value.get("episode").and_then(Value::as_u64).map(|n| n as u32);

    Ok(Guess {
        title,
        year,
        media_type,
        season,
        episode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_raw() {
        let json = extract_json(r#"{"type": "movie", "title": "Test"}"#).unwrap();
        assert!(json.contains("movie"));
    }

    #[test]
    fn test_extract_json_fenced() {
        let input = "```json\n{\"type\": \"movie\", \"title\": \"Test\"}\n```";
        let json = extract_json(input).unwrap();
        assert_eq!(json, r#"{"type": "movie", "title": "Test"}"#);
    }

    #[test]
    fn test_extract_json_with_prose() {
        let input = "Here is the result:\n{\"title\": \"Test\"} hope that helps";
        assert_eq!(extract_json(input).unwrap(), r#"{"title": "Test"}"#);
    }

    #[test]
    fn test_extract_json_balances_nesting() {
        let input = r#"{"a": {"b": 1}, "title": "x"} trailing {"noise": true}"#;
        assert_eq!(extract_json(input).unwrap(), r#"{"a": {"b": 1}, "title": "x"}"#);
    }

    #[test]
    fn test_extract_json_handles_braces_in_strings() {
        let input = r#"{"title": "a } b"}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn test_extract_json_rejects_unbalanced() {
        assert!(extract_json(r#"{"title": "x""#).is_err());
        assert!(extract_json("no json here").is_err());
    }

    #[test]
    fn test_parse_guess_happy_path() {
        let guess = parse_guess(
            r#"{"title": "Inception", "year": 2010, "type": "movie"}"#,
        )
        .unwrap();
        assert_eq!(guess.title, "Inception");
        assert_eq!(guess.year, Some(2010));
        assert_eq!(guess.media_type, MediaType::Movie);
    }

    #[test]
    fn test_parse_guess_tv_fields() {
        let guess = parse_guess(
            r#"{"title": "Chernobyl", "type": "tv", "season": 1, "episode": 2}"#,
        )
        .unwrap();
        assert_eq!(guess.media_type, MediaType::Tv);
        assert_eq!(guess.season, Some(1));
        assert_eq!(guess.episode, Some(2));
    }

    #[test]
    fn test_parse_guess_defaults_to_movie() {
        let guess = parse_guess(r#"{"title": "Inception"}"#).unwrap();
        assert_eq!(guess.media_type, MediaType::Movie);
    }

    #[test]
    fn test_parse_guess_tolerates_string_year() {
        let guess = parse_guess(r#"{"title": "Inception", "year": "2010"}"#).unwrap();
        assert_eq!(guess.year, Some(2010));

        let guess = parse_guess(r#"{"title": "Inception", "year": "unknown"}"#).unwrap();
        assert_eq!(guess.year, None);
    }

    #[test]
    fn test_parse_guess_requires_title() {
        assert!(parse_guess(r#"{"year": 2010}"#).is_err());
        assert!(parse_guess(r#"{"title": "  "}"#).is_err());
    }

    #[test]
    fn test_parse_guess_rejects_unknown_type() {
        assert!(parse_guess(r#"{"title": "x", "type": "podcast"}"#).is_err());
    }

    #[test]
    fn test_normalize_filename() {
        assert_eq!(
            normalize_filename("  The  MATRIX 1999.mkv "),
            "the matrix 1999.mkv"
        );
    }

    #[test]
    fn test_supplement_fills_missing_episode_tokens() {
        let guess = Guess {
            title: "Chernobyl".into(),
            year: None,
            media_type: MediaType::Movie,
            season: None,
            episode: None,
        };
        let supplemented = supplement_guess(guess, "Chernobyl.S01E02.mkv");
        assert_eq!(supplemented.season, Some(1));
        assert_eq!(supplemented.episode, Some(2));
    }

    #[test]
    fn test_supplement_keeps_existing_values() {
        let guess = Guess {
            title: "Chernobyl".into(),
            year: None,
            media_type: MediaType::Tv,
            season: Some(2),
            episode: Some(7),
        };
        let supplemented = supplement_guess(guess, "Chernobyl.S01E02.mkv");
        assert_eq!(supplemented.season, Some(2));
        assert_eq!(supplemented.episode, Some(7));
    }

    #[tokio::test]
    async fn test_disabled_client_uses_stem() {
        let client = LlmClient::new(LlmConfig {
            enabled: false,
            ..Default::default()
        });
        let guess = client.analyze_filename("home_video_2023.mkv").await.unwrap();
        assert_eq!(guess.title, "home_video_2023");
        assert_eq!(guess.media_type, MediaType::Movie);
        assert_eq!(guess.year, None);
    }

    #[tokio::test]
    async fn test_empty_filename_is_permanent() {
        let client = LlmClient::new(LlmConfig {
            enabled: false,
            ..Default::default()
        });
        let err = client.analyze_filename("  ").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
