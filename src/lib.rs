//! linkarr - media library organizer
//!
//! Scans a source directory for video files, identifies each file with an
//! LLM-backed filename analysis and a TMDB lookup, then exposes it under a
//! media-server-friendly path via a hard link. Progress is tracked per file
//! in SQLite so restarts and user-triggered retries converge.

pub mod app;
pub mod config;
pub mod db;
pub mod services;
