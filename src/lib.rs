//! Tender-announcement scraper for the SKK Migas CIVD portal.
//!
//! The pipeline is session -> retrieve -> extract -> sink, with an
//! optional attachment download pass. Direct API calls are preferred;
//! browser automation exists only as a fallback for the paths the
//! portal refuses to serve to a plain HTTP client.

pub mod analyze;
pub mod browser;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod models;
pub mod retrieve;
pub mod scheduler;
pub mod session;
pub mod sink;
