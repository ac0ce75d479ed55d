//! Error taxonomy for the scrape pipeline.
//!
//! Every variant is caught at the boundary that owns a single item (one
//! page, one card, one download candidate) and converted into an
//! empty/skip/failed result. Nothing here terminates the process.

use thiserror::Error;

/// Errors that can occur while scraping or downloading.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// No valid portal session; callers re-probe once before giving up.
    #[error("no valid session with the portal")]
    Session,

    /// HTTP/network failure on a single request.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered, but not with a usable status.
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    /// A single card or block was malformed.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Downloaded payload looks like an error page, not the target file.
    #[error("invalid content from {url}: type={content_type:?} length={content_length}")]
    ContentValidation {
        url: String,
        content_type: Option<String>,
        content_length: u64,
    },

    /// Browser-level failure in a fallback path.
    #[error("browser automation failed: {0}")]
    Automation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
