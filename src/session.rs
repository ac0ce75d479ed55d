//! Portal session management.
//!
//! The portal only serves search results to clients that carry a
//! `jsessionid` cookie, handed out on the first request to the root
//! page. A session is considered established when the final URL after
//! redirects carries the session token, not merely on HTTP 200.

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ScrapeError;

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cookie-bearing connection to the portal.
pub struct Session {
    client: Client,
    base_url: String,
    user_agent: String,
    valid: bool,
    delay_range: (f64, f64),
    /// Where diagnostic response bodies are written.
    diagnostics_dir: PathBuf,
}

impl Session {
    /// Build a client with a browser-like header set and a cookie jar.
    pub fn new(config: &Config) -> Result<Self, ScrapeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = Client::builder()
            .user_agent(&config.scraper.user_agent)
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.scraper.base_url.trim_end_matches('/').to_string(),
            user_agent: config.scraper.user_agent.clone(),
            valid: false,
            delay_range: config.delay_range(),
            diagnostics_dir: config.output.path.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Probe the portal root and check for an established session.
    ///
    /// The raw body is persisted for diagnostic inspection regardless of
    /// the outcome.
    pub async fn initialize(&mut self) -> Result<bool, ScrapeError> {
        info!("Initializing session with {}", self.base_url);
        self.valid = false;

        let response = self.client.get(&self.base_url).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        let body = response.text().await?;

        let diag_path = self.diagnostics_dir.join("main_page.html");
        if let Some(dir) = diag_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&diag_path, &body)?;
        info!("Saved root page to {} for inspection", diag_path.display());

        if !status.is_success() {
            warn!("Session probe returned HTTP {}", status);
            return Ok(false);
        }

        if final_url.to_ascii_lowercase().contains("jsessionid") {
            info!("Session established: {}", final_url);
            self.valid = true;
            Ok(true)
        } else {
            warn!("No session id found in response URL {}", final_url);
            Ok(false)
        }
    }

    /// Lazily establish a session, with a single re-probe per call site.
    pub async fn ensure_valid(&mut self) -> Result<(), ScrapeError> {
        if self.valid {
            return Ok(());
        }
        match self.initialize().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ScrapeError::Session),
            Err(e) => {
                warn!("Session initialization failed: {}", e);
                Err(ScrapeError::Session)
            }
        }
    }

    /// Drop session state so the next dependent call re-probes.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// GET a page as text.
    pub async fn get_text(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self.client.get(url).send().await?;
        Ok(response.text().await?)
    }

    /// POST a form and return the body as text, along with success-ness.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<(reqwest::StatusCode, String), ScrapeError> {
        let response = self.client.post(url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// GET with extra headers and a custom timeout; used by the
    /// attachment downloader to look like in-page navigation.
    pub async fn get_with_headers(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<reqwest::Response, ScrapeError> {
        let response = self
            .client
            .get(url)
            .headers(headers)
            .timeout(timeout)
            .send()
            .await?;
        Ok(response)
    }

    /// Sleep for a random duration drawn from the configured range.
    /// Randomized on purpose: a fixed cadence is easy for the server to
    /// fingerprint.
    pub async fn polite_delay(&self) {
        let (min, max) = self.delay_range;
        self.delay_between(min, max).await;
    }

    /// Sleep for a random duration in `[min, max]` seconds.
    pub async fn delay_between(&self, min: f64, max: f64) {
        let secs = if max > min {
            rand::thread_rng().gen_range(min..max)
        } else {
            min
        };
        if secs > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        }
    }
}
