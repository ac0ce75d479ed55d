//! Attachment resolution and download.
//!
//! The portal's download endpoints are inconsistent: links on cards
//! point at several historical URL shapes, most of which answer HTTP
//! 200 with an HTML error page instead of a 404. Resolution therefore
//! tries an ordered list of URL templates and validates every response
//! before trusting it; when all templates fail, a real browser walks
//! the detail page and clicks through the attachment affordances.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use tracing::{info, warn};

use crate::browser::{BrowserPilot, ChromiumPilot};
use crate::error::ScrapeError;
use crate::extract::{download_path_id, query_value};
use crate::models::{Category, DownloadOutcome};
use crate::session::Session;

/// Responses shorter than this are suspect unless the content type
/// already proves they are a document.
const MIN_CONTENT_LENGTH: u64 = 10_000;

/// Byte length of the portal's known "error page served as 200".
const ERROR_PAGE_LENGTH: u64 = 1384;

/// Download requests get a generous timeout; the portal is slow to
/// stream larger PDFs.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Document-type path segments observed in working download links.
const DOC_TYPES: &[&str] = &["prakualifikasi", "pelelangan", "tender", "pengumuman", "hasil"];

/// One URL shape to try. Placeholders: `{base}`, `{id}`, `{name}`,
/// `{doc_type}`. Adding a new guess means adding a row here, not
/// touching control flow.
struct UrlTemplate {
    pattern: &'static str,
    needs_file_id: bool,
    per_doc_type: bool,
}

const URL_TEMPLATES: &[UrlTemplate] = &[
    UrlTemplate {
        pattern: "{base}/download/tnd/ann.jwebs?fileId={id}&fileName={name}",
        needs_file_id: true,
        per_doc_type: false,
    },
    UrlTemplate {
        pattern: "{base}/download/tnd/ann.jwebs?fileId={id}",
        needs_file_id: true,
        per_doc_type: false,
    },
    UrlTemplate {
        pattern: "{base}/download/file?id={id}",
        needs_file_id: true,
        per_doc_type: false,
    },
    UrlTemplate {
        pattern: "{base}/download/attachment?id={id}",
        needs_file_id: true,
        per_doc_type: false,
    },
    UrlTemplate {
        pattern: "{base}/download/blob?id={id}",
        needs_file_id: true,
        per_doc_type: false,
    },
    UrlTemplate {
        pattern: "{base}/download/file/blob?id={id}",
        needs_file_id: true,
        per_doc_type: false,
    },
    UrlTemplate {
        pattern: "{base}/download/{doc_type}/{id}/{name}",
        needs_file_id: true,
        per_doc_type: true,
    },
];

pub struct Downloader {
    min_content_length: u64,
    error_page_length: u64,
    timeout: Duration,
    /// Optional credentials for the browser login fallback.
    credentials: Option<(String, String)>,
}

impl Default for Downloader {
    fn default() -> Self {
        Self {
            min_content_length: MIN_CONTENT_LENGTH,
            error_page_length: ERROR_PAGE_LENGTH,
            timeout: DOWNLOAD_TIMEOUT,
            credentials: None,
        }
    }
}

impl Downloader {
    pub fn new(credentials: Option<(String, String)>) -> Self {
        Self {
            credentials,
            ..Self::default()
        }
    }

    /// Download one attachment into `<output_dir>/attachments/<category>/`.
    ///
    /// Idempotent by resolved filename: an existing file short-circuits
    /// to `Skipped` before any network traffic. Failures are reported,
    /// never propagated; one bad attachment must not abort its siblings.
    pub async fn download(
        &self,
        session: &mut Session,
        url: &str,
        output_dir: &Path,
        category: Category,
    ) -> DownloadOutcome {
        if url.is_empty() {
            return DownloadOutcome::Failed("empty attachment URL".to_string());
        }

        let filename = derive_filename(url);
        let dir = output_dir.join("attachments").join(category.as_str());
        if let Err(e) = std::fs::create_dir_all(&dir) {
            return DownloadOutcome::Failed(format!("creating {}: {}", dir.display(), e));
        }
        let dest = dir.join(&filename);
        if dest.exists() {
            info!("File already exists: {}", dest.display());
            return DownloadOutcome::Skipped(dest);
        }

        if session.ensure_valid().await.is_err() {
            return DownloadOutcome::Failed("no valid session for download".to_string());
        }

        let file_id = derive_file_id(url, &filename);
        let candidates = candidate_urls(session.base_url(), url, file_id.as_deref(), &filename);

        for candidate in &candidates {
            match self.try_candidate(session, candidate, &dir, &dest).await {
                Ok(path) => return DownloadOutcome::Saved(path),
                Err(e) => {
                    // A transport failure may mean the cookie expired;
                    // force a re-probe on the next dependent call.
                    if matches!(e, ScrapeError::Transport(_)) {
                        session.invalidate();
                    }
                    warn!("Candidate {} rejected: {}", candidate, e);
                }
            }
        }

        warn!(
            "All {} candidates failed for {}, escalating to browser",
            candidates.len(),
            url
        );
        self.browser_fallback(session, url, file_id.as_deref(), &dir, &dest)
            .await
    }

    /// Fetch one candidate URL and validate it looks like a document,
    /// not the portal's error page. The body is staged in a temp file
    /// and only moved to the final path after validation.
    async fn try_candidate(
        &self,
        session: &Session,
        candidate: &str,
        dir: &Path,
        dest: &Path,
    ) -> Result<PathBuf, ScrapeError> {
        let response = session
            .get_with_headers(candidate, browser_headers(session.base_url()), self.timeout)
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::UnexpectedStatus(status));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_length = response.content_length().unwrap_or(0);

        if !self.is_valid_content(content_type.as_deref(), content_length) {
            return Err(ScrapeError::ContentValidation {
                url: candidate.to_string(),
                content_type,
                content_length,
            });
        }

        let body = response.bytes().await?;
        stage_and_place(dir, dest, &body)?;
        info!("Attachment saved to {}", dest.display());
        Ok(dest.to_path_buf())
    }

    /// A response is a plausible document when its content type says
    /// so, or when it is large enough and not the known error page.
    /// Heuristic thresholds; a small valid PDF can be falsely rejected,
    /// which the browser fallback then has to rescue.
    fn is_valid_content(&self, content_type: Option<&str>, content_length: u64) -> bool {
        if let Some(ct) = content_type {
            if ct.contains("application/pdf") || ct.contains("application/octet-stream") {
                return true;
            }
        }
        content_length > self.min_content_length && content_length != self.error_page_length
    }

    /// Full browser automation: acquire cookies, optionally log in,
    /// click through the detail page, then navigate straight at the
    /// URL and wait for a download to land.
    async fn browser_fallback(
        &self,
        session: &mut Session,
        url: &str,
        file_id: Option<&str>,
        dir: &Path,
        dest: &Path,
    ) -> DownloadOutcome {
        let mut pilot = match ChromiumPilot::launch(session.user_agent()).await {
            Ok(p) => p,
            Err(e) => return DownloadOutcome::Failed(format!("browser unavailable: {}", e)),
        };
        let outcome = self
            .drive_browser(&mut pilot, session, url, file_id, dir, dest)
            .await;
        pilot.close().await;
        match outcome {
            Ok(path) => DownloadOutcome::Saved(path),
            Err(e) => DownloadOutcome::Failed(e.to_string()),
        }
    }

    async fn drive_browser(
        &self,
        pilot: &mut dyn BrowserPilot,
        session: &Session,
        url: &str,
        file_id: Option<&str>,
        dir: &Path,
        dest: &Path,
    ) -> Result<PathBuf, ScrapeError> {
        let base = session.base_url();

        // Warm up cookies on the main page first.
        pilot.goto(base).await?;
        tokio::time::sleep(Duration::from_secs(3)).await;

        if let Some((username, password)) = &self.credentials {
            let _ = pilot.submit_login(username, password).await;
        }

        // Try the tender detail page first; its affordances sometimes
        // trigger the download the raw URL refuses.
        if let Some(id) = file_id {
            let detail_url = format!("{}/detail/{}", base, id);
            if pilot.goto(&detail_url).await.is_ok() {
                tokio::time::sleep(Duration::from_secs(2)).await;
                if pilot.click_text("Lebih lanjut").await.unwrap_or(false) {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                let _ = pilot.click_text("Attachment").await;
            }
        }

        // Then navigate straight at the original URL.
        pilot.goto(url).await?;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let title = pilot.page_title().await.unwrap_or_default();
        let html = pilot.page_html().await.unwrap_or_default();
        if title.contains("404") || html.contains("Not Found") {
            warn!("Browser hit a not-found page for {}", url);
            let mut clicked = pilot.click_href_containing("download").await.unwrap_or(false);
            if !clicked && pilot.click_text("Lebih lanjut").await.unwrap_or(false) {
                tokio::time::sleep(Duration::from_secs(2)).await;
                clicked = pilot.click_href_containing("download").await.unwrap_or(false)
                    || pilot.click_text("Attachment").await.unwrap_or(false);
            }
            if clicked {
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }

        if let Some(downloaded) = pilot.await_download(Duration::from_secs(10)).await? {
            let body = std::fs::read(&downloaded)?;
            stage_and_place(dir, dest, &body)?;
            info!("Browser download saved to {}", dest.display());
            return Ok(dest.to_path_buf());
        }

        // Last resort: the page may embed the document in a viewer.
        if let Some(src) = pilot.inline_viewer_src().await? {
            info!("Found inline viewer source: {}", src);
            let response = session
                .get_with_headers(&src, browser_headers(base), self.timeout)
                .await?;
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            if response.status().is_success()
                && content_type
                    .as_deref()
                    .map(|ct| ct.contains("application/pdf"))
                    .unwrap_or(false)
            {
                let body = response.bytes().await?;
                stage_and_place(dir, dest, &body)?;
                return Ok(dest.to_path_buf());
            }
        }

        Err(ScrapeError::Automation(
            "no file landed in the browser download directory".to_string(),
        ))
    }
}

/// Stage bytes next to the destination, then move into place. A partial
/// or invalid file must never be visible at the final path.
fn stage_and_place(dir: &Path, dest: &Path, body: &[u8]) -> Result<(), ScrapeError> {
    use std::io::Write;

    let mut staging = tempfile::NamedTempFile::new_in(dir)?;
    staging.write_all(body)?;
    staging
        .persist(dest)
        .map_err(|e| ScrapeError::Io(e.error))?;
    Ok(())
}

/// Resolve the target filename: `fileName=` fragment, else trailing
/// path segment, else a timestamped synthetic name. Percent-decoded,
/// spaces normalized to underscores.
fn derive_filename(url: &str) -> String {
    let raw = query_value(url, "fileName")
        .or_else(|| {
            url.rsplit('/')
                .next()
                .map(|s| s.split('?').next().unwrap_or(s).to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_default();

    let decoded = urlencoding::decode(&raw)
        .map(|s| s.into_owned())
        .unwrap_or(raw);
    let cleaned = decoded.replace("%20", "_").replace(' ', "_").replace('/', "_");

    if cleaned.is_empty() {
        format!("attachment_{}.pdf", Local::now().format("%Y%m%d_%H%M%S"))
    } else {
        cleaned
    }
}

/// Resolve the portal file id: `fileId=` fragment, `/download/<x>/<id>`
/// path shape, or the filename itself when it is purely numeric.
fn derive_file_id(url: &str, filename: &str) -> Option<String> {
    query_value(url, "fileId")
        .or_else(|| download_path_id(url))
        .or_else(|| {
            let stem = filename.split('.').next().unwrap_or(filename);
            (!stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()))
                .then(|| stem.to_string())
        })
}

/// Expand the template table into an ordered, deduplicated candidate
/// list. The original URL is always tried first; templates that need
/// an undiscovered file id are omitted.
fn candidate_urls(
    base_url: &str,
    original: &str,
    file_id: Option<&str>,
    filename: &str,
) -> Vec<String> {
    let mut candidates = vec![original.to_string()];

    for template in URL_TEMPLATES {
        if template.needs_file_id && file_id.is_none() {
            continue;
        }
        let id = file_id.unwrap_or("");
        if template.per_doc_type {
            for doc_type in DOC_TYPES {
                candidates.push(expand(template.pattern, base_url, id, filename, doc_type));
            }
        } else {
            candidates.push(expand(template.pattern, base_url, id, filename, ""));
        }
    }

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));
    candidates
}

fn expand(pattern: &str, base: &str, id: &str, name: &str, doc_type: &str) -> String {
    pattern
        .replace("{base}", base)
        .replace("{id}", id)
        .replace("{name}", name)
        .replace("{doc_type}", doc_type)
}

/// Header set that makes a download request look like in-page
/// navigation; the portal rejects bare client requests.
fn browser_headers(base_url: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(referer) = HeaderValue::from_str(&format!("{}/index.jwebs", base_url)) {
        headers.insert(REFERER, referer);
    }
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,id;q=0.8"),
    );
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    const BASE: &str = "https://civd.example.go.id";

    #[test]
    fn filename_from_query_fragment() {
        assert_eq!(
            derive_filename("https://x/download?fileId=1&fileName=Dokumen%20Tender.pdf"),
            "Dokumen_Tender.pdf"
        );
    }

    #[test]
    fn filename_from_path_segment() {
        assert_eq!(
            derive_filename("https://x/download/tender/55/berkas.pdf"),
            "berkas.pdf"
        );
    }

    #[test]
    fn filename_synthesized_when_absent() {
        let name = derive_filename("https://x/");
        assert!(name.starts_with("attachment_"));
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn file_id_from_query_path_and_numeric_name() {
        assert_eq!(
            derive_file_id("https://x/d?fileId=9&fileName=a.pdf", "a.pdf").as_deref(),
            Some("9")
        );
        assert_eq!(
            derive_file_id("https://x/download/tender/42/a.pdf", "a.pdf").as_deref(),
            Some("42")
        );
        assert_eq!(derive_file_id("https://x/y", "1234.pdf").as_deref(), Some("1234"));
        assert_eq!(derive_file_id("https://x/y", "laporan.pdf"), None);
    }

    #[test]
    fn candidates_start_with_original_and_skip_idless_templates() {
        let with_id = candidate_urls(BASE, "https://x/orig", Some("7"), "doc.pdf");
        assert_eq!(with_id[0], "https://x/orig");
        assert!(with_id
            .iter()
            .any(|u| u == &format!("{}/download/tnd/ann.jwebs?fileId=7&fileName=doc.pdf", BASE)));
        assert!(with_id
            .iter()
            .any(|u| u == &format!("{}/download/pengumuman/7/doc.pdf", BASE)));

        let without_id = candidate_urls(BASE, "https://x/orig", None, "doc.pdf");
        assert_eq!(without_id, vec!["https://x/orig".to_string()]);
    }

    #[test]
    fn candidates_are_deduplicated() {
        let original = format!("{}/download/file?id=7", BASE);
        let candidates = candidate_urls(BASE, &original, Some("7"), "doc.pdf");
        let count = candidates.iter().filter(|c| **c == original).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn content_validity_thresholds() {
        let d = Downloader::default();
        assert!(d.is_valid_content(Some("application/pdf"), 0));
        assert!(d.is_valid_content(Some("application/octet-stream; charset=x"), 0));
        assert!(d.is_valid_content(Some("text/html"), 500_000));
        // Known error page length rejected even over HTTP 200.
        assert!(!d.is_valid_content(Some("text/html"), ERROR_PAGE_LENGTH));
        assert!(!d.is_valid_content(Some("text/html"), 1200));
        assert!(!d.is_valid_content(None, 0));
    }

    #[test]
    fn staged_write_places_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.pdf");
        stage_and_place(dir.path(), &dest, b"%PDF-1.4 test").unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.4 test");
        // No staging leftovers beside the final file.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    fn test_config(output: &Path) -> Config {
        toml::from_str(&format!(
            r#"[scraper]
base_url = "{}"
user_agent = "test-agent"

[output]
path = "{}"
"#,
            BASE,
            output.display()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn existing_file_is_skipped_without_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let attachments = dir.path().join("attachments").join("prakualifikasi");
        std::fs::create_dir_all(&attachments).unwrap();
        std::fs::write(attachments.join("doc.pdf"), b"cached").unwrap();

        let config = test_config(dir.path());
        // Session is never initialized; a skip must not need one.
        let mut session = Session::new(&config).unwrap();
        let outcome = Downloader::default()
            .download(
                &mut session,
                "https://x/download?fileId=1&fileName=doc.pdf",
                dir.path(),
                Category::Prakualifikasi,
            )
            .await;
        assert_eq!(
            outcome,
            DownloadOutcome::Skipped(attachments.join("doc.pdf"))
        );
        assert_eq!(std::fs::read(attachments.join("doc.pdf")).unwrap(), b"cached");
    }
}
