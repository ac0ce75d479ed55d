//! Browser automation capability.
//!
//! The retriever and downloader only ever talk to [`BrowserPilot`]: a
//! small "render a page, wait, click, await a download" surface. The
//! concrete chromiumoxide driver lives behind the `browser` cargo
//! feature; tests inject an in-memory fake.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ScrapeError;

/// Abstract driving surface over a rendered browser page.
#[async_trait]
pub trait BrowserPilot: Send {
    /// Navigate the active page to a URL.
    async fn goto(&mut self, url: &str) -> Result<(), ScrapeError>;

    /// Wait until an element with the given id is present. Returns
    /// `false` on timeout rather than erroring; callers decide.
    async fn wait_for_id(&mut self, id: &str, timeout: Duration) -> Result<bool, ScrapeError>;

    /// Full rendered HTML of the current page.
    async fn page_html(&mut self) -> Result<String, ScrapeError>;

    /// Title of the current page, if any.
    async fn page_title(&mut self) -> Result<String, ScrapeError>;

    /// Distinct page numbers visible in the pagination control.
    async fn pagination_numbers(&mut self) -> Result<Vec<u32>, ScrapeError>;

    /// Click the numbered pagination link for `page`.
    async fn click_page_number(&mut self, page: u32) -> Result<(), ScrapeError>;

    /// Click the "Next" pagination control. Returns `false` when no
    /// clickable next control exists.
    async fn click_next(&mut self) -> Result<bool, ScrapeError>;

    /// Fill and submit a login form if one is present on the page.
    async fn submit_login(&mut self, username: &str, password: &str)
        -> Result<bool, ScrapeError>;

    /// Click the first link or button whose visible text contains
    /// `text`. Returns whether anything was clicked.
    async fn click_text(&mut self, text: &str) -> Result<bool, ScrapeError>;

    /// Click the first anchor whose href contains `needle`.
    async fn click_href_containing(&mut self, needle: &str) -> Result<bool, ScrapeError>;

    /// Wait for a browser-level download to land in the pilot's
    /// download directory; returns the first file found.
    async fn await_download(&mut self, timeout: Duration) -> Result<Option<PathBuf>, ScrapeError>;

    /// Source URL of an inline PDF viewer (iframe/embed), if the page
    /// embeds one.
    async fn inline_viewer_src(&mut self) -> Result<Option<String>, ScrapeError>;

    async fn close(&mut self);
}

#[cfg(feature = "browser")]
pub use chromium::ChromiumPilot;

#[cfg(feature = "browser")]
mod chromium {
    use super::*;

    use std::sync::Arc;

    use chromiumoxide::cdp::browser_protocol::browser::{
        SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
    };
    use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tracing::{debug, info, warn};

    /// Common Chrome executable locations.
    const CHROME_PATHS: &[&str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    fn automation<E: std::fmt::Display>(e: E) -> ScrapeError {
        ScrapeError::Automation(e.to_string())
    }

    /// Headless Chromium driver for the fallback paths.
    pub struct ChromiumPilot {
        browser: Arc<Mutex<Browser>>,
        page: Page,
        download_dir: tempfile::TempDir,
    }

    impl ChromiumPilot {
        /// Launch headless Chrome with a browser-download directory and
        /// the given user agent.
        pub async fn launch(user_agent: &str) -> Result<Self, ScrapeError> {
            let chrome_path = Self::find_chrome()?;
            info!("Launching browser at {}", chrome_path.display());

            let download_dir = tempfile::tempdir()?;

            let config = BrowserConfig::builder()
                .chrome_executable(chrome_path)
                .arg("--no-sandbox")
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .arg("--disable-blink-features=AutomationControlled")
                .arg(format!("--user-agent={}", user_agent))
                .build()
                .map_err(automation)?;

            let (browser, mut handler) = Browser::launch(config).await.map_err(automation)?;
            tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            let page = browser.new_page("about:blank").await.map_err(automation)?;
            page.execute(SetUserAgentOverrideParams::new(user_agent.to_string()))
                .await
                .map_err(automation)?;

            // Route browser-level downloads into our staging directory.
            let download_params = SetDownloadBehaviorParams::builder()
                .behavior(SetDownloadBehaviorBehavior::Allow)
                .download_path(download_dir.path().to_string_lossy().to_string())
                .build()
                .map_err(automation)?;
            if let Err(e) = page.execute(download_params).await {
                warn!("Could not set download behavior: {}", e);
            }

            Ok(Self {
                browser: Arc::new(Mutex::new(browser)),
                page,
                download_dir,
            })
        }

        fn find_chrome() -> Result<PathBuf, ScrapeError> {
            for path in CHROME_PATHS {
                let p = std::path::Path::new(path);
                if p.exists() {
                    return Ok(p.to_path_buf());
                }
            }
            for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
                if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                    if output.status.success() {
                        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                        if !path.is_empty() {
                            return Ok(PathBuf::from(path));
                        }
                    }
                }
            }
            Err(ScrapeError::Automation(
                "Chrome/Chromium not found on this system".to_string(),
            ))
        }

        async fn eval_bool(&self, script: String) -> Result<bool, ScrapeError> {
            let result = self.page.evaluate(script).await.map_err(automation)?;
            Ok(result.into_value::<bool>().unwrap_or(false))
        }
    }

    #[async_trait]
    impl BrowserPilot for ChromiumPilot {
        async fn goto(&mut self, url: &str) -> Result<(), ScrapeError> {
            debug!("Navigating to {}", url);
            self.page.goto(url).await.map_err(automation)?;
            // Downloads abort navigation; ignore the wait error in that case.
            let _ = self.page.wait_for_navigation().await;
            Ok(())
        }

        async fn wait_for_id(&mut self, id: &str, timeout: Duration) -> Result<bool, ScrapeError> {
            let selector = format!("#{}", id);
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                if self.page.find_element(selector.as_str()).await.is_ok() {
                    return Ok(true);
                }
                if tokio::time::Instant::now() >= deadline {
                    return Ok(false);
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }

        async fn page_html(&mut self) -> Result<String, ScrapeError> {
            self.page.content().await.map_err(automation)
        }

        async fn page_title(&mut self) -> Result<String, ScrapeError> {
            Ok(self
                .page
                .get_title()
                .await
                .map_err(automation)?
                .unwrap_or_default())
        }

        async fn pagination_numbers(&mut self) -> Result<Vec<u32>, ScrapeError> {
            let script = r#"
                JSON.stringify(Array.from(
                    document.querySelectorAll('.pagination .page-item')
                ).map(e => e.innerText.trim()))
            "#;
            let result = self
                .page
                .evaluate(script.to_string())
                .await
                .map_err(automation)?;
            let raw: String = result.into_value().unwrap_or_default();
            let labels: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
            let mut numbers: Vec<u32> = labels.iter().filter_map(|l| l.parse().ok()).collect();
            numbers.sort_unstable();
            numbers.dedup();
            Ok(numbers)
        }

        async fn click_page_number(&mut self, page: u32) -> Result<(), ScrapeError> {
            let script = format!(
                r#"(() => {{
                    const link = Array.from(document.querySelectorAll('.pagination a'))
                        .find(a => a.innerText.trim() === '{}');
                    if (!link) return false;
                    link.click();
                    return true;
                }})()"#,
                page
            );
            if self.eval_bool(script).await? {
                Ok(())
            } else {
                Err(ScrapeError::Automation(format!(
                    "pagination link for page {} not found",
                    page
                )))
            }
        }

        async fn click_next(&mut self) -> Result<bool, ScrapeError> {
            let script = r#"(() => {
                const link = Array.from(document.querySelectorAll('a.page-link'))
                    .find(a => a.innerText.includes('Next')
                        && !a.closest('.page-item, li')?.classList.contains('disabled'));
                if (!link) return false;
                link.click();
                return true;
            })()"#;
            self.eval_bool(script.to_string()).await
        }

        async fn submit_login(
            &mut self,
            username: &str,
            password: &str,
        ) -> Result<bool, ScrapeError> {
            let (Ok(user_field), Ok(pass_field)) = (
                self.page.find_element("#username").await,
                self.page.find_element("#password").await,
            ) else {
                return Ok(false);
            };
            let Ok(submit) = self.page.find_element("button[type='submit']").await else {
                return Ok(false);
            };

            info!("Login form present, attempting credential login");
            user_field.click().await.map_err(automation)?;
            user_field.type_str(username).await.map_err(automation)?;
            pass_field.click().await.map_err(automation)?;
            pass_field.type_str(password).await.map_err(automation)?;
            submit.click().await.map_err(automation)?;
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(true)
        }

        async fn click_text(&mut self, text: &str) -> Result<bool, ScrapeError> {
            let script = format!(
                r#"(() => {{
                    const el = Array.from(document.querySelectorAll('a, button'))
                        .find(e => e.innerText.includes('{}'));
                    if (!el) return false;
                    el.click();
                    return true;
                }})()"#,
                text.replace('\'', "\\'")
            );
            self.eval_bool(script).await
        }

        async fn click_href_containing(&mut self, needle: &str) -> Result<bool, ScrapeError> {
            let script = format!(
                r#"(() => {{
                    const el = document.querySelector("a[href*='{}']");
                    if (!el) return false;
                    el.click();
                    return true;
                }})()"#,
                needle.replace('\'', "\\'")
            );
            self.eval_bool(script).await
        }

        async fn await_download(
            &mut self,
            timeout: Duration,
        ) -> Result<Option<PathBuf>, ScrapeError> {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let mut entries: Vec<PathBuf> = std::fs::read_dir(self.download_dir.path())?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    // Chrome writes in-progress downloads as .crdownload.
                    .filter(|p| p.extension().map(|x| x != "crdownload").unwrap_or(true))
                    .collect();
                entries.sort();
                if let Some(first) = entries.into_iter().next() {
                    return Ok(Some(first));
                }
                if tokio::time::Instant::now() >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }

        async fn inline_viewer_src(&mut self) -> Result<Option<String>, ScrapeError> {
            let script = r#"(() => {
                const el = document.querySelector(
                    "iframe[src*='.pdf'], embed[src*='.pdf'], embed[type='application/pdf']");
                return el ? el.src : '';
            })()"#;
            let result = self
                .page
                .evaluate(script.to_string())
                .await
                .map_err(automation)?;
            let src: String = result.into_value().unwrap_or_default();
            Ok(if src.is_empty() { None } else { Some(src) })
        }

        async fn close(&mut self) {
            let mut browser = self.browser.lock().await;
            let _ = browser.close().await;
        }
    }
}

/// Stub used when the `browser` feature is disabled: every fallback
/// that needs a real browser reports an automation failure instead.
#[cfg(not(feature = "browser"))]
pub struct ChromiumPilot;

#[cfg(not(feature = "browser"))]
impl ChromiumPilot {
    pub async fn launch(_user_agent: &str) -> Result<Self, ScrapeError> {
        Err(ScrapeError::Automation(
            "browser support not compiled; rebuild with --features browser".to_string(),
        ))
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl BrowserPilot for ChromiumPilot {
    async fn goto(&mut self, _url: &str) -> Result<(), ScrapeError> {
        Err(ScrapeError::Automation("browser support not compiled".into()))
    }
    async fn wait_for_id(&mut self, _id: &str, _timeout: Duration) -> Result<bool, ScrapeError> {
        Ok(false)
    }
    async fn page_html(&mut self) -> Result<String, ScrapeError> {
        Err(ScrapeError::Automation("browser support not compiled".into()))
    }
    async fn page_title(&mut self) -> Result<String, ScrapeError> {
        Ok(String::new())
    }
    async fn pagination_numbers(&mut self) -> Result<Vec<u32>, ScrapeError> {
        Ok(Vec::new())
    }
    async fn click_page_number(&mut self, _page: u32) -> Result<(), ScrapeError> {
        Err(ScrapeError::Automation("browser support not compiled".into()))
    }
    async fn click_next(&mut self) -> Result<bool, ScrapeError> {
        Ok(false)
    }
    async fn submit_login(&mut self, _u: &str, _p: &str) -> Result<bool, ScrapeError> {
        Ok(false)
    }
    async fn click_text(&mut self, _text: &str) -> Result<bool, ScrapeError> {
        Ok(false)
    }
    async fn click_href_containing(&mut self, _needle: &str) -> Result<bool, ScrapeError> {
        Ok(false)
    }
    async fn await_download(&mut self, _timeout: Duration) -> Result<Option<PathBuf>, ScrapeError> {
        Ok(None)
    }
    async fn inline_viewer_src(&mut self) -> Result<Option<String>, ScrapeError> {
        Ok(None)
    }
    async fn close(&mut self) {}
}
