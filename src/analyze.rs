//! Structural analysis of the portal's pages.
//!
//! Not part of the scrape pipeline proper; this exists to discover how
//! the front end fetches data so the direct API calls in the retriever
//! can be kept current when the portal changes. Output is a set of
//! plain-text artifacts meant to be read by a person.

use std::path::{Path, PathBuf};

use regex::Regex;
use scraper::{Html, Selector};
use tracing::info;

use crate::error::ScrapeError;
use crate::models::Category;
use crate::session::Session;

/// Inspects scripts on the index page and its category sections and
/// writes what it finds under the output directory.
pub struct Analyzer {
    script_selector: Selector,
    ajax_url_re: Regex,
    fetch_url_re: Regex,
    open_url_re: Regex,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            // Static patterns; a panic here would be a programming error.
            script_selector: Selector::parse("script").unwrap(),
            ajax_url_re: Regex::new(r#"\$\.ajax\s*\(\s*\{[^}]*?url\s*:\s*['"]([^'"]+)['"]"#)
                .unwrap(),
            fetch_url_re: Regex::new(r#"fetch\s*\(\s*['"]([^'"]+)['"]"#).unwrap(),
            open_url_re: Regex::new(r#"\.open\s*\(\s*['"][A-Z]+['"]\s*,\s*['"]([^'"]+)['"]"#)
                .unwrap(),
        }
    }

    /// Fetch the root page plus both category sections and persist
    /// script inventories and discovered AJAX endpoints.
    pub async fn analyze(
        &self,
        session: &mut Session,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ScrapeError> {
        session.ensure_valid().await?;

        let analysis_dir = output_dir.join("analysis");
        std::fs::create_dir_all(&analysis_dir)?;
        let mut written = Vec::new();

        let root = session.get_text(session.base_url()).await?;
        let (inline, srcs) = self.collect_scripts(&root);
        written.push(write_artifact(
            &analysis_dir,
            "script_tags.js",
            &inline.join("\n\n/* ---- */\n\n"),
        )?);
        written.push(write_artifact(&analysis_dir, "script_srcs.txt", &srcs.join("\n"))?);

        let endpoints = self.collect_endpoints(&inline);
        written.push(write_artifact(
            &analysis_dir,
            "ajax_calls.txt",
            &endpoints.join("\n"),
        )?);
        info!("Found {} AJAX-style endpoints on the root page", endpoints.len());

        // The category sections are fragments of the same index page but
        // can carry section-local scripts once rendered.
        for category in [Category::Prakualifikasi, Category::Pelelangan] {
            let url = format!(
                "{}/index.jwebs#{}",
                session.base_url(),
                category.section_id()
            );
            session.polite_delay().await;
            let body = session.get_text(&url).await?;
            let (section_inline, _) = self.collect_scripts(&body);
            let name = format!("{}_scripts.js", category.section_id());
            written.push(write_artifact(
                &analysis_dir,
                &name,
                &section_inline.join("\n\n/* ---- */\n\n"),
            )?);
        }

        info!("Analysis artifacts written to {}", analysis_dir.display());
        Ok(written)
    }

    /// Split script tags into inline bodies and external `src` URLs.
    fn collect_scripts(&self, html: &str) -> (Vec<String>, Vec<String>) {
        let document = Html::parse_document(html);
        let mut inline = Vec::new();
        let mut srcs = Vec::new();
        for script in document.select(&self.script_selector) {
            if let Some(src) = script.value().attr("src") {
                srcs.push(src.to_string());
            } else {
                let body = script.text().collect::<String>();
                if !body.trim().is_empty() {
                    inline.push(body);
                }
            }
        }
        (inline, srcs)
    }

    /// Pull request URLs out of `$.ajax({url: ...})`, `fetch(...)` and
    /// `XMLHttpRequest.open(...)` call sites.
    fn collect_endpoints(&self, inline_scripts: &[String]) -> Vec<String> {
        let mut endpoints = Vec::new();
        for script in inline_scripts {
            for re in [&self.ajax_url_re, &self.fetch_url_re, &self.open_url_re] {
                for caps in re.captures_iter(script) {
                    let url = caps[1].to_string();
                    if !endpoints.contains(&url) {
                        endpoints.push(url);
                    }
                }
            }
        }
        endpoints
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn write_artifact(dir: &Path, name: &str, content: &str) -> Result<PathBuf, ScrapeError> {
    let path = dir.join(name);
    std::fs::write(&path, content)?;
    Ok(path)
}
