//! Single runs and the long-running watch loop.
//!
//! One run scrapes both categories in a fixed order, flushing results
//! per category so an interruption only loses the in-flight category.
//! The watch loop never dies on a failed run; it logs and waits out the
//! configured interval.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::download::Downloader;
use crate::models::{Category, DownloadOutcome, TenderRecord};
use crate::retrieve::Retriever;
use crate::session::Session;
use crate::sink::ResultSink;

/// Categories in retrieval order. Prakualifikasi announcements expire
/// faster, so they go first.
const CATEGORIES: [Category; 2] = [Category::Prakualifikasi, Category::Pelelangan];

/// Tallies for one completed run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub records: usize,
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Execute one full scrape run into `output_dir`.
pub async fn run_once(
    config: &Config,
    output_dir: &Path,
    download_attachments: bool,
) -> anyhow::Result<RunReport> {
    let mut session = Session::new(config).context("building HTTP session")?;
    let retriever = Retriever::new(&config.scraper.base_url)
        .context("parsing scraper.base_url from the config")?;
    let sink = ResultSink::new(output_dir);
    let downloader = Downloader::new(config.credentials());

    let mut report = RunReport::default();
    let mut batches: Vec<(Category, Vec<TenderRecord>)> = Vec::new();

    for (i, category) in CATEGORIES.into_iter().enumerate() {
        if i > 0 {
            // Breathe between categories.
            session.delay_between(3.0, 5.0).await;
        }

        info!("Retrieving {} announcements", category);
        let records = retriever.retrieve(&mut session, category).await?;
        info!("Retrieved {} {} records", records.len(), category);
        report.records += records.len();

        // Flush immediately so a later failure keeps this category.
        sink.write_category_csv(category, &records)?;

        if download_attachments {
            download_batch(
                &downloader,
                &mut session,
                &records,
                output_dir,
                category,
                &mut report,
            )
            .await;
        }

        batches.push((category, records));
    }

    sink.write_combined_json(&batches)?;
    info!(
        "Run complete: {} records, {} saved, {} skipped, {} failed",
        report.records, report.saved, report.skipped, report.failed
    );
    Ok(report)
}

async fn download_batch(
    downloader: &Downloader,
    session: &mut Session,
    records: &[TenderRecord],
    output_dir: &Path,
    category: Category,
    report: &mut RunReport,
) {
    for record in records {
        for attachment in &record.attachments {
            match downloader
                .download(session, &attachment.url, output_dir, category)
                .await
            {
                DownloadOutcome::Saved(_) => report.saved += 1,
                DownloadOutcome::Skipped(_) => report.skipped += 1,
                DownloadOutcome::Failed(reason) => {
                    warn!("Attachment {} failed: {}", attachment.url, reason);
                    report.failed += 1;
                }
            }
            session.delay_between(1.0, 3.0).await;
        }
    }
}

/// Run forever on the configured interval. A failed run is logged and
/// the loop keeps going.
pub async fn watch(config: &Config, output_dir: &Path, download_attachments: bool) {
    let interval = Duration::from_secs(config.scheduler.interval_hours * 3600);
    loop {
        match run_once(config, output_dir, download_attachments).await {
            Ok(report) => info!("Scheduled run finished: {} records", report.records),
            Err(e) => error!("Scheduled run failed: {}", e),
        }
        info!(
            "Sleeping {} hours until the next run",
            config.scheduler.interval_hours
        );
        tokio::time::sleep(interval).await;
    }
}
