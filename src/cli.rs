//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use tracing::info;

use crate::analyze::Analyzer;
use crate::config::Config;
use crate::download::Downloader;
use crate::models::{Category, DownloadOutcome};
use crate::scheduler;
use crate::session::Session;

#[derive(Parser)]
#[command(
    name = "civd",
    about = "Scrapes tender announcements from the SKK Migas CIVD portal",
    version
)]
pub struct Cli {
    /// Path to the TOML config file (created with defaults if missing)
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one full scrape of both tender categories
    Run {
        /// Also download every attachment found on the cards
        #[arg(long)]
        download_attachments: bool,

        /// Output directory (defaults to the configured output path)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Scrape on the configured interval until interrupted
    Watch {
        /// Also download attachments on every scheduled run
        #[arg(long)]
        download_attachments: bool,
    },
    /// Inspect the portal's scripts and record discovered endpoints
    Analyze,
    /// Download a single attachment URL through the resolution cascade
    Download {
        /// Attachment URL as it appears on a tender card
        url: String,

        /// Category directory to file the attachment under
        #[arg(long, default_value = "prakualifikasi")]
        category: String,
    },
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_or_create(&cli.config)?;

    match cli.command {
        Command::Run {
            download_attachments,
            output_dir,
        } => {
            let output_dir = output_dir.unwrap_or_else(|| config.output.path.clone());
            let report = scheduler::run_once(&config, &output_dir, download_attachments).await?;
            println!(
                "{} {} records scraped into {}",
                style("Done:").green().bold(),
                report.records,
                output_dir.display()
            );
            if download_attachments {
                println!(
                    "Attachments: {} saved, {} skipped, {} failed",
                    report.saved, report.skipped, report.failed
                );
            }
        }
        Command::Watch {
            download_attachments,
        } => {
            println!(
                "{} scraping every {} hours, Ctrl-C to stop",
                style("Watching:").cyan().bold(),
                config.scheduler.interval_hours
            );
            let output_dir = config.output.path.clone();
            scheduler::watch(&config, &output_dir, download_attachments).await;
        }
        Command::Analyze => {
            let mut session = Session::new(&config)?;
            let artifacts = Analyzer::new()
                .analyze(&mut session, &config.output.path)
                .await?;
            println!("{} {} artifacts:", style("Wrote").green().bold(), artifacts.len());
            for path in artifacts {
                println!("  {}", path.display());
            }
        }
        Command::Download { url, category } => {
            let category = match category.as_str() {
                "pelelangan" => Category::Pelelangan,
                _ => Category::Prakualifikasi,
            };
            let mut session = Session::new(&config)?;
            let downloader = Downloader::new(config.credentials());
            info!("Downloading {} as {}", url, category);
            match downloader
                .download(&mut session, &url, &config.output.path, category)
                .await
            {
                DownloadOutcome::Saved(path) => {
                    println!("{} {}", style("Saved:").green().bold(), path.display());
                }
                DownloadOutcome::Skipped(path) => {
                    println!("{} {}", style("Exists:").yellow().bold(), path.display());
                }
                DownloadOutcome::Failed(reason) => {
                    println!("{} {}", style("Failed:").red().bold(), reason);
                    anyhow::bail!("download failed: {}", reason);
                }
            }
        }
    }

    Ok(())
}
