//! CIVD scraper - tender announcement acquisition from the SKK Migas
//! CIVD procurement portal.

use civd_scraper::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let args = cli::parse();

    // Initialize logging based on verbosity
    let default_filter = if args.is_verbose() {
        "civd_scraper=info"
    } else {
        "civd_scraper=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run(args).await
}
