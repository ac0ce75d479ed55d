//! Configuration management.
//!
//! Settings live in a TOML file with `[scraper]`, `[scheduler]` and
//! `[output]` sections. The `[scraper]` section is mandatory; a missing
//! section is a fatal bootstrap error for the whole process.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default config written when no file exists yet.
const DEFAULT_CONFIG: &str = r#"[scraper]
base_url = "https://civd.skkmigas.go.id"
user_agent = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
delay_min = 1.0
delay_max = 3.0

[scheduler]
interval_hours = 3
start_hour = 8
end_hour = 20

[output]
format = "csv"
path = "data"
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scraper: ScraperSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperSection {
    pub base_url: String,
    pub user_agent: String,
    #[serde(default = "default_delay_min")]
    pub delay_min: f64,
    #[serde(default = "default_delay_max")]
    pub delay_max: f64,
    /// Optional credentials for the browser login fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    /// Parsed for compatibility with older configs; window restriction
    /// is not enforced by the pipeline.
    #[serde(default = "default_start_hour")]
    pub start_hour: u8,
    #[serde(default = "default_end_hour")]
    pub end_hour: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

fn default_delay_min() -> f64 {
    1.0
}

fn default_delay_max() -> f64 {
    3.0
}

fn default_interval_hours() -> u64 {
    3
}

fn default_start_hour() -> u8 {
    8
}

fn default_end_hour() -> u8 {
    20
}

fn default_format() -> String {
    "csv".to_string()
}

fn default_output_path() -> PathBuf {
    PathBuf::from("data")
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            format: default_format(),
            path: default_output_path(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, creating a default file first if
    /// none exists.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            if let Some(dir) = path.parent() {
                if !dir.as_os_str().is_empty() {
                    fs::create_dir_all(dir)
                        .with_context(|| format!("creating config directory {}", dir.display()))?;
                }
            }
            fs::write(path, DEFAULT_CONFIG)
                .with_context(|| format!("writing default config to {}", path.display()))?;
            tracing::info!("Created default config file at {}", path.display());
        }

        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("parsing config file {} ([scraper] section is required)", path.display()))?;
        Ok(config)
    }

    /// Portal credentials, present only when both halves are set.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.scraper.username, &self.scraper.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        }
    }

    /// Bounds of the randomized inter-request delay, in seconds.
    pub fn delay_range(&self) -> (f64, f64) {
        let min = self.scraper.delay_min.max(0.0);
        let max = self.scraper.delay_max.max(min);
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.scraper.base_url, "https://civd.skkmigas.go.id");
        assert_eq!(config.scheduler.interval_hours, 3);
        assert_eq!(config.output.format, "csv");
        assert!(config.scraper.username.is_none());
    }

    #[test]
    fn missing_scraper_section_is_an_error() {
        let result: Result<Config, _> = toml::from_str("[output]\nformat = \"csv\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn delay_range_is_ordered() {
        let mut config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        config.scraper.delay_min = 5.0;
        config.scraper.delay_max = 2.0;
        let (min, max) = config.delay_range();
        assert!(max >= min);
    }

    #[test]
    fn load_or_create_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/config.toml");
        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.scraper.delay_min, 1.0);
    }
}
