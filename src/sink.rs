//! Result persistence: per-category CSV files plus a combined JSON
//! document per run.
//!
//! CSV writing is deliberately hand-rolled: the output is a flat,
//! stable column set and the only interesting part is quoting, which
//! fits in a dozen lines. The nested attachment list rides along as a
//! JSON-encoded cell so nothing is lost in the flat view.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::json;
use tracing::info;

use crate::error::ScrapeError;
use crate::models::{Category, TenderRecord};

const COLUMNS: &[&str] = &[
    "title",
    "date",
    "company",
    "description",
    "page",
    "category",
    "attachment_url",
    "attachment_name",
    "attachment_id",
    "attachments",
];

/// Writes scrape results under a fixed output directory.
pub struct ResultSink {
    output_dir: PathBuf,
}

impl ResultSink {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Write one category's records to `<dir>/<category>_<timestamp>.csv`.
    /// An empty batch writes nothing and returns `None`.
    pub fn write_category_csv(
        &self,
        category: Category,
        records: &[TenderRecord],
    ) -> Result<Option<PathBuf>, ScrapeError> {
        if records.is_empty() {
            return Ok(None);
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!(
            "{}_{}.csv",
            category.as_str(),
            Local::now().format("%Y%m%d_%H%M%S")
        ));

        let mut file = std::fs::File::create(&path)?;
        write_row(&mut file, &COLUMNS.iter().map(|c| c.to_string()).collect::<Vec<_>>())?;
        for record in records {
            write_row(&mut file, &flat_row(record))?;
        }

        info!("Wrote {} records to {}", records.len(), path.display());
        Ok(Some(path))
    }

    /// Write the combined run document: all categories in one JSON file,
    /// keyed by category name.
    pub fn write_combined_json(
        &self,
        batches: &[(Category, Vec<TenderRecord>)],
    ) -> Result<PathBuf, ScrapeError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!(
            "scraper_results_{}.json",
            Local::now().format("%Y%m%d_%H%M%S")
        ));

        let mut doc = serde_json::Map::new();
        for (category, records) in batches {
            doc.insert(category.as_str().to_string(), json!(records));
        }
        let body = serde_json::to_string_pretty(&serde_json::Value::Object(doc))
            .map_err(|e| ScrapeError::Extraction(e.to_string()))?;
        std::fs::write(&path, body)?;

        info!("Wrote combined results to {}", path.display());
        Ok(path)
    }
}

/// Flatten a record: the first attachment is promoted to top-level
/// columns, the full list rides along as JSON.
fn flat_row(record: &TenderRecord) -> Vec<String> {
    let primary = record.primary_attachment();
    vec![
        record.title.clone().unwrap_or_default(),
        record.date.clone(),
        record.company.clone(),
        record.description.clone(),
        record.page.to_string(),
        record
            .category
            .map(|c| c.as_str().to_string())
            .unwrap_or_default(),
        primary.map(|a| a.url.clone()).unwrap_or_default(),
        primary.map(|a| a.name.clone()).unwrap_or_default(),
        primary
            .and_then(|a| a.file_id.clone())
            .unwrap_or_default(),
        serde_json::to_string(&record.attachments).unwrap_or_default(),
    ]
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write one CSV row with minimal quoting.
fn write_row<W: Write>(mut w: W, row: &[String]) -> std::io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first {
            write!(w, ",")?;
        } else {
            first = false;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{}", cell)?;
        }
    }
    writeln!(w)
}
