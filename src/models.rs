//! Data model for tender records and their attachments.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tender category on the portal. Prakualifikasi is always retrieved
/// before Pelelangan within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Prakualifikasi,
    Pelelangan,
}

impl Category {
    /// The `type` form field the search endpoint expects.
    pub fn type_code(&self) -> &'static str {
        match self {
            Category::Prakualifikasi => "1",
            Category::Pelelangan => "2",
        }
    }

    /// Anchor id of the result container in AJAX responses.
    pub fn anchor_id(&self) -> &'static str {
        match self {
            Category::Prakualifikasi => "tnd1Result",
            Category::Pelelangan => "tnd2Result",
        }
    }

    /// Fragment of the in-page section on the rendered index page,
    /// used by the browser fallback.
    pub fn section_id(&self) -> &'static str {
        match self {
            Category::Prakualifikasi => "invitation",
            Category::Pelelangan => "bid",
        }
    }

    /// Expected item count of a full result page. Empirical, not a
    /// confirmed server contract; the retriever treats it as a hint.
    pub fn full_page_size(&self) -> usize {
        match self {
            Category::Prakualifikasi => 6,
            Category::Pelelangan => 10,
        }
    }

    /// Directory/file-prefix name for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Prakualifikasi => "prakualifikasi",
            Category::Pelelangan => "pelelangan",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attachment link found on a tender card. `url` is always
/// absolute by the time the downloader sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
    /// Proposed filename, e.g. from a `fileName=` query fragment.
    pub name: String,
    pub file_id: Option<String>,
}

/// A single tender announcement extracted from one card/block.
///
/// `title` can legitimately be absent; the record is still retained.
/// `page` and `category` are tagged by the retriever after extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenderRecord {
    pub title: Option<String>,
    /// Free-form publication deadline, not strictly parsed.
    pub date: String,
    pub company: String,
    /// Card description plus any `Label: Value` lines from the info block.
    pub description: String,
    pub page: u32,
    pub category: Option<Category>,
    pub attachments: Vec<AttachmentRef>,
}

impl TenderRecord {
    /// Tag the record with its originating page and category.
    pub fn tag(&mut self, page: u32, category: Category) {
        self.page = page;
        self.category = Some(category);
    }

    /// First attachment, promoted to top-level fields in flat output.
    pub fn primary_attachment(&self) -> Option<&AttachmentRef> {
        self.attachments.first()
    }
}

/// Result of one attachment download attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    /// File was validated and placed at the final path.
    Saved(PathBuf),
    /// A file with the resolved name already exists; nothing was fetched.
    Skipped(PathBuf),
    /// All candidates and the browser fallback failed.
    Failed(String),
}
