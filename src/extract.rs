//! Record extraction from HTML/AJAX payloads.
//!
//! The portal serves tender announcements as Bootstrap-style "card"
//! blocks, but the markup has shifted over time. Extraction is an
//! ordered cascade of structural strategies, tried until one yields at
//! least one record. An empty result is a normal terminal outcome, not
//! an error, and one malformed card never aborts the rest of a batch.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::models::{AttachmentRef, TenderRecord};

/// Extraction strategy: whole document in, records out. Strategies are
/// pure functions of the payload so each level is testable on its own.
type Strategy = fn(&Extractor, &Html) -> Vec<TenderRecord>;

/// Structural guesses, most specific first. The anchored-section lookup
/// runs before these; the first non-empty result wins.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("cards", Extractor::cards_in_document),
    ("columns", Extractor::cards_in_columns),
    ("bordered", Extractor::bordered_blocks),
];

pub struct Extractor {
    base_url: Url,
    date_re: Regex,
    company_re: Regex,
    tag_re: Regex,
    label_re: Regex,
    sel_card: Selector,
    sel_card_body: Selector,
    sel_title: Selector,
    sel_subtitle: Selector,
    sel_desc: Selector,
    sel_info: Selector,
    sel_span: Selector,
    sel_attachment: Selector,
    sel_anchor: Selector,
    sel_blob: Selector,
    sel_columns: Selector,
    sel_bordered: Selector,
    sel_heading: Selector,
}

impl Extractor {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        // Selector/regex literals are compile-time constants; parse
        // failures here would be programmer errors.
        Ok(Self {
            base_url: Url::parse(base_url)?,
            date_re: Regex::new(r"Tayang hingga\s+(\d+\s+\w+\s+\d{4})").unwrap(),
            company_re: Regex::new(r"Oleh\s+(.*)$").unwrap(),
            tag_re: Regex::new(r"<[^>]+>").unwrap(),
            label_re: Regex::new(r"<b>(.*?)</b>:\s*(.*)").unwrap(),
            sel_card: Selector::parse("div.card").unwrap(),
            sel_card_body: Selector::parse("div.card-body").unwrap(),
            sel_title: Selector::parse("h5.card-title").unwrap(),
            sel_subtitle: Selector::parse("small.card-subtitle").unwrap(),
            sel_desc: Selector::parse("p.card-text").unwrap(),
            sel_info: Selector::parse("p.tipe").unwrap(),
            sel_span: Selector::parse("span").unwrap(),
            sel_attachment: Selector::parse("a.attachment").unwrap(),
            sel_anchor: Selector::parse("a").unwrap(),
            sel_blob: Selector::parse("a.download-file-blob").unwrap(),
            sel_columns: Selector::parse("div[class*=\"col-6\"], div[class*=\"col-md-6\"]")
                .unwrap(),
            sel_bordered: Selector::parse("div[style*=\"border\"], div[style*=\"margin-bottom\"]")
                .unwrap(),
            sel_heading: Selector::parse("h1, h2, h3, h4, h5, h6, b").unwrap(),
        })
    }

    /// Extract all tender records from an HTML payload.
    ///
    /// When `anchor_id` is given the named section is tried first; a
    /// missing section logs a warning and falls through to the
    /// document-wide strategies.
    pub fn extract(&self, html: &str, anchor_id: Option<&str>) -> Vec<TenderRecord> {
        let document = Html::parse_document(html);

        if let Some(id) = anchor_id {
            match Selector::parse(&format!("#{}", id)) {
                Ok(selector) => {
                    if let Some(section) = document.select(&selector).next() {
                        let records = self.cards_under(section);
                        if !records.is_empty() {
                            debug!("Found {} cards in section #{}", records.len(), id);
                            return records;
                        }
                    } else {
                        warn!("Section '{}' not found, scanning whole document", id);
                    }
                }
                Err(_) => warn!("Invalid anchor id '{}', scanning whole document", id),
            }
        }

        for (name, strategy) in STRATEGIES {
            let records = strategy(self, &document);
            if !records.is_empty() {
                debug!("Strategy '{}' yielded {} records", name, records.len());
                return records;
            }
        }

        Vec::new()
    }

    fn cards_under(&self, scope: ElementRef<'_>) -> Vec<TenderRecord> {
        scope
            .select(&self.sel_card)
            .filter_map(|card| self.extract_card(card))
            .collect()
    }

    fn cards_in_document(&self, document: &Html) -> Vec<TenderRecord> {
        document
            .select(&self.sel_card)
            .filter_map(|card| self.extract_card(card))
            .collect()
    }

    /// Column containers that wrap a card each; seen on older renders of
    /// the listing page.
    fn cards_in_columns(&self, document: &Html) -> Vec<TenderRecord> {
        document
            .select(&self.sel_columns)
            .filter_map(|col| col.select(&self.sel_card).next())
            .filter_map(|card| self.extract_card(card))
            .collect()
    }

    /// Last resort: inline-styled divs that look like separated items.
    fn bordered_blocks(&self, document: &Html) -> Vec<TenderRecord> {
        document
            .select(&self.sel_bordered)
            .filter_map(|div| self.extract_loose_block(div))
            .collect()
    }

    /// Extract one card into a record. Returns `None` for blocks with no
    /// recoverable content; the caller logs and moves on.
    fn extract_card(&self, card: ElementRef<'_>) -> Option<TenderRecord> {
        let body = card.select(&self.sel_card_body).next().unwrap_or(card);

        let title = body
            .select(&self.sel_title)
            .next()
            .map(|el| element_text(el))
            .filter(|t| !t.is_empty());

        let subtitle = body
            .select(&self.sel_subtitle)
            .next()
            .map(|el| element_text(el))
            .unwrap_or_default();

        let date = self
            .date_re
            .captures(&subtitle)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| "No Date".to_string());

        let company = self
            .company_re
            .captures(&subtitle)
            .map(|c| self.tag_re.replace_all(c[1].trim(), "").to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "SKK Migas".to_string());

        let mut description = body
            .select(&self.sel_desc)
            .next()
            .map(|el| element_text(el))
            .unwrap_or_default();

        // Fold auxiliary label:value pairs into the description.
        if let Some(info) = body.select(&self.sel_info).next() {
            let mut info_count = 0usize;
            for span in info.select(&self.sel_span) {
                let span_html = span.html();
                if let Some(caps) = self.label_re.captures(&span_html) {
                    let label = caps[1].trim().to_string();
                    let value = self.tag_re.replace_all(caps[2].trim(), "").to_string();
                    info_count += 1;
                    description.push_str(&format!("\n{}: {}", label, value.trim()));
                } else {
                    let text = element_text(span);
                    if !text.is_empty() {
                        info_count += 1;
                        description.push_str(&format!("\nInfo {}: {}", info_count, text));
                    }
                }
            }
        }

        let attachments = self.extract_attachments(body);

        if title.is_none() && description.is_empty() && subtitle.is_empty() && attachments.is_empty()
        {
            debug!("Skipping card with no recoverable content");
            return None;
        }

        Some(TenderRecord {
            title,
            date,
            company,
            description,
            page: 0,
            category: None,
            attachments,
        })
    }

    /// Attachment search order: explicit attachment links first, then
    /// blob-download links carrying data attributes.
    fn extract_attachments(&self, scope: ElementRef<'_>) -> Vec<AttachmentRef> {
        let mut links: Vec<ElementRef<'_>> = scope.select(&self.sel_attachment).collect();
        if links.is_empty() {
            links = scope
                .select(&self.sel_anchor)
                .filter(|a| element_text(*a).contains("Attachment"))
                .collect();
        }

        let mut attachments = Vec::new();
        for link in links {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            if href.is_empty()
                || !(href.contains("download") || href.contains("attachment") || href.contains(".pdf"))
            {
                continue;
            }

            let file_id = query_value(href, "fileId").or_else(|| download_path_id(href));
            let name = query_value(href, "fileName")
                .or_else(|| {
                    href.ends_with(".pdf")
                        .then(|| href.rsplit('/').next().unwrap_or(href).to_string())
                })
                .unwrap_or_else(|| "attachment.pdf".to_string());

            attachments.push(AttachmentRef {
                url: self.absolutize(href),
                name,
                file_id,
            });
        }

        if attachments.is_empty() {
            for blob in scope.select(&self.sel_blob) {
                let attrs = blob.value();
                let (Some(data_url), Some(file_id)) =
                    (attrs.attr("data-url"), attrs.attr("data-file-id"))
                else {
                    continue;
                };
                let name = attrs.attr("data-name").unwrap_or("attachment.pdf");
                let url = format!(
                    "{}?fileId={}&fileName={}",
                    self.absolutize(data_url),
                    file_id,
                    name
                );
                attachments.push(AttachmentRef {
                    url,
                    name: name.to_string(),
                    file_id: Some(file_id.to_string()),
                });
            }
        }

        attachments
    }

    /// Bordered/margin-styled divs carry no card structure; take the
    /// first heading as a title guess and the block text as description.
    fn extract_loose_block(&self, div: ElementRef<'_>) -> Option<TenderRecord> {
        let title = div
            .select(&self.sel_heading)
            .next()
            .map(|el| element_text(el))
            .filter(|t| !t.is_empty());

        let description = element_text(div);
        if title.is_none() && description.is_empty() {
            return None;
        }

        Some(TenderRecord {
            title,
            date: "No Date".to_string(),
            company: "SKK Migas".to_string(),
            description,
            page: 0,
            category: None,
            attachments: self.extract_attachments(div),
        })
    }

    /// Resolve a possibly relative href against the portal base.
    fn absolutize(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            return href.to_string();
        }
        match self.base_url.join(href) {
            Ok(url) => url.to_string(),
            Err(_) => format!(
                "{}/{}",
                self.base_url.as_str().trim_end_matches('/'),
                href.trim_start_matches('/')
            ),
        }
    }
}

/// Concatenated, whitespace-normalized text of an element.
fn element_text(el: ElementRef<'_>) -> String {
    let raw: String = el.text().collect::<Vec<_>>().join(" ");
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pull `key=value` out of a query-like URL fragment. Deliberately
/// naive string splitting: hrefs here are often relative or otherwise
/// unparseable as full URLs.
pub(crate) fn query_value(href: &str, key: &str) -> Option<String> {
    let marker = format!("{}=", key);
    let rest = href.split(&marker).nth(1)?;
    let value = rest.split('&').next().unwrap_or(rest);
    let value = value.split('#').next().unwrap_or(value);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Extract the id from a `/download/<type>/<id>/...` path shape.
pub(crate) fn download_path_id(href: &str) -> Option<String> {
    let rest = href.split("/download/").nth(1)?;
    let mut parts = rest.split('/');
    let _doc_type = parts.next()?;
    let id = parts.next()?;
    let id = id.split('?').next().unwrap_or(id);
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> Extractor {
        Extractor::new("https://civd.example.go.id").unwrap()
    }

    const FULL_CARD: &str = r#"
        <div id="tnd1Result">
          <div class="card">
            <div class="card-body">
              <h5 class="card-title">Pengadaan Pipa Produksi</h5>
              <small class="card-subtitle">Tayang hingga 12 Agustus 2025 Oleh PT Contoh Energi</small>
              <p class="card-text">Undangan prakualifikasi untuk pengadaan pipa.</p>
              <p class="tipe"><span><b>Golongan</b>: Besar</span><span>Wilayah Sumatera</span></p>
              <a class="attachment" href="/download/tnd/ann.jwebs?fileId=123&amp;fileName=doc.pdf">Attachment</a>
            </div>
          </div>
        </div>"#;

    #[test]
    fn extracts_full_card() {
        let records = extractor().extract(FULL_CARD, Some("tnd1Result"));
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.title.as_deref(), Some("Pengadaan Pipa Produksi"));
        assert_eq!(rec.date, "12 Agustus 2025");
        assert_eq!(rec.company, "PT Contoh Energi");
        assert!(rec.description.contains("Golongan: Besar"));
        assert!(rec.description.contains("Info 2: Wilayah Sumatera"));
        assert_eq!(rec.attachments.len(), 1);
        let att = &rec.attachments[0];
        assert_eq!(att.file_id.as_deref(), Some("123"));
        assert_eq!(att.name, "doc.pdf");
        assert!(att.url.starts_with("https://civd.example.go.id/"));
    }

    #[test]
    fn extraction_is_pure() {
        let ex = extractor();
        let first = ex.extract(FULL_CARD, Some("tnd1Result"));
        let second = ex.extract(FULL_CARD, Some("tnd1Result"));
        assert_eq!(first, second);
    }

    #[test]
    fn missing_subtitle_uses_defaults() {
        let html = r#"<div class="card"><div class="card-body">
            <h5 class="card-title">Tanpa Subtitle</h5>
            <p class="card-text">Deskripsi saja.</p>
        </div></div>"#;
        let records = extractor().extract(html, None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, "No Date");
        assert_eq!(records[0].company, "SKK Migas");
    }

    #[test]
    fn missing_title_is_retained() {
        let html = r#"<div class="card"><div class="card-body">
            <small class="card-subtitle">Tayang hingga 1 Juli 2025</small>
            <p class="card-text">Pengumuman tanpa judul.</p>
        </div></div>"#;
        let records = extractor().extract(html, None);
        assert_eq!(records.len(), 1);
        assert!(records[0].title.is_none());
        assert_eq!(records[0].date, "1 Juli 2025");
    }

    #[test]
    fn missing_anchor_falls_through_to_document() {
        let records = extractor().extract(FULL_CARD, Some("tnd2Result"));
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn no_structure_yields_empty_not_error() {
        let html = "<html><body><p>Tidak ada data.</p></body></html>";
        let records = extractor().extract(html, Some("tnd1Result"));
        assert!(records.is_empty());
    }

    #[test]
    fn column_fallback_finds_embedded_cards() {
        let html = r#"<div class="col-md-6"><div class="card"><div class="card-body">
            <h5 class="card-title">Dalam Kolom</h5>
        </div></div></div>"#;
        // Cards are found at the first level already since the card
        // selector scans the whole document; strip the card class to
        // force the column path is not possible, so assert level one
        // and level two agree.
        let ex = extractor();
        let doc = Html::parse_document(html);
        assert_eq!(ex.cards_in_columns(&doc).len(), 1);
    }

    #[test]
    fn bordered_fallback_extracts_loose_blocks() {
        let html = r#"<div style="border: 1px solid #ddd">
            <h4>Pengumuman Hasil</h4>
            Lelang nomor 7 telah selesai.
        </div>"#;
        let records = extractor().extract(html, None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title.as_deref(), Some("Pengumuman Hasil"));
        assert_eq!(records[0].date, "No Date");
    }

    #[test]
    fn blob_links_synthesize_query_urls() {
        let html = r#"<div class="card"><div class="card-body">
            <h5 class="card-title">Blob</h5>
            <a class="download-file-blob" data-url="/download/blob" data-file-id="77" data-name="berkas.pdf">Unduh</a>
        </div></div>"#;
        let records = extractor().extract(html, None);
        let att = &records[0].attachments[0];
        assert_eq!(att.file_id.as_deref(), Some("77"));
        assert_eq!(att.name, "berkas.pdf");
        assert_eq!(
            att.url,
            "https://civd.example.go.id/download/blob?fileId=77&fileName=berkas.pdf"
        );
    }

    #[test]
    fn query_value_handles_trailing_and_multi_params() {
        assert_eq!(
            query_value("/x?fileId=9&fileName=a.pdf", "fileId").as_deref(),
            Some("9")
        );
        assert_eq!(
            query_value("/x?fileId=9", "fileName"),
            None
        );
        assert_eq!(
            download_path_id("/download/prakualifikasi/42/doc.pdf").as_deref(),
            Some("42")
        );
        assert_eq!(download_path_id("/download/42?x=1").as_deref(), None);
    }
}
