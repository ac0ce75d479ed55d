//! End-to-end pipeline tests over canned portal payloads: AJAX body in,
//! tagged records out, CSV/JSON on disk. No network involved.

use async_trait::async_trait;
use civd_scraper::error::ScrapeError;
use civd_scraper::extract::Extractor;
use civd_scraper::models::Category;
use civd_scraper::retrieve::{PageSource, Retriever};
use civd_scraper::sink::ResultSink;

const BASE: &str = "https://civd.example.go.id";

/// Feeds pre-recorded payloads, page 1 first; later pages are empty.
struct CannedPortal {
    pages: Vec<String>,
}

#[async_trait]
impl PageSource for CannedPortal {
    async fn fetch_page(&mut self, _category: Category, page: u32) -> Result<String, ScrapeError> {
        Ok(self
            .pages
            .get(page as usize - 1)
            .cloned()
            .unwrap_or_default())
    }
}

fn two_card_payload() -> String {
    format!(
        r#"<div id="{anchor}">
          <div class="card"><div class="card-body">
            <h5 class="card-title">Pengadaan Pipa Produksi</h5>
            <small class="card-subtitle">Tayang hingga 12 Agustus 2025 Oleh PT Contoh Energi</small>
            <p class="card-text">Undangan prakualifikasi pengadaan pipa.</p>
            <a class="attachment" href="/download/tnd/ann.jwebs?fileId=101&amp;fileName=pipa.pdf">Attachment</a>
          </div></div>
          <div class="card"><div class="card-body">
            <h5 class="card-title">Jasa Survei Seismik</h5>
            <small class="card-subtitle">Tayang hingga 30 September 2025 Oleh PT Survei Nusantara</small>
            <p class="card-text">Undangan prakualifikasi jasa survei.</p>
            <a class="attachment" href="/download/prakualifikasi/102/seismik.pdf">Attachment</a>
          </div></div>
        </div>"#,
        anchor = Category::Prakualifikasi.anchor_id()
    )
}

#[tokio::test(start_paused = true)]
async fn full_cards_become_tagged_records_and_csv() {
    let mut portal = CannedPortal {
        pages: vec![two_card_payload()],
    };
    let retriever = Retriever::new(BASE).unwrap();
    let records = retriever
        .paginate(&mut portal, Category::Prakualifikasi)
        .await;

    assert_eq!(records.len(), 2);

    let first = &records[0];
    assert_eq!(first.title.as_deref(), Some("Pengadaan Pipa Produksi"));
    assert_eq!(first.date, "12 Agustus 2025");
    assert_eq!(first.company, "PT Contoh Energi");
    assert_eq!(first.page, 1);
    assert_eq!(first.category, Some(Category::Prakualifikasi));
    assert_eq!(first.attachments.len(), 1);
    assert_eq!(first.attachments[0].file_id.as_deref(), Some("101"));
    assert!(first.attachments[0].url.starts_with(BASE));

    let second = &records[1];
    assert_eq!(second.company, "PT Survei Nusantara");
    assert_eq!(second.attachments[0].file_id.as_deref(), Some("102"));

    // Persist and read back the flat CSV view.
    let dir = tempfile::tempdir().unwrap();
    let sink = ResultSink::new(dir.path());
    let csv_path = sink
        .write_category_csv(Category::Prakualifikasi, &records)
        .unwrap()
        .unwrap();
    let body = std::fs::read_to_string(csv_path).unwrap();
    assert_eq!(body.lines().count(), 3);
    assert!(body.contains("Pengadaan Pipa Produksi"));
    assert!(body.contains("prakualifikasi"));

    let json_path = sink
        .write_combined_json(&[(Category::Prakualifikasi, records)])
        .unwrap();
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
    assert_eq!(doc["prakualifikasi"].as_array().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn structureless_page_yields_no_records_and_no_error() {
    let mut portal = CannedPortal {
        pages: vec!["<html><body><p>Belum ada pengumuman.</p></body></html>".to_string()],
    };
    let retriever = Retriever::new(BASE).unwrap();
    let records = retriever.paginate(&mut portal, Category::Pelelangan).await;
    assert!(records.is_empty());
}

#[test]
fn extraction_handles_anchored_and_anchorless_payloads() {
    let extractor = Extractor::new(BASE).unwrap();
    let payload = two_card_payload();

    let anchored = extractor.extract(&payload, Some(Category::Prakualifikasi.anchor_id()));
    assert_eq!(anchored.len(), 2);

    // The wrong anchor id falls through to document-wide strategies.
    let fallback = extractor.extract(&payload, Some(Category::Pelelangan.anchor_id()));
    assert_eq!(fallback.len(), 2);
}
