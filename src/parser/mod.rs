pub mod blocks;
pub mod entries;

use tracing::info;

use crate::error::PipelineError;
use crate::fetch::Fetcher;
use crate::normalize::normalize;
use crate::release::{RawRecord, ReleaseRecord};

/// Two-pass page parse: html → blocks → raw records tagged with `product`.
pub fn parse_page(product: &str, html: &str) -> Result<Vec<RawRecord>, PipelineError> {
    let blocks = blocks::classify_page(html)
        .ok_or_else(|| PipelineError::malformed(product, "no <section class=\"releases\"> found"))?;
    let entries = entries::walk(product, &blocks)?;
    Ok(entries
        .into_iter()
        .map(|entry| RawRecord {
            product: product.to_string(),
            entry,
        })
        .collect())
}

/// Fetch one product's release-notes page and normalize its entries.
pub async fn extract(
    fetcher: &Fetcher,
    product: &str,
    page_url: &str,
) -> Result<Vec<ReleaseRecord>, PipelineError> {
    info!("Fetching release notes for {}: {}", product, page_url);
    let html = fetcher.get_text(page_url).await?;
    let raw = parse_page(product, &html)?;
    let records = normalize(raw)?;
    info!("{}: {} release notes", product, records.len());
    Ok(records)
}

// ── Tests ──
