use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::PipelineError;
use crate::release::{RawRecord, ReleaseKind, ReleaseRecord};

/// Date format of release-note headings, e.g. "January 5, 2023".
pub const DATE_FORMAT: &str = "%B %d, %Y";

// chrono's %B also takes abbreviations and its spacing is loose
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+) \d{1,2}, \d{4}$").unwrap());

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june",
    "july", "august", "september", "october", "november", "december",
];

/// Parse dates and map category markers. Pure; fails on the first bad record.
pub fn normalize(raw: Vec<RawRecord>) -> Result<Vec<ReleaseRecord>, PipelineError> {
    raw.into_iter().map(normalize_one).collect()
}

fn normalize_one(raw: RawRecord) -> Result<ReleaseRecord, PipelineError> {
    let RawRecord { product, entry } = raw;
    let date = parse_date(&entry.date_text).map_err(|reason| PipelineError::DateParse {
        product: product.clone(),
        text: entry.date_text.clone(),
        reason,
    })?;
    let Some(release_kind) = ReleaseKind::from_marker(&entry.marker) else {
        return Err(PipelineError::UnknownCategory {
            product,
            marker: entry.marker,
        });
    };
    Ok(ReleaseRecord {
        date,
        release_kind,
        description: entry.description,
        product,
    })
}

/// Strict "Month D, YYYY" with the full month name (any case).
pub fn parse_date(text: &str) -> Result<NaiveDate, String> {
    let text = text.trim();
    let month = DATE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .ok_or_else(|| "expected 'Month D, YYYY'".to_string())?;
    if !MONTHS.iter().any(|m| m.eq_ignore_ascii_case(month.as_str())) {
        return Err(format!("'{}' is not a full month name", month.as_str()));
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|e| e.to_string())
}
