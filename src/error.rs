use thiserror::Error;

use crate::warehouse::StoreError;

/// Terminal failures of a pipeline run. None of these are retried in-process.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed release-notes page for '{product}': {reason}")]
    MalformedPage { product: String, reason: String },

    #[error("cannot parse release date '{text}' for '{product}': {reason}")]
    DateParse {
        product: String,
        text: String,
        reason: String,
    },

    #[error("unknown release category marker '{marker}' for '{product}'")]
    UnknownCategory { product: String, marker: String },

    #[error("fetching {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("publishing dataset failed: {0}")]
    Publish(#[from] StoreError),
}

impl PipelineError {
    pub fn malformed(product: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPage {
            product: product.to_string(),
            reason: reason.into(),
        }
    }
}
