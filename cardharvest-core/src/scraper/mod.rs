mod discovery;
mod extractor;
mod model;
mod payload;
mod set_id;

use thiserror::Error;

use crate::browser::{BrowserError, FailureCategory, RetryClass};

pub use discovery::{dedup_references, term_count_from_text, DiscoveryCrawler};
pub use extractor::SetExtractor;
pub use model::{Card, CardSet, ExtractionStrategy, SetReference};
pub use payload::{
    find_terms, harvest_metadata, is_flashcard_payload, parse_payload, parse_term, PayloadSet, INDICATOR_KEYS,
    MAX_INDICATOR_DEPTH, TERM_CONTAINER_KEYS, TERM_ENTRY_KEYS,
};
pub use set_id::extract_set_id;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("set not found: {url}")]
    SetNotFound { url: String },
    #[error("access denied for {url}: {reason}")]
    AccessDenied { url: String, reason: String },
    #[error("rate limited while loading {url}")]
    RateLimited { url: String },
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("unusable payload: {0}")]
    Payload(String),
}

pub type ScrapeResult<T> = Result<T, ScrapeError>;

impl RetryClass for ScrapeError {
    fn is_transient(&self) -> bool {
        match self {
            ScrapeError::RateLimited { .. } => true,
            ScrapeError::Browser(err) => err.is_transient(),
            ScrapeError::SetNotFound { .. }
            | ScrapeError::AccessDenied { .. }
            | ScrapeError::Payload(_) => false,
        }
    }

    fn failure_category(&self) -> FailureCategory {
        match self {
            ScrapeError::SetNotFound { .. } => FailureCategory::SetNotFound,
            ScrapeError::AccessDenied { .. } => FailureCategory::AccessDenied,
            ScrapeError::RateLimited { .. } => FailureCategory::RateLimited,
            ScrapeError::Browser(err) => err.failure_category(),
            ScrapeError::Payload(_) => FailureCategory::Unexpected,
        }
    }
}
