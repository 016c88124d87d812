pub mod auth;
pub mod browser;
pub mod catalog;
pub mod config;
pub mod error;
pub mod export;
pub mod scraper;
pub mod service;

pub use auth::{AuthError, AuthEvent, AuthResult, AuthState, Authenticator, SessionStore};
pub use browser::{
    BrowserContext, BrowserError, BrowserMetrics, BrowserResult, BrowserSession, ChromiumPage,
    FailureCategory, HarvestTelemetry, RetryPacer, SitePage, StorageState,
};
pub use catalog::{merge_references, Catalog, CatalogEntry};
pub use config::{load_harvest_config, Credentials, HarvestConfig};
pub use error::{ConfigError, ErrorCategory, HarvestError, HarvestResult, Result};
pub use export::{
    export_all, export_formats, exporter_for, parse_tagged, sanitize_filename, ExportError, ExportFormat,
    ExportResult, Exporter,
};
pub use scraper::{
    extract_set_id, Card, CardSet, DiscoveryCrawler, ExtractionStrategy, ScrapeError,
    ScrapeResult, SetExtractor, SetReference,
};
pub use service::{HarvestService, HarvestedSet};
