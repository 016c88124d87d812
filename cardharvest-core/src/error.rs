use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::auth::AuthError;
use crate::browser::BrowserError;
use crate::export::ExportError;
use crate::scraper::ScrapeError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("metadata file not found: {path}; run `discover` first")]
    CatalogMissing { path: PathBuf },
    #[error("set {set_id} is not present in the discovered metadata")]
    SetNotInCatalog { set_id: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type HarvestResult<T> = std::result::Result<T, HarvestError>;

/// Coarse failure classes the command line maps to distinct messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    SessionNotFound,
    SessionExpired,
    Authentication,
    CatalogMissing,
    SetNotFound,
    AccessDenied,
    RateLimited,
    Configuration,
    Export,
    Unexpected,
}

impl HarvestError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            HarvestError::Config(_) => ErrorCategory::Configuration,
            HarvestError::Auth(AuthError::SessionNotFound { .. }) => ErrorCategory::SessionNotFound,
            HarvestError::Auth(AuthError::SessionExpired) => ErrorCategory::SessionExpired,
            HarvestError::Auth(_) => ErrorCategory::Authentication,
            HarvestError::Scrape(ScrapeError::SetNotFound { .. }) => ErrorCategory::SetNotFound,
            HarvestError::SetNotInCatalog { .. } => ErrorCategory::SetNotFound,
            HarvestError::Scrape(ScrapeError::AccessDenied { .. }) => ErrorCategory::AccessDenied,
            HarvestError::Scrape(ScrapeError::RateLimited { .. }) => ErrorCategory::RateLimited,
            HarvestError::Scrape(_) => ErrorCategory::Unexpected,
            HarvestError::Export(_) => ErrorCategory::Export,
            HarvestError::CatalogMissing { .. } => ErrorCategory::CatalogMissing,
            HarvestError::Browser(_) | HarvestError::Io(_) | HarvestError::Serialize(_) => {
                ErrorCategory::Unexpected
            }
        }
    }
}
