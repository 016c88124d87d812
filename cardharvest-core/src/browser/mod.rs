mod automation;
mod error;
mod fingerprint;
mod human;
mod metrics;
mod page;
mod profile;
mod retry;
mod telemetry;

pub use automation::{BrowserContext, BrowserSession};
pub use error::{BrowserError, BrowserResult};
pub use fingerprint::FingerprintMasker;
pub use human::HumanCadence;
pub use metrics::BrowserMetrics;
pub use page::{
    CapturedResponse, ChromiumPage, LinkCandidate, OriginStorage, RawCardText, SitePage,
    StorageEntry, StorageState, StoredCookie,
};
pub use profile::{BrowserProfile, ProfileLock};
pub use retry::{RetryClass, RetryOutcome, RetryPacer};
pub use telemetry::{
    categorize, note_failure, note_run, FailureCategory, FailureRecord, HarvestTelemetry,
    RemediationAction, RunRecord, TelemetryError,
};
