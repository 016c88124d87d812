//! Ties browser, authentication, discovery, extraction and export together
//! for the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{AuthError, Authenticator, SessionStore};
use crate::browser::{
    note_run, BrowserContext, BrowserError, BrowserMetrics, BrowserSession, ChromiumPage,
    HarvestTelemetry, RetryPacer, RunRecord,
};
use crate::catalog::{merge_references, Catalog};
use crate::config::{Credentials, HarvestConfig};
use crate::error::{ConfigError, HarvestError, HarvestResult};
use crate::export::{export_formats, ExportFormat};
use crate::scraper::{CardSet, DiscoveryCrawler, SetExtractor};

/// A scraped set and the files it was exported to.
#[derive(Debug, Clone)]
pub struct HarvestedSet {
    pub set: CardSet,
    pub files: Vec<PathBuf>,
}

pub struct HarvestService {
    config: Arc<HarvestConfig>,
    session: BrowserSession,
    context: Option<BrowserContext>,
    authenticator: Option<Authenticator>,
    telemetry: Option<Arc<HarvestTelemetry>>,
    formats: Vec<ExportFormat>,
}

impl std::fmt::Debug for HarvestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvestService")
            .field("session", &self.session)
            .field("context_open", &self.context.is_some())
            .field("formats", &self.formats)
            .finish()
    }
}

impl HarvestService {
    pub fn new(config: HarvestConfig) -> Self {
        let telemetry = match HarvestTelemetry::new(
            config.resolve_path(&config.observability.failure_log),
            config.resolve_path(&config.observability.ledger_db),
        ) {
            Ok(telemetry) => Some(Arc::new(telemetry)),
            Err(err) => {
                warn!(error = %err, "failure ledger disabled");
                None
            }
        };
        let formats = config
            .export
            .formats
            .iter()
            .filter_map(|name| match name.parse::<ExportFormat>() {
                Ok(format) => Some(format),
                Err(err) => {
                    warn!(error = %err, "ignoring configured export format");
                    None
                }
            })
            .collect();
        let config = Arc::new(config);
        Self {
            session: BrowserSession::new(Arc::clone(&config)),
            config,
            context: None,
            authenticator: None,
            telemetry,
            formats,
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Replaces the configured export formats for this run.
    pub fn set_formats(&mut self, formats: Vec<ExportFormat>) {
        if !formats.is_empty() {
            self.formats = formats;
        }
    }

    pub fn formats(&self) -> &[ExportFormat] {
        &self.formats
    }

    pub fn metrics(&self) -> BrowserMetrics {
        self.session.metrics()
    }

    fn pacer(&self) -> RetryPacer {
        let pacer = RetryPacer::new(
            &self.config.pacing,
            &self.config.retry,
            self.session.metrics_handle(),
        );
        match &self.telemetry {
            Some(telemetry) => pacer.with_telemetry(Arc::clone(telemetry)),
            None => pacer,
        }
    }

    fn page(&self) -> HarvestResult<&ChromiumPage> {
        self.context
            .as_ref()
            .map(BrowserContext::page)
            .ok_or_else(|| BrowserError::NotStarted.into())
    }

    fn is_ready(&self) -> bool {
        self.context.is_some()
            && self
                .authenticator
                .as_ref()
                .is_some_and(|auth| auth.state().is_authenticated())
    }

    async fn open_context(&mut self, session_file: Option<&Path>) -> HarvestResult<()> {
        if let Some(previous) = self.context.take() {
            previous.close().await;
        }
        self.authenticator = None;
        self.context = Some(self.session.create_context_from_file(session_file).await?);
        Ok(())
    }

    pub async fn login(&mut self, username: &str, password: &str) -> HarvestResult<()> {
        info!("starting credential login");
        self.open_context(None).await?;
        let mut authenticator = Authenticator::new(&self.config, self.pacer());
        let page = self.page()?;
        authenticator.login(page, username, password).await?;
        SessionStore::save(page, &self.config.session_path()).await?;
        self.authenticator = Some(authenticator);
        Ok(())
    }

    /// Opens a visible window and waits for the person to log in themselves.
    pub async fn manual_login(&mut self, timeout: Duration) -> HarvestResult<()> {
        info!("starting manual login");
        if self.config.chromium.headless {
            info!("relaunching chromium with a visible window");
            self.close().await;
            let mut headed = (*self.config).clone();
            headed.chromium.headless = false;
            self.config = Arc::new(headed);
            self.session = BrowserSession::new(Arc::clone(&self.config));
        }
        self.open_context(None).await?;
        let mut authenticator = Authenticator::new(&self.config, self.pacer());
        let page = self.page()?;
        authenticator.manual_login(page, timeout).await?;
        SessionStore::save(page, &self.config.session_path()).await?;
        self.authenticator = Some(authenticator);
        Ok(())
    }

    /// Restores the stored session and confirms it is still accepted.
    pub async fn login_with_session(&mut self) -> HarvestResult<()> {
        let path = self.config.session_path();
        if !SessionStore::exists(&path) {
            return Err(AuthError::SessionNotFound { path }.into());
        }
        info!(path = %path.display(), "loading stored session");
        match self.open_context(Some(&path)).await {
            Ok(()) => {}
            Err(HarvestError::Browser(BrowserError::SessionRestore(reason))) => {
                warn!(%reason, "stored session is unusable");
                return Err(AuthError::SessionExpired.into());
            }
            Err(err) => return Err(err),
        }
        let mut authenticator =
            Authenticator::new(&self.config, self.pacer()).with_restored_session();
        let page = self.page()?;
        let valid = authenticator.is_authenticated(page).await;
        self.authenticator = Some(authenticator);
        if !valid {
            return Err(AuthError::SessionExpired.into());
        }
        info!("stored session is valid");
        Ok(())
    }

    /// Uses the stored session when possible, otherwise logs in again.
    pub async fn ensure_authenticated(
        &mut self,
        credentials: &Credentials,
        manual: bool,
    ) -> HarvestResult<()> {
        if self.is_ready() {
            return Ok(());
        }
        match self.login_with_session().await {
            Ok(()) => Ok(()),
            Err(HarvestError::Auth(
                err @ (AuthError::SessionNotFound { .. } | AuthError::SessionExpired),
            )) => {
                info!(reason = %err, "no valid session, logging in");
                if manual {
                    let timeout = Duration::from_secs(self.config.auth.manual_timeout_seconds);
                    return self.manual_login(timeout).await;
                }
                let username = credentials
                    .username
                    .clone()
                    .or_else(|| self.config.credentials.username.clone());
                let password = credentials
                    .password
                    .clone()
                    .or_else(|| self.config.credentials.password.clone());
                match (username, password) {
                    (Some(username), Some(password)) => self.login(&username, &password).await,
                    _ => Err(AuthError::Failed(
                        "username and password are required to log in".into(),
                    )
                    .into()),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Enumerates own and shared sets and writes the catalog.
    pub async fn discover(
        &mut self,
        credentials: &Credentials,
        manual: bool,
    ) -> HarvestResult<Catalog> {
        let started = RunClock::start();
        self.ensure_authenticated(credentials, manual).await?;
        let crawler = DiscoveryCrawler::new(&self.config, self.pacer())
            .map_err(|err| ConfigError::Invalid(format!("site.base_url: {err}")))?;
        let page = self.page()?;

        info!("discovering flashcard sets");
        let own = crawler.get_user_sets(page).await?;
        let shared = match crawler.get_shared_sets(page).await {
            Ok(shared) => shared,
            Err(err) => {
                warn!(error = %err, "shared set discovery failed");
                Vec::new()
            }
        };
        let catalog = Catalog::from_references(merge_references(own, shared));
        catalog.save(&self.config.catalog_path())?;
        info!(sets = catalog.total_sets, "discovery complete");
        self.record_run("discover", started, catalog.total_sets, 0);
        Ok(catalog)
    }

    pub async fn scrape_by_id(&mut self, set_id: &str) -> HarvestResult<HarvestedSet> {
        let catalog = Catalog::load(&self.config.catalog_path())?;
        let url = catalog
            .find(set_id)
            .map(|entry| entry.url.clone())
            .ok_or_else(|| HarvestError::SetNotInCatalog {
                set_id: set_id.to_string(),
            })?;
        self.scrape_by_url(&url).await
    }

    pub async fn scrape_by_url(&mut self, url: &str) -> HarvestResult<HarvestedSet> {
        let started = RunClock::start();
        if !self.is_ready() {
            self.login_with_session().await?;
        }
        let extractor = SetExtractor::new(&self.config, self.pacer());
        let page = self.page()?;
        let outcome = extractor.scrape_set(page, url).await;
        let set = match outcome {
            Ok(set) => set,
            Err(err) => {
                self.record_run("scrape_url", started, 0, 1);
                return Err(err.into());
            }
        };
        let files = self.export_set(&set);
        self.record_run("scrape_url", started, 1, 0);
        Ok(HarvestedSet { set, files })
    }

    /// Scrapes every catalogued set, exporting each one as it completes.
    pub async fn scrape_all(&mut self) -> HarvestResult<Vec<HarvestedSet>> {
        let started = RunClock::start();
        let catalog = Catalog::load(&self.config.catalog_path())?;
        if catalog.sets.is_empty() {
            warn!("catalog lists no sets");
            return Ok(Vec::new());
        }
        if !self.is_ready() {
            self.login_with_session().await?;
        }
        let extractor = SetExtractor::new(&self.config, self.pacer());
        let page = self.page()?;
        let urls = catalog.urls();

        let mut harvested = Vec::new();
        extractor
            .scrape_each(page, &urls, |set| {
                harvested.push(HarvestedSet {
                    set: set.clone(),
                    files: self.export_set(set),
                })
            })
            .await;

        let failed = urls.len().saturating_sub(harvested.len());
        info!(ok = harvested.len(), failed, "scrape run finished");
        self.record_run("scrape_all", started, harvested.len(), failed);
        Ok(harvested)
    }

    fn export_set(&self, set: &CardSet) -> Vec<PathBuf> {
        export_formats(
            set,
            &self.formats,
            self.config.export.include_images,
            &self.config.output_dir(),
        )
    }

    /// Ends the site session when one is stored, then deletes the session file.
    pub async fn logout(&mut self) -> HarvestResult<bool> {
        let path = self.config.session_path();
        if !SessionStore::exists(&path) {
            info!("no stored session to remove");
            return Ok(false);
        }
        match self.open_context(Some(&path)).await {
            Ok(()) => {
                let mut authenticator = Authenticator::new(&self.config, self.pacer());
                let page = self.page()?;
                authenticator.logout(page).await;
            }
            Err(err) => warn!(error = %err, "could not restore session for logout, deleting anyway"),
        }
        self.authenticator = None;
        Ok(SessionStore::delete(&path)?)
    }

    /// Closes the page and the browser. Safe to call more than once.
    pub async fn close(&mut self) {
        self.authenticator = None;
        if let Some(context) = self.context.take() {
            context.close().await;
        }
        self.session.close().await;
    }

    fn record_run(&self, operation: &str, clock: RunClock, sets_ok: usize, sets_failed: usize) {
        note_run(
            self.telemetry.as_deref(),
            RunRecord {
                run_id: Uuid::new_v4(),
                started_at: clock.started_at,
                operation: operation.to_string(),
                sets_ok,
                sets_failed,
                duration_ms: i64::try_from(clock.instant.elapsed().as_millis()).unwrap_or(i64::MAX),
            },
        );
    }
}

#[derive(Debug, Clone, Copy)]
struct RunClock {
    started_at: DateTime<Utc>,
    instant: Instant,
}

impl RunClock {
    fn start() -> Self {
        Self {
            started_at: Utc::now(),
            instant: Instant::now(),
        }
    }
}
