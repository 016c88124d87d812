use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::SessionStore;
use crate::config::{FingerprintProfile, HarvestConfig};

use super::error::{BrowserError, BrowserResult};
use super::fingerprint::FingerprintMasker;
use super::human::HumanCadence;
use super::metrics::BrowserMetrics;
use super::page::ChromiumPage;
use super::profile::{BrowserProfile, ProfileLock};

struct RunningBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
    _lock: ProfileLock,
}

/// Owns the Chromium process and the persistent profile it runs against.
pub struct BrowserSession {
    config: Arc<HarvestConfig>,
    fingerprint: FingerprintMasker,
    metrics: Arc<Mutex<BrowserMetrics>>,
    running: Option<RunningBrowser>,
}

impl std::fmt::Debug for BrowserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSession")
            .field("running", &self.running.is_some())
            .field("headless", &self.config.chromium.headless)
            .finish()
    }
}

impl BrowserSession {
    pub fn new(config: Arc<HarvestConfig>) -> Self {
        let fingerprint = FingerprintMasker::new(config.fingerprint.clone());
        Self {
            config,
            fingerprint,
            metrics: Arc::new(Mutex::new(BrowserMetrics::default())),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn metrics(&self) -> BrowserMetrics {
        self.metrics
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn metrics_handle(&self) -> Arc<Mutex<BrowserMetrics>> {
        Arc::clone(&self.metrics)
    }

    /// Launches Chromium; a second call while running is a no-op.
    pub async fn start(&mut self) -> BrowserResult<()> {
        if self.running.is_some() {
            debug!("browser already started");
            return Ok(());
        }
        let profile_dir = self.config.profile_dir();
        let profile = BrowserProfile::from_config(&self.config.chromium, &profile_dir)?;
        let lock = profile.lock()?;
        let chromium_config = self.build_chromium_config(&profile)?;
        info!(
            profile = %profile.path().display(),
            headless = self.config.chromium.headless,
            "launching chromium"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        self.running = Some(RunningBrowser {
            browser,
            handler_task,
            _lock: lock,
        });
        Ok(())
    }

    /// Opens a context seeded from the session file at `state_path`. No path,
    /// or a path with no file behind it, yields an unauthenticated context.
    pub async fn create_context_from_file(
        &mut self,
        state_path: Option<&Path>,
    ) -> BrowserResult<BrowserContext> {
        let context = self.create_context().await?;
        let Some(path) = state_path else {
            debug!("context starts unauthenticated");
            return Ok(context);
        };
        let restored = SessionStore::restore(context.page(), path).await;
        match restored {
            Ok(Some(state)) => {
                info!(cookies = state.cookies.len(), "context seeded from stored session");
                Ok(context)
            }
            Ok(None) => {
                debug!(path = %path.display(), "no stored session, context starts unauthenticated");
                Ok(context)
            }
            Err(err) => {
                context.close().await;
                Err(BrowserError::SessionRestore(format!("{}: {err}", path.display())))
            }
        }
    }

    /// Opens an isolated, unauthenticated context with a fresh identity from the pool.
    pub async fn create_context(&mut self) -> BrowserResult<BrowserContext> {
        self.start().await?;
        let fingerprint = self.fingerprint.select_profile(&mut rand::thread_rng())?;
        let running = self.running.as_mut().ok_or(BrowserError::NotStarted)?;

        let context_id = running
            .browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await?;
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id)
            .build()
            .map_err(BrowserError::Configuration)?;
        let page = running.browser.new_page(params).await?;
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.record_page_open();
        }

        if self.config.fingerprint.stealth {
            page.enable_stealth_mode_with_agent(&fingerprint.user_agent)
                .await?;
        }
        self.fingerprint.apply(&page, &fingerprint).await?;

        let human = HumanCadence::new(self.config.human.clone());
        let settle = Duration::from_millis(self.config.pacing.settle_ms);
        let page = ChromiumPage::new(page, human, Arc::clone(&self.metrics), settle);
        page.install_capture_hook(&self.config.extractor.api_url_hints)
            .await?;
        info!(
            ua = %fingerprint.user_agent,
            locale = %fingerprint.locale,
            timezone = %fingerprint.timezone,
            width = fingerprint.viewport[0],
            height = fingerprint.viewport[1],
            "browser context ready"
        );
        Ok(BrowserContext {
            page,
            fingerprint,
        })
    }

    /// Shuts Chromium down. Safe to call repeatedly; never fails.
    pub async fn close(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!("closing chromium");
        let RunningBrowser {
            mut browser,
            handler_task,
            _lock,
        } = running;
        if let Err(err) = browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Err(err) = browser.wait().await {
            debug!(error = %err, "browser process wait failed");
        }
        handler_task.abort();
        if let Err(err) = handler_task.await {
            if !err.is_cancelled() {
                warn!(error = %err, "browser handler join error");
            }
        }
    }

    fn build_chromium_config(&self, profile: &BrowserProfile) -> BrowserResult<ChromiumConfig> {
        let chromium = &self.config.chromium;
        let flags = &self.config.flags;
        let [width, height] = self
            .config
            .fingerprint
            .profiles
            .first()
            .map(|p| p.viewport)
            .unwrap_or([1366, 768]);
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(profile.path())
            .viewport(ChromiumViewport {
                width,
                height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: width >= height,
                has_touch: false,
            });
        if let Some(executable) = &chromium.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !chromium.headless {
            builder = builder.with_head();
        }
        if !chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = chromium.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = Vec::new();
        if chromium.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        for feature in &flags.disable_blink_features {
            args.push(format!("--disable-blink-features={feature}"));
        }
        if flags.no_first_run {
            args.push("--no-first-run".into());
        }
        if flags.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".into());
        }
        args.push("--disable-infobars".into());
        args.push("--password-store=basic".into());
        args.extend(flags.extra_args.iter().cloned());
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            if !running.handler_task.is_finished() {
                warn!("BrowserSession dropped without explicit close");
            }
        }
    }
}

/// One isolated browsing context: a page plus the identity it presents.
#[derive(Debug)]
pub struct BrowserContext {
    page: ChromiumPage,
    fingerprint: FingerprintProfile,
}

impl BrowserContext {
    pub fn page(&self) -> &ChromiumPage {
        &self.page
    }

    pub fn fingerprint(&self) -> &FingerprintProfile {
        &self.fingerprint
    }

    pub async fn close(self) {
        if let Err(err) = self.page.inner().clone().close().await {
            debug!(error = %err, "failed to close page");
        }
    }
}
