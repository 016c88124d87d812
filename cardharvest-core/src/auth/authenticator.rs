use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::browser::{RetryPacer, SitePage};
use crate::config::{AuthSection, HarvestConfig, SiteSection};

use super::state::{AuthEvent, AuthState};
use super::{AuthError, AuthResult};

const URL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Drives a browsing context into the authenticated state and checks it.
#[derive(Debug, Clone)]
pub struct Authenticator {
    site: SiteSection,
    auth: AuthSection,
    base_url: String,
    pacer: RetryPacer,
    state: AuthState,
}

impl Authenticator {
    pub fn new(config: &HarvestConfig, pacer: RetryPacer) -> Self {
        Self {
            site: config.site.clone(),
            auth: config.auth.clone(),
            base_url: config.site.base_url.trim_end_matches('/').to_string(),
            pacer,
            state: AuthState::Unauthenticated,
        }
    }

    /// The context was seeded from a stored session that is believed valid
    /// until `is_authenticated` says otherwise.
    pub fn with_restored_session(mut self) -> Self {
        self.state = AuthState::Authenticated;
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn marker_timeout(&self) -> Duration {
        Duration::from_millis(self.auth.marker_timeout_ms)
    }

    /// Credential login through the site's own form.
    pub async fn login<P>(&mut self, page: &P, username: &str, password: &str) -> AuthResult<()>
    where
        P: SitePage + ?Sized,
    {
        self.state = self.state.apply(AuthEvent::Begin);
        let outcome = self.credential_login(page, username, password).await;
        self.finish_attempt(&outcome);
        outcome
    }

    async fn credential_login<P>(&self, page: &P, username: &str, password: &str) -> AuthResult<()>
    where
        P: SitePage + ?Sized,
    {
        let login_url = self.url(&self.site.login_path);
        info!(url = %login_url, "opening login page");
        self.pacer.navigate(page, &login_url).await?;
        self.accept_consent(page).await;

        if !page
            .is_visible(&self.site.username_input, Duration::from_secs(10))
            .await
        {
            return Err(AuthError::Failed("login form did not appear".into()));
        }
        debug!("filling credentials");
        page.fill(&self.site.username_input, username).await?;
        page.fill(&self.site.password_input, password).await?;
        page.press_submit(&self.site.submit_button).await?;

        let timeout = Duration::from_secs(self.auth.login_timeout_seconds);
        if !self.wait_until_off_login(page, timeout).await {
            if let Some(message) = page.first_text(&self.site.login_error_markers).await {
                return Err(AuthError::Failed(message));
            }
            return Err(AuthError::Timeout {
                seconds: self.auth.login_timeout_seconds,
            });
        }
        if !self.has_account_marker(page).await {
            return Err(AuthError::Failed(
                "left the login page but no account marker is visible".into(),
            ));
        }
        info!("login successful");
        Ok(())
    }

    /// Waits for a person to finish logging in, e.g. through a third-party identity provider.
    pub async fn manual_login<P>(&mut self, page: &P, timeout: Duration) -> AuthResult<()>
    where
        P: SitePage + ?Sized,
    {
        self.state = self.state.apply(AuthEvent::Begin);
        let outcome = self.await_manual_login(page, timeout).await;
        self.finish_attempt(&outcome);
        outcome
    }

    async fn await_manual_login<P>(&self, page: &P, timeout: Duration) -> AuthResult<()>
    where
        P: SitePage + ?Sized,
    {
        let login_url = self.url(&self.site.login_path);
        self.pacer.navigate(page, &login_url).await?;
        info!(
            timeout_secs = timeout.as_secs(),
            "complete the login in the browser window"
        );
        let poll = Duration::from_secs(self.auth.manual_poll_seconds.max(1));
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(AuthError::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
            sleep(poll).await;
            let current = match page.current_url().await {
                Ok(url) => url,
                Err(err) => {
                    trace!(error = %err, "could not read url while waiting for login");
                    continue;
                }
            };
            if !self.on_target_domain(&current) {
                trace!(url = %current, "on identity provider, waiting");
                continue;
            }
            if self.on_login_path(&current) {
                continue;
            }
            if self.has_account_marker(page).await {
                info!("manual login successful");
                return Ok(());
            }
        }
    }

    fn finish_attempt(&mut self, outcome: &AuthResult<()>) {
        let event = match outcome {
            Ok(()) => AuthEvent::Succeeded,
            Err(err) => {
                warn!(error = %err, "login attempt failed");
                AuthEvent::Failed
            }
        };
        self.state = self.state.apply(event);
    }

    /// Conservative check: any failure along the way counts as "not authenticated".
    pub async fn is_authenticated<P>(&mut self, page: &P) -> bool
    where
        P: SitePage + ?Sized,
    {
        let valid = self.check_authenticated(page).await;
        self.state = self.state.apply(AuthEvent::Revalidated { valid });
        valid
    }

    async fn check_authenticated<P>(&self, page: &P) -> bool
    where
        P: SitePage + ?Sized,
    {
        let mut current = match page.current_url().await {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "auth check could not read url");
                return false;
            }
        };
        if !self.on_target_domain(&current) {
            let library = self.url(&self.site.library_path);
            if let Err(err) = self.pacer.navigate(page, &library).await {
                warn!(error = %err, "auth check navigation failed");
                return false;
            }
            current = match page.current_url().await {
                Ok(url) => url,
                Err(_) => return false,
            };
        }
        if self.on_login_path(&current) {
            debug!(url = %current, "redirected to login");
            return false;
        }
        self.has_account_marker(page).await
    }

    /// Advisory only; the stored session file is what really ends a session.
    pub async fn logout<P>(&mut self, page: &P)
    where
        P: SitePage + ?Sized,
    {
        let logout_url = self.url(&self.site.logout_path);
        match self.pacer.navigate(page, &logout_url).await {
            Ok(()) => info!("logged out"),
            Err(err) => warn!(error = %err, "logout navigation failed"),
        }
        self.state = AuthState::Unauthenticated;
    }

    async fn accept_consent<P>(&self, page: &P)
    where
        P: SitePage + ?Sized,
    {
        match page.click_first(&self.site.consent_buttons).await {
            Ok(true) => debug!("accepted cookie consent"),
            Ok(false) => {}
            Err(err) => trace!(error = %err, "consent banner click failed"),
        }
    }

    async fn wait_until_off_login<P>(&self, page: &P, timeout: Duration) -> bool
    where
        P: SitePage + ?Sized,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(url) = page.current_url().await {
                if !self.on_login_path(&url) {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(URL_POLL_INTERVAL).await;
        }
    }

    async fn has_account_marker<P>(&self, page: &P) -> bool
    where
        P: SitePage + ?Sized,
    {
        if self.site.account_markers.is_empty() {
            return false;
        }
        let combined = self.site.account_markers.join(", ");
        page.is_visible(&combined, self.marker_timeout()).await
    }

    pub fn on_login_path(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => parsed.path().starts_with(&self.site.login_path),
            Err(_) => url.contains(&self.site.login_path),
        }
    }

    pub fn on_target_domain(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let domain = self.site.target_domain.as_str();
        host == domain || host.ends_with(&format!(".{domain}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserMetrics;
    use std::sync::{Arc, Mutex};

    fn authenticator() -> Authenticator {
        let config = HarvestConfig::default();
        let pacer = RetryPacer::new(
            &config.pacing,
            &config.retry,
            Arc::new(Mutex::new(BrowserMetrics::default())),
        );
        Authenticator::new(&config, pacer)
    }

    #[test]
    fn login_path_detection() {
        let auth = authenticator();
        assert!(auth.on_login_path("https://quizlet.com/login?redirect=%2Flatest"));
        assert!(!auth.on_login_path("https://quizlet.com/latest"));
    }

    #[test]
    fn identity_provider_hosts_are_off_domain() {
        let auth = authenticator();
        assert!(auth.on_target_domain("https://quizlet.com/latest"));
        assert!(auth.on_target_domain("https://www.quizlet.com/latest"));
        assert!(!auth.on_target_domain("https://accounts.google.com/o/oauth2"));
        assert!(!auth.on_target_domain("https://notquizlet.com/"));
        assert!(!auth.on_target_domain("about:blank"));
    }
}
