use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HarvestConfig {
    pub site: SiteSection,
    pub chromium: ChromiumSection,
    pub flags: FlagsSection,
    pub fingerprint: FingerprintSection,
    pub human: HumanSection,
    pub pacing: PacingSection,
    pub retry: RetrySection,
    pub auth: AuthSection,
    pub extractor: ExtractorSection,
    pub discovery: DiscoverySection,
    pub export: ExportSection,
    pub observability: ObservabilitySection,
    #[serde(skip)]
    pub credentials: Credentials,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl HarvestConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        match &self.base_dir {
            Some(base) if !path.is_absolute() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn session_path(&self) -> PathBuf {
        self.resolve_path(Path::new(&self.auth.session_dir).join(&self.auth.session_file))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.export.output_dir)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.output_dir().join(&self.export.metadata_file)
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.resolve_path(&self.chromium.profile_dir)
    }

    pub fn site_url(&self, path: &str) -> String {
        format!("{}{}", self.site.base_url.trim_end_matches('/'), path)
    }

    /// Overrides taken from the process environment after the file is parsed.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("CARDHARVEST_HEADLESS") {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.chromium.headless = true,
                "0" | "false" | "no" => self.chromium.headless = false,
                other => tracing::warn!(value = %other, "ignoring invalid CARDHARVEST_HEADLESS"),
            }
        }
        if let Some(dir) = lookup("CARDHARVEST_OUTPUT_DIR").filter(|v| !v.trim().is_empty()) {
            self.export.output_dir = dir;
        }
        if let Some(username) = lookup("CARDHARVEST_USERNAME").filter(|v| !v.is_empty()) {
            self.credentials.username = Some(username);
        }
        if let Some(password) = lookup("CARDHARVEST_PASSWORD").filter(|v| !v.is_empty()) {
            self.credentials.password = Some(password);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pacing.delay_min_ms > self.pacing.delay_max_ms {
            return Err(ConfigError::Invalid(format!(
                "pacing.delay_min_ms ({}) exceeds pacing.delay_max_ms ({})",
                self.pacing.delay_min_ms, self.pacing.delay_max_ms
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if url::Url::parse(&self.site.base_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "site.base_url is not a valid url: {}",
                self.site.base_url
            )));
        }
        if self.fingerprint.profiles.is_empty() {
            return Err(ConfigError::Invalid(
                "fingerprint.profiles must contain at least one entry".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteSection {
    pub base_url: String,
    pub login_path: String,
    pub library_path: String,
    pub logout_path: String,
    /// While a manual login is in progress, any host outside this domain is an identity provider.
    pub target_domain: String,
    pub account_markers: Vec<String>,
    pub login_error_markers: Vec<String>,
    pub consent_buttons: Vec<String>,
    pub username_input: String,
    pub password_input: String,
    pub submit_button: String,
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            base_url: "https://quizlet.com".into(),
            login_path: "/login".into(),
            library_path: "/latest".into(),
            logout_path: "/logout".into(),
            target_domain: "quizlet.com".into(),
            account_markers: vec![
                "[data-testid=\"user-menu\"]".into(),
                "[class*=\"UserAvatar\"]".into(),
                "[class*=\"ProfileIcon\"]".into(),
                "button[aria-label*=\"profile\"]".into(),
                "[class*=\"NavigationUser\"]".into(),
                "a[href*=\"/settings\"]".into(),
            ],
            login_error_markers: vec![
                "[class*=\"error\"]".into(),
                "[class*=\"Error\"]".into(),
                "[role=\"alert\"]".into(),
            ],
            consent_buttons: vec![
                "#onetrust-accept-btn-handler".into(),
                "button[id*=\"accept\"]".into(),
                "button[data-testid=\"cookie-accept\"]".into(),
            ],
            username_input: "input[type=\"email\"], input[type=\"text\"]".into(),
            password_input: "input[type=\"password\"]".into(),
            submit_button: "button[type=\"submit\"]".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub profile_dir: String,
    /// A profile lock older than this is considered abandoned by a crashed run.
    pub stale_lock_minutes: u64,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: false,
            sandbox: true,
            disable_gpu: false,
            profile_dir: "profile".into(),
            stale_lock_minutes: 360,
            request_timeout_seconds: Some(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlagsSection {
    pub no_first_run: bool,
    pub disable_automation_controlled: bool,
    pub disable_blink_features: Vec<String>,
    pub extra_args: Vec<String>,
}

impl Default for FlagsSection {
    fn default() -> Self {
        Self {
            no_first_run: true,
            disable_automation_controlled: true,
            disable_blink_features: vec!["AutomationControlled".into()],
            extra_args: Vec::new(),
        }
    }
}

/// One internally consistent browser identity. Contexts pick from a vetted
/// pool instead of generating values, so every field agrees with the others.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FingerprintProfile {
    pub user_agent: String,
    pub platform: String,
    pub locale: String,
    pub accept_language: String,
    pub timezone: String,
    pub viewport: [u32; 2],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FingerprintSection {
    pub stealth: bool,
    pub enable_canvas_noise: bool,
    pub canvas_noise_range: [i32; 2],
    pub webgl_vendor: String,
    pub webgl_renderer: String,
    pub profiles: Vec<FingerprintProfile>,
}

impl Default for FingerprintSection {
    fn default() -> Self {
        Self {
            stealth: true,
            enable_canvas_noise: false,
            canvas_noise_range: [-2, 2],
            webgl_vendor: "Intel Inc.".into(),
            webgl_renderer: "Intel Iris OpenGL Engine".into(),
            profiles: vec![
                FingerprintProfile {
                    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
                    platform: "Win32".into(),
                    locale: "en-US".into(),
                    accept_language: "en-US,en;q=0.9".into(),
                    timezone: "America/New_York".into(),
                    viewport: [1920, 1080],
                },
                FingerprintProfile {
                    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".into(),
                    platform: "Win32".into(),
                    locale: "en-GB".into(),
                    accept_language: "en-GB,en;q=0.9".into(),
                    timezone: "Europe/London".into(),
                    viewport: [1536, 864],
                },
                FingerprintProfile {
                    user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
                    platform: "MacIntel".into(),
                    locale: "en-US".into(),
                    accept_language: "en-US,en;q=0.9".into(),
                    timezone: "America/Los_Angeles".into(),
                    viewport: [1440, 900],
                },
                FingerprintProfile {
                    user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
                    platform: "Linux x86_64".into(),
                    locale: "en-US".into(),
                    accept_language: "en-US,en;q=0.8".into(),
                    timezone: "America/Chicago".into(),
                    viewport: [1366, 768],
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HumanSection {
    pub typing_cadence_cpm: [u32; 2],
    pub typing_jitter_ms: [u32; 2],
    pub click_hesitation_ms: [u32; 2],
}

impl Default for HumanSection {
    fn default() -> Self {
        Self {
            typing_cadence_cpm: [260, 420],
            typing_jitter_ms: [10, 60],
            click_hesitation_ms: [80, 260],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingSection {
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    /// Quiet period after the load event, standing in for network idle.
    pub settle_ms: u64,
    pub scroll_wait_ms: u64,
    pub max_scroll_rounds: usize,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            delay_min_ms: 2_000,
            delay_max_ms: 5_000,
            settle_ms: 1_500,
            scroll_wait_ms: 1_000,
            max_scroll_rounds: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub backoff_base_seconds: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_seconds: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub session_dir: String,
    pub session_file: String,
    pub login_timeout_seconds: u64,
    pub manual_timeout_seconds: u64,
    pub manual_poll_seconds: u64,
    pub marker_timeout_ms: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            session_dir: "auth".into(),
            session_file: "session.json".into(),
            login_timeout_seconds: 30,
            manual_timeout_seconds: 300,
            manual_poll_seconds: 2,
            marker_timeout_ms: 2_000,
        }
    }
}

/// One structural assumption about how the set page lays out its terms.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SelectorTriplet {
    pub container: String,
    pub term: String,
    pub definition: String,
}

impl SelectorTriplet {
    pub fn new(container: &str, term: &str, definition: &str) -> Self {
        Self {
            container: container.to_string(),
            term: term.to_string(),
            definition: definition.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorSection {
    pub prefer_api: bool,
    pub api_url_hints: Vec<String>,
    pub title_selectors: Vec<String>,
    pub expand_buttons: Vec<String>,
    pub triplets: Vec<SelectorTriplet>,
    pub not_found_markers: Vec<String>,
    pub private_markers: Vec<String>,
    pub rate_limit_markers: Vec<String>,
    pub probe_timeout_ms: u64,
    pub initial_state_script: String,
}

impl Default for ExtractorSection {
    fn default() -> Self {
        Self {
            prefer_api: true,
            api_url_hints: vec!["/webapi/".into()],
            title_selectors: vec!["h1".into(), "[class*=\"SetTitle\"]".into()],
            expand_buttons: vec!["See all".into(), "Show all".into(), "Xem tất cả".into()],
            triplets: vec![
                SelectorTriplet::new(
                    "[class*=\"SetPageTerm\"]",
                    "[class*=\"TermText\"]",
                    "[class*=\"DefinitionText\"]",
                ),
                SelectorTriplet::new(".SetPageTerms-term", ".TermText", ".DefinitionText"),
                SelectorTriplet::new(
                    "[class*=\"term-\"]",
                    "[class*=\"word\"]",
                    "[class*=\"definition\"]",
                ),
            ],
            not_found_markers: vec!["Page not found".into()],
            private_markers: vec!["This set is private".into()],
            rate_limit_markers: vec!["Too Many Requests".into()],
            probe_timeout_ms: 1_000,
            initial_state_script: DEFAULT_INITIAL_STATE_SCRIPT.into(),
        }
    }
}

const DEFAULT_INITIAL_STATE_SCRIPT: &str = r#"
(() => {
    if (window.__NEXT_DATA__ && window.__NEXT_DATA__.props) {
        return window.__NEXT_DATA__.props;
    }
    if (window.Quizlet && window.Quizlet.setPageData) {
        return window.Quizlet.setPageData;
    }
    return null;
})()
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub set_link_selectors: Vec<String>,
    pub group_link_selectors: Vec<String>,
    pub group_path_marker: String,
    pub sets_tab_labels: Vec<String>,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            set_link_selectors: vec![
                "a[href*=\"-flash-cards\"]".into(),
                "a[href*=\"/set/\"]".into(),
                "[class*=\"SetPreview\"] a".into(),
                "[class*=\"DashboardListItem\"] a".into(),
            ],
            group_link_selectors: vec!["a[href*=\"/class/\"]".into(), "[class*=\"Class\"] a".into()],
            group_path_marker: "/class/".into(),
            sets_tab_labels: vec!["Sets".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    pub output_dir: String,
    pub formats: Vec<String>,
    pub include_images: bool,
    pub metadata_file: String,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            output_dir: "output".into(),
            formats: vec!["tagged".into()],
            include_images: true,
            metadata_file: "sets_metadata.json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilitySection {
    pub failure_log: String,
    pub ledger_db: String,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            failure_log: "logs/failures.jsonl".into(),
            ledger_db: "logs/ledger.sqlite".into(),
        }
    }
}

/// Loads `harvest.toml`. A missing file falls back to the built-in defaults;
/// relative paths inside the file resolve against the file's directory.
pub fn load_harvest_config<P: AsRef<Path>>(path: P) -> Result<HarvestConfig> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        let mut config: HarvestConfig = load_toml(path)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        config
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        HarvestConfig::default()
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
