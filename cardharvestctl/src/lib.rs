use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use cardharvest_core::{
    load_harvest_config, BrowserMetrics, Catalog, Credentials, ErrorCategory, ExportFormat,
    HarvestConfig, HarvestError, HarvestService, HarvestedSet,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

mod commands;

pub use commands::{DiscoverArgs, LoginArgs, ScrapeArgs};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] cardharvest_core::ConfigError),
    #[error(transparent)]
    Harvest(#[from] HarvestError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Usage(String),
}

impl AppError {
    /// The line printed for the user before exiting with status 1.
    pub fn user_message(&self) -> String {
        let harvest = match self {
            AppError::Harvest(err) => err,
            AppError::Config(err) => return format!("Configuration error: {err}"),
            AppError::Usage(message) => return message.clone(),
            other => return format!("Unexpected error: {other}"),
        };
        match harvest.category() {
            ErrorCategory::SessionNotFound => {
                "No saved session found. Run `cardharvestctl login` first.".to_string()
            }
            ErrorCategory::SessionExpired => {
                "Your session has expired. Run `cardharvestctl login` again.".to_string()
            }
            ErrorCategory::Authentication => format!("Authentication failed: {harvest}"),
            ErrorCategory::CatalogMissing => {
                "No discovered sets yet. Run `cardharvestctl discover` first.".to_string()
            }
            ErrorCategory::SetNotFound => format!("Set not found: {harvest}"),
            ErrorCategory::AccessDenied => format!("Access denied: {harvest}"),
            ErrorCategory::RateLimited => {
                format!("Rate limited by the site, wait a while and retry: {harvest}")
            }
            ErrorCategory::Configuration => format!("Configuration error: {harvest}"),
            ErrorCategory::Export => format!("Export failed: {harvest}"),
            ErrorCategory::Unexpected => format!("Unexpected error: {harvest}"),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Flashcard harvesting from an authenticated account", long_about = None)]
pub struct Cli {
    /// Path of harvest.toml
    #[arg(long, default_value = "configs/harvest.toml")]
    pub config: PathBuf,
    /// More output (-v info, -vv debug, -vvv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Run Chromium without a window
    #[arg(long, conflicts_with = "headed", global = true)]
    pub headless: bool,
    /// Run Chromium with a visible window
    #[arg(long, global = true)]
    pub headed: bool,
    /// Report format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub output: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log filter for the `-v` count.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    fn headless_override(&self) -> Option<bool> {
        if self.headless {
            Some(true)
        } else if self.headed {
            Some(false)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in and save the session
    Login(LoginArgs),
    /// Discover own and shared sets
    Discover(DiscoverArgs),
    /// Scrape and export sets
    Scrape(ScrapeArgs),
    /// End the session and delete the saved session file
    Logout,
}

pub fn run(cli: Cli) -> Result<()> {
    let mut config = load_harvest_config(&cli.config)?;
    if let Some(headless) = cli.headless_override() {
        config.chromium.headless = headless;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let mut service = HarvestService::new(config);
        let outcome = execute(&cli, &mut service).await;
        service.close().await;
        outcome
    })
}

async fn execute(cli: &Cli, service: &mut HarvestService) -> Result<()> {
    match &cli.command {
        Commands::Login(args) => {
            let report = login(service, args).await?;
            render(&report, cli.output)
        }
        Commands::Discover(args) => {
            let credentials = credentials(service.config(), args.username.clone())?;
            let catalog = service.discover(&credentials, args.manual).await?;
            render(&DiscoverReport::from(&catalog), cli.output)
        }
        Commands::Scrape(args) => {
            let formats = parse_formats(&args.formats)?;
            service.set_formats(formats);
            let harvested = if let Some(set_id) = &args.set_id {
                vec![service.scrape_by_id(set_id).await?]
            } else if let Some(url) = &args.url {
                vec![service.scrape_by_url(url).await?]
            } else {
                service.scrape_all().await?
            };
            render(&ScrapeReport::new(&harvested, service.metrics()), cli.output)
        }
        Commands::Logout => {
            let removed = service.logout().await?;
            render(&LogoutReport { session_removed: removed }, cli.output)
        }
    }
}

async fn login(service: &mut HarvestService, args: &LoginArgs) -> Result<LoginReport> {
    let session_file = service.config().session_path();
    let credentials = credentials(service.config(), args.username.clone())?;
    match (credentials.username, credentials.password) {
        (Some(username), Some(password)) => {
            service.login(&username, &password).await?;
            Ok(LoginReport {
                method: "credentials",
                session_file,
            })
        }
        (Some(_), None) => Err(AppError::Usage("A password is required to log in.".into())),
        _ => {
            let timeout = args
                .timeout
                .unwrap_or(service.config().auth.manual_timeout_seconds);
            service.manual_login(Duration::from_secs(timeout)).await?;
            Ok(LoginReport {
                method: "manual",
                session_file,
            })
        }
    }
}

/// Username from the command line or the environment; the password from the
/// environment, or prompted for when a username was given explicitly.
fn credentials(config: &HarvestConfig, username: Option<String>) -> Result<Credentials> {
    let explicit = username.is_some();
    let username = username.or_else(|| config.credentials.username.clone());
    let mut password = config.credentials.password.clone();
    if explicit && password.is_none() {
        password = prompt_password()?;
    }
    Ok(Credentials { username, password })
}

fn prompt_password() -> Result<Option<String>> {
    let mut stderr = io::stderr();
    write!(stderr, "Password: ")?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    Ok((!password.is_empty()).then_some(password))
}

fn parse_formats(names: &[String]) -> Result<Vec<ExportFormat>> {
    names
        .iter()
        .map(|name| {
            name.parse::<ExportFormat>().map_err(|_| {
                let known: Vec<&str> = ExportFormat::ALL.iter().map(|f| f.as_str()).collect();
                AppError::Usage(format!(
                    "Unknown export format `{name}` (expected one of: {})",
                    known.join(", ")
                ))
            })
        })
        .collect()
}

/// Prints the message for `err` and logs its full detail.
pub fn report_failure(err: &AppError) {
    match err {
        AppError::Harvest(harvest) if harvest.category() == ErrorCategory::Unexpected => {
            error!(error = ?harvest, "unexpected failure");
        }
        other => debug!(error = ?other, "command failed"),
    }
    eprintln!("{}", err.user_message());
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
struct LoginReport {
    method: &'static str,
    session_file: PathBuf,
}

impl DisplayFallback for LoginReport {
    fn display(&self) -> String {
        format!(
            "Logged in ({}); session saved to {}",
            self.method,
            self.session_file.display()
        )
    }
}

#[derive(Debug, Serialize)]
struct DiscoverReport {
    total_sets: usize,
    sets: Vec<DiscoveredRow>,
}

#[derive(Debug, Serialize)]
struct DiscoveredRow {
    set_id: String,
    title: String,
    term_count: u32,
}

impl From<&Catalog> for DiscoverReport {
    fn from(catalog: &Catalog) -> Self {
        Self {
            total_sets: catalog.total_sets,
            sets: catalog
                .sets
                .iter()
                .map(|entry| DiscoveredRow {
                    set_id: entry.set_id.clone(),
                    title: entry.title.clone(),
                    term_count: entry.term_count,
                })
                .collect(),
        }
    }
}

impl DisplayFallback for DiscoverReport {
    fn display(&self) -> String {
        if self.sets.is_empty() {
            return "No sets found".to_string();
        }
        let mut lines = vec![format!("Discovered {} sets:", self.total_sets)];
        for row in &self.sets {
            lines.push(format!(
                "  {} | {} | ~{} terms",
                row.set_id, row.title, row.term_count
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct ScrapeReport {
    sets: Vec<ScrapedRow>,
    metrics: BrowserMetrics,
}

#[derive(Debug, Serialize)]
struct ScrapedRow {
    set_id: String,
    title: String,
    cards: usize,
    files: Vec<PathBuf>,
}

impl ScrapeReport {
    fn new(harvested: &[HarvestedSet], metrics: BrowserMetrics) -> Self {
        Self {
            sets: harvested
                .iter()
                .map(|item| ScrapedRow {
                    set_id: item.set.id.clone(),
                    title: item.set.title.clone(),
                    cards: item.set.term_count(),
                    files: item.files.clone(),
                })
                .collect(),
            metrics,
        }
    }
}

impl DisplayFallback for ScrapeReport {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        if self.sets.is_empty() {
            lines.push("No sets scraped".to_string());
        }
        for row in &self.sets {
            lines.push(format!("{} | {} | {} cards", row.set_id, row.title, row.cards));
            for file in &row.files {
                lines.push(format!("  -> {}", file.display()));
            }
        }
        let m = &self.metrics;
        lines.push("Metrics:".to_string());
        lines.push(format!(
            "  sets: {} ok, {} failed, {} cards",
            m.sets_scraped, m.sets_failed, m.cards_extracted
        ));
        lines.push(format!(
            "  navigations: {} ({:.1}% ok), retries: {}",
            m.navigations,
            m.navigation_success_rate(),
            m.retries
        ));
        lines.push(format!(
            "  sources: {} api, {} dom, {} embedded state",
            m.api_captures, m.dom_fallbacks, m.script_fallbacks
        ));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct LogoutReport {
    session_removed: bool,
}

impl DisplayFallback for LogoutReport {
    fn display(&self) -> String {
        if self.session_removed {
            "Logged out; saved session deleted".to_string()
        } else {
            "No saved session".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardharvest_core::AuthError;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn scrape_needs_exactly_one_target() {
        assert!(Cli::try_parse_from(["cardharvestctl", "scrape"]).is_err());
        assert!(
            Cli::try_parse_from(["cardharvestctl", "scrape", "--all", "--set-id", "1"]).is_err()
        );
        let cli = Cli::try_parse_from([
            "cardharvestctl",
            "-vv",
            "scrape",
            "--set-id",
            "123",
            "--format",
            "json,csv",
            "--format",
            "tagged",
        ])
        .unwrap();
        assert_eq!(cli.log_level(), "debug");
        match cli.command {
            Commands::Scrape(args) => {
                assert_eq!(args.set_id.as_deref(), Some("123"));
                let formats = parse_formats(&args.formats).unwrap();
                assert_eq!(
                    formats,
                    [ExportFormat::Json, ExportFormat::Csv, ExportFormat::Tagged]
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn headless_flags_conflict() {
        assert!(Cli::try_parse_from(["cardharvestctl", "--headless", "--headed", "logout"]).is_err());
        let cli = Cli::try_parse_from(["cardharvestctl", "logout", "--headed"]).unwrap();
        assert_eq!(cli.headless_override(), Some(false));
        let cli = Cli::try_parse_from(["cardharvestctl", "logout"]).unwrap();
        assert_eq!(cli.headless_override(), None);
    }

    #[test]
    fn unknown_format_is_a_usage_error() {
        let err = parse_formats(&["xml".to_string()]).unwrap_err();
        assert!(err.user_message().contains("xml"));
        assert!(err.user_message().contains("anki"));
    }

    #[test]
    fn categories_map_to_actionable_messages() {
        let missing = AppError::from(HarvestError::from(AuthError::SessionNotFound {
            path: PathBuf::from("auth/session.json"),
        }));
        assert!(missing.user_message().contains("cardharvestctl login"));

        let expired = AppError::from(HarvestError::from(AuthError::SessionExpired));
        assert!(expired.user_message().contains("expired"));

        let catalog = AppError::from(HarvestError::CatalogMissing {
            path: PathBuf::from("output/sets_metadata.json"),
        });
        assert!(catalog.user_message().contains("discover"));

        let absent = AppError::from(HarvestError::SetNotInCatalog {
            set_id: "9".into(),
        });
        assert!(absent.user_message().starts_with("Set not found"));
    }

    #[test]
    fn scrape_report_lists_files_and_metrics() {
        let report = ScrapeReport {
            sets: vec![ScrapedRow {
                set_id: "1".into(),
                title: "Verbs".into(),
                cards: 2,
                files: vec![PathBuf::from("output/1_Verbs.json")],
            }],
            metrics: BrowserMetrics {
                sets_scraped: 1,
                cards_extracted: 2,
                ..BrowserMetrics::default()
            },
        };
        let text = report.display();
        assert!(text.contains("1 | Verbs | 2 cards"));
        assert!(text.contains("output/1_Verbs.json"));
        assert!(text.contains("1 ok, 0 failed, 2 cards"));
    }
}
