use clap::Args;

/// Enumerates own and shared sets and writes the metadata file.
#[derive(Args, Debug, Clone)]
pub struct DiscoverArgs {
    /// Account used when the stored session has to be replaced
    #[arg(short, long)]
    pub username: Option<String>,

    /// Re-login by hand in a browser window when the session is not usable
    #[arg(long)]
    pub manual: bool,
}
