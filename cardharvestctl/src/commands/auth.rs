use clap::Args;

/// Parameters of `login`.
#[derive(Args, Debug, Clone)]
pub struct LoginArgs {
    /// Seconds to wait for a manual login in the browser window
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
    /// Log in with this account instead of waiting for a manual login
    #[arg(short, long)]
    pub username: Option<String>,
}
