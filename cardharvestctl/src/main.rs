use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = cardharvestctl::Cli::parse();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cli.log_level()))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = cardharvestctl::run(cli) {
        cardharvestctl::report_failure(&err);
        std::process::exit(1);
    }
}
