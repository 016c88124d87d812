use clap::{ArgGroup, Args};

/// Exactly one source of sets must be chosen.
#[derive(Args, Debug, Clone)]
#[command(group(
    ArgGroup::new("target")
        .required(true)
        .args(["set_id", "url", "all"]),
))]
pub struct ScrapeArgs {
    /// Scrape one set listed in the metadata file
    #[arg(long, value_name = "ID")]
    pub set_id: Option<String>,

    /// Scrape the set at this address
    #[arg(long)]
    pub url: Option<String>,

    /// Scrape every set in the metadata file
    #[arg(long)]
    pub all: bool,

    /// Export formats (json, csv, tsv, anki, tagged); overrides the config
    #[arg(long = "format", value_name = "FORMAT", value_delimiter = ',')]
    pub formats: Vec<String>,
}
