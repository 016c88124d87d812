//! Per-set serializers. Every format writes one file per `CardSet`.

mod anki;
mod delimited;
mod json;
mod tagged;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::{error, info};

use crate::scraper::CardSet;

pub use anki::AnkiExporter;
pub use delimited::DelimitedExporter;
pub use json::JsonExporter;
pub use tagged::{parse_tagged, TaggedCard, TaggedExporter};

const MAX_FILE_STEM: usize = 50;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to serialize set: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write delimited rows: {0}")]
    Csv(#[from] csv::Error),
    #[error("unsupported export format: {0}")]
    UnknownFormat(String),
}

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Json,
    Csv,
    Tsv,
    Anki,
    Tagged,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 5] = [
        ExportFormat::Json,
        ExportFormat::Csv,
        ExportFormat::Tsv,
        ExportFormat::Anki,
        ExportFormat::Tagged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
            ExportFormat::Anki => "anki",
            ExportFormat::Tagged => "tagged",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        ExportFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == wanted)
            .ok_or_else(|| ExportError::UnknownFormat(value.to_string()))
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strips characters that are invalid in file names, turns spaces into
/// underscores and keeps at most 50 characters.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .map(|c| if c == ' ' { '_' } else { c })
        .take(MAX_FILE_STEM)
        .collect()
}

pub trait Exporter {
    fn format(&self) -> ExportFormat;
    fn file_extension(&self) -> &'static str;
    fn serialize(&self, set: &CardSet) -> ExportResult<String>;

    fn file_name(&self, set: &CardSet) -> String {
        format!(
            "{}_{}.{}",
            set.id,
            sanitize_filename(&set.title),
            self.file_extension()
        )
    }

    /// Writes `set` into `output_dir`, creating it when needed.
    fn export(&self, set: &CardSet, output_dir: &Path) -> ExportResult<PathBuf> {
        fs::create_dir_all(output_dir).map_err(|source| ExportError::Io {
            source,
            path: output_dir.to_path_buf(),
        })?;
        let path = output_dir.join(self.file_name(set));
        let content = self.serialize(set)?;
        fs::write(&path, content).map_err(|source| ExportError::Io {
            source,
            path: path.clone(),
        })?;
        info!(
            format = %self.format(),
            cards = set.term_count(),
            path = %path.display(),
            "set exported"
        );
        Ok(path)
    }
}

pub fn exporter_for(format: ExportFormat, include_images: bool) -> Box<dyn Exporter> {
    match format {
        ExportFormat::Json => Box::new(JsonExporter::default()),
        ExportFormat::Csv => Box::new(DelimitedExporter::csv(include_images)),
        ExportFormat::Tsv => Box::new(DelimitedExporter::tsv(include_images)),
        ExportFormat::Anki => Box::new(AnkiExporter::default()),
        ExportFormat::Tagged => Box::new(TaggedExporter::new(include_images)),
    }
}

/// Exports each set in turn; a set that fails to export is logged and skipped.
pub fn export_all(exporter: &dyn Exporter, sets: &[CardSet], output_dir: &Path) -> Vec<PathBuf> {
    sets.iter()
        .filter_map(|set| match exporter.export(set, output_dir) {
            Ok(path) => Some(path),
            Err(err) => {
                error!(set_id = %set.id, title = %set.title, error = %err, "export failed");
                None
            }
        })
        .collect()
}

/// Writes `set` once per format. A format that fails is logged and the
/// others still run.
pub fn export_formats(
    set: &CardSet,
    formats: &[ExportFormat],
    include_images: bool,
    output_dir: &Path,
) -> Vec<PathBuf> {
    formats
        .iter()
        .flat_map(|format| {
            let exporter = exporter_for(*format, include_images);
            export_all(exporter.as_ref(), std::slice::from_ref(set), output_dir)
        })
        .collect()
}

/// Newlines would break line-oriented import formats.
fn flatten_lines(text: &str) -> String {
    text.replace('\r', "").replace('\n', " ")
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn filenames_are_sanitized_and_truncated() {
        assert_eq!(sanitize_filename("Cell Biology: Unit 3?"), "Cell_Biology_Unit_3");
        assert_eq!(sanitize_filename(&"x".repeat(80)).len(), 50);
    }

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!(" tagged ".parse::<ExportFormat>().unwrap(), ExportFormat::Tagged);
        assert!(matches!(
            "xlsx".parse::<ExportFormat>(),
            Err(ExportError::UnknownFormat(_))
        ));
    }

    #[test]
    fn export_all_writes_one_file_per_set() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("nested/output");
        let mut second = fixtures::sample_set();
        second.id = "456".into();
        let sets = vec![fixtures::sample_set(), second];
        for format in ExportFormat::ALL {
            let exporter = exporter_for(format, true);
            let paths = export_all(exporter.as_ref(), &sets, &out);
            assert_eq!(paths.len(), 2, "{format}");
            assert!(paths.iter().all(|path| path.exists()));
        }
    }
}
