use csv::{QuoteStyle, WriterBuilder};

use crate::scraper::CardSet;

use super::{ExportError, ExportFormat, ExportResult, Exporter};

/// Quoted CSV or TSV with a header row.
#[derive(Debug, Clone, Copy)]
pub struct DelimitedExporter {
    delimiter: u8,
    include_header: bool,
    include_images: bool,
}

impl DelimitedExporter {
    pub fn csv(include_images: bool) -> Self {
        Self {
            delimiter: b',',
            include_header: true,
            include_images,
        }
    }

    pub fn tsv(include_images: bool) -> Self {
        Self {
            delimiter: b'\t',
            ..Self::csv(include_images)
        }
    }

    pub fn without_header(mut self) -> Self {
        self.include_header = false;
        self
    }
}

impl Exporter for DelimitedExporter {
    fn format(&self) -> ExportFormat {
        if self.delimiter == b'\t' {
            ExportFormat::Tsv
        } else {
            ExportFormat::Csv
        }
    }

    fn file_extension(&self) -> &'static str {
        if self.delimiter == b'\t' {
            "tsv"
        } else {
            "csv"
        }
    }

    fn serialize(&self, set: &CardSet) -> ExportResult<String> {
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote_style(QuoteStyle::Always)
            .from_writer(Vec::new());
        if self.include_header {
            if self.include_images {
                writer.write_record(["term", "definition", "image_url"])?;
            } else {
                writer.write_record(["term", "definition"])?;
            }
        }
        for card in &set.cards {
            if self.include_images {
                writer.write_record([
                    card.term.as_str(),
                    card.definition.as_str(),
                    card.image_url.as_deref().unwrap_or_default(),
                ])?;
            } else {
                writer.write_record([card.term.as_str(), card.definition.as_str()])?;
            }
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| ExportError::Csv(err.into_error().into()))?;
        String::from_utf8(bytes).map_err(|err| {
            ExportError::Csv(csv::Error::from(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                err,
            )))
        })
    }
}
