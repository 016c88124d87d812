use crate::scraper::CardSet;

use super::{flatten_lines, ExportFormat, ExportResult, Exporter};

/// Plain-text notes in Anki's `front;back[;tags]` import layout.
#[derive(Debug, Clone)]
pub struct AnkiExporter {
    delimiter: char,
    include_tags: bool,
}

impl Default for AnkiExporter {
    fn default() -> Self {
        Self {
            delimiter: ';',
            include_tags: false,
        }
    }
}

impl AnkiExporter {
    pub fn with_tags(mut self) -> Self {
        self.include_tags = true;
        self
    }

    fn field(&self, text: &str) -> String {
        flatten_lines(&text.replace(self.delimiter, ","))
    }
}

impl Exporter for AnkiExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Anki
    }

    fn file_extension(&self) -> &'static str {
        "txt"
    }

    fn file_name(&self, set: &CardSet) -> String {
        format!("{}_{}_anki.txt", set.id, super::sanitize_filename(&set.title))
    }

    fn serialize(&self, set: &CardSet) -> ExportResult<String> {
        let mut lines = vec![
            format!("# {}", set.title),
            format!("# Exported from Quizlet - {} cards", set.term_count()),
            String::new(),
        ];
        let tag = set.title.replace(' ', "_");
        for card in &set.cards {
            let mut line = format!(
                "{}{}{}",
                self.field(&card.term),
                self.delimiter,
                self.field(&card.definition)
            );
            if self.include_tags {
                line.push(self.delimiter);
                line.push_str(&tag);
            }
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }
}
