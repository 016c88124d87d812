use chrono::Utc;
use serde::Serialize;

use crate::scraper::{Card, CardSet};

use super::{ExportFormat, ExportResult, Exporter};

#[derive(Serialize)]
struct Document<'a> {
    metadata: Metadata<'a>,
    cards: &'a [Card],
}

#[derive(Serialize)]
struct Metadata<'a> {
    set_id: &'a str,
    title: &'a str,
    url: &'a str,
    description: Option<&'a str>,
    created_by: Option<&'a str>,
    term_count: usize,
    exported_at: String,
}

/// Set metadata plus every card, pretty-printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, set: &CardSet) -> ExportResult<String> {
        let document = Document {
            metadata: Metadata {
                set_id: &set.id,
                title: &set.title,
                url: &set.url,
                description: set.description.as_deref(),
                created_by: set.created_by.as_deref(),
                term_count: set.term_count(),
                exported_at: Utc::now().to_rfc3339(),
            },
            cards: &set.cards,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fixtures::sample_set;
    use serde_json::Value;

    #[test]
    fn document_carries_metadata_and_cards() {
        let out = JsonExporter.serialize(&sample_set()).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["metadata"]["set_id"], "123");
        assert_eq!(value["metadata"]["term_count"], 2);
        assert!(value["metadata"]["exported_at"].is_string());
        assert_eq!(value["cards"][1]["image_url"], "https://img.example/r.png");
    }
}
