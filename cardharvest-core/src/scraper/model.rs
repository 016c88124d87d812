use serde::{Deserialize, Serialize};

/// Lightweight discovery record; `id` is derived from `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReference {
    pub id: String,
    pub title: String,
    pub url: String,
    pub approx_term_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub term: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Card {
    /// `None` unless both sides are non-empty after trimming.
    pub fn new(term: &str, definition: &str) -> Option<Self> {
        let term = term.trim();
        let definition = definition.trim();
        if term.is_empty() || definition.is_empty() {
            return None;
        }
        Some(Self {
            term: term.to_string(),
            definition: definition.to_string(),
            term_id: None,
            image_url: None,
        })
    }

    pub fn with_term_id(mut self, term_id: Option<String>) -> Self {
        self.term_id = term_id.filter(|id| !id.is_empty());
        self
    }

    pub fn with_image(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url.filter(|url| !url.trim().is_empty());
        self
    }
}

/// Which extraction path produced a set's cards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Api,
    Dom,
    InitialState,
    #[default]
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSet {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub cards: Vec<Card>,
    #[serde(default)]
    pub strategy: ExtractionStrategy,
}

impl CardSet {
    pub fn empty(id: String, url: &str) -> Self {
        Self {
            id,
            title: String::from("Untitled Set"),
            url: url.to_string(),
            description: None,
            created_by: None,
            cards: Vec::new(),
            strategy: ExtractionStrategy::None,
        }
    }

    pub fn term_count(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}
