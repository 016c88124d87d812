//! Structural search over captured JSON of unknown shape.

use serde_json::{Map, Value};
use tracing::trace;

use super::model::Card;

/// Keys whose presence marks a response as carrying flashcard data.
pub const INDICATOR_KEYS: [&str; 4] = ["studiableItem", "terms", "cards", "studiableData"];
/// How many object levels `is_flashcard_payload` descends. Lists do not count.
pub const MAX_INDICATOR_DEPTH: usize = 3;
/// Object keys searched first for the term list.
pub const TERM_CONTAINER_KEYS: [&str; 3] = ["studiableItem", "terms", "cards"];
/// A list is a term list when its first object has one of these keys.
pub const TERM_ENTRY_KEYS: [&str; 4] = ["word", "term", "definition", "cardSides"];

const MAX_SEARCH_DEPTH: usize = 32;

pub fn is_flashcard_payload(value: &Value) -> bool {
    match value {
        Value::Object(map) => object_has_indicator(map, 0),
        _ => false,
    }
}

fn object_has_indicator(map: &Map<String, Value>, depth: usize) -> bool {
    if depth > MAX_INDICATOR_DEPTH {
        return false;
    }
    map.iter().any(|(key, value)| {
        INDICATOR_KEYS.contains(&key.as_str()) || value_has_indicator(value, depth + 1)
    })
}

fn value_has_indicator(value: &Value, depth: usize) -> bool {
    match value {
        Value::Object(inner) => object_has_indicator(inner, depth),
        Value::Array(items) => items.iter().any(|item| value_has_indicator(item, depth)),
        _ => false,
    }
}

/// Set-level fields picked up while walking the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadSet {
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub cards: Vec<Card>,
}

/// First list of term-like objects in `value`.
pub fn find_terms(value: &Value) -> Option<&[Value]> {
    search(value, 0)
}

fn search(value: &Value, depth: usize) -> Option<&[Value]> {
    if depth > MAX_SEARCH_DEPTH {
        return None;
    }
    match value {
        Value::Array(items) => {
            if let Some(Value::Object(first)) = items.first() {
                if TERM_ENTRY_KEYS.iter().any(|key| first.contains_key(*key)) {
                    return Some(items.as_slice());
                }
            }
            items.iter().find_map(|item| search(item, depth + 1))
        }
        Value::Object(map) => {
            for key in TERM_CONTAINER_KEYS {
                if let Some(inner) = map.get(key) {
                    if let Some(found) = search(inner, depth + 1) {
                        return Some(found);
                    }
                }
            }
            map.values().find_map(|inner| search(inner, depth + 1))
        }
        _ => None,
    }
}

/// Fills title, description and creator from whichever object levels carry
/// them, independently of where the term list sits. First value found wins.
pub fn harvest_metadata(value: &Value, meta: &mut PayloadSet) {
    walk_metadata(value, meta, 0);
}

fn walk_metadata(value: &Value, meta: &mut PayloadSet, depth: usize) {
    if depth > MAX_SEARCH_DEPTH || meta_complete(meta) {
        return;
    }
    match value {
        Value::Object(map) => {
            take_metadata(map, meta);
            for inner in map.values() {
                walk_metadata(inner, meta, depth + 1);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_metadata(item, meta, depth + 1);
            }
        }
        _ => {}
    }
}

fn meta_complete(meta: &PayloadSet) -> bool {
    meta.title.is_some() && meta.description.is_some() && meta.created_by.is_some()
}

fn take_metadata(map: &Map<String, Value>, meta: &mut PayloadSet) {
    if meta.title.is_none() {
        meta.title = non_empty_str(map.get("title"));
    }
    if meta.description.is_none() {
        meta.description = non_empty_str(map.get("description"));
    }
    if meta.created_by.is_none() {
        meta.created_by = map
            .get("creator")
            .and_then(|creator| non_empty_str(creator.get("username")));
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn first_str(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_empty_str(entry.get(*key)))
}

fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Normalizes one raw term entry. Entries lacking either side yield `None`.
pub fn parse_term(entry: &Value) -> Option<Card> {
    let mut term = None;
    let mut definition = None;
    let mut image_url = None;

    if let Some(sides) = entry.get("cardSides").and_then(Value::as_array) {
        for side in sides {
            let label = side.get("label").and_then(Value::as_str).unwrap_or_default();
            let Some(media) = side.get("media").and_then(Value::as_array) else {
                continue;
            };
            for item in media {
                match item.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        let text = non_empty_str(item.get("plainText"));
                        match label {
                            "word" => term = text.or(term),
                            "definition" => definition = text.or(definition),
                            _ => {}
                        }
                    }
                    Some("image") => {
                        if image_url.is_none() {
                            image_url = non_empty_str(item.get("url"));
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    let term = term.or_else(|| first_str(entry, &["word", "term", "front"]))?;
    let definition = definition.or_else(|| first_str(entry, &["definition", "back"]))?;
    let image_url = image_url.or_else(|| first_str(entry, &["image", "imageUrl", "_imageUrl"]));
    let term_id = id_string(entry.get("id")).or_else(|| id_string(entry.get("termId")));

    Card::new(&term, &definition).map(|card| card.with_term_id(term_id).with_image(image_url))
}

/// Full parse of a payload into metadata plus cards in source order.
pub fn parse_payload(value: &Value) -> PayloadSet {
    let mut parsed = PayloadSet::default();
    harvest_metadata(value, &mut parsed);
    let terms = find_terms(value).unwrap_or_default();
    let total = terms.len();
    parsed.cards = terms.iter().filter_map(parse_term).collect();
    trace!(total, kept = parsed.cards.len(), "parsed term entries");
    parsed
}
