use std::sync::OnceLock;

use regex::Regex;

static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();

fn patterns() -> &'static [Regex; 3] {
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"/(\d+)/[^/]+-flash-cards").expect("valid regex"),
            Regex::new(r"/set/(\d+)").expect("valid regex"),
            Regex::new(r"/(\d+)/").expect("valid regex"),
        ]
    })
}

/// Numeric set id from a set URL. Patterns are tried from most to least
/// specific and the first match wins; `None` when nothing matches.
pub fn extract_set_id(url: &str) -> Option<String> {
    patterns()
        .iter()
        .find_map(|pattern| pattern.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_url_shapes_yield_the_same_id() {
        assert_eq!(
            extract_set_id("https://site/987654321/biology-flash-cards").as_deref(),
            Some("987654321")
        );
        assert_eq!(
            extract_set_id("https://site/set/987654321").as_deref(),
            Some("987654321")
        );
        assert_eq!(
            extract_set_id("https://site/987654321/").as_deref(),
            Some("987654321")
        );
    }

    #[test]
    fn slug_pattern_wins_over_generic_segment() {
        assert_eq!(
            extract_set_id("https://site/12/folders/345/vocab-flash-cards").as_deref(),
            Some("345")
        );
    }

    #[test]
    fn urls_without_numeric_segment_are_rejected() {
        assert_eq!(extract_set_id("https://site/latest"), None);
        assert_eq!(extract_set_id("https://site/user/sets"), None);
    }
}
