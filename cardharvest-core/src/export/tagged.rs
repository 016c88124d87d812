//! Single-line import format where custom tags separate the fields:
//! `term/answer/definition/question/term/answer/definition/image/url`.

use crate::scraper::CardSet;

use super::{flatten_lines, sanitize_filename, ExportFormat, ExportResult, Exporter};

const QUESTION_TAG: &str = "/question/";
const ANSWER_TAG: &str = "/answer/";
const IMAGE_TAG: &str = "/image/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Question,
    Answer,
    Image,
}

impl Tag {
    const ALL: [Tag; 3] = [Tag::Question, Tag::Answer, Tag::Image];

    fn literal(self) -> &'static str {
        match self {
            Tag::Question => QUESTION_TAG,
            Tag::Answer => ANSWER_TAG,
            Tag::Image => IMAGE_TAG,
        }
    }

    /// `/answer/` inside content is written as `//answer//`.
    fn escaped(self) -> String {
        format!("/{}/", self.literal())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TaggedExporter {
    include_images: bool,
}

impl TaggedExporter {
    pub fn new(include_images: bool) -> Self {
        Self { include_images }
    }
}

fn escape_tags(text: &str) -> String {
    let escaped = Tag::ALL.iter().fold(text.to_string(), |acc, tag| {
        acc.replace(tag.literal(), &tag.escaped())
    });
    flatten_lines(&escaped).trim().to_string()
}

impl Exporter for TaggedExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Tagged
    }

    fn file_extension(&self) -> &'static str {
        "txt"
    }

    fn file_name(&self, set: &CardSet) -> String {
        format!("export_{}_{}.txt", set.id, sanitize_filename(&set.title))
    }

    fn serialize(&self, set: &CardSet) -> ExportResult<String> {
        let mut lines = vec![
            format!("# {}", set.title),
            format!("# Set ID: {}", set.id),
            format!("# Cards: {}", set.term_count()),
        ];
        if !set.url.is_empty() {
            lines.push(format!("# Source: {}", set.url));
        }
        lines.push("#".into());
        lines.push("# Import settings:".into());
        lines.push(format!("#   Between term and definition: {ANSWER_TAG}"));
        lines.push(format!("#   Between cards: {QUESTION_TAG}"));
        if self.include_images {
            lines.push(format!("#   (Images are marked with {IMAGE_TAG} tag)"));
        }
        lines.push("#".into());
        lines.push(String::new());

        let mut body = String::new();
        for (index, card) in set.cards.iter().enumerate() {
            if index > 0 {
                body.push_str(QUESTION_TAG);
            }
            body.push_str(&escape_tags(&card.term));
            body.push_str(ANSWER_TAG);
            body.push_str(&escape_tags(&card.definition));
            if let Some(image) = card.image_url.as_deref().filter(|_| self.include_images) {
                body.push_str(IMAGE_TAG);
                body.push_str(image.trim());
            }
        }
        if !body.is_empty() {
            lines.push(body);
        }
        Ok(lines.join("\n"))
    }
}

/// One card read back from the tagged format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedCard {
    pub term: String,
    pub definition: String,
    pub image_url: Option<String>,
}

/// Splits on real tags, turning escaped ones back into literal text.
fn segments(content: &str) -> Vec<(Option<Tag>, String)> {
    let mut segments = vec![(None, String::new())];
    let mut rest = content;
    'scan: while !rest.is_empty() {
        for tag in Tag::ALL {
            let escaped = tag.escaped();
            if let Some(after) = rest.strip_prefix(escaped.as_str()) {
                if let Some((_, text)) = segments.last_mut() {
                    text.push_str(tag.literal());
                }
                rest = after;
                continue 'scan;
            }
        }
        for tag in Tag::ALL {
            if let Some(after) = rest.strip_prefix(tag.literal()) {
                segments.push((Some(tag), String::new()));
                rest = after;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let (Some(ch), Some((_, text))) = (chars.next(), segments.last_mut()) {
            text.push(ch);
        }
        rest = chars.as_str();
    }
    segments
}

/// Reads tagged content back into cards. Comment lines are ignored and
/// fragments without an answer are dropped.
pub fn parse_tagged(content: &str) -> Vec<TaggedCard> {
    let body = content
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut cards = Vec::new();
    let mut current: Option<(String, Option<String>, Option<String>)> = None;
    let mut flush = |current: Option<(String, Option<String>, Option<String>)>| {
        if let Some((term, Some(definition), image_url)) = current {
            cards.push(TaggedCard {
                term,
                definition,
                image_url,
            });
        }
    };

    for (tag, text) in segments(&body) {
        let text = text.trim().to_string();
        match tag {
            None | Some(Tag::Question) => {
                flush(current.take());
                if !text.is_empty() {
                    current = Some((text, None, None));
                }
            }
            Some(Tag::Answer) => {
                if let Some((_, definition, _)) = current.as_mut() {
                    *definition = Some(text);
                }
            }
            Some(Tag::Image) => {
                if let Some((_, _, image_url)) = current.as_mut() {
                    *image_url = Some(text).filter(|url| !url.is_empty());
                }
            }
        }
    }
    flush(current);
    cards
}
