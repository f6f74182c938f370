//! Reader text to XHTML fragments.

use quick_xml::Reader;
use quick_xml::events::Event;

/// Body of a page that carries no readable text.
pub const EMPTY_PAGE_MARKER: &str = "<div class=\"empty-page\"></div>";

const MIN_TEXT_CHARS: usize = 5;
const MAX_HEADING_CHARS: usize = 100;

pub trait TextFormatter {
    /// Formats the raw text of one page as an XHTML body fragment.
    fn format(&self, raw: &str) -> String;
}

/// One `<p>` per line; short all-caps lines and lines containing a heading
/// keyword become `<h2>`.
#[derive(Debug, Clone, Default)]
pub struct ParagraphFormatter {
    heading_keywords: Vec<String>,
}

impl ParagraphFormatter {
    pub fn new(heading_keywords: Vec<String>) -> Self {
        Self { heading_keywords }
    }

    fn is_heading(&self, paragraph: &str) -> bool {
        (is_upper(paragraph) && paragraph.chars().count() < MAX_HEADING_CHARS)
            || self
                .heading_keywords
                .iter()
                .any(|keyword| !keyword.is_empty() && paragraph.contains(keyword.as_str()))
    }
}

impl TextFormatter for ParagraphFormatter {
    fn format(&self, raw: &str) -> String {
        let text = strip_control(raw);
        if text.trim().chars().count() < MIN_TEXT_CHARS {
            return EMPTY_PAGE_MARKER.to_owned();
        }

        let mut parts = Vec::new();
        for paragraph in text.split(['\r', '\n']) {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            let tag = if self.is_heading(paragraph) { "h2" } else { "p" };
            parts.push(format!("<{tag}>{}</{tag}>", xml_escape(paragraph)));
        }
        parts.join("\n")
    }
}

fn strip_control(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '\0' && *c != '\u{FFFD}')
        .collect()
}

/// At least one cased character and no lowercase ones.
fn is_upper(text: &str) -> bool {
    text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase)
}

pub fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// True when `xhtml` parses as XML with balanced elements.
pub fn is_well_formed(xhtml: &str) -> bool {
    let mut reader = Reader::from_str(xhtml);
    let mut depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => match depth.checked_sub(1) {
                Some(next) => depth = next,
                None => return false,
            },
            Ok(Event::Eof) => return depth == 0,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(error = %err, "xhtml is not well-formed");
                return false;
            }
        }
    }
}
