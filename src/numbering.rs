use crate::formats::SequencedPage;
use crate::label::{PageLabel, to_roman};

pub const COVER_PREFIX: &str = "Cover";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberStyle {
    None,
    LowerRoman,
    Arabic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLabelRange {
    /// 0-based physical page index the range starts at.
    pub start: usize,
    pub style: NumberStyle,
    pub prefix: Option<String>,
    pub first_number: u32,
}

/// How the final document labels its physical pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageNumberingScheme {
    pub ranges: Vec<PageLabelRange>,
}

impl PageNumberingScheme {
    /// Cover at index 0, lowercase roman for `[1, front_matter_count]`,
    /// arabic from `front_matter_count + 1`.
    pub fn derive(front_matter_count: usize) -> Self {
        let mut ranges = vec![cover_range()];
        if front_matter_count > 0 {
            ranges.push(numbered_range(1, NumberStyle::LowerRoman));
        }
        ranges.push(numbered_range(front_matter_count + 1, NumberStyle::Arabic));
        Self { ranges }
    }

    /// Same ranges as [`Self::derive`], but placed where the pages actually
    /// are: leading unnumbered pages form the cover range, the first Roman
    /// page opens the front matter and the first Integer page opens the body.
    pub fn from_sequence(pages: &[SequencedPage]) -> Self {
        if pages.is_empty() {
            return Self::default();
        }

        let body_start = body_start(pages);
        let first_roman = pages[..body_start]
            .iter()
            .position(|page| page.label.is_roman());
        let cover_end = first_roman.unwrap_or(body_start);

        let mut ranges = Vec::new();
        if cover_end > 0 {
            ranges.push(cover_range());
        }
        if let Some(start) = first_roman {
            ranges.push(numbered_range(start, NumberStyle::LowerRoman));
        }
        if body_start < pages.len() {
            ranges.push(numbered_range(body_start, NumberStyle::Arabic));
        }
        Self { ranges }
    }

    /// True when every page would be labelled with its plain arabic number.
    pub fn is_default(&self) -> bool {
        match self.ranges.as_slice() {
            [] => true,
            [only] => {
                only.start == 0
                    && only.style == NumberStyle::Arabic
                    && only.prefix.is_none()
                    && only.first_number == 1
            }
            _ => false,
        }
    }

    /// Display label of the page at 0-based physical `index`.
    pub fn label_for(&self, index: usize) -> String {
        let Some(range) = self.ranges.iter().rev().find(|range| range.start <= index) else {
            return (index + 1).to_string();
        };
        let prefix = range.prefix.as_deref().unwrap_or_default();
        let offset = u32::try_from(index - range.start).unwrap_or(u32::MAX);
        let number = range.first_number.saturating_add(offset);
        match range.style {
            NumberStyle::None => prefix.to_owned(),
            NumberStyle::LowerRoman => format!("{prefix}{}", to_roman(number).to_ascii_lowercase()),
            NumberStyle::Arabic => format!("{prefix}{number}"),
        }
    }
}

/// Roman-labelled pages ahead of the first Integer-labelled page.
pub fn front_matter_count(pages: &[SequencedPage]) -> usize {
    pages[..body_start(pages)]
        .iter()
        .filter(|page| matches!(page.label, PageLabel::Roman(_)))
        .count()
}

fn body_start(pages: &[SequencedPage]) -> usize {
    pages
        .iter()
        .position(|page| page.label.is_integer())
        .unwrap_or(pages.len())
}

fn cover_range() -> PageLabelRange {
    PageLabelRange {
        start: 0,
        style: NumberStyle::None,
        prefix: Some(COVER_PREFIX.to_owned()),
        first_number: 1,
    }
}

fn numbered_range(start: usize, style: NumberStyle) -> PageLabelRange {
    PageLabelRange {
        start,
        style,
        prefix: None,
        first_number: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::PageContent;
    use crate::label::normalize;
    use pretty_assertions::assert_eq;

    fn pages(raws: &[&str]) -> Vec<SequencedPage> {
        raws.iter()
            .enumerate()
            .map(|(idx, raw)| SequencedPage {
                ordinal: idx + 1,
                label: normalize(raw),
                content: PageContent::Blank,
            })
            .collect()
    }

    #[test]
    fn derive_matches_cover_roman_arabic_layout() {
        let scheme = PageNumberingScheme::derive(3);
        assert_eq!(
            scheme.ranges,
            vec![
                cover_range(),
                numbered_range(1, NumberStyle::LowerRoman),
                numbered_range(4, NumberStyle::Arabic),
            ]
        );
        let labels = (0..7).map(|i| scheme.label_for(i)).collect::<Vec<_>>();
        assert_eq!(labels, vec!["Cover", "i", "ii", "iii", "1", "2", "3"]);
    }

    #[test]
    fn from_sequence_with_cover_equals_derive() {
        let book = pages(&["Cover", "i", "ii", "iii", "1", "2", "3"]);
        assert_eq!(front_matter_count(&book), 3);
        assert_eq!(
            PageNumberingScheme::from_sequence(&book),
            PageNumberingScheme::derive(3)
        );
    }

    #[test]
    fn from_sequence_without_cover_starts_roman_at_zero() {
        let book = pages(&["i", "ii", "iii", "1", "2", "3"]);
        let scheme = PageNumberingScheme::from_sequence(&book);
        let labels = (0..6).map(|i| scheme.label_for(i)).collect::<Vec<_>>();
        assert_eq!(labels, vec!["i", "ii", "iii", "1", "2", "3"]);
    }

    #[test]
    fn plain_body_is_default_numbering() {
        let book = pages(&["1", "2", "3"]);
        let scheme = PageNumberingScheme::from_sequence(&book);
        assert!(scheme.is_default());
        assert_eq!(front_matter_count(&book), 0);
        assert!(!PageNumberingScheme::derive(0).is_default());
    }
}
