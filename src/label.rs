use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

/// The identifier a page is known by in the reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PageLabel {
    Integer(i64),
    Roman(u32),
    Opaque(String),
}

impl PageLabel {
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(_))
    }

    pub fn is_roman(&self) -> bool {
        matches!(self, Self::Roman(_))
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Opaque(_))
    }

    pub fn integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// File stem used when the page artifact is written to the page store.
    ///
    /// Feeding the stem back through [`normalize`] yields the same label for
    /// numeric labels. Opaque labels keep their alphanumerics; when anything
    /// else had to be replaced, a digest of the raw label is appended so two
    /// distinct labels never share a file.
    pub fn stem(&self) -> String {
        match self {
            Self::Integer(n) => n.to_string(),
            Self::Roman(n) => to_roman(*n).to_ascii_lowercase(),
            Self::Opaque(raw) => sanitize_stem(raw),
        }
    }
}

impl fmt::Display for PageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{n}"),
            Self::Roman(n) => f.write_str(&to_roman(*n).to_ascii_lowercase()),
            Self::Opaque(raw) => f.write_str(raw),
        }
    }
}

pub fn normalize(raw: &str) -> PageLabel {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return PageLabel::Integer(n);
    }
    if let Some(n) = parse_roman(trimmed) {
        return PageLabel::Roman(n);
    }
    PageLabel::Opaque(raw.to_owned())
}

const NUMERALS: [(u32, &str); 13] = [
    (1000, "M"),
    (900, "CM"),
    (500, "D"),
    (400, "CD"),
    (100, "C"),
    (90, "XC"),
    (50, "L"),
    (40, "XL"),
    (10, "X"),
    (9, "IX"),
    (5, "V"),
    (4, "IV"),
    (1, "I"),
];

// Longest label we are willing to treat as a numeral; keeps `to_roman` bounded.
const MAX_NUMERAL_LEN: usize = 32;

/// Parses a canonical Roman numeral, case-insensitively.
///
/// Thousands may repeat without limit (`MMMM` is 4000); every other digit
/// must follow the standard subtractive form, so `IIII`, `VX` and `IC` are
/// rejected.
pub fn parse_roman(raw: &str) -> Option<u32> {
    if raw.is_empty() || raw.len() > MAX_NUMERAL_LEN {
        return None;
    }
    let upper = raw.to_ascii_uppercase();

    let mut total: u32 = 0;
    let mut largest_seen: u32 = 0;
    for ch in upper.chars().rev() {
        let value = roman_digit(ch)?;
        if value < largest_seen {
            total = total.checked_sub(value)?;
        } else {
            total = total.checked_add(value)?;
            largest_seen = value;
        }
    }

    if total == 0 {
        return None;
    }
    (to_roman(total) == upper).then_some(total)
}

pub fn to_roman(mut n: u32) -> String {
    let mut out = String::new();
    for (value, digits) in NUMERALS {
        while n >= value {
            out.push_str(digits);
            n -= value;
        }
    }
    out
}

fn roman_digit(ch: char) -> Option<u32> {
    match ch {
        'I' => Some(1),
        'V' => Some(5),
        'X' => Some(10),
        'L' => Some(50),
        'C' => Some(100),
        'D' => Some(500),
        'M' => Some(1000),
        _ => None,
    }
}

fn sanitize_stem(raw: &str) -> String {
    let stem = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    if !stem.is_empty() && stem == raw {
        return stem;
    }
    let digest = hex::encode(sha2::Sha256::digest(raw.as_bytes()));
    format!("{}-{}", stem.trim_matches('_'), &digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roman_numerals_parse_to_their_value() {
        assert_eq!(parse_roman("ix"), Some(9));
        assert_eq!(parse_roman("XL"), Some(40));
        assert_eq!(parse_roman("MCMXCIV"), Some(1994));
        assert_eq!(parse_roman("I"), Some(1));
        assert_eq!(parse_roman("MMMM"), Some(4000));
        assert_eq!(parse_roman("xIv"), Some(14));
    }

    #[test]
    fn every_numeral_up_to_4000_round_trips() {
        for n in 1..=4000 {
            let numeral = to_roman(n);
            assert_eq!(parse_roman(&numeral), Some(n), "{numeral}");
            assert_eq!(parse_roman(&numeral.to_ascii_lowercase()), Some(n));
        }
    }

    #[test]
    fn non_canonical_numerals_are_rejected() {
        for raw in ["IIII", "VX", "IC", "IIV", "VV", "", "MXM", "ABC"] {
            assert_eq!(parse_roman(raw), None, "{raw}");
        }
    }

    #[test]
    fn normalize_prefers_integers_then_romans() {
        assert_eq!(normalize("12"), PageLabel::Integer(12));
        assert_eq!(normalize(" 007 "), PageLabel::Integer(7));
        assert_eq!(normalize("-3"), PageLabel::Integer(-3));
        assert_eq!(normalize("xii"), PageLabel::Roman(12));
        assert_eq!(normalize("Cover"), PageLabel::Opaque("Cover".to_owned()));
        assert_eq!(normalize(""), PageLabel::Opaque(String::new()));
        assert_eq!(normalize("A-1"), PageLabel::Opaque("A-1".to_owned()));
    }

    #[test]
    fn stems_normalize_back_to_numeric_labels() {
        for label in [PageLabel::Integer(42), PageLabel::Roman(19)] {
            assert_eq!(normalize(&label.stem()), label);
        }
        assert_eq!(PageLabel::Opaque("Cover".to_owned()).stem(), "Cover");
        assert_eq!(PageLabel::Opaque("α".to_owned()).stem(), "α");
        assert!(PageLabel::Opaque("Plate 3/a".to_owned()).stem().starts_with("Plate_3_a-"));
        assert!(!PageLabel::Opaque("  ".to_owned()).stem().is_empty());
    }

    #[test]
    fn distinct_opaque_labels_get_distinct_stems() {
        let raws = ["Plate 3", "Plate?3", "Plate_3", "α", "β", "١", "٢", "", " ", "  "];
        let stems = raws
            .iter()
            .map(|raw| PageLabel::Opaque((*raw).to_owned()).stem())
            .collect::<std::collections::HashSet<_>>();
        assert_eq!(stems.len(), raws.len());
        for stem in &stems {
            assert!(!stem.contains(['/', '\\', ' ', '?', '.']), "{stem}");
        }
    }
}
