use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::label::PageLabel;

/// Where a harvested page's content can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageResource {
    /// Address the page image can be requested from.
    Locator(String),
    /// Inline payload captured from the reader's network traffic.
    Payload(Vec<u8>),
    /// Artifact already written to the page store.
    Stored(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestedPage {
    pub label: PageLabel,
    pub raw_label: String,
    /// Reader position the page was harvested from.
    pub position: u32,
    pub resource: PageResource,
    /// Monotonic discovery sequence number.
    pub discovered_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageContent {
    Resource(PageResource),
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedPage {
    /// 1-based physical position in the final document.
    pub ordinal: usize,
    pub label: PageLabel,
    pub content: PageContent,
}

impl SequencedPage {
    pub fn is_blank(&self) -> bool {
        matches!(self.content, PageContent::Blank)
    }
}

/// One line of `harvest.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestRecord {
    pub position: u32,
    pub raw_label: String,
    pub stem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    pub file: String,
    pub sha256: String,
    pub retrieved_at: String,
    pub discovered_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub book_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub toc: Vec<TocEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
}

impl BookMetadata {
    pub fn new(book_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            ..Self::default()
        }
    }

    pub fn display_title(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title,
            _ => &self.book_id,
        }
    }

    pub fn display_author(&self) -> &str {
        match self.author.as_deref().map(str::trim) {
            Some(author) if !author.is_empty() => author,
            _ => "Unknown",
        }
    }
}

/// Table of contents entry as published by the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    /// Reader-specific page locator, e.g. `/12`.
    pub locator: String,
}

/// Table of contents entry resolved to a physical page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTocEntry {
    pub title: String,
    pub ordinal: usize,
}

/// Per-page data published by the reader for text-based books.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextPagePayload {
    #[serde(default)]
    pub words: String,
    #[serde(default, rename = "chapterTitle")]
    pub chapter_title: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReaderBookInfo {
    #[serde(default)]
    pub books: Vec<ReaderBook>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReaderBook {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderTocItem {
    pub title: String,
    pub cfi: String,
}
