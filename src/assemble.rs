use std::path::{Path, PathBuf};

use crate::error::AssemblyError;
use crate::formats::{BookMetadata, ResolvedTocEntry, SequencedPage, TocEntry};
use crate::numbering::{PageNumberingScheme, front_matter_count};

/// Everything an encoder needs to render one document.
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    pub pages: &'a [SequencedPage],
    pub metadata: &'a BookMetadata,
    pub toc: &'a [ResolvedTocEntry],
    pub scheme: &'a PageNumberingScheme,
    /// Path the document is expected at.
    pub output: &'a Path,
}

pub trait DocumentEncoder {
    /// Short format name used in logs and errors.
    fn format(&self) -> &'static str;

    fn extension(&self) -> &'static str;

    /// Writes the document and returns the path of the primary artifact.
    fn encode(&self, request: &EncodeRequest<'_>) -> anyhow::Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub page_count: usize,
    pub scheme: PageNumberingScheme,
    pub toc: Vec<ResolvedTocEntry>,
}

pub struct Assembler<'a> {
    encoder: &'a dyn DocumentEncoder,
    out_dir: PathBuf,
    toc_offset: i64,
}

impl<'a> Assembler<'a> {
    pub fn new(encoder: &'a dyn DocumentEncoder, out_dir: impl Into<PathBuf>, toc_offset: i64) -> Self {
        Self {
            encoder,
            out_dir: out_dir.into(),
            toc_offset,
        }
    }

    pub fn output_path(&self, metadata: &BookMetadata) -> PathBuf {
        self.out_dir.join(format!(
            "{}.{}",
            file_name_for(metadata.display_title()),
            self.encoder.extension()
        ))
    }

    pub fn assemble(
        &self,
        pages: &[SequencedPage],
        metadata: &BookMetadata,
    ) -> Result<Document, AssemblyError> {
        if pages.is_empty() {
            return Err(AssemblyError::NoPages);
        }

        let front_matter = front_matter_count(pages);
        let scheme = PageNumberingScheme::from_sequence(pages);
        let toc = resolve_toc(&metadata.toc, pages.len(), self.toc_offset);
        let output = self.output_path(metadata);
        tracing::info!(
            format = self.encoder.format(),
            pages = pages.len(),
            front_matter,
            toc_entries = toc.len(),
            out = %output.display(),
            "assembling document"
        );

        let request = EncodeRequest {
            pages,
            metadata,
            toc: &toc,
            scheme: &scheme,
            output: &output,
        };
        let path = self
            .encoder
            .encode(&request)
            .map_err(|source| AssemblyError::Encode {
                format: self.encoder.format(),
                source,
            })?;
        if !path.is_file() {
            return Err(AssemblyError::MissingArtifact(path));
        }

        tracing::info!(path = %path.display(), "document written");
        Ok(Document {
            path,
            page_count: pages.len(),
            scheme,
            toc,
        })
    }
}

/// Maps reader TOC locators onto 1-based page ordinals.
///
/// The leading number `n` of a locator (`/12`, `12`, `/12/4`) names the page
/// at 0-based index `n + offset`. Entries that fall outside the book are
/// dropped.
pub fn resolve_toc(toc: &[TocEntry], page_count: usize, offset: i64) -> Vec<ResolvedTocEntry> {
    let mut resolved = Vec::with_capacity(toc.len());
    for entry in toc {
        let Some(number) = leading_number(&entry.locator) else {
            tracing::warn!(title = %entry.title, locator = %entry.locator, "unreadable toc locator");
            continue;
        };
        let ordinal = number
            .checked_add(offset)
            .and_then(|index| index.checked_add(1))
            .and_then(|ordinal| usize::try_from(ordinal).ok())
            .filter(|ordinal| (1..=page_count).contains(ordinal));
        match ordinal {
            Some(ordinal) => resolved.push(ResolvedTocEntry {
                title: entry.title.clone(),
                ordinal,
            }),
            None => tracing::warn!(
                title = %entry.title,
                locator = %entry.locator,
                page_count,
                "toc entry points outside the book"
            ),
        }
    }
    resolved
}

fn leading_number(locator: &str) -> Option<i64> {
    let digits = locator
        .trim()
        .trim_start_matches('/')
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>();
    digits.parse().ok()
}

/// Title made safe for use as a file name.
pub fn file_name_for(title: &str) -> String {
    let cleaned = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    if cleaned.is_empty() {
        return "book".to_owned();
    }
    cleaned.to_owned()
}
