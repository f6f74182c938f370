use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

const BOOK_ID_PLACEHOLDER: &str = "{book_id}";

/// Everything reader specific: API addresses, image requirements and timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderProfile {
    /// Prefix of page image requests.
    pub image_prefix: String,
    /// Prefix of per-page text payload requests.
    pub text_url: String,
    pub pages_url: String,
    pub book_info_url: String,
    pub toc_url: String,
    pub min_image_width: u32,
    pub image_request_width: u32,
    pub blank_page: PageSize,
    /// Added to a TOC locator's page number to get a 0-based page index.
    pub toc_offset: i64,
    pub heading_keywords: Vec<String>,
    /// Hard stop when neither an end page nor a page total is known.
    pub max_positions: u32,
    /// Longest run of missing page numbers padded with blanks; a wider jump
    /// marks a mislabelled page.
    pub max_gap: u32,
    pub timing: Timing,
}

impl Default for ReaderProfile {
    fn default() -> Self {
        Self {
            image_prefix: "https://reader.example/api/books/{book_id}/images/".to_owned(),
            text_url: "https://reader.example/api/books/{book_id}/text/".to_owned(),
            pages_url: "https://reader.example/api/books/{book_id}/pages".to_owned(),
            book_info_url: "https://reader.example/api/info/books.json?isbns={book_id}".to_owned(),
            toc_url: "https://reader.example/api/books/{book_id}/toc".to_owned(),
            min_image_width: 2000,
            image_request_width: 2000,
            blank_page: PageSize::default(),
            toc_offset: -1,
            heading_keywords: vec!["Chapter".to_owned(), "Capítulo".to_owned()],
            max_positions: 5000,
            max_gap: 100,
            timing: Timing::default(),
        }
    }
}

impl ReaderProfile {
    /// Reads a YAML profile; `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read profile: {}", path.display()))?;
        let profile: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("parse profile: {}", path.display()))?;
        profile
            .validate()
            .with_context(|| format!("invalid profile: {}", path.display()))?;
        Ok(profile)
    }

    /// Every URL template must expand to an absolute http/https URL.
    pub fn validate(&self) -> anyhow::Result<()> {
        let templates = [
            ("image_prefix", &self.image_prefix),
            ("text_url", &self.text_url),
            ("pages_url", &self.pages_url),
            ("book_info_url", &self.book_info_url),
            ("toc_url", &self.toc_url),
        ];
        for (name, template) in templates {
            let expanded = Self::url(template, "0");
            let url = url::Url::parse(&expanded).with_context(|| format!("parse {name}"))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                anyhow::bail!("{name} must be http/https: {url}");
            }
        }
        if self.image_request_width == 0 {
            anyhow::bail!("image_request_width must be positive");
        }
        Ok(())
    }

    pub fn url(template: &str, book_id: &str) -> String {
        template.replace(BOOK_ID_PLACEHOLDER, book_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: u32,
    pub height: u32,
}

impl Default for PageSize {
    fn default() -> Self {
        Self {
            width: 2000,
            height: 2588,
        }
    }
}

/// Waits and attempt counts, in milliseconds where a duration is meant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub poll_interval_ms: u64,
    /// Network log scans per page attempt.
    pub resource_polls: u32,
    pub page_attempts: u32,
    pub page_retry_initial_ms: u64,
    pub page_retry_step_ms: u64,
    pub metadata_attempts: u32,
    pub metadata_retry_ms: u64,
    pub image_attempts: u32,
    pub reload_settle_ms: u64,
    /// Loader checks before a page attempt gives up waiting.
    pub loader_polls: u32,
    /// Checks for a pending API response body.
    pub response_polls: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            resource_polls: 3,
            page_attempts: 3,
            page_retry_initial_ms: 5000,
            page_retry_step_ms: 5000,
            metadata_attempts: 5,
            metadata_retry_ms: 10_000,
            image_attempts: 6,
            reload_settle_ms: 8000,
            loader_polls: 30,
            response_polls: 30,
        }
    }
}

impl Timing {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reload_settle(&self) -> Duration {
        Duration::from_millis(self.reload_settle_ms)
    }

    pub fn poll_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.resource_polls, self.poll_interval())
    }

    pub fn page_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.page_attempts,
            Duration::from_millis(self.page_retry_initial_ms),
            Duration::from_millis(self.page_retry_step_ms),
        )
    }

    pub fn metadata_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.metadata_attempts,
            Duration::from_millis(self.metadata_retry_ms),
        )
    }

    pub fn image_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.image_attempts, self.reload_settle())
    }
}
