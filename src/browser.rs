//! The browser capability the harvest is driven through.
//!
//! Real drivers (WebDriver, CDP) live outside this crate and implement
//! [`BrowserSession`]; [`transcript::TranscriptSession`] replays a recorded
//! reader session.

pub mod transcript;

use std::path::PathBuf;

use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPattern {
    Exact(String),
    Prefix(String),
}

impl RequestPattern {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Exact(expected) => url == expected,
            Self::Prefix(prefix) => url.starts_with(prefix.as_str()),
        }
    }
}

/// A request observed in the browser's network log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub url: String,
    /// `None` while the response has not arrived.
    pub body: Option<Vec<u8>>,
}

/// One exclusively owned browser session on the reader.
///
/// Calls are blocking and strictly ordered: the reader only keeps one page
/// context alive, so a navigation invalidates everything observed before it.
pub trait BrowserSession {
    fn ensure_authenticated(&mut self) -> Result<(), SessionError>;

    /// Navigates the reader to `position`.
    fn advance_to(&mut self, position: u32) -> Result<(), SessionError>;

    /// Navigates the browser to an arbitrary URL (used to request a page
    /// image at full resolution).
    fn open(&mut self, url: &str) -> Result<(), SessionError>;

    fn current_page_label(&mut self) -> Result<Option<String>, SessionError>;

    /// Total page count as displayed by the reader, when it shows one.
    fn total_pages(&mut self) -> Result<Option<u32>, SessionError>;

    fn requests_matching(
        &mut self,
        pattern: &RequestPattern,
    ) -> Result<Vec<NetworkRequest>, SessionError>;

    fn clear_requests(&mut self);

    fn is_loader_active(&mut self) -> bool;

    fn is_next_disabled(&mut self) -> bool;

    fn close(&mut self) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Recorded reader transcript to replay.
    pub transcript: Option<PathBuf>,
    /// Browser binary override for drivers that launch one.
    pub browser_exe: Option<PathBuf>,
}

pub trait SessionLauncher {
    fn launch(&self, config: &SessionConfig) -> anyhow::Result<Box<dyn BrowserSession>>;
}
