//! Typed error channels.
//!
//! Per-page problems ([`PageFailure`]) are recoverable and never leave the
//! harvest coordinator. Session and assembly failures are fatal and end the
//! run.

use std::path::PathBuf;

use thiserror::Error;

use crate::retry::Retryable;

/// Errors reported by a [`crate::browser::BrowserSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("browser session is closed")]
    Closed,

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser backend error: {0}")]
    Backend(String),
}

impl SessionError {
    /// Fatal errors need a human (log in again, restart the browser).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthenticated(_) | Self::Closed)
    }
}

/// Transient failure to harvest a single page.
#[derive(Debug, Error)]
pub enum PageFailure {
    #[error("page {position}: no resource appeared")]
    ResourceMissing { position: u32 },

    #[error("page {position}: loader still active")]
    LoaderActive { position: u32 },

    #[error("image {url}: no response body")]
    ImageMissing { url: String },

    #[error("image {url}: {width}px wide, expected at least {min_width}px")]
    UnderResolution {
        url: String,
        width: u32,
        min_width: u32,
    },

    #[error("image {url}: {reason}")]
    UndecodableImage { url: String, reason: String },

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl Retryable for PageFailure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Session(err) => !err.is_fatal(),
            _ => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("browser session failed")]
    Session(#[source] SessionError),
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("no pages to assemble")]
    NoPages,

    #[error("encode {format} document")]
    Encode {
        format: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("encoder reported {} but no file exists there", .0.display())]
    MissingArtifact(PathBuf),
}
