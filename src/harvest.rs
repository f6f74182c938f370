//! Drives the reader one position at a time and records what each page is.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

use crate::browser::{BrowserSession, RequestPattern};
use crate::cancellation::CancellationToken;
use crate::error::{HarvestError, PageFailure, SessionError};
use crate::formats::{
    BookMetadata, HarvestedPage, PageResource, ReaderBookInfo, ReaderTocItem, TextPagePayload,
    TocEntry,
};
use crate::imaging;
use crate::label::normalize;
use crate::profile::ReaderProfile;
use crate::retry::{Pause, Retryable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMode {
    /// Page images, downloaded at full resolution afterwards.
    Images,
    /// Per-page text payloads captured from the network log.
    Text,
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub book_id: String,
    pub mode: ContentMode,
    pub start_page: u32,
    pub end_page: Option<u32>,
    /// Wait after each navigation.
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndPage,
    NoNextPage,
    TotalReached,
    Cancelled,
    PositionCap,
}

#[derive(Debug)]
pub struct HarvestReport {
    pub pages: Vec<HarvestedPage>,
    /// Positions that failed on the main pass and again on the retry pass.
    pub abandoned: Vec<u32>,
    /// Harvested pages whose label is not an Integer.
    pub non_numbered: usize,
    pub stop: StopReason,
}

#[derive(Debug)]
enum PageState {
    Requesting,
    AwaitingResource,
    Resolved(PageResource),
    Failed(PageFailure),
}

#[derive(Debug, Error)]
enum ScrapeFailure {
    #[error("missing {}", .0.join(", "))]
    Incomplete(Vec<&'static str>),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl Retryable for ScrapeFailure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Session(err) => !err.is_fatal(),
            Self::Incomplete(_) => true,
        }
    }
}

#[derive(Debug, Default)]
struct ScrapedMetadata {
    page_count: Option<Option<u32>>,
    book: Option<ReaderBookInfo>,
    toc: Option<Vec<TocEntry>>,
}

impl ScrapedMetadata {
    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.page_count.is_none() {
            missing.push("pages");
        }
        if self.book.is_none() {
            missing.push("book info");
        }
        if self.toc.is_none() {
            missing.push("toc");
        }
        missing
    }

    fn into_metadata(self, book_id: &str) -> BookMetadata {
        let mut metadata = BookMetadata::new(book_id);
        metadata.page_count = self.page_count.flatten();
        if let Some(book) = self.book.and_then(|info| info.books.into_iter().next()) {
            metadata.title = book.title;
            metadata.author = book.author;
        }
        metadata.toc = self.toc.unwrap_or_default();
        metadata
    }
}

pub struct Harvester<'a> {
    session: &'a mut dyn BrowserSession,
    profile: &'a ReaderProfile,
    config: &'a HarvestConfig,
    pause: &'a dyn Pause,
    cancel: CancellationToken,
    pattern: RequestPattern,
    next_discovery: u64,
}

impl<'a> Harvester<'a> {
    pub fn new(
        session: &'a mut dyn BrowserSession,
        profile: &'a ReaderProfile,
        config: &'a HarvestConfig,
        pause: &'a dyn Pause,
        cancel: CancellationToken,
    ) -> Self {
        let template = match config.mode {
            ContentMode::Images => &profile.image_prefix,
            ContentMode::Text => &profile.text_url,
        };
        let pattern = RequestPattern::Prefix(ReaderProfile::url(template, &config.book_id));
        Self {
            session,
            profile,
            config,
            pause,
            cancel,
            pattern,
            next_discovery: 0,
        }
    }

    pub fn authenticate(&mut self) -> Result<(), HarvestError> {
        self.session
            .ensure_authenticated()
            .map_err(HarvestError::Session)
    }

    /// Collects page list, book info and table of contents from the reader's
    /// API traffic. Missing parts are logged; whatever was found is returned.
    pub fn scrape_metadata(&mut self) -> Result<BookMetadata, HarvestError> {
        tracing::info!(book_id = %self.config.book_id, "scraping book metadata");
        let policy = self.profile.timing.metadata_policy();
        let pause = self.pause;
        let mut scraped = ScrapedMetadata::default();

        let result = policy.run(pause, |attempt| {
            if attempt > 1 {
                tracing::info!(attempt, "retrying metadata scrape");
            }
            self.scrape_once(&mut scraped)
        });
        match result {
            Ok(()) => {}
            Err(ScrapeFailure::Session(err)) if err.is_fatal() => {
                return Err(HarvestError::Session(err));
            }
            Err(err) => tracing::warn!(error = %err, "book metadata incomplete"),
        }

        let metadata = scraped.into_metadata(&self.config.book_id);
        tracing::info!(
            title = metadata.display_title(),
            author = metadata.display_author(),
            toc_entries = metadata.toc.len(),
            page_count = ?metadata.page_count,
            "book metadata"
        );
        Ok(metadata)
    }

    fn scrape_once(&mut self, scraped: &mut ScrapedMetadata) -> Result<(), ScrapeFailure> {
        self.session.clear_requests();
        self.session.advance_to(self.config.start_page)?;
        self.pause.pause(self.config.delay * 2);
        if let Err(failure) = self.wait_for_loader(self.config.start_page) {
            tracing::debug!(error = %failure, "loader still active while scraping metadata");
        }

        let book_id = self.config.book_id.as_str();
        if scraped.page_count.is_none() {
            let url = ReaderProfile::url(&self.profile.pages_url, book_id);
            if let Some(body) = self.await_response(&url)? {
                match serde_json::from_slice::<serde_json::Value>(&body) {
                    Ok(pages) => {
                        let count = pages
                            .as_array()
                            .and_then(|pages| u32::try_from(pages.len()).ok());
                        scraped.page_count = Some(count);
                    }
                    Err(err) => tracing::warn!(%url, error = %err, "unreadable page list"),
                }
            }
        }
        if scraped.book.is_none() {
            let url = ReaderProfile::url(&self.profile.book_info_url, book_id);
            if let Some(body) = self.await_response(&url)? {
                match serde_json::from_slice::<ReaderBookInfo>(&body) {
                    Ok(info) => scraped.book = Some(info),
                    Err(err) => tracing::warn!(%url, error = %err, "unreadable book info"),
                }
            }
        }
        if scraped.toc.is_none() {
            let url = ReaderProfile::url(&self.profile.toc_url, book_id);
            if let Some(body) = self.await_response(&url)? {
                match serde_json::from_slice::<Vec<ReaderTocItem>>(&body) {
                    Ok(items) => {
                        scraped.toc = Some(
                            items
                                .into_iter()
                                .map(|item| TocEntry {
                                    title: item.title,
                                    locator: item.cfi,
                                })
                                .collect(),
                        );
                    }
                    Err(err) => tracing::warn!(%url, error = %err, "unreadable table of contents"),
                }
            }
        }

        let missing = scraped.missing();
        if missing.is_empty() {
            return Ok(());
        }
        Err(ScrapeFailure::Incomplete(missing))
    }

    /// Waits for the response body of a request to `url`, if one was made.
    fn await_response(&mut self, url: &str) -> Result<Option<Vec<u8>>, SessionError> {
        let pattern = RequestPattern::Exact(url.to_owned());
        let polls = self.profile.timing.response_polls.max(1);
        for poll in 1..=polls {
            let requests = self.session.requests_matching(&pattern)?;
            if requests.is_empty() {
                return Ok(None);
            }
            if let Some(body) = requests.into_iter().rev().find_map(|request| request.body) {
                return Ok(Some(body));
            }
            if poll < polls {
                self.pause.pause(self.profile.timing.poll_interval());
            }
        }
        tracing::debug!(%url, "response never arrived");
        Ok(None)
    }

    /// Main pass from the start position, then one retry of every failed
    /// position.
    pub fn harvest(&mut self) -> Result<HarvestReport, HarvestError> {
        let start = self.config.start_page;
        let mut bound = if start > 0 {
            tracing::info!(start, "start page given; ignoring the reader's page total");
            None
        } else {
            match self.session.total_pages() {
                Ok(total) => total,
                Err(err) if err.is_fatal() => return Err(HarvestError::Session(err)),
                Err(err) => {
                    tracing::warn!(error = %err, "page total unavailable");
                    None
                }
            }
        };
        tracing::info!(start, end = ?self.config.end_page, total = ?bound, "harvesting pages");

        let mut pages = Vec::new();
        let mut pending: BTreeSet<u32> = BTreeSet::new();
        let mut non_numbered = 0usize;
        let mut visited = 0u32;
        let mut position = start;

        let stop = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            match self.drive(position) {
                Ok(page) => {
                    if !page.label.is_integer() {
                        non_numbered += 1;
                        if let Some(total) = bound.as_mut() {
                            *total += 1;
                            tracing::info!(
                                label = %page.label,
                                total = *total,
                                "unnumbered page; extending page total"
                            );
                        }
                    }
                    pages.push(page);
                }
                Err(PageFailure::Session(err)) if err.is_fatal() => {
                    return Err(HarvestError::Session(err));
                }
                Err(failure) => {
                    tracing::warn!(position, error = %failure, "page failed; will retry after the main pass");
                    pending.insert(position);
                }
            }
            visited += 1;

            if let Some(reason) = self.stop_reason(position, bound, visited) {
                break reason;
            }
            match position.checked_add(1) {
                Some(next) => position = next,
                None => break StopReason::PositionCap,
            }
        };
        tracing::info!(?stop, harvested = pages.len(), failed = pending.len(), "main pass done");

        let mut abandoned = Vec::new();
        for position in pending {
            if self.cancel.is_cancelled() {
                abandoned.push(position);
                continue;
            }
            match self.drive(position) {
                Ok(page) => {
                    tracing::info!(position, label = %page.label, "recovered page on retry");
                    if !page.label.is_integer() {
                        non_numbered += 1;
                    }
                    pages.push(page);
                }
                Err(PageFailure::Session(err)) if err.is_fatal() => {
                    return Err(HarvestError::Session(err));
                }
                Err(failure) => {
                    tracing::warn!(position, error = %failure, "abandoning page");
                    abandoned.push(position);
                }
            }
        }

        Ok(HarvestReport {
            pages,
            abandoned,
            non_numbered,
            stop,
        })
    }

    fn stop_reason(&mut self, position: u32, bound: Option<u32>, visited: u32) -> Option<StopReason> {
        if self.config.end_page.is_some_and(|end| position >= end) {
            return Some(StopReason::EndPage);
        }
        if position > 0 && self.session.is_next_disabled() {
            return Some(StopReason::NoNextPage);
        }
        if self.config.end_page.is_none() {
            match bound {
                Some(total) if position >= total => return Some(StopReason::TotalReached),
                None if visited >= self.profile.max_positions => {
                    tracing::warn!(visited, "no page bound known; stopping at the position cap");
                    return Some(StopReason::PositionCap);
                }
                _ => {}
            }
        }
        None
    }

    fn drive(&mut self, position: u32) -> Result<HarvestedPage, PageFailure> {
        let mut state = PageState::Requesting;
        loop {
            state = match state {
                PageState::Requesting => match self.request(position) {
                    Ok(()) => PageState::AwaitingResource,
                    Err(failure) => PageState::Failed(failure),
                },
                PageState::AwaitingResource => match self.await_resource(position) {
                    Ok(resource) => PageState::Resolved(resource),
                    Err(failure) => PageState::Failed(failure),
                },
                PageState::Resolved(resource) => return self.resolve(position, resource),
                PageState::Failed(failure) => return Err(failure),
            };
        }
    }

    fn request(&mut self, position: u32) -> Result<(), PageFailure> {
        self.session.clear_requests();
        self.session.advance_to(position)?;
        self.pause.pause(self.config.delay);
        Ok(())
    }

    fn await_resource(&mut self, position: u32) -> Result<PageResource, PageFailure> {
        let page_policy = self.profile.timing.page_policy();
        let poll_policy = self.profile.timing.poll_policy();
        let pause = self.pause;
        page_policy.run(pause, |attempt| {
            if attempt > 1 {
                tracing::info!(position, attempt, "page resource not seen yet; waiting");
            }
            self.wait_for_loader(position)?;
            poll_policy.run(pause, |_| self.find_resource(position))
        })
    }

    fn wait_for_loader(&mut self, position: u32) -> Result<(), PageFailure> {
        for _ in 0..self.profile.timing.loader_polls {
            if !self.session.is_loader_active() {
                return Ok(());
            }
            self.pause.pause(self.profile.timing.poll_interval());
        }
        if self.session.is_loader_active() {
            return Err(PageFailure::LoaderActive { position });
        }
        Ok(())
    }

    fn find_resource(&mut self, position: u32) -> Result<PageResource, PageFailure> {
        let requests = self.session.requests_matching(&self.pattern)?;
        let resource = match self.config.mode {
            ContentMode::Images => requests
                .last()
                .and_then(|request| request.url.rsplit_once('/'))
                .map(|(locator, _)| PageResource::Locator(locator.to_owned())),
            ContentMode::Text => requests
                .into_iter()
                .rev()
                .find_map(|request| request.body)
                .map(PageResource::Payload),
        };
        resource.ok_or(PageFailure::ResourceMissing { position })
    }

    fn resolve(
        &mut self,
        position: u32,
        resource: PageResource,
    ) -> Result<HarvestedPage, PageFailure> {
        let shown = self
            .session
            .current_page_label()?
            .filter(|label| !label.trim().is_empty());
        let raw_label = shown
            .or_else(|| payload_label(&resource))
            .unwrap_or_else(|| position.to_string());

        let discovered_at = self.next_discovery;
        self.next_discovery += 1;
        let page = HarvestedPage {
            label: normalize(&raw_label),
            raw_label,
            position,
            resource,
            discovered_at,
        };
        tracing::debug!(position, label = %page.label, resource = ?page.resource, "page resolved");
        Ok(page)
    }

    /// Downloads the image behind `locator` at full resolution and returns
    /// it as an embeddable JPEG.
    ///
    /// Images narrower than the profile's minimum trigger a session reset and
    /// another attempt. When no attempt yields a wide enough image, the last
    /// undersized one is kept, even if later attempts got no image at all.
    pub fn fetch_image(&mut self, locator: &str) -> Result<Vec<u8>, PageFailure> {
        let url = format!(
            "{}/{}",
            locator.trim_end_matches('/'),
            self.profile.image_request_width
        );
        let pattern = RequestPattern::Exact(url.clone());
        let min_width = self.profile.min_image_width;
        let half_delay = self.config.delay / 2;
        let image_policy = self.profile.timing.image_policy();
        let poll_policy = self.profile.timing.poll_policy();
        let pause = self.pause;
        let mut undersized: Option<Vec<u8>> = None;

        let result = image_policy.run(pause, |attempt| {
            if attempt > 1 {
                self.reset_session()?;
            }
            self.session.clear_requests();
            pause.pause(half_delay);
            self.session.open(&url)?;
            pause.pause(half_delay);

            let body = poll_policy.run(pause, |_| self.image_body(&pattern, &url))?;
            let info = imaging::inspect(&body).map_err(|err| PageFailure::UndecodableImage {
                url: url.clone(),
                reason: format!("{err:#}"),
            })?;
            if info.width < min_width {
                tracing::warn!(%url, width = info.width, min_width, attempt, "image too small");
                undersized = Some(body);
                return Err(PageFailure::UnderResolution {
                    url: url.clone(),
                    width: info.width,
                    min_width,
                });
            }
            Ok(body)
        });

        let body = match (result, undersized) {
            (Ok(body), _) => body,
            (Err(failure), Some(body)) if failure.is_retryable() => {
                tracing::warn!(error = %failure, "keeping undersized image after the final attempt");
                body
            }
            (Err(failure), _) => return Err(failure),
        };
        imaging::to_jpeg(body).map_err(|err| PageFailure::UndecodableImage {
            url,
            reason: format!("{err:#}"),
        })
    }

    fn image_body(&mut self, pattern: &RequestPattern, url: &str) -> Result<Vec<u8>, PageFailure> {
        self.session
            .requests_matching(pattern)?
            .into_iter()
            .rev()
            .find_map(|request| request.body)
            .ok_or_else(|| PageFailure::ImageMissing {
                url: url.to_owned(),
            })
    }

    fn reset_session(&mut self) -> Result<(), PageFailure> {
        tracing::info!(position = self.config.start_page, "resetting reader session");
        match self.session.advance_to(self.config.start_page) {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => tracing::debug!(error = %err, "reset navigation failed"),
        }
        self.pause.pause(self.profile.timing.reload_settle());
        Ok(())
    }
}

fn payload_label(resource: &PageResource) -> Option<String> {
    let PageResource::Payload(bytes) = resource else {
        return None;
    };
    serde_json::from_slice::<TextPagePayload>(bytes)
        .ok()?
        .page
        .filter(|page| !page.trim().is_empty())
}
