//! The `build`, `harvest` and `assemble` pipelines.

use std::time::Duration;

use anyhow::Context as _;

use crate::assemble::{Assembler, Document, DocumentEncoder};
use crate::browser::transcript::TranscriptLauncher;
use crate::browser::{BrowserSession, SessionConfig, SessionLauncher};
use crate::cancellation::CancellationToken;
use crate::cli::{BuildArgs, Mode, OutputFormat};
use crate::epub::EpubEncoder;
use crate::error::{HarvestError, PageFailure};
use crate::formats::{BookMetadata, HarvestedPage, PageResource};
use crate::gaps;
use crate::harvest::{ContentMode, HarvestConfig, Harvester};
use crate::markup::ParagraphFormatter;
use crate::ocr::OcrConfig;
use crate::page_store::PageStore;
use crate::pdf::PdfEncoder;
use crate::profile::ReaderProfile;
use crate::retry::{Pause, ThreadPause};
use crate::sequence::{count_non_numbered, sequence};

/// What a session run left in the page store.
#[derive(Debug)]
pub struct Collected {
    pub metadata: BookMetadata,
    /// Non-Integer pages seen by the harvest; `None` when no harvest ran.
    pub non_numbered: Option<usize>,
    pub stored: usize,
    pub skipped: Vec<String>,
}

pub fn run(args: &BuildArgs, cancel: CancellationToken) -> anyhow::Result<Document> {
    args.validate()?;
    let profile = load_profile(args)?;
    let store = PageStore::open(&args.out, &args.book_id)?;

    let non_numbered = if args.skip_harvest {
        tracing::info!(store = %store.root().display(), "build: skipping harvest");
        None
    } else {
        let collected = with_session(args, |session| {
            collect(
                session,
                &profile,
                &store,
                &harvest_config(args),
                &ThreadPause,
                cancel.clone(),
                args.only_metadata,
            )
        })?;
        if cancel.is_cancelled() {
            anyhow::bail!(
                "cancelled after storing {} pages; rerun with --skip-harvest to assemble them",
                collected.stored
            );
        }
        collected.non_numbered
    };

    assemble_from_store(args, &profile, &store, non_numbered)
}

/// Harvests into the page store and stops.
pub fn harvest(args: &BuildArgs, cancel: CancellationToken) -> anyhow::Result<Collected> {
    args.validate()?;
    let profile = load_profile(args)?;
    let store = PageStore::open(&args.out, &args.book_id)?;
    with_session(args, |session| {
        collect(
            session,
            &profile,
            &store,
            &harvest_config(args),
            &ThreadPause,
            cancel,
            args.only_metadata,
        )
    })
}

/// Assembles from the page store without opening a session.
pub fn assemble(args: &BuildArgs) -> anyhow::Result<Document> {
    args.validate()?;
    let profile = load_profile(args)?;
    let store = PageStore::open(&args.out, &args.book_id)?;
    assemble_from_store(args, &profile, &store, None)
}

fn load_profile(args: &BuildArgs) -> anyhow::Result<ReaderProfile> {
    let mut profile = ReaderProfile::load(args.profile.as_deref())?;
    if let Some(offset) = args.toc_offset {
        profile.toc_offset = offset;
    }
    Ok(profile)
}

fn harvest_config(args: &BuildArgs) -> HarvestConfig {
    HarvestConfig {
        book_id: args.book_id.trim().to_owned(),
        mode: match args.mode {
            Mode::Images => ContentMode::Images,
            Mode::Text => ContentMode::Text,
        },
        start_page: args.start_page,
        end_page: args.end_page,
        delay: Duration::from_millis(args.delay_ms),
    }
}

/// Runs `f` against a freshly launched session and always closes it, also
/// when `f` fails.
fn with_session<T>(
    args: &BuildArgs,
    f: impl FnOnce(&mut dyn BrowserSession) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let config = SessionConfig {
        transcript: args.session.clone(),
        browser_exe: args.browser_exe.clone(),
    };
    let mut session = TranscriptLauncher
        .launch(&config)
        .context("launch browser session")?;
    let result = f(session.as_mut());
    if let Err(err) = session.close() {
        tracing::warn!(error = %err, "failed to close browser session");
    }
    result
}

/// Scrapes metadata and, unless `metadata_only`, harvests every page and
/// writes it to the store. Pages that fail to download are skipped.
pub fn collect(
    session: &mut dyn BrowserSession,
    profile: &ReaderProfile,
    store: &PageStore,
    config: &HarvestConfig,
    pause: &dyn Pause,
    cancel: CancellationToken,
    metadata_only: bool,
) -> anyhow::Result<Collected> {
    let mut harvester = Harvester::new(session, profile, config, pause, cancel.clone());
    harvester.authenticate().context("authenticate")?;

    let metadata = harvester.scrape_metadata().context("scrape metadata")?;
    store.write_metadata(&metadata)?;
    if metadata_only {
        tracing::info!("metadata refreshed");
        return Ok(Collected {
            metadata,
            non_numbered: None,
            stored: 0,
            skipped: Vec::new(),
        });
    }

    let report = harvester.harvest().context("harvest")?;
    tracing::info!(
        pages = report.pages.len(),
        abandoned = report.abandoned.len(),
        stop = ?report.stop,
        "harvest finished"
    );
    if !report.abandoned.is_empty() {
        tracing::warn!(positions = ?report.abandoned, "pages abandoned after the retry pass");
    }

    let mut stored = 0usize;
    let mut skipped = Vec::new();
    for page in sequence(report.pages) {
        if cancel.is_cancelled() {
            tracing::warn!("cancelled; not storing the remaining pages");
            break;
        }
        match store_page(&mut harvester, store, &page)? {
            true => stored += 1,
            false => skipped.push(page.label.to_string()),
        }
    }
    tracing::info!(stored, skipped = skipped.len(), store = %store.root().display(), "pages stored");

    Ok(Collected {
        metadata,
        non_numbered: Some(report.non_numbered),
        stored,
        skipped,
    })
}

/// Returns `false` when the page was skipped after a transient failure.
fn store_page(
    harvester: &mut Harvester<'_>,
    store: &PageStore,
    page: &HarvestedPage,
) -> anyhow::Result<bool> {
    let (bytes, extension) = match &page.resource {
        PageResource::Locator(locator) => match harvester.fetch_image(locator) {
            Ok(bytes) => (bytes, "jpg"),
            Err(PageFailure::Session(err)) if err.is_fatal() => {
                return Err(HarvestError::Session(err)).context("download page image");
            }
            Err(failure) => {
                tracing::warn!(label = %page.label, error = %failure, "skipping page");
                return Ok(false);
            }
        },
        PageResource::Payload(bytes) => (bytes.clone(), "json"),
        PageResource::Stored(_) => return Ok(true),
    };
    store.write_page(page, &bytes, extension)?;
    tracing::debug!(label = %page.label, "page stored");
    Ok(true)
}

fn assemble_from_store(
    args: &BuildArgs,
    profile: &ReaderProfile,
    store: &PageStore,
    non_numbered: Option<usize>,
) -> anyhow::Result<Document> {
    if !store.has_pages()? {
        anyhow::bail!(
            "no stored pages under {}; run a harvest first",
            store.pages_dir().display()
        );
    }
    let metadata = match store.read_metadata()? {
        Some(metadata) => metadata,
        None => {
            tracing::warn!("no stored metadata; using the book id as title");
            BookMetadata::new(args.book_id.trim())
        }
    };

    let ordered = sequence(store.load_pages()?);
    let non_numbered = non_numbered.unwrap_or_else(|| count_non_numbered(&ordered));
    let pages = gaps::fill(&ordered, non_numbered, profile.max_gap);
    tracing::info!(
        stored = ordered.len(),
        blanks = pages.len() - ordered.len(),
        "book sequenced"
    );

    let encoder = encoder_for(args, profile);
    let assembler = Assembler::new(encoder.as_ref(), &args.out, profile.toc_offset);
    Ok(assembler.assemble(&pages, &metadata)?)
}

fn encoder_for(args: &BuildArgs, profile: &ReaderProfile) -> Box<dyn DocumentEncoder> {
    match args.format {
        OutputFormat::Pdf => Box::new(PdfEncoder {
            ocr: (!args.skip_ocr).then(|| OcrConfig::new(&args.ocr_bin, &args.language)),
            compress: args.compress,
            blank_page: profile.blank_page,
        }),
        OutputFormat::Epub => Box::new(EpubEncoder::new(
            Box::new(ParagraphFormatter::new(profile.heading_keywords.clone())),
            &args.language,
        )),
    }
}
