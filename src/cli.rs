use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Harvest a book from the reader and assemble it.
    Build(BuildArgs),
    /// Harvest pages into the page store without assembling.
    Harvest(BuildArgs),
    /// Assemble a document from previously stored pages.
    Assemble(BuildArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Pdf,
    Epub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Page images (scanned books).
    Images,
    /// Per-page text payloads (reflowable books).
    Text,
}

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
    /// Book identifier (ISBN) as used by the reader.
    #[arg(long)]
    pub book_id: String,

    /// Output directory; pages are stored under `<out>/<book_id>/`.
    #[arg(long, default_value = "./output")]
    pub out: PathBuf,

    /// Reader position to start from. A non-zero start ignores the reader's page total.
    #[arg(long, default_value_t = 0)]
    pub start_page: u32,

    /// Last reader position to harvest.
    #[arg(long)]
    pub end_page: Option<u32>,

    /// Delay after each navigation (politeness).
    #[arg(long, default_value_t = 2000)]
    pub delay_ms: u64,

    /// OCR language code(s), e.g. `eng` or `eng+por`. Also sets the EPUB language.
    #[arg(long, default_value = "eng")]
    pub language: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Pdf)]
    pub format: OutputFormat,

    #[arg(long, value_enum, default_value_t = Mode::Images)]
    pub mode: Mode,

    /// Assemble from the stored pages without opening the reader.
    #[arg(long, conflicts_with = "only_metadata")]
    pub skip_harvest: bool,

    /// Refresh the book metadata, then assemble from the stored pages.
    #[arg(long)]
    pub only_metadata: bool,

    /// Do not add an OCR text layer to the PDF.
    #[arg(long)]
    pub skip_ocr: bool,

    /// Also write a compressed copy of the PDF.
    #[arg(long)]
    pub compress: bool,

    /// Browser executable for drivers that launch one.
    #[arg(long)]
    pub browser_exe: Option<PathBuf>,

    /// Recorded reader transcript to replay instead of a live browser.
    #[arg(long)]
    pub session: Option<PathBuf>,

    /// Reader profile (YAML) overriding URLs, image requirements and timing.
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Offset added to TOC page numbers (overrides the profile).
    #[arg(long, allow_hyphen_values = true)]
    pub toc_offset: Option<i64>,

    /// OCR executable.
    #[arg(long, default_value = "ocrmypdf")]
    pub ocr_bin: String,
}

impl BuildArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.book_id.trim().is_empty() {
            anyhow::bail!("--book-id must not be empty");
        }
        if self.format == OutputFormat::Pdf && self.mode == Mode::Text {
            anyhow::bail!("--format pdf requires --mode images; use --format epub for text books");
        }
        if let Some(end) = self.end_page
            && end < self.start_page
        {
            anyhow::bail!(
                "--end-page ({end}) must not be before --start-page ({})",
                self.start_page
            );
        }
        Ok(())
    }
}
