use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use sha2::Digest as _;

use crate::formats::{BookMetadata, HarvestRecord, HarvestedPage, PageResource};
use crate::label::normalize;

const PAGES_DIR: &str = "pages";
const RECORDS_FILE: &str = "harvest.jsonl";
const METADATA_FILE: &str = "metadata.json";

/// On-disk checkpoint of one book: `<out>/<book_id>/`.
#[derive(Debug, Clone)]
pub struct PageStore {
    root: PathBuf,
}

impl PageStore {
    pub fn open(out_dir: &Path, book_id: &str) -> anyhow::Result<Self> {
        let trimmed = book_id.trim();
        if trimmed.is_empty() {
            anyhow::bail!("book id must not be empty");
        }
        if trimmed == "." || trimmed == ".." || trimmed.contains(['/', '\\']) {
            anyhow::bail!("book id must be a single path segment: {book_id}");
        }
        Ok(Self {
            root: out_dir.join(trimmed),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.root.join(PAGES_DIR)
    }

    pub fn has_pages(&self) -> anyhow::Result<bool> {
        let dir = self.pages_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => {
                return Err(err).with_context(|| format!("read pages dir: {}", dir.display()));
            }
        };
        for entry in entries {
            let entry = entry.with_context(|| format!("read pages dir: {}", dir.display()))?;
            if entry.path().is_file() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Writes the page artifact as `pages/<stem>.<extension>` and appends its
    /// record to `harvest.jsonl`. Returns the page pointing at the stored file.
    pub fn write_page(
        &self,
        page: &HarvestedPage,
        bytes: &[u8],
        extension: &str,
    ) -> anyhow::Result<HarvestedPage> {
        let stem = page.label.stem();
        let file = format!("{stem}.{extension}");
        let dir = self.pages_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create pages dir: {}", dir.display()))?;

        let path = dir.join(&file);
        if path.exists() {
            tracing::debug!(path = %path.display(), "overwriting stored page");
        }
        std::fs::write(&path, bytes).with_context(|| format!("write page: {}", path.display()))?;

        let record = HarvestRecord {
            position: page.position,
            raw_label: page.raw_label.clone(),
            stem,
            locator: match &page.resource {
                PageResource::Locator(locator) => Some(locator.clone()),
                _ => None,
            },
            file,
            sha256: hex::encode(sha2::Sha256::digest(bytes)),
            retrieved_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            discovered_at: page.discovered_at,
        };
        self.append_record(&record)?;

        Ok(HarvestedPage {
            resource: PageResource::Stored(path),
            ..page.clone()
        })
    }

    fn append_record(&self, record: &HarvestRecord) -> anyhow::Result<()> {
        let path = self.root.join(RECORDS_FILE);
        let mut line = serde_json::to_string(record).context("serialize harvest record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open harvest records: {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append harvest record: {}", path.display()))?;
        Ok(())
    }

    fn read_records(&self) -> anyhow::Result<Vec<HarvestRecord>> {
        let path = self.root.join(RECORDS_FILE);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read harvest records: {}", path.display()));
            }
        };

        let mut records = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: HarvestRecord = serde_json::from_str(line).with_context(|| {
                format!("parse harvest record line {}: {}", idx + 1, path.display())
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Every stored page, in the order it was first written.
    ///
    /// Files without a record (copied in by hand) are labelled from their file
    /// stem and sorted after the recorded ones.
    pub fn load_pages(&self) -> anyhow::Result<Vec<HarvestedPage>> {
        let records = self.read_records()?;
        let mut latest: HashMap<&str, (usize, &HarvestRecord)> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            let first_seen = latest
                .get(record.file.as_str())
                .map_or(idx, |(first, _)| *first);
            latest.insert(record.file.as_str(), (first_seen, record));
        }

        let dir = self.pages_dir();
        let mut files = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read pages dir: {}", dir.display()));
            }
        };
        for entry in entries {
            let entry = entry.with_context(|| format!("read pages dir: {}", dir.display()))?;
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut untracked = records.len();
        let mut pages = Vec::with_capacity(files.len());
        for path in files {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_owned();
            let page = match latest.get(name.as_str()) {
                Some((order, record)) => HarvestedPage {
                    label: normalize(&record.raw_label),
                    raw_label: record.raw_label.clone(),
                    position: record.position,
                    resource: PageResource::Stored(path),
                    discovered_at: *order as u64,
                },
                None => {
                    let stem = path
                        .file_stem()
                        .and_then(|stem| stem.to_str())
                        .unwrap_or_default()
                        .to_owned();
                    tracing::debug!(file = %name, "page file has no harvest record");
                    let page = HarvestedPage {
                        label: normalize(&stem),
                        raw_label: stem,
                        position: 0,
                        resource: PageResource::Stored(path),
                        discovered_at: untracked as u64,
                    };
                    untracked += 1;
                    page
                }
            };
            pages.push(page);
        }
        pages.sort_by_key(|page| page.discovered_at);
        Ok(pages)
    }

    pub fn write_metadata(&self, metadata: &BookMetadata) -> anyhow::Result<()> {
        write_json_atomic(&self.root.join(METADATA_FILE), metadata)
    }

    pub fn read_metadata(&self) -> anyhow::Result<Option<BookMetadata>> {
        let path = self.root.join(METADATA_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("read: {}", path.display())),
        };
        let metadata = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse metadata: {}", path.display()))?;
        Ok(Some(metadata))
    }
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    std::fs::write(&tmp_path, &data)
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
