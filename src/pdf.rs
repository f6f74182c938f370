//! Image-per-page PDF output.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};

use crate::assemble::{DocumentEncoder, EncodeRequest};
use crate::formats::{BookMetadata, PageContent, PageResource, ResolvedTocEntry, SequencedPage};
use crate::imaging::{self, ColorSpace};
use crate::numbering::{NumberStyle, PageNumberingScheme};
use crate::ocr::{self, OcrConfig, OcrOutcome};
use crate::profile::PageSize;

#[derive(Debug, Clone)]
pub struct PdfEncoder {
    /// `None` skips the text layer.
    pub ocr: Option<OcrConfig>,
    /// Also write `<title> compressed.pdf`.
    pub compress: bool,
    /// Size of blank pages when the book has no image to take it from.
    pub blank_page: PageSize,
}

impl DocumentEncoder for PdfEncoder {
    fn format(&self) -> &'static str {
        "pdf"
    }

    fn extension(&self) -> &'static str {
        "pdf"
    }

    fn encode(&self, request: &EncodeRequest<'_>) -> anyhow::Result<PathBuf> {
        let out_dir = request
            .output
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("create output dir: {}", out_dir.display()))?;

        let raw = tempfile::Builder::new()
            .prefix(".pagebinder-raw-")
            .suffix(".pdf")
            .tempfile_in(out_dir)
            .context("create raw pdf tempfile")?;
        let mut doc = build_image_document(request.pages, self.blank_page)?;
        doc.save(raw.path())
            .with_context(|| format!("write raw pdf: {}", raw.path().display()))?;

        let ocr_out = tempfile::Builder::new()
            .prefix(".pagebinder-ocr-")
            .suffix(".pdf")
            .tempfile_in(out_dir)
            .context("create ocr tempfile")?;
        let source = match &self.ocr {
            Some(config) => {
                let title = request.metadata.display_title();
                match ocr::run(config, raw.path(), ocr_out.path(), title)? {
                    OcrOutcome::Applied => ocr_out.path(),
                    OcrOutcome::Unavailable => raw.path(),
                }
            }
            None => {
                tracing::info!("skipping ocr");
                raw.path()
            }
        };

        let mut doc = Document::load(source)
            .with_context(|| format!("load pdf: {}", source.display()))?;
        write_info(&mut doc, request.metadata)?;
        write_outline(&mut doc, request.toc)?;
        write_page_labels(&mut doc, request.scheme)?;
        doc.save(request.output)
            .with_context(|| format!("write pdf: {}", request.output.display()))?;

        if self.compress {
            let compressed = compressed_path(request.output);
            tracing::info!(path = %compressed.display(), "writing compressed copy");
            doc.compress();
            doc.save(&compressed)
                .with_context(|| format!("write pdf: {}", compressed.display()))?;
        }

        Ok(request.output.to_path_buf())
    }
}

fn compressed_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_owned());
    output.with_file_name(format!("{stem} compressed.pdf"))
}

/// One page per sequenced page, each showing a single full-page JPEG.
fn build_image_document(pages: &[SequencedPage], fallback: PageSize) -> anyhow::Result<Document> {
    let blank_size = first_image_size(pages)?.unwrap_or(fallback);
    let mut blank: Option<Vec<u8>> = None;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(pages.len());

    for page in pages {
        let converted = match &page.content {
            PageContent::Blank => None,
            PageContent::Resource(resource) => {
                match imaging::to_jpeg(read_resource(resource)?) {
                    Ok(jpeg) => Some(jpeg),
                    Err(err) => {
                        tracing::warn!(
                            ordinal = page.ordinal,
                            label = %page.label,
                            error = %format!("{err:#}"),
                            "page image cannot be decoded; writing a blank page in its place"
                        );
                        None
                    }
                }
            }
        };
        let jpeg = match converted {
            Some(jpeg) => jpeg,
            None => match &blank {
                Some(jpeg) => jpeg.clone(),
                None => {
                    let jpeg = imaging::blank_jpeg(blank_size.width, blank_size.height)?;
                    blank = Some(jpeg.clone());
                    jpeg
                }
            },
        };
        let page_id = add_image_page(&mut doc, pages_id, &jpeg)
            .with_context(|| format!("add page {} ({})", page.ordinal, page.label))?;
        kids.push(Object::Reference(page_id));
    }

    let count = i64::try_from(kids.len()).context("page count")?;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    Ok(doc)
}

/// Size of the first page whose image decodes.
fn first_image_size(pages: &[SequencedPage]) -> anyhow::Result<Option<PageSize>> {
    for page in pages {
        if let PageContent::Resource(resource) = &page.content {
            match imaging::inspect(&read_resource(resource)?) {
                Ok(info) => {
                    return Ok(Some(PageSize {
                        width: info.width,
                        height: info.height,
                    }));
                }
                Err(err) => {
                    tracing::debug!(
                        ordinal = page.ordinal,
                        error = %err,
                        "skipping undecodable page for sizing"
                    );
                }
            }
        }
    }
    Ok(None)
}

fn read_resource(resource: &PageResource) -> anyhow::Result<Vec<u8>> {
    match resource {
        PageResource::Stored(path) => {
            std::fs::read(path).with_context(|| format!("read page: {}", path.display()))
        }
        PageResource::Payload(bytes) => Ok(bytes.clone()),
        PageResource::Locator(locator) => anyhow::bail!("page image was never downloaded: {locator}"),
    }
}

fn add_image_page(doc: &mut Document, pages_id: ObjectId, jpeg: &[u8]) -> anyhow::Result<ObjectId> {
    let info = imaging::inspect(jpeg)?;
    let color_space = match info.jpeg {
        Some(ColorSpace::Gray) => "DeviceGray",
        Some(ColorSpace::Rgb) => "DeviceRGB",
        None => anyhow::bail!("page image is not an embeddable jpeg"),
    };

    let mut image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => Object::Integer(i64::from(info.width)),
            "Height" => Object::Integer(i64::from(info.height)),
            "ColorSpace" => color_space,
            "BitsPerComponent" => Object::Integer(8),
            "Filter" => "DCTDecode",
        },
        jpeg.to_vec(),
    );
    image.allows_compression = false;
    let image_id = doc.add_object(image);

    let width = points(info.width);
    let height = points(info.height);
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(height),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        Dictionary::new(),
        content.encode().context("encode page content")?,
    ));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width),
            Object::Integer(height),
        ],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                "Im0" => image_id,
            },
        },
    }))
}

/// Pixels at 96 dpi to PDF points.
fn points(pixels: u32) -> i64 {
    ((i64::from(pixels) * 3 + 2) / 4).max(1)
}

/// PDF text string; UTF-16BE with a byte order mark when not plain ASCII.
fn pdf_text(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn catalog_mut(doc: &mut Document) -> anyhow::Result<&mut Dictionary> {
    let root = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .context("pdf has no catalog")?;
    doc.get_object_mut(root)
        .and_then(Object::as_dict_mut)
        .context("read pdf catalog")
}

fn write_info(doc: &mut Document, metadata: &BookMetadata) -> anyhow::Result<()> {
    let info_id = doc.add_object(dictionary! {
        "Title" => pdf_text(metadata.display_title()),
        "Author" => pdf_text(metadata.display_author()),
        "Creator" => pdf_text(&format!("ISBN: {}", metadata.book_id)),
        "Producer" => pdf_text(env!("CARGO_PKG_NAME")),
    });
    doc.trailer.set("Info", info_id);
    Ok(())
}

fn write_outline(doc: &mut Document, toc: &[ResolvedTocEntry]) -> anyhow::Result<()> {
    let page_ids = doc.get_pages();
    let entries = toc
        .iter()
        .filter_map(|entry| {
            let page_number = u32::try_from(entry.ordinal).ok()?;
            page_ids.get(&page_number).map(|page_id| (entry, *page_id))
        })
        .collect::<Vec<_>>();
    if entries.is_empty() {
        tracing::info!("no table of contents; skipping outline");
        return Ok(());
    }

    let outlines_id = doc.new_object_id();
    let item_ids = entries
        .iter()
        .map(|_| doc.new_object_id())
        .collect::<Vec<_>>();
    for (idx, (entry, page_id)) in entries.iter().enumerate() {
        let mut item = dictionary! {
            "Title" => pdf_text(&entry.title),
            "Parent" => outlines_id,
            "Dest" => vec![Object::Reference(*page_id), Object::Name(b"Fit".to_vec())],
        };
        if idx > 0 {
            item.set("Prev", item_ids[idx - 1]);
        }
        if let Some(next) = item_ids.get(idx + 1) {
            item.set("Next", *next);
        }
        doc.objects.insert(item_ids[idx], Object::Dictionary(item));
    }

    let count = i64::try_from(item_ids.len()).context("outline size")?;
    doc.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => item_ids[0],
            "Last" => item_ids[item_ids.len() - 1],
            "Count" => Object::Integer(count),
        }),
    );

    let catalog = catalog_mut(doc)?;
    catalog.set("Outlines", outlines_id);
    catalog.set("PageMode", "UseOutlines");
    Ok(())
}

fn write_page_labels(doc: &mut Document, scheme: &PageNumberingScheme) -> anyhow::Result<()> {
    if scheme.is_default() {
        return Ok(());
    }

    let mut nums = Vec::with_capacity(scheme.ranges.len() * 2);
    for range in &scheme.ranges {
        let mut label = Dictionary::new();
        match range.style {
            NumberStyle::LowerRoman => label.set("S", Object::Name(b"r".to_vec())),
            NumberStyle::Arabic => label.set("S", Object::Name(b"D".to_vec())),
            NumberStyle::None => {}
        }
        if range.style != NumberStyle::None {
            label.set("St", Object::Integer(i64::from(range.first_number)));
        }
        if let Some(prefix) = &range.prefix {
            label.set("P", pdf_text(prefix));
        }
        let start = i64::try_from(range.start).context("page label start")?;
        nums.push(Object::Integer(start));
        nums.push(Object::Dictionary(label));
    }

    catalog_mut(doc)?.set("PageLabels", dictionary! { "Nums" => nums });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::resolve_toc;
    use crate::formats::TocEntry;
    use crate::imaging::tests::jpeg;
    use crate::label::normalize;
    use pretty_assertions::assert_eq;

    fn stored(dir: &Path, raw: &str, ordinal: usize, bytes: &[u8]) -> SequencedPage {
        let path = dir.join(format!("{raw}.jpg"));
        std::fs::write(&path, bytes).expect("write page");
        SequencedPage {
            ordinal,
            label: normalize(raw),
            content: PageContent::Resource(PageResource::Stored(path)),
        }
    }

    fn blank(raw: &str, ordinal: usize) -> SequencedPage {
        SequencedPage {
            ordinal,
            label: normalize(raw),
            content: PageContent::Blank,
        }
    }

    fn encoder(compress: bool) -> PdfEncoder {
        PdfEncoder {
            ocr: None,
            compress,
            blank_page: PageSize::default(),
        }
    }

    fn media_box(doc: &Document, page_id: ObjectId) -> anyhow::Result<Vec<i64>> {
        let page = doc.get_object(page_id)?.as_dict()?;
        Ok(page
            .get(b"MediaBox")?
            .as_array()?
            .iter()
            .map(|value| value.as_i64().unwrap_or_default())
            .collect())
    }

    #[test]
    fn writes_pages_metadata_outline_and_labels() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let pages = vec![
            stored(tmp.path(), "Cover", 1, &jpeg(400, 520)),
            stored(tmp.path(), "i", 2, &jpeg(400, 520)),
            stored(tmp.path(), "1", 3, &jpeg(400, 520)),
            blank("2", 4),
            stored(tmp.path(), "3", 5, &jpeg(400, 520)),
        ];
        let mut metadata = BookMetadata::new("9781234");
        metadata.title = Some("Café Rust".to_owned());
        metadata.author = Some("Ferris".to_owned());
        metadata.toc = vec![TocEntry {
            title: "Body".to_owned(),
            locator: "/3".to_owned(),
        }];
        let toc = resolve_toc(&metadata.toc, pages.len(), -1);
        let scheme = PageNumberingScheme::from_sequence(&pages);
        let output = tmp.path().join("out").join("Café Rust.pdf");

        let written = encoder(false).encode(&EncodeRequest {
            pages: &pages,
            metadata: &metadata,
            toc: &toc,
            scheme: &scheme,
            output: &output,
        })?;
        assert_eq!(written, output);

        let doc = Document::load(&output)?;
        let page_ids = doc.get_pages();
        assert_eq!(page_ids.len(), 5);
        assert_eq!(media_box(&doc, page_ids[&4])?, vec![0, 0, 300, 390]);

        let info_id = doc.trailer.get(b"Info")?.as_reference()?;
        let info = doc.get_object(info_id)?.as_dict()?;
        assert_eq!(info.get(b"Title")?, &pdf_text("Café Rust"));
        assert_eq!(info.get(b"Author")?, &Object::string_literal("Ferris"));
        assert_eq!(info.get(b"Creator")?, &Object::string_literal("ISBN: 9781234"));

        let catalog = doc.catalog()?;
        let labels = catalog.get(b"PageLabels")?.as_dict()?;
        assert_eq!(labels.get(b"Nums")?.as_array()?.len(), 6);
        assert!(catalog.get(b"Outlines").is_ok());
        Ok(())
    }

    #[test]
    fn plain_numbering_writes_no_labels_and_blank_uses_fallback_size() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let pages = vec![blank("1", 1), blank("2", 2)];
        let metadata = BookMetadata::new("b1");
        let scheme = PageNumberingScheme::from_sequence(&pages);
        let output = tmp.path().join("b1.pdf");

        encoder(true).encode(&EncodeRequest {
            pages: &pages,
            metadata: &metadata,
            toc: &[],
            scheme: &scheme,
            output: &output,
        })?;

        let doc = Document::load(&output)?;
        assert!(doc.catalog()?.get(b"PageLabels").is_err());
        assert!(doc.catalog()?.get(b"Outlines").is_err());
        let first = doc.get_pages()[&1];
        assert_eq!(media_box(&doc, first)?, vec![0, 0, 1500, 1941]);
        assert!(tmp.path().join("b1 compressed.pdf").is_file());
        Ok(())
    }

    #[test]
    fn undecodable_page_becomes_a_blank_page() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let pages = vec![
            stored(tmp.path(), "1", 1, &jpeg(300, 400)),
            stored(tmp.path(), "2", 2, b"<html>session expired</html>"),
            stored(tmp.path(), "3", 3, &jpeg(300, 400)),
        ];
        let output = tmp.path().join("b1.pdf");
        encoder(false).encode(&EncodeRequest {
            pages: &pages,
            metadata: &BookMetadata::new("b1"),
            toc: &[],
            scheme: &PageNumberingScheme::default(),
            output: &output,
        })?;

        let doc = Document::load(&output)?;
        let page_ids = doc.get_pages().into_values().collect::<Vec<_>>();
        assert_eq!(page_ids.len(), 3);
        assert_eq!(media_box(&doc, page_ids[1])?, media_box(&doc, page_ids[0])?);
        Ok(())
    }

    #[test]
    fn undecodable_first_page_does_not_set_the_blank_size() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let pages = vec![
            stored(tmp.path(), "1", 1, b"truncated"),
            stored(tmp.path(), "2", 2, &jpeg(300, 400)),
        ];
        assert_eq!(
            first_image_size(&pages)?,
            Some(PageSize {
                width: 300,
                height: 400
            })
        );
        let doc = build_image_document(&pages, PageSize::default())?;
        assert_eq!(doc.get_pages().len(), 2);
        Ok(())
    }

    #[test]
    fn undownloaded_page_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let pages = vec![SequencedPage {
            ordinal: 1,
            label: normalize("1"),
            content: PageContent::Resource(PageResource::Locator("https://x/1".to_owned())),
        }];
        let output = tmp.path().join("b1.pdf");
        let result = encoder(false).encode(&EncodeRequest {
            pages: &pages,
            metadata: &BookMetadata::new("b1"),
            toc: &[],
            scheme: &PageNumberingScheme::default(),
            output: &output,
        });
        assert!(result.is_err());
    }

    #[test]
    fn non_ascii_text_is_utf16_with_bom() {
        assert_eq!(
            pdf_text("é"),
            Object::String(vec![0xFE, 0xFF, 0x00, 0xE9], StringFormat::Hexadecimal)
        );
        assert_eq!(pdf_text("abc"), Object::string_literal("abc"));
    }
}
