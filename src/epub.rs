use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Utc;
use zip::write::SimpleFileOptions;

use crate::assemble::{DocumentEncoder, EncodeRequest};
use crate::formats::{BookMetadata, PageContent, PageResource, SequencedPage, TextPagePayload};
use crate::markup::{EMPTY_PAGE_MARKER, TextFormatter, is_well_formed, xml_escape};

const PREVIEW_CHARS: usize = 40;

/// Writes one XHTML document per page into an EPUB 3 container.
pub struct EpubEncoder {
    formatter: Box<dyn TextFormatter>,
    /// BCP-47 language tag used for EPUB metadata and XHTML documents.
    lang: String,
}

impl EpubEncoder {
    pub fn new(formatter: Box<dyn TextFormatter>, language: &str) -> Self {
        Self {
            formatter,
            lang: guess_lang_tag(language),
        }
    }
}

/// Maps an OCR language code (`eng`, `por+eng`) or a BCP-47 tag to the tag
/// written into the book.
pub fn guess_lang_tag(language: &str) -> String {
    let raw = language.split('+').next().unwrap_or_default().trim();
    if raw.is_empty() {
        return "und".to_string();
    }

    // If the user already passed a plausible BCP-47 tag, keep it.
    let looks_like_tag = raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && raw.chars().any(|c| c.is_ascii_alphabetic())
        && raw.len() <= 35;
    if looks_like_tag && (raw.contains('-') || raw.contains('_')) {
        return raw.replace('_', "-");
    }

    let lower = raw.to_ascii_lowercase();
    let tag = match lower.as_str() {
        "eng" | "english" => "en",
        "por" | "portuguese" => "pt",
        "spa" | "spanish" => "es",
        "fra" | "french" => "fr",
        "deu" | "german" => "de",
        "ita" | "italian" => "it",
        "jpn" | "japanese" => "ja",
        tag if tag.len() == 2 && tag.chars().all(|c| c.is_ascii_alphabetic()) => tag,
        _ => "und",
    };
    tag.to_string()
}

#[derive(Debug)]
struct PageEntry {
    stem: String,
    nav_title: String,
    image: Option<ImageEntry>,
}

#[derive(Debug)]
struct ImageEntry {
    href: String,
    media_type: &'static str,
}

#[derive(Debug)]
struct RenderedPage {
    body: String,
    nav_title: String,
    image: Option<(ImageEntry, PathBuf)>,
}

impl DocumentEncoder for EpubEncoder {
    fn format(&self) -> &'static str {
        "epub"
    }

    fn extension(&self) -> &'static str {
        "epub"
    }

    fn encode(&self, request: &EncodeRequest<'_>) -> anyhow::Result<PathBuf> {
        let out_path = request.output;
        if let Some(parent) = out_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create epub parent dir: {}", parent.display()))?;
        }

        let metadata = request.metadata;
        let title = metadata.display_title();
        let lang = self.lang.as_str();
        let uuid = uuid::Uuid::new_v4();
        let modified = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

        let out_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(out_path)
            .with_context(|| format!("open epub output: {}", out_path.display()))?;
        let mut zip = zip::ZipWriter::new(out_file);

        // EPUB readers expect `mimetype` first and stored (no compression).
        let mimetype_options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        zip.start_file("mimetype", mimetype_options)
            .context("epub start_file mimetype")?;
        zip.write_all(b"application/epub+zip")
            .context("epub write mimetype")?;

        let deflated_options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);
        let stored_options = mimetype_options;

        zip.start_file("META-INF/container.xml", deflated_options)
            .context("epub start_file container.xml")?;
        zip.write_all(render_container_xml().as_bytes())
            .context("epub write container.xml")?;

        let mut entries = Vec::with_capacity(request.pages.len());
        for page in request.pages {
            let stem = format!("page-{:04}", page.ordinal);
            let rendered = self.render_page(page, &stem)?;
            let mut xhtml =
                wrap_xhtml_document(&format!("Page {}", page.label), lang, &rendered.body);
            if !is_well_formed(&xhtml) {
                tracing::warn!(
                    ordinal = page.ordinal,
                    label = %page.label,
                    "page markup is not well-formed; writing a placeholder"
                );
                xhtml = wrap_xhtml_document(
                    &format!("Page {}", page.label),
                    lang,
                    &placeholder_body(&page.label.to_string()),
                );
            }

            zip.start_file(format!("OEBPS/{stem}.xhtml"), deflated_options)
                .with_context(|| format!("epub start_file page: {stem}"))?;
            zip.write_all(xhtml.as_bytes())
                .with_context(|| format!("epub write page: {stem}"))?;

            let image = match rendered.image {
                Some((image, source)) => {
                    let mut f = fs::File::open(&source)
                        .with_context(|| format!("open page image: {}", source.display()))?;
                    // JPEG and PNG data does not shrink under deflate.
                    zip.start_file(format!("OEBPS/{}", image.href), stored_options)
                        .with_context(|| format!("epub start_file image: {}", image.href))?;
                    std::io::copy(&mut f, &mut zip)
                        .with_context(|| format!("epub write image: {}", image.href))?;
                    Some(image)
                }
                None => None,
            };
            entries.push(PageEntry {
                stem,
                nav_title: rendered.nav_title,
                image,
            });
        }

        let navigation = nav_entries(request, &entries);
        let page_list = entries
            .iter()
            .enumerate()
            .map(|(idx, page)| (request.scheme.label_for(idx), page.stem.clone()))
            .collect::<Vec<_>>();
        let files = [
            (
                "OEBPS/content.opf",
                render_content_opf(metadata, lang, uuid, &modified, &entries),
            ),
            (
                "OEBPS/nav.xhtml",
                render_nav_xhtml(title, lang, &navigation, &page_list),
            ),
            ("OEBPS/toc.ncx", render_toc_ncx(title, uuid, &navigation)),
            ("OEBPS/style.css", default_style_css()),
        ];
        for (name, contents) in files {
            zip.start_file(name, deflated_options)
                .with_context(|| format!("epub start_file {name}"))?;
            zip.write_all(contents.as_bytes())
                .with_context(|| format!("epub write {name}"))?;
        }

        zip.finish().context("epub finish zip")?;
        Ok(out_path.to_path_buf())
    }
}

impl EpubEncoder {
    fn render_page(&self, page: &SequencedPage, stem: &str) -> anyhow::Result<RenderedPage> {
        let label = page.label.to_string();
        let default_title = format!("Page {label}");
        let resource = match &page.content {
            PageContent::Blank => {
                return Ok(RenderedPage {
                    body: EMPTY_PAGE_MARKER.to_owned(),
                    nav_title: default_title,
                    image: None,
                });
            }
            PageContent::Resource(resource) => resource,
        };

        let payload = match resource {
            PageResource::Stored(path) if !is_text_file(path) => {
                let ext = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .unwrap_or("jpg")
                    .to_ascii_lowercase();
                let href = format!("images/{stem}.{ext}");
                let body = format!(
                    "<div class=\"page-image\"><img src=\"{}\" alt=\"{}\" /></div>",
                    xml_escape(&href),
                    xml_escape(&default_title)
                );
                return Ok(RenderedPage {
                    body,
                    nav_title: default_title,
                    image: Some((
                        ImageEntry {
                            media_type: media_type_for_image(&ext),
                            href,
                        },
                        path.clone(),
                    )),
                });
            }
            PageResource::Stored(path) => {
                fs::read(path).with_context(|| format!("read page: {}", path.display()))?
            }
            PageResource::Payload(bytes) => bytes.clone(),
            PageResource::Locator(locator) => {
                anyhow::bail!("page {label} was never downloaded: {locator}")
            }
        };

        let Ok(payload) = serde_json::from_slice::<TextPagePayload>(&payload) else {
            tracing::warn!(ordinal = page.ordinal, %label, "unreadable text payload; writing a placeholder");
            return Ok(RenderedPage {
                body: placeholder_body(&label),
                nav_title: default_title,
                image: None,
            });
        };

        let preview = payload
            .words
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let nav_title = if preview.is_empty() {
            default_title
        } else if preview.chars().count() > PREVIEW_CHARS {
            let cut = preview.chars().take(PREVIEW_CHARS).collect::<String>();
            format!("p. {label}: {cut}…")
        } else {
            format!("p. {label}: {preview}")
        };
        Ok(RenderedPage {
            body: self.formatter.format(&payload.words),
            nav_title,
            image: None,
        })
    }
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn placeholder_body(label: &str) -> String {
    format!(
        "<div class=\"placeholder\">\n<p>Page {}</p>\n<p>(content unavailable)</p>\n</div>",
        xml_escape(label)
    )
}

/// Table of contents entries as `(title, page stem)`.
fn nav_entries(request: &EncodeRequest<'_>, pages: &[PageEntry]) -> Vec<(String, String)> {
    if request.toc.is_empty() {
        return pages
            .iter()
            .map(|page| (page.nav_title.clone(), page.stem.clone()))
            .collect();
    }
    request
        .toc
        .iter()
        .filter_map(|entry| {
            let page = pages.get(entry.ordinal.checked_sub(1)?)?;
            Some((entry.title.clone(), page.stem.clone()))
        })
        .collect()
}

fn render_container_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    .to_string()
}

fn default_style_css() -> String {
    r#"@charset "utf-8";

html { font-family: serif; }
body { margin: 0; padding: 0 1.2em; line-height: 1.6; }
img { max-width: 100%; height: auto; }
.page-image { margin: 0; padding: 0; text-align: center; }
.page-image img { max-height: 100%; }
.empty-page { min-height: 1em; }
.placeholder { color: #666; text-align: center; }
h2 { margin-top: 1.2em; }
"#
    .to_string()
}

fn render_nav_xhtml(
    title: &str,
    lang: &str,
    entries: &[(String, String)],
    page_list: &[(String, String)],
) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&format!("  <h1>{}</h1>\n", xml_escape(title)));
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n");
    out.push_str("    <ol>\n");
    for (entry_title, stem) in entries {
        out.push_str(&format!(
            "      <li><a href=\"{}.xhtml\">{}</a></li>\n",
            xml_escape(stem),
            xml_escape(entry_title)
        ));
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("  <nav epub:type=\"page-list\" id=\"page-list\" hidden=\"hidden\">\n");
    out.push_str("    <ol>\n");
    for (label, stem) in page_list {
        out.push_str(&format!(
            "      <li><a href=\"{}.xhtml\">{}</a></li>\n",
            xml_escape(stem),
            xml_escape(label)
        ));
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn render_toc_ncx(title: &str, uuid: uuid::Uuid, entries: &[(String, String)]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n",
    );
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"urn:uuid:{}\" />\n",
        xml_escape(&uuid.to_string())
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\" />\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\" />\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\" />\n");
    out.push_str("  </head>\n");
    out.push_str("  <docTitle><text>");
    out.push_str(&xml_escape(title));
    out.push_str("</text></docTitle>\n");
    out.push_str("  <navMap>\n");
    for (idx, (entry_title, stem)) in entries.iter().enumerate() {
        let play = idx + 1;
        out.push_str(&format!(
            "    <navPoint id=\"navPoint-{}\" playOrder=\"{}\">\n",
            play, play
        ));
        out.push_str("      <navLabel><text>");
        out.push_str(&xml_escape(entry_title));
        out.push_str("</text></navLabel>\n");
        out.push_str(&format!(
            "      <content src=\"{}.xhtml\" />\n",
            xml_escape(stem)
        ));
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

fn render_content_opf(
    metadata: &BookMetadata,
    lang: &str,
    uuid: uuid::Uuid,
    modified: &str,
    pages: &[PageEntry],
) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{}\">\n",
        xml_escape(lang)
    ));
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">urn:uuid:{}</dc:identifier>\n",
        xml_escape(&uuid.to_string())
    ));
    out.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        xml_escape(metadata.display_title())
    ));
    out.push_str(&format!(
        "    <dc:creator>{}</dc:creator>\n",
        xml_escape(metadata.display_author())
    ));
    out.push_str(&format!(
        "    <dc:source>ISBN: {}</dc:source>\n",
        xml_escape(&metadata.book_id)
    ));
    out.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        xml_escape(lang)
    ));
    out.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(modified)
    ));
    out.push_str("  </metadata>\n");
    out.push_str("  <manifest>\n");
    out.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n",
    );
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    out.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\" />\n");

    for page in pages {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}.xhtml\" media-type=\"application/xhtml+xml\" />\n",
            xml_escape(&page.stem),
            xml_escape(&page.stem)
        ));
        if let Some(image) = &page.image {
            out.push_str(&format!(
                "    <item id=\"{}-image\" href=\"{}\" media-type=\"{}\" />\n",
                xml_escape(&page.stem),
                xml_escape(&image.href),
                xml_escape(image.media_type)
            ));
        }
    }

    out.push_str("  </manifest>\n");
    out.push_str("  <spine toc=\"ncx\">\n");
    for page in pages {
        out.push_str(&format!(
            "    <itemref idref=\"{}\" />\n",
            xml_escape(&page.stem)
        ));
    }
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

fn media_type_for_image(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn wrap_xhtml_document(title: &str, lang: &str, body_html: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(body_html);
    if !body_html.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}
