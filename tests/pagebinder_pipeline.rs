use std::fs;
use std::io::{Cursor, Read as _};
use std::path::{Path, PathBuf};

use predicates::prelude::*;

const API: &str = "https://reader.example/api";

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn write_profile(dir: &Path) -> PathBuf {
    let path = dir.join("profile.yaml");
    fs::write(
        &path,
        r#"min_image_width: 100
timing:
  poll_interval_ms: 0
  resource_polls: 1
  page_attempts: 1
  page_retry_initial_ms: 0
  page_retry_step_ms: 0
  metadata_attempts: 1
  metadata_retry_ms: 0
  image_attempts: 1
  reload_settle_ms: 0
  loader_polls: 1
  response_polls: 1
"#,
    )
    .expect("write profile");
    path
}

fn ambient_yaml() -> String {
    format!(
        r#"ambient:
  - url: "{API}/books/b1/pages"
    body: '[{{}},{{}},{{}},{{}}]'
  - url: "{API}/info/books.json?isbns=b1"
    body: '{{"books":[{{"title":"Test Book","author":"Ferris"}}]}}'
  - url: "{API}/books/b1/toc"
    body: '[{{"title":"Start","cfi":"/2"}}]'
"#
    )
}

/// Cover, 1, 2, 4: page 3 is missing from the reader.
fn write_image_transcript(dir: &Path) -> PathBuf {
    let labels = ["Cover", "1", "2", "4"];
    let mut yaml = String::from("authenticated: true\n");
    yaml.push_str(&ambient_yaml());
    yaml.push_str("pages:\n");
    for (position, label) in labels.iter().enumerate() {
        yaml.push_str(&format!(
            "  - position: {position}\n    label: \"{label}\"\n    next_disabled: {}\n    requests:\n      - url: \"{API}/books/b1/images/p{position}/800\"\n",
            position + 1 == labels.len()
        ));
    }
    yaml.push_str("resources:\n");
    for position in 0..labels.len() {
        let file = format!("p{position}.png");
        fs::write(dir.join(&file), png(200, 260)).expect("write page image");
        yaml.push_str(&format!(
            "  - url: \"{API}/books/b1/images/p{position}/2000\"\n    responses:\n      - body_file: {file}\n"
        ));
    }

    let path = dir.join("session.yaml");
    fs::write(&path, yaml).expect("write transcript");
    path
}

fn write_text_transcript(dir: &Path) -> PathBuf {
    let pages = [
        ("1", "CHAPTER ONE\nIt was a bright cold day in April."),
        ("2", "The clocks were striking thirteen."),
    ];
    let mut yaml = String::from("authenticated: true\n");
    yaml.push_str(&ambient_yaml());
    yaml.push_str("pages:\n");
    for (position, (label, words)) in pages.iter().enumerate() {
        let payload = serde_json::json!({ "words": words, "page": label }).to_string();
        yaml.push_str(&format!(
            "  - position: {position}\n    label: \"{label}\"\n    next_disabled: {}\n    requests:\n      - url: \"{API}/books/b1/text/{position}\"\n        body: '{payload}'\n",
            position + 1 == pages.len()
        ));
    }

    let path = dir.join("session.yaml");
    fs::write(&path, yaml).expect("write transcript");
    path
}

fn read_entry(archive: &mut zip::ZipArchive<fs::File>, name: &str) -> String {
    let mut out = String::new();
    archive
        .by_name(name)
        .unwrap_or_else(|err| panic!("missing {name}: {err}"))
        .read_to_string(&mut out)
        .expect("read entry");
    out
}

#[test]
fn build_epub_from_images_fills_the_missing_page() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let session = write_image_transcript(tmp.path());
    let profile = write_profile(tmp.path());
    let out = tmp.path().join("out");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pagebinder");
    cmd.args(["build", "--book-id", "b1", "--format", "epub", "--delay-ms", "0"])
        .arg("--out")
        .arg(&out)
        .arg("--session")
        .arg(&session)
        .arg("--profile")
        .arg(&profile)
        .assert()
        .success()
        .stdout(predicate::str::contains("Test Book.epub"));

    let epub = out.join("Test Book.epub");
    let mut archive = zip::ZipArchive::new(fs::File::open(&epub).expect("open epub")).expect("zip");
    assert!(archive.by_name("OEBPS/page-0005.xhtml").is_ok());
    assert!(archive.by_name("OEBPS/page-0006.xhtml").is_err());
    let blank = read_entry(&mut archive, "OEBPS/page-0004.xhtml");
    assert!(blank.contains("empty-page"));
    let cover = read_entry(&mut archive, "OEBPS/page-0001.xhtml");
    assert!(cover.contains("images/page-0001.jpg"));
    let nav = read_entry(&mut archive, "OEBPS/nav.xhtml");
    assert!(nav.contains("<a href=\"page-0002.xhtml\">Start</a>"));

    let store = out.join("b1");
    assert!(store.join("metadata.json").is_file());
    assert!(store.join("pages").join("4.jpg").is_file());
    let records = fs::read_to_string(store.join("harvest.jsonl")).expect("records");
    assert_eq!(records.lines().count(), 4);
}

#[test]
fn build_pdf_then_reassemble_from_the_store() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let session = write_image_transcript(tmp.path());
    let profile = write_profile(tmp.path());
    let out = tmp.path().join("out");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pagebinder");
    cmd.args([
        "build",
        "--book-id",
        "b1",
        "--skip-ocr",
        "--compress",
        "--delay-ms",
        "0",
    ])
    .arg("--out")
    .arg(&out)
    .arg("--session")
    .arg(&session)
    .arg("--profile")
    .arg(&profile)
    .assert()
    .success();

    let pdf = out.join("Test Book.pdf");
    let doc = lopdf::Document::load(&pdf).expect("load pdf");
    assert_eq!(doc.get_pages().len(), 5);
    assert!(out.join("Test Book compressed.pdf").is_file());

    fs::remove_file(&pdf).expect("remove pdf");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pagebinder");
    cmd.args(["build", "--book-id", "b1", "--skip-harvest", "--skip-ocr"])
        .arg("--out")
        .arg(&out)
        .arg("--profile")
        .arg(&profile)
        .assert()
        .success();
    let doc = lopdf::Document::load(&pdf).expect("load reassembled pdf");
    assert_eq!(doc.get_pages().len(), 5);
}

#[test]
fn text_books_become_epub_paragraphs() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let session = write_text_transcript(tmp.path());
    let profile = write_profile(tmp.path());
    let out = tmp.path().join("out");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pagebinder");
    cmd.args([
        "harvest", "--book-id", "b1", "--mode", "text", "--format", "epub", "--delay-ms", "0",
    ])
    .arg("--out")
    .arg(&out)
    .arg("--session")
    .arg(&session)
    .arg("--profile")
    .arg(&profile)
    .assert()
    .success()
    .stdout(predicate::str::contains("2 pages stored"));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pagebinder");
    cmd.args([
        "assemble", "--book-id", "b1", "--mode", "text", "--format", "epub", "--language", "por",
    ])
    .arg("--out")
    .arg(&out)
    .arg("--profile")
    .arg(&profile)
    .assert()
    .success();

    let epub = out.join("Test Book.epub");
    let mut archive = zip::ZipArchive::new(fs::File::open(&epub).expect("open epub")).expect("zip");
    let first = read_entry(&mut archive, "OEBPS/page-0001.xhtml");
    assert!(first.contains("<h2>CHAPTER ONE</h2>"));
    assert!(first.contains("<p>It was a bright cold day in April.</p>"));
    let opf = read_entry(&mut archive, "OEBPS/content.opf");
    assert!(opf.contains("<dc:language>pt</dc:language>"));
    assert!(opf.contains("<dc:creator>Ferris</dc:creator>"));
}

#[test]
fn pdf_requires_image_mode() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pagebinder");
    cmd.args(["build", "--book-id", "b1", "--mode", "text", "--format", "pdf"])
        .arg("--out")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--format pdf requires --mode images"));
}

#[test]
fn build_without_a_session_backend_fails() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pagebinder");
    cmd.args(["build", "--book-id", "b1"])
        .arg("--out")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--session"));
}

#[test]
fn assemble_without_stored_pages_fails() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pagebinder");
    cmd.args(["assemble", "--book-id", "b1", "--skip-ocr"])
        .arg("--out")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no stored pages"));
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pagebinder");
    cmd.env("RUST_LOG", "debug")
        .args(["assemble", "--book-id", "b1"])
        .arg("--out")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("parsed cli"));
}
