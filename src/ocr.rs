use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Command;

use anyhow::Context as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrConfig {
    /// `ocrmypdf` executable.
    pub program: String,
    /// Tesseract language code(s), e.g. `eng` or `eng+por`.
    pub language: String,
    pub jobs: u32,
}

impl OcrConfig {
    pub fn new(program: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            language: language.into(),
            jobs: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrOutcome {
    Applied,
    /// The OCR tool is not installed; the input was left untouched.
    Unavailable,
}

/// Adds a text layer to `input`, writing a PDF/A to `output`.
pub fn run(config: &OcrConfig, input: &Path, output: &Path, title: &str) -> anyhow::Result<OcrOutcome> {
    tracing::info!(
        program = %config.program,
        language = %config.language,
        input = %input.display(),
        "running ocr"
    );

    let args = build_ocr_args(config, input, output, title);
    let result = match Command::new(&config.program).args(&args).output() {
        Ok(result) => result,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(
                program = %config.program,
                "ocr tool not found; continuing without a text layer"
            );
            return Ok(OcrOutcome::Unavailable);
        }
        Err(err) => return Err(err).with_context(|| format!("run ocr: {}", config.program)),
    };

    if !result.status.success() {
        anyhow::bail!(
            "{} failed ({}): {}",
            config.program,
            result.status,
            String::from_utf8_lossy(&result.stderr)
        );
    }
    Ok(OcrOutcome::Applied)
}

fn build_ocr_args(config: &OcrConfig, input: &Path, output: &Path, title: &str) -> Vec<OsString> {
    let mut args = Vec::new();
    args.push(OsString::from("-l"));
    args.push(OsString::from(&config.language));
    args.push(OsString::from("--title"));
    args.push(OsString::from(title));
    args.push(OsString::from("--jobs"));
    args.push(OsString::from(config.jobs.to_string()));
    args.push(OsString::from("--output-type"));
    args.push(OsString::from("pdfa"));
    args.push(input.as_os_str().to_owned());
    args.push(output.as_os_str().to_owned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builds_ocrmypdf_arguments() {
        let config = OcrConfig::new("ocrmypdf", "eng+por");
        let args = build_ocr_args(&config, Path::new("raw.pdf"), Path::new("out.pdf"), "My Book");
        let args = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(
            args,
            vec![
                "-l",
                "eng+por",
                "--title",
                "My Book",
                "--jobs",
                "4",
                "--output-type",
                "pdfa",
                "raw.pdf",
                "out.pdf",
            ]
        );
    }

    #[test]
    fn missing_tool_is_not_an_error() -> anyhow::Result<()> {
        let config = OcrConfig::new("pagebinder-no-such-ocr-tool", "eng");
        let outcome = run(&config, Path::new("in.pdf"), Path::new("out.pdf"), "t")?;
        assert_eq!(outcome, OcrOutcome::Unavailable);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_is_an_error() {
        let config = OcrConfig::new("false", "eng");
        assert!(run(&config, Path::new("in.pdf"), Path::new("out.pdf"), "t").is_err());
    }
}
