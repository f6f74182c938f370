use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::browser::{
    BrowserSession, NetworkRequest, RequestPattern, SessionConfig, SessionLauncher,
};
use crate::error::SessionError;

/// A recorded reader session, stored as YAML (or JSON).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default = "default_authenticated")]
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    /// Requests visible after every reader navigation (book API responses).
    #[serde(default)]
    pub ambient: Vec<RecordedRequest>,
    #[serde(default)]
    pub pages: Vec<TranscriptPage>,
    #[serde(default)]
    pub resources: Vec<TranscriptResource>,
}

fn default_authenticated() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptPage {
    pub position: u32,
    pub label: String,
    #[serde(default)]
    pub requests: Vec<RecordedRequest>,
    /// Loader checks answered "active" after each visit.
    #[serde(default)]
    pub loader_polls: u32,
    /// Leading visits during which the page's requests never show up.
    #[serde(default)]
    pub failed_visits: u32,
    #[serde(default)]
    pub next_disabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub url: String,
    #[serde(flatten)]
    pub body: RecordedBody,
}

/// A response served when `url` is opened; successive opens walk through
/// `responses` and repeat the last one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptResource {
    pub url: String,
    #[serde(default)]
    pub responses: Vec<RecordedBody>,
}

/// At most one of the fields is expected; none means "no response yet".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
    /// Path relative to the transcript file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_file: Option<PathBuf>,
}

impl RecordedBody {
    fn load(&self, base_dir: &Path) -> anyhow::Result<Option<Vec<u8>>> {
        if let Some(text) = &self.body {
            return Ok(Some(text.as_bytes().to_vec()));
        }
        if let Some(encoded) = &self.body_base64 {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .context("decode base64 body")?;
            return Ok(Some(bytes));
        }
        if let Some(rel) = &self.body_file {
            let path = base_dir.join(rel);
            let bytes =
                std::fs::read(&path).with_context(|| format!("read body: {}", path.display()))?;
            return Ok(Some(bytes));
        }
        Ok(None)
    }
}

#[derive(Debug)]
struct ReplayPage {
    label: String,
    requests: Vec<NetworkRequest>,
    loader_polls: u32,
    failed_visits: u32,
    next_disabled: bool,
}

/// Replays a [`Transcript`] as a [`BrowserSession`].
#[derive(Debug)]
pub struct TranscriptSession {
    authenticated: bool,
    total_pages: Option<u32>,
    ambient: Vec<NetworkRequest>,
    pages: BTreeMap<u32, ReplayPage>,
    resources: HashMap<String, Vec<Option<Vec<u8>>>>,
    current: Option<u32>,
    visits: HashMap<u32, u32>,
    opens: HashMap<String, usize>,
    loader_remaining: u32,
    log: Vec<NetworkRequest>,
    closed: bool,
}

impl TranscriptSession {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read transcript: {}", path.display()))?;
        let transcript: Transcript = serde_yaml::from_str(&contents)
            .with_context(|| format!("parse transcript: {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_transcript(transcript, base_dir)
    }

    pub fn from_transcript(transcript: Transcript, base_dir: &Path) -> anyhow::Result<Self> {
        let ambient = load_requests(&transcript.ambient, base_dir).context("load ambient requests")?;

        let mut pages = BTreeMap::new();
        for page in transcript.pages {
            let requests = load_requests(&page.requests, base_dir)
                .with_context(|| format!("load requests for position {}", page.position))?;
            pages.insert(
                page.position,
                ReplayPage {
                    label: page.label,
                    requests,
                    loader_polls: page.loader_polls,
                    failed_visits: page.failed_visits,
                    next_disabled: page.next_disabled,
                },
            );
        }

        let mut resources = HashMap::new();
        for resource in transcript.resources {
            let responses = resource
                .responses
                .iter()
                .map(|body| body.load(base_dir))
                .collect::<anyhow::Result<Vec<_>>>()
                .with_context(|| format!("load resource: {}", resource.url))?;
            resources.insert(resource.url, responses);
        }

        Ok(Self {
            authenticated: transcript.authenticated,
            total_pages: transcript.total_pages,
            ambient,
            pages,
            resources,
            current: None,
            visits: HashMap::new(),
            opens: HashMap::new(),
            loader_remaining: 0,
            log: Vec::new(),
            closed: false,
        })
    }

    /// Number of reader navigations to `position` so far.
    pub fn visits(&self, position: u32) -> u32 {
        self.visits.get(&position).copied().unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn current_page(&self) -> Option<&ReplayPage> {
        self.current.and_then(|position| self.pages.get(&position))
    }
}

fn load_requests(
    requests: &[RecordedRequest],
    base_dir: &Path,
) -> anyhow::Result<Vec<NetworkRequest>> {
    requests
        .iter()
        .map(|request| {
            Ok(NetworkRequest {
                url: request.url.clone(),
                body: request.body.load(base_dir)?,
            })
        })
        .collect()
}

impl BrowserSession for TranscriptSession {
    fn ensure_authenticated(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        if !self.authenticated {
            return Err(SessionError::Unauthenticated(
                "transcript records a logged-out session".to_owned(),
            ));
        }
        Ok(())
    }

    fn advance_to(&mut self, position: u32) -> Result<(), SessionError> {
        self.ensure_open()?;
        let visit = {
            let visits = self.visits.entry(position).or_insert(0);
            *visits += 1;
            *visits
        };
        self.current = Some(position);
        self.log.extend(self.ambient.iter().cloned());

        let Some(page) = self.pages.get(&position) else {
            self.loader_remaining = 0;
            return Err(SessionError::Navigation(format!(
                "transcript has no page at position {position}"
            )));
        };
        self.loader_remaining = page.loader_polls;
        if visit > page.failed_visits {
            self.log.extend(page.requests.iter().cloned());
        }
        Ok(())
    }

    fn open(&mut self, url: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        let Some(responses) = self.resources.get(url) else {
            return Err(SessionError::Navigation(format!(
                "transcript has no resource at {url}"
            )));
        };
        let opened = self.opens.entry(url.to_owned()).or_insert(0);
        let body = responses
            .get(*opened)
            .or_else(|| responses.last())
            .cloned()
            .flatten();
        *opened += 1;
        self.log.push(NetworkRequest {
            url: url.to_owned(),
            body,
        });
        Ok(())
    }

    fn current_page_label(&mut self) -> Result<Option<String>, SessionError> {
        self.ensure_open()?;
        Ok(self.current_page().map(|page| page.label.clone()))
    }

    fn total_pages(&mut self) -> Result<Option<u32>, SessionError> {
        self.ensure_open()?;
        Ok(self.total_pages)
    }

    fn requests_matching(
        &mut self,
        pattern: &RequestPattern,
    ) -> Result<Vec<NetworkRequest>, SessionError> {
        self.ensure_open()?;
        Ok(self
            .log
            .iter()
            .filter(|request| pattern.matches(&request.url))
            .cloned()
            .collect())
    }

    fn clear_requests(&mut self) {
        self.log.clear();
    }

    fn is_loader_active(&mut self) -> bool {
        if self.loader_remaining > 0 {
            self.loader_remaining -= 1;
            return true;
        }
        false
    }

    fn is_next_disabled(&mut self) -> bool {
        self.current_page().is_none_or(|page| page.next_disabled)
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.closed = true;
        Ok(())
    }
}

/// Launches [`TranscriptSession`]s from `--session`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TranscriptLauncher;

impl SessionLauncher for TranscriptLauncher {
    fn launch(&self, config: &SessionConfig) -> anyhow::Result<Box<dyn BrowserSession>> {
        let Some(path) = config.transcript.as_deref() else {
            anyhow::bail!("no browser backend configured; pass --session <transcript>");
        };
        if let Some(exe) = &config.browser_exe {
            tracing::warn!(
                browser_exe = %exe.display(),
                "browser executable is ignored when replaying a transcript"
            );
        }
        tracing::info!(transcript = %path.display(), "replaying reader transcript");
        let session = TranscriptSession::load(path)?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> Transcript {
        Transcript {
            authenticated: true,
            total_pages: Some(2),
            ambient: vec![RecordedRequest {
                url: "https://api.test/books/b1/toc".to_owned(),
                body: RecordedBody {
                    body: Some("[]".to_owned()),
                    ..RecordedBody::default()
                },
            }],
            pages: vec![TranscriptPage {
                position: 1,
                label: "1".to_owned(),
                requests: vec![RecordedRequest {
                    url: "https://api.test/books/b1/images/p1/800".to_owned(),
                    body: RecordedBody::default(),
                }],
                loader_polls: 1,
                failed_visits: 1,
                next_disabled: true,
            }],
            resources: vec![TranscriptResource {
                url: "https://api.test/books/b1/images/p1/2000".to_owned(),
                responses: vec![
                    RecordedBody {
                        body_base64: Some("AAE=".to_owned()),
                        ..RecordedBody::default()
                    },
                    RecordedBody {
                        body: Some("full".to_owned()),
                        ..RecordedBody::default()
                    },
                ],
            }],
        }
    }

    #[test]
    fn failed_visits_hide_requests_until_revisited() -> anyhow::Result<()> {
        let mut session = TranscriptSession::from_transcript(transcript(), Path::new("."))?;
        let images = RequestPattern::Prefix("https://api.test/books/b1/images/".to_owned());

        session.advance_to(1)?;
        assert!(session.is_loader_active());
        assert!(!session.is_loader_active());
        assert!(session.requests_matching(&images)?.is_empty());

        session.clear_requests();
        session.advance_to(1)?;
        assert_eq!(session.requests_matching(&images)?.len(), 1);
        assert_eq!(session.visits(1), 2);
        assert_eq!(session.current_page_label()?, Some("1".to_owned()));
        assert!(session.is_next_disabled());
        Ok(())
    }

    #[test]
    fn resources_walk_through_responses() -> anyhow::Result<()> {
        let mut session = TranscriptSession::from_transcript(transcript(), Path::new("."))?;
        let url = "https://api.test/books/b1/images/p1/2000";
        let pattern = RequestPattern::Exact(url.to_owned());

        session.open(url)?;
        assert_eq!(
            session.requests_matching(&pattern)?[0].body,
            Some(vec![0, 1])
        );
        for _ in 0..2 {
            session.clear_requests();
            session.open(url)?;
            assert_eq!(
                session.requests_matching(&pattern)?[0].body,
                Some(b"full".to_vec())
            );
        }
        Ok(())
    }

    #[test]
    fn closed_session_rejects_navigation() -> anyhow::Result<()> {
        let mut session = TranscriptSession::from_transcript(transcript(), Path::new("."))?;
        session.close()?;
        assert!(matches!(session.advance_to(1), Err(SessionError::Closed)));
        Ok(())
    }

    #[test]
    fn parses_yaml_transcripts() -> anyhow::Result<()> {
        let yaml = r#"
total_pages: 3
pages:
  - position: 0
    label: Cover
    requests:
      - url: https://api.test/books/b1/images/c/800
"#;
        let parsed: Transcript = serde_yaml::from_str(yaml)?;
        assert!(parsed.authenticated);
        assert_eq!(parsed.pages[0].label, "Cover");
        assert!(parsed.pages[0].requests[0].body.body.is_none());
        Ok(())
    }
}
