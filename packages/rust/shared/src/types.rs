//! Core domain types shared by the discovery, crawl, and aggregation stages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{KubedocsError, Result};

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Topical grouping that decides which output file a page lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Setup,
    Concepts,
    Tasks,
    Tutorials,
    Reference,
    Changelog,
    Glossary,
}

impl Category {
    /// Every category, in artifact order.
    pub const ALL: [Category; 7] = [
        Category::Setup,
        Category::Concepts,
        Category::Tasks,
        Category::Tutorials,
        Category::Reference,
        Category::Changelog,
        Category::Glossary,
    ];

    /// Lowercase name, also used as the artifact file stem.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Concepts => "concepts",
            Self::Tasks => "tasks",
            Self::Tutorials => "tutorials",
            Self::Reference => "reference",
            Self::Changelog => "changelog",
            Self::Glossary => "glossary",
        }
    }

    /// Output file name for this category's Markdown artifact.
    pub fn file_name(self) -> String {
        format!("{}.md", self.as_str())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = KubedocsError;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| KubedocsError::parse(format!("unknown category '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// PageTask
// ---------------------------------------------------------------------------

/// One URL to fetch and process, created by link discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    /// Normalized page URL.
    pub url: Url,
    /// Name of the owning source.
    pub source: String,
    /// Destination category.
    pub category: Category,
    /// Title known before fetching (changelog entries), if any.
    pub title: Option<String>,
}

// ---------------------------------------------------------------------------
// Fetch results
// ---------------------------------------------------------------------------

/// Body of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Decoded text (HTML or Markdown).
    Text(String),
    /// Raw bytes (PDF and other binary resources).
    Binary(Vec<u8>),
}

impl Payload {
    /// Size of the payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The payload as text. Binary payloads are decoded lossily.
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Self::Text(s) => std::borrow::Cow::Borrowed(s),
            Self::Binary(b) => String::from_utf8_lossy(b),
        }
    }
}

/// A successfully fetched resource.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    /// URL that was requested.
    pub url: Url,
    /// URL after redirects; relative links resolve against this.
    pub final_url: Url,
    /// `Content-Type` header, if the server sent one.
    pub content_type: Option<String>,
    /// Response body.
    pub payload: Payload,
    /// Number of attempts it took (1 = no retries).
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// A page that was skipped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageFailure {
    /// Page URL.
    pub url: String,
    /// Stable error kind label (see [`KubedocsError::kind`]).
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
}

impl PageFailure {
    /// Record a page-level error.
    pub fn new(url: impl Into<String>, err: &KubedocsError) -> Self {
        Self {
            url: url.into(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Outcome of processing a single source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceOutcome {
    /// Source name.
    pub source: String,
    /// Number of pages discovered.
    pub pages_discovered: usize,
    /// Number of pages that made it into an artifact.
    pub pages_succeeded: usize,
    /// Per-page failures, in discovery order.
    pub failures: Vec<PageFailure>,
    /// Source-level failure message, if the whole source was skipped.
    pub source_error: Option<String>,
}

/// Metadata for a written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Path relative to the output directory.
    pub path: String,
    /// SHA-256 of the file contents.
    pub sha256: String,
    /// File size in bytes.
    pub size_bytes: usize,
    /// Number of pages concatenated into the file (1 for binaries).
    pub pages: usize,
}

/// Final report of a pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// One entry per configured source, in configuration order.
    pub sources: Vec<SourceOutcome>,
    /// Artifacts written to disk.
    pub artifacts: Vec<ArtifactRecord>,
}

impl RunReport {
    /// Total pages that were processed successfully.
    pub fn pages_succeeded(&self) -> usize {
        self.sources.iter().map(|s| s.pages_succeeded).sum()
    }

    /// All per-page failures across sources.
    pub fn page_failures(&self) -> impl Iterator<Item = &PageFailure> {
        self.sources.iter().flat_map(|s| s.failures.iter())
    }

    /// Sources that were skipped entirely.
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|s| s.source_error.is_some())
    }

    /// Whether the run should be reported as failed.
    ///
    /// Any source-level failure fails the run. Page failures only count when a
    /// tolerance is configured and exceeded.
    pub fn is_failure(&self, failure_tolerance: Option<usize>) -> bool {
        if self.failed_sources().next().is_some() {
            return true;
        }
        match failure_tolerance {
            Some(limit) => self.page_failures().count() > limit,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_roundtrip() {
        for category in Category::ALL {
            let parsed: Category = category.as_str().parse().expect("parse category");
            assert_eq!(parsed, category);
        }
        assert_eq!("Concepts".parse::<Category>().unwrap(), Category::Concepts);
        assert!("blog".parse::<Category>().is_err());
    }

    #[test]
    fn category_serializes_lowercase() {
        let json = serde_json::to_string(&Category::Tutorials).expect("serialize");
        assert_eq!(json, "\"tutorials\"");
        assert_eq!(Category::Setup.file_name(), "setup.md");
    }

    fn outcome(source_error: Option<&str>, failures: usize) -> SourceOutcome {
        SourceOutcome {
            source: "kubernetes".into(),
            pages_discovered: 3,
            pages_succeeded: 3 - failures,
            failures: (0..failures)
                .map(|i| PageFailure {
                    url: format!("https://example.com/{i}"),
                    kind: "fetch_failed".into(),
                    message: "HTTP 404".into(),
                })
                .collect(),
            source_error: source_error.map(String::from),
        }
    }

    #[test]
    fn page_failures_do_not_fail_run_without_tolerance() {
        let report = RunReport {
            sources: vec![outcome(None, 2)],
            artifacts: vec![],
        };
        assert!(!report.is_failure(None));
        assert!(report.is_failure(Some(1)));
        assert!(!report.is_failure(Some(2)));
        assert_eq!(report.pages_succeeded(), 1);
    }

    #[test]
    fn source_failure_fails_run() {
        let report = RunReport {
            sources: vec![outcome(None, 0), outcome(Some("root page HTTP 500"), 0)],
            artifacts: vec![],
        };
        assert!(report.is_failure(None));
        assert_eq!(report.failed_sources().count(), 1);
    }
}
