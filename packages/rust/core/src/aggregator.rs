//! Category aggregation and artifact writing.
//!
//! Converted pages are collected into one bucket per category, in the order
//! they are added, and written out as one Markdown file per category on
//! every run, so no file survives from an earlier run. Binary resources
//! bypass the buckets and are written verbatim.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use kubedocs_shared::{ArtifactRecord, Category, KubedocsError, Result};

/// Name of the manifest written next to the artifacts.
pub const MANIFEST_FILE: &str = "manifest.json";

/// One converted page, ready to be appended to its category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    /// Page title, used for the section heading.
    pub title: String,
    /// Page URL, recorded as the page source.
    pub url: String,
    /// Markdown body.
    pub markdown: String,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    artifacts: &'a [ArtifactRecord],
}

/// Accumulates pages and binaries for one run.
#[derive(Debug)]
pub struct Aggregator {
    title: String,
    buckets: BTreeMap<Category, Vec<PageEntry>>,
    binaries: Vec<(String, Vec<u8>)>,
}

impl Aggregator {
    /// Create an empty aggregator. `title` prefixes every category header.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            buckets: BTreeMap::new(),
            binaries: Vec::new(),
        }
    }

    /// Append a page to the end of its category bucket.
    pub fn add_page(&mut self, category: Category, page: PageEntry) {
        self.buckets.entry(category).or_default().push(page);
    }

    /// Queue a binary payload for `dest`, relative to the output directory.
    pub fn add_binary(&mut self, dest: impl Into<String>, bytes: Vec<u8>) {
        self.binaries.push((dest.into(), bytes));
    }

    /// Number of pages collected for `category`.
    pub fn page_count(&self, category: Category) -> usize {
        self.buckets.get(&category).map_or(0, Vec::len)
    }

    /// Render the Markdown document for one category. An empty category
    /// renders as its header alone.
    pub fn render(&self, category: Category) -> String {
        let mut doc = format!("# {}: {}\n", self.title, category);
        for page in self.buckets.get(&category).into_iter().flatten() {
            doc.push('\n');
            doc.push_str(&render_page(page));
        }
        doc
    }

    /// Write every artifact plus `manifest.json` under `out_dir`.
    ///
    /// Every category file is written, empty or not, in category order; then
    /// binaries in the order they were added. Existing files are overwritten
    /// atomically.
    #[instrument(skip_all, fields(out_dir = %out_dir.display()))]
    pub fn write(&self, out_dir: &Path) -> Result<Vec<ArtifactRecord>> {
        std::fs::create_dir_all(out_dir).map_err(|e| KubedocsError::io(out_dir, e))?;

        let mut records = Vec::new();

        for category in Category::ALL {
            let doc = self.render(category);
            let rel = category.file_name();
            write_atomic(&out_dir.join(&rel), doc.as_bytes())?;
            records.push(record(rel, doc.as_bytes(), self.page_count(category)));
        }

        for (dest, bytes) in &self.binaries {
            let target = safe_join(out_dir, dest)?;
            write_atomic(&target, bytes)?;
            records.push(record(dest.clone(), bytes, 1));
        }

        let manifest = serde_json::to_string_pretty(&Manifest {
            artifacts: &records,
        })
        .map_err(|e| KubedocsError::validation(format!("JSON serialization failed: {e}")))?;
        write_atomic(&out_dir.join(MANIFEST_FILE), format!("{manifest}\n").as_bytes())?;

        info!(artifacts = records.len(), "artifacts written");
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Render one page: title heading, source line, then the body without its
/// own leading title heading.
fn render_page(page: &PageEntry) -> String {
    let body = strip_title_heading(&page.markdown, &page.title);
    let body = body.trim_matches('\n');

    let mut out = format!("## {}\n\nPage Source: {}\n", page.title, page.url);
    if !body.is_empty() {
        out.push('\n');
        out.push_str(body);
        out.push('\n');
    }
    out
}

/// Drop a leading `# <title>` line when it repeats the page title.
fn strip_title_heading<'a>(markdown: &'a str, title: &str) -> &'a str {
    let trimmed = markdown.trim_start_matches('\n');
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));

    match first.strip_prefix("# ") {
        Some(heading) if heading.trim() == title.trim() => rest,
        _ => trimmed,
    }
}

fn record(path: String, bytes: &[u8], pages: usize) -> ArtifactRecord {
    let mut hasher = Sha256::new();
    hasher.update(bytes);

    ArtifactRecord {
        path,
        sha256: format!("{:x}", hasher.finalize()),
        size_bytes: bytes.len(),
        pages,
    }
}

/// Join a relative destination onto `base`, rejecting anything that could
/// escape it.
fn safe_join(base: &Path, dest: &str) -> Result<std::path::PathBuf> {
    let rel = Path::new(dest);
    if rel.as_os_str().is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(KubedocsError::validation(format!(
            "binary destination must be a relative path: '{dest}'"
        )));
    }
    Ok(base.join(rel))
}

/// Write to a temp file next to `target`, then rename over it.
fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| KubedocsError::io(parent, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, bytes).map_err(|e| KubedocsError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| KubedocsError::io(target, e))?;

    debug!(path = %target.display(), size = bytes.len(), "wrote artifact");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
