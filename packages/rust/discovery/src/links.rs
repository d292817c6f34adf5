//! Navigation link extraction, URL normalization and scope filtering.

use std::collections::HashSet;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use kubedocs_shared::{CategoryRule, HtmlSource, KubedocsError, PageTask, Result, glob_to_regex};

/// Normalize a URL for deduplication: drop query and fragment, and strip the
/// trailing slash from any path other than `/`.
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_query(None);
    normalized.set_fragment(None);

    let path = normalized.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed }.to_string();
        normalized.set_path(&trimmed);
    }
    normalized
}

/// Compiled link discovery rules for one HTML source.
#[derive(Debug)]
pub struct LinkDiscoverer {
    source: String,
    link_selector: Selector,
    exclude: Vec<Regex>,
    category: CategoryRule,
}

impl LinkDiscoverer {
    /// Compile the link selector and exclude patterns of a source.
    pub fn for_source(name: &str, source: &HtmlSource) -> Result<Self> {
        let link_selector = Selector::parse(&source.link_selector).map_err(|e| {
            KubedocsError::config(format!(
                "source '{name}': invalid link selector '{}': {e}",
                source.link_selector
            ))
        })?;

        let exclude = source
            .exclude
            .iter()
            .map(|p| {
                glob_to_regex(p).ok_or_else(|| {
                    KubedocsError::config(format!("source '{name}': invalid exclude pattern '{p}'"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source: name.to_string(),
            link_selector,
            exclude,
            category: source.category.clone(),
        })
    }

    /// Whether `url` belongs to the documentation tree rooted at `root`.
    pub fn in_scope(&self, url: &Url, root: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        if url.origin() != root.origin() {
            return false;
        }

        let path = url.path();
        let with_slash = format!("{}/", path.trim_end_matches('/'));
        if self
            .exclude
            .iter()
            .any(|re| re.is_match(path) || re.is_match(&with_slash))
        {
            return false;
        }

        let base = root.path().trim_end_matches('/');
        base.is_empty() || path == base || path.starts_with(&format!("{base}/"))
    }

    /// Extract in-scope navigation links from `html`, in document order,
    /// normalized and deduplicated. Links already in `seen` are skipped; the
    /// caller decides which of the returned links to claim.
    ///
    /// `page_url` resolves relative hrefs; `root` bounds the scope.
    pub fn links_in(
        &self,
        html: &str,
        page_url: &Url,
        root: &Url,
        seen: &HashSet<Url>,
    ) -> Vec<Url> {
        let doc = Html::parse_document(html);
        let mut on_page = HashSet::new();
        let mut links = Vec::new();

        for el in doc.select(&self.link_selector) {
            let Some(href) = el.value().attr("href").map(str::trim) else {
                continue;
            };

            // Skip anchors, javascript:, mailto:
            if href.is_empty()
                || href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
            {
                continue;
            }

            let Ok(resolved) = page_url.join(href) else {
                debug!(href, "unresolvable link, skipping");
                continue;
            };
            let normalized = normalize_url(&resolved);

            if !self.in_scope(&normalized, root) {
                continue;
            }
            if !seen.contains(&normalized) && on_page.insert(normalized.clone()) {
                links.push(normalized);
            }
        }

        links
    }

    /// Turn URLs into page tasks, dropping pages that map to no category.
    pub fn tasks(&self, urls: Vec<Url>) -> Vec<PageTask> {
        urls.into_iter()
            .filter_map(|url| match self.category.category_for(url.path()) {
                Some(category) => Some(PageTask {
                    url,
                    source: self.source.clone(),
                    category,
                    title: None,
                }),
                None => {
                    debug!(%url, "no category for page, skipping");
                    None
                }
            })
            .collect()
    }
}
