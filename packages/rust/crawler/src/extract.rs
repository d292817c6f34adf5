//! Content extraction: locate the substantive region of a documentation page.
//!
//! A source declares an ordered list of selector rules (one per page template
//! it uses). The first rule that matches a non-empty region wins; navigation,
//! scripts, edit links and denylisted elements are then stripped from it.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use kubedocs_shared::{ExtractionRule, HtmlSource, KubedocsError, Result};

/// Elements removed from every region regardless of source configuration.
const BASE_DENYLIST: &str =
    "script, style, noscript, nav, footer, iframe, .breadcrumb, .breadcrumbs, .edit-this-page";

static BASE_DENY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(BASE_DENYLIST).expect("valid selector"));
static ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("valid selector"));
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("valid selector"));
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));

/// The cleaned content region of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFragment {
    /// Cleaned inner HTML of the region.
    pub html: String,
    /// Page title: first `<h1>` in the region, else `<title>`, else the URL's last segment.
    pub title: String,
    /// Selector of the rule that matched.
    pub rule: String,
}

/// Compiled extraction rules for one source.
#[derive(Debug)]
pub struct Extractor {
    rules: Vec<(String, Selector)>,
    denylist: Vec<Selector>,
}

impl Extractor {
    /// Compile rules, tried in the given order, and denylist selectors.
    pub fn new(rules: &[ExtractionRule], denylist: &[String]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|r| Ok((r.selector.clone(), compile(&r.selector)?)))
            .collect::<Result<Vec<_>>>()?;

        let denylist = denylist
            .iter()
            .map(|s| compile(s))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules, denylist })
    }

    /// Build the extractor for an HTML source, rules by ascending priority.
    pub fn for_source(source: &HtmlSource) -> Result<Self> {
        Self::new(&source.ordered_rules(), &source.denylist)
    }

    /// Extract the cleaned content fragment from a full HTML document.
    #[instrument(skip_all, fields(url = %url))]
    pub fn extract(&self, html: &str, url: &Url) -> Result<ExtractedFragment> {
        let doc = Html::parse_document(html);

        for (source, selector) in &self.rules {
            let Some(region) = doc.select(selector).find(|el| has_text(el)) else {
                continue;
            };

            let title = region_title(&region)
                .or_else(|| document_title(&doc))
                .unwrap_or_else(|| title_from_url(url));
            let cleaned = self.clean(&region);

            debug!(rule = %source, bytes = cleaned.len(), "content region extracted");

            return Ok(ExtractedFragment {
                html: cleaned,
                title,
                rule: source.clone(),
            });
        }

        Err(KubedocsError::NoContentRegion {
            url: url.to_string(),
        })
    }

    /// Strip chrome from a region, returning its inner HTML.
    ///
    /// Only the outermost denied elements are removed; anything nested in
    /// one goes with it.
    fn clean(&self, region: &ElementRef) -> String {
        let mut result = region.inner_html();

        let denied: Vec<ElementRef> = region
            .select(&BASE_DENY_SEL)
            .chain(self.denylist.iter().flat_map(|sel| region.select(sel)))
            .chain(region.select(&ANCHOR_SEL).filter(is_edit_link))
            .collect();
        let denied_ids: HashSet<_> = denied.iter().map(|el| el.id()).collect();

        for el in &denied {
            if el.ancestors().any(|a| denied_ids.contains(&a.id())) {
                continue;
            }
            result = result.replace(&el.html(), "");
        }

        result.trim().to_string()
    }
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| KubedocsError::config(format!("invalid selector '{selector}': {e}")))
}

fn has_text(el: &ElementRef) -> bool {
    el.text().any(|t| !t.trim().is_empty())
}

/// "Edit this page" / "Create child page" style links.
fn is_edit_link(el: &ElementRef) -> bool {
    let text = el.text().collect::<String>().to_lowercase();
    let text = text.trim();
    text.starts_with("edit this page")
        || text.starts_with("create child page")
        || text.starts_with("create documentation issue")
        || text.starts_with("print entire section")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn region_title(region: &ElementRef) -> Option<String> {
    region
        .select(&H1_SEL)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

fn document_title(doc: &Html) -> Option<String> {
    doc.select(&TITLE_SEL)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

/// Last non-empty path segment, or the host for root URLs.
pub fn title_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
