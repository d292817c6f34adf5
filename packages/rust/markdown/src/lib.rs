//! HTML-to-Markdown conversion and cleanup passes.
//!
//! Converts extracted content fragments to Markdown using the `htmd` crate,
//! then applies cleanup passes for code fence languages, stray tags, link
//! resolution and blank-line normalization.

mod cleanup;

use std::sync::LazyLock;

use htmd::HtmlToMarkdown;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use kubedocs_shared::{KubedocsError, Result};

/// Tags dropped entirely during conversion.
const SKIP_TAGS: [&str; 6] = ["script", "style", "nav", "iframe", "noscript", "svg"];

/// Placeholder text standing in for a pre-rendered table while `htmd` runs.
const TABLE_TOKEN: &str = "KUBEDOCSTABLE";

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static NESTED_TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table table").expect("valid selector"));
static TR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td").expect("valid selector"));

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of converting a fragment to Markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertResult {
    /// Cleaned Markdown, ending with a single newline.
    pub markdown: String,
    /// Approximate word count, excluding code blocks.
    pub word_count: usize,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert an extracted HTML fragment to Markdown.
///
/// `page_url` is the URL the page was served from; relative links resolve
/// against it. Fragments with tables nested inside tables fail with
/// `ConversionFailed` instead of producing garbled tables.
#[instrument(skip_all, fields(url = %page_url))]
pub fn convert(fragment: &str, page_url: &Url) -> Result<ConvertResult> {
    // Re-serialize once so table markup can be matched textually below.
    let normalized = Html::parse_fragment(fragment).root_element().inner_html();
    let doc = Html::parse_fragment(&normalized);

    if doc.select(&NESTED_TABLE_SEL).next().is_some() {
        return Err(KubedocsError::conversion(
            page_url.as_str(),
            "nested table markup",
        ));
    }

    let converter = HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();
    let to_markdown = |html: &str| {
        converter.convert(html).map_err(|e| {
            KubedocsError::conversion(page_url.as_str(), format!("htmd conversion failed: {e}"))
        })
    };

    let (html, tables) = extract_tables(&doc, &normalized, &to_markdown)?;
    let mut raw_markdown = to_markdown(&html)?;

    for (i, table) in tables.iter().enumerate() {
        raw_markdown = raw_markdown.replacen(&table_token(i), table, 1);
    }
    debug!(raw_len = raw_markdown.len(), tables = tables.len(), "htmd conversion complete");

    let markdown = cleanup::run_pipeline(&raw_markdown, page_url);
    let word_count = count_words(&markdown);

    Ok(ConvertResult {
        markdown,
        word_count,
    })
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

fn table_token(i: usize) -> String {
    format!("{TABLE_TOKEN}{i}X")
}

/// Swap every `<table>` for a placeholder paragraph and render the tables
/// to Markdown separately.
///
/// `htmd` 0.1 doesn't support table conversion, so we handle it manually.
/// Cell contents still go through `to_markdown` so links and inline code
/// survive.
fn extract_tables(
    doc: &Html,
    html: &str,
    to_markdown: &impl Fn(&str) -> Result<String>,
) -> Result<(String, Vec<String>)> {
    let mut result = html.to_string();
    let mut tables = Vec::new();

    for table_el in doc.select(&TABLE_SEL) {
        let token = table_token(tables.len());
        result = result.replacen(&table_el.html(), &format!("<p>{token}</p>"), 1);
        tables.push(html_table_to_markdown(&table_el, to_markdown)?);
    }

    Ok((result, tables))
}

/// Convert a single HTML table element to a Markdown table.
///
/// The first row is the header row whether or not it uses `<th>` cells.
fn html_table_to_markdown(
    table: &ElementRef,
    to_markdown: &impl Fn(&str) -> Result<String>,
) -> Result<String> {
    let mut rows = Vec::new();
    for tr in table.select(&TR_SEL) {
        let cells = tr
            .select(&CELL_SEL)
            .map(|cell| Ok(cell_markdown(&to_markdown(&cell.inner_html())?)))
            .collect::<Result<Vec<_>>>()?;
        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return Ok(String::new());
    }

    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let render = |row: &[String]| format!("| {} |", row.join(" | "));
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(render(&rows[0]));
    lines.push(render(&vec!["---".to_string(); col_count]));
    lines.extend(rows[1..].iter().map(|row| render(row)));

    Ok(lines.join("\n"))
}

/// Converted cell Markdown on one line, with pipes escaped.
fn cell_markdown(markdown: &str) -> String {
    markdown
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Count words in Markdown, excluding fenced code blocks.
fn count_words(md: &str) -> usize {
    static CODE_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

    let without_code = CODE_BLOCK_RE.replace_all(md, "");
    without_code
        .split_whitespace()
        .filter(|w| !w.chars().all(|c| c == '#' || c == '|' || c == '-'))
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
