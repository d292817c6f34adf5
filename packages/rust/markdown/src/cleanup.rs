//! Post-conversion cleanup pipeline for Markdown output.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! Passes that rewrite prose leave fenced code blocks untouched.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: &Url) -> String {
    let mut result = md.to_string();

    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = resolve_links(&result, base_url);
    result = normalize_whitespace(&result);
    result = collapse_blank_lines(&result);
    result = ensure_trailing_newline(&result);

    result
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Apply `f` to every line outside fenced code blocks.
fn map_prose_lines(md: &str, f: impl Fn(&str) -> String) -> String {
    let mut in_code_block = false;
    md.lines()
        .map(|line| {
            if is_fence(line) {
                in_code_block = !in_code_block;
                return line.to_string();
            }
            if in_code_block {
                line.to_string()
            } else {
                f(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 1: Fix code block language hints
// ---------------------------------------------------------------------------

/// Strip class-style prefixes from fence language hints.
///
/// Handles patterns like `language-js`, `lang-python`, `highlight-rust`.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^(\s*)```(?:language-|lang-|highlight-)([\w+-]+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "$1```$2").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove stray layout tags that survived the conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary)(?:\s[^>]*)?>").expect("valid regex")
    });

    map_prose_lines(md, |line| HTML_TAG_RE.replace_all(line, "").to_string())
}

// ---------------------------------------------------------------------------
// Pass 3: Resolve relative links
// ---------------------------------------------------------------------------

/// Resolve relative link and image targets against the page URL.
///
/// Absolute URLs and same-page anchors are left as they are.
fn resolve_links(md: &str, base: &Url) -> String {
    static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\]\(([^)\s]+)((?:\s+[^)]*)?)\)").expect("valid regex")
    });

    map_prose_lines(md, |line| {
        LINK_RE
            .replace_all(line, |caps: &regex::Captures| {
                let href = &caps[1];
                let rest = &caps[2];

                if href.starts_with('#') || Url::parse(href).is_ok() {
                    return caps[0].to_string();
                }

                match base.join(href) {
                    Ok(resolved) => format!("]({resolved}{rest})"),
                    Err(_) => caps[0].to_string(),
                }
            })
            .to_string()
    })
}

// ---------------------------------------------------------------------------
// Pass 4: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 5: Collapse blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines to a single one and drop leading blanks.
/// Blank lines inside fenced code blocks are content and are kept.
fn collapse_blank_lines(md: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut in_code_block = false;

    for line in md.lines() {
        if is_fence(line) {
            in_code_block = !in_code_block;
        } else if !in_code_block
            && line.is_empty()
            && lines.last().is_none_or(|prev| prev.is_empty())
        {
            continue;
        }
        lines.push(line);
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 6: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the text ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
