//! Versioned changelog discovery.
//!
//! The stable release marker (e.g. `v1.31.2`) gives the newest minor version;
//! one changelog page is generated per minor version down to the configured
//! floor.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use kubedocs_shared::{ChangelogSource, KubedocsError, PageTask, Result};

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v?(\d+)\.(\d+)(?:\.\d+)?").expect("valid regex"));

/// Parse a stable release marker into `(major, minor)`.
pub fn parse_stable_version(marker: &str) -> Result<(u32, u32)> {
    let marker = marker.trim();
    let caps = VERSION_RE
        .captures(marker)
        .ok_or_else(|| KubedocsError::parse(format!("unrecognized release marker '{marker}'")))?;

    let major = caps[1]
        .parse()
        .map_err(|_| KubedocsError::parse(format!("invalid major version in '{marker}'")))?;
    let minor = caps[2]
        .parse()
        .map_err(|_| KubedocsError::parse(format!("invalid minor version in '{marker}'")))?;
    Ok((major, minor))
}

/// Generate changelog page tasks, newest first.
pub fn changelog_tasks(
    name: &str,
    source: &ChangelogSource,
    major: u32,
    minor: u32,
) -> Result<Vec<PageTask>> {
    if minor < source.min_minor {
        return Ok(Vec::new());
    }

    (source.min_minor..=minor)
        .rev()
        .map(|m| {
            let raw = source
                .url_template
                .replace("{major}", &major.to_string())
                .replace("{minor}", &m.to_string());
            let url = Url::parse(&raw).map_err(|e| {
                KubedocsError::discovery(name, format!("invalid changelog URL '{raw}': {e}"))
            })?;
            Ok(PageTask {
                url,
                source: name.to_string(),
                category: source.category,
                title: Some(format!("Kubernetes v{major}.{m}")),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubedocs_shared::Category;

    fn source() -> ChangelogSource {
        ChangelogSource {
            stable_url: "https://dl.k8s.io/release/stable.txt".into(),
            url_template: "https://example.com/CHANGELOG-{major}.{minor}.md".into(),
            min_minor: 9,
            category: Category::Changelog,
        }
    }

    #[test]
    fn parses_markers() {
        assert_eq!(parse_stable_version("v1.31.2\n").unwrap(), (1, 31));
        assert_eq!(parse_stable_version("1.28").unwrap(), (1, 28));
        assert_eq!(parse_stable_version("garbage").unwrap_err().kind(), "parse");
    }

    #[test]
    fn tasks_newest_first() {
        let tasks = changelog_tasks("changelog", &source(), 1, 11).unwrap();
        let urls: Vec<&str> = tasks.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/CHANGELOG-1.11.md",
                "https://example.com/CHANGELOG-1.10.md",
                "https://example.com/CHANGELOG-1.9.md",
            ]
        );
        assert_eq!(tasks[0].title.as_deref(), Some("Kubernetes v1.11"));
        assert!(tasks.iter().all(|t| t.category == Category::Changelog));
    }

    #[test]
    fn below_floor_yields_nothing() {
        assert!(changelog_tasks("changelog", &source(), 1, 8).unwrap().is_empty());
    }
}
