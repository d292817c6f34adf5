//! Link discovery for documentation sources.
//!
//! HTML sources are walked from their root pages by following navigation
//! links; changelog sources are enumerated from the current stable release.
//! Both produce an ordered, deduplicated list of [`PageTask`]s.

mod changelog;
mod links;

use std::collections::HashSet;
use std::time::Duration;

use kubedocs_crawler::Fetcher;
use kubedocs_shared::{ChangelogSource, HtmlSource, KubedocsError, PageTask, Result, Traversal};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use changelog::{changelog_tasks, parse_stable_version};
pub use links::{LinkDiscoverer, normalize_url};

// ---------------------------------------------------------------------------
// HTML sources
// ---------------------------------------------------------------------------

/// Discover the pages of an HTML source.
///
/// Every root is fetched and its navigation links collected according to the
/// source's traversal mode. A root that cannot be fetched, or that yields no
/// links, fails the whole source with `SourceDiscoveryFailed`.
#[instrument(skip_all, fields(source = %name))]
pub async fn discover_html(
    name: &str,
    source: &HtmlSource,
    fetcher: &Fetcher,
    delay: Duration,
) -> Result<Vec<PageTask>> {
    let discoverer = LinkDiscoverer::for_source(name, source)?;
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for raw in &source.roots {
        let entry = Url::parse(raw)
            .map_err(|e| KubedocsError::discovery(name, format!("invalid root '{raw}': {e}")))?;
        let root = normalize_url(&entry);

        let found = match source.traversal {
            Traversal::Single => claim(vec![root.clone()], None, &mut seen),
            Traversal::Index => {
                index_links(
                    name,
                    &discoverer,
                    &entry,
                    &root,
                    fetcher,
                    &mut seen,
                    source.max_pages_per_root,
                )
                .await?
            }
            Traversal::Recursive { max_depth } => {
                recursive_links(
                    name,
                    &discoverer,
                    &entry,
                    &root,
                    fetcher,
                    &mut seen,
                    max_depth,
                    source.max_pages_per_root,
                    delay,
                )
                .await?
            }
        };

        debug!(root = %root, links = found.len(), "root discovered");
        urls.extend(found);
    }

    let tasks = discoverer.tasks(urls);
    info!(pages = tasks.len(), "discovery complete");
    Ok(tasks)
}

/// Fetch the root page at `entry` and claim up to `max_pages` links in scope
/// of `root`. Zero links is a failure.
async fn index_links(
    name: &str,
    discoverer: &LinkDiscoverer,
    entry: &Url,
    root: &Url,
    fetcher: &Fetcher,
    seen: &mut HashSet<Url>,
    max_pages: Option<usize>,
) -> Result<Vec<Url>> {
    let resource = fetcher
        .fetch_text(entry)
        .await
        .map_err(|e| KubedocsError::discovery(name, format!("root {root}: {e}")))?;

    let links = discoverer.links_in(&resource.payload.as_text(), &resource.final_url, root, seen);
    if links.is_empty() {
        return Err(KubedocsError::discovery(
            name,
            format!("root {root} yielded zero links"),
        ));
    }
    Ok(claim(links, max_pages, seen))
}

/// Breadth-first walk from `root`, following links up to `max_depth` levels.
///
/// Depth 0 is the root's own links. Sub-pages that fail to load are skipped
/// here; they surface again as page failures when processed.
#[allow(clippy::too_many_arguments)]
async fn recursive_links(
    name: &str,
    discoverer: &LinkDiscoverer,
    entry: &Url,
    root: &Url,
    fetcher: &Fetcher,
    seen: &mut HashSet<Url>,
    max_depth: u32,
    max_pages: Option<usize>,
    delay: Duration,
) -> Result<Vec<Url>> {
    let mut found = index_links(name, discoverer, entry, root, fetcher, seen, max_pages).await?;
    let mut frontier = found.clone();
    let full = |found: &Vec<Url>| max_pages.is_some_and(|max| found.len() >= max);

    for depth in 1..=max_depth {
        if frontier.is_empty() || full(&found) {
            break;
        }

        let mut next = Vec::new();
        for page in &frontier {
            if full(&found) {
                break;
            }
            if page == root {
                continue;
            }

            tokio::time::sleep(delay).await;
            let resource = match fetcher.fetch_text(page).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(url = %page, depth, error = %e, "skipping unreachable index page");
                    continue;
                }
            };

            let room = max_pages.map(|max| max.saturating_sub(found.len()));
            let links = claim(
                discoverer.links_in(&resource.payload.as_text(), &resource.final_url, root, seen),
                room,
                seen,
            );
            next.extend(links.iter().cloned());
            found.extend(links);
        }

        debug!(depth, new_links = next.len(), "traversal level complete");
        frontier = next;
    }

    Ok(found)
}

/// Keep at most `room` of `links` and mark the kept ones as seen. Links cut
/// here stay available to later roots.
fn claim(mut links: Vec<Url>, room: Option<usize>, seen: &mut HashSet<Url>) -> Vec<Url> {
    links.retain(|url| !seen.contains(url));
    if let Some(room) = room {
        links.truncate(room);
    }
    seen.extend(links.iter().cloned());
    links
}

// ---------------------------------------------------------------------------
// Changelog sources
// ---------------------------------------------------------------------------

/// Discover changelog pages from the stable release marker.
#[instrument(skip_all, fields(source = %name))]
pub async fn discover_changelog(
    name: &str,
    source: &ChangelogSource,
    fetcher: &Fetcher,
) -> Result<Vec<PageTask>> {
    let stable_url = Url::parse(&source.stable_url).map_err(|e| {
        KubedocsError::discovery(name, format!("invalid stable URL '{}': {e}", source.stable_url))
    })?;

    let marker = fetcher
        .fetch_text(&stable_url)
        .await
        .map_err(|e| KubedocsError::discovery(name, format!("release marker: {e}")))?;

    let (major, minor) = parse_stable_version(&marker.payload.as_text())
        .map_err(|e| KubedocsError::discovery(name, e.to_string()))?;
    info!(major, minor, "stable release");

    let tasks = changelog_tasks(name, source, major, minor)?;
    if tasks.is_empty() {
        return Err(KubedocsError::discovery(
            name,
            format!(
                "stable minor {minor} is below the configured floor {}",
                source.min_minor
            ),
        ));
    }
    Ok(tasks)
}
