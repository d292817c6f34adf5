//! End-to-end run: sources → discovery → fetch → extract → convert → aggregate.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use kubedocs_crawler::{BodyKind, Extractor, Fetcher, RetryPolicy, title_from_url};
use kubedocs_shared::{
    AppConfig, BinarySource, FetchedResource, KubedocsError, PageFailure, PageTask, Payload,
    PolitenessConfig, Result, RunReport, SourceConfig, SourceKind, SourceOutcome,
};

use crate::aggregator::{Aggregator, PageEntry};

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called once a source's pages are known.
    fn source_started(&self, source: &str, pages: usize);
    /// Called after each page is processed, successfully or not.
    fn page_done(&self, url: &str, ok: bool);
    /// Called when a source is finished or skipped.
    fn source_finished(&self, outcome: &SourceOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn source_started(&self, _source: &str, _pages: usize) {}
    fn page_done(&self, _url: &str, _ok: bool) {}
    fn source_finished(&self, _outcome: &SourceOutcome) {}
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run every configured source and write the artifacts to `config.output.dir`.
///
/// Page failures are recorded and skipped; a source whose discovery fails is
/// recorded and skipped. Only configuration and output I/O errors abort.
#[instrument(skip_all, fields(sources = config.sources.len()))]
pub async fn run(config: &AppConfig, progress: &dyn ProgressReporter) -> Result<RunReport> {
    let start = Instant::now();
    config.validate()?;
    preflight(config)?;

    let fetcher = Fetcher::new(&config.fetch, RetryPolicy::from(&config.retry))?;
    let mut aggregator = Aggregator::new(config.output.title.clone());
    let mut report = RunReport::default();

    for source in &config.sources {
        let outcome =
            run_source(source, &fetcher, &config.politeness, &mut aggregator, progress).await?;

        match &outcome.source_error {
            Some(reason) => error!(source = %source.name, %reason, "source skipped"),
            None => info!(
                source = %source.name,
                succeeded = outcome.pages_succeeded,
                failed = outcome.failures.len(),
                "source complete"
            ),
        }

        progress.source_finished(&outcome);
        report.sources.push(outcome);
    }

    report.artifacts = aggregator.write(Path::new(&config.output.dir))?;

    info!(
        pages = report.pages_succeeded(),
        failures = report.page_failures().count(),
        failed_sources = report.failed_sources().count(),
        artifacts = report.artifacts.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "run complete"
    );

    Ok(report)
}

/// Compile every selector and pattern up front so a typo fails the run
/// before any request is made.
fn preflight(config: &AppConfig) -> Result<()> {
    for source in &config.sources {
        if let SourceKind::Html(html) = &source.kind {
            Extractor::for_source(html)?;
            kubedocs_discovery::LinkDiscoverer::for_source(&source.name, html)?;
        }
    }
    Ok(())
}

/// Process one source. Discovery failures become `source_error`.
#[instrument(skip_all, fields(source = %source.name))]
async fn run_source(
    source: &SourceConfig,
    fetcher: &Fetcher,
    politeness: &PolitenessConfig,
    aggregator: &mut Aggregator,
    progress: &dyn ProgressReporter,
) -> Result<SourceOutcome> {
    let mut outcome = SourceOutcome {
        source: source.name.clone(),
        ..SourceOutcome::default()
    };
    let delay = Duration::from_millis(politeness.delay_ms);

    let discovered = match &source.kind {
        SourceKind::Html(html) => {
            let extractor = Extractor::for_source(html)?;
            kubedocs_discovery::discover_html(&source.name, html, fetcher, delay)
                .await
                .map(|tasks| (tasks, PageMode::Html(extractor)))
        }
        SourceKind::Changelog(changelog) => {
            kubedocs_discovery::discover_changelog(&source.name, changelog, fetcher)
                .await
                .map(|tasks| (tasks, PageMode::Markdown))
        }
        SourceKind::Binary(binary) => {
            let ctx = BinaryRun {
                fetcher,
                politeness,
                progress,
            };
            ctx.run(&source.name, binary, aggregator, &mut outcome).await?;
            return Ok(outcome);
        }
    };

    let (tasks, mode) = match discovered {
        Ok(found) => found,
        Err(e) => {
            outcome.source_error = Some(e.to_string());
            return Ok(outcome);
        }
    };

    outcome.pages_discovered = tasks.len();
    progress.source_started(&source.name, tasks.len());

    let urls = tasks.iter().map(|t| t.url.clone()).collect();
    let handles = spawn_fetches(fetcher, urls, BodyKind::Text, politeness);

    for (task, handle) in tasks.into_iter().zip(handles) {
        let result = join_fetch(handle).await?;
        match result.and_then(|resource| process_page(&task, &resource, &mode)) {
            Ok(entry) => {
                aggregator.add_page(task.category, entry);
                outcome.pages_succeeded += 1;
                progress.page_done(task.url.as_str(), true);
            }
            Err(e) => {
                warn!(url = %task.url, kind = e.kind(), error = %e, "page skipped");
                outcome.failures.push(PageFailure::new(task.url.as_str(), &e));
                progress.page_done(task.url.as_str(), false);
            }
        }
    }

    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Page processing
// ---------------------------------------------------------------------------

/// How fetched page bodies turn into Markdown.
enum PageMode {
    /// Extract the content region, then convert it.
    Html(Extractor),
    /// The body is Markdown already.
    Markdown,
}

/// Turn one fetched page into an aggregator entry.
fn process_page(task: &PageTask, resource: &FetchedResource, mode: &PageMode) -> Result<PageEntry> {
    let body = resource.payload.as_text();

    match mode {
        PageMode::Html(extractor) => {
            let fragment = extractor.extract(&body, &resource.final_url)?;
            let converted = kubedocs_markdown::convert(&fragment.html, &resource.final_url)?;
            debug!(url = %task.url, words = converted.word_count, rule = %fragment.rule, "page converted");

            Ok(PageEntry {
                title: task.title.clone().unwrap_or(fragment.title),
                url: task.url.to_string(),
                markdown: converted.markdown,
            })
        }
        PageMode::Markdown => Ok(PageEntry {
            title: task
                .title
                .clone()
                .unwrap_or_else(|| title_from_url(&task.url)),
            url: task.url.to_string(),
            markdown: body.into_owned(),
        }),
    }
}

/// Shared handles for downloading a binary source.
struct BinaryRun<'a> {
    fetcher: &'a Fetcher,
    politeness: &'a PolitenessConfig,
    progress: &'a dyn ProgressReporter,
}

impl BinaryRun<'_> {
    /// Download every file of a binary source into the aggregator.
    async fn run(
        &self,
        name: &str,
        source: &BinarySource,
        aggregator: &mut Aggregator,
        outcome: &mut SourceOutcome,
    ) -> Result<()> {
        let mut urls = Vec::with_capacity(source.files.len());
        for file in &source.files {
            let url = Url::parse(&file.url).map_err(|e| {
                KubedocsError::config(format!("source '{name}': invalid URL '{}': {e}", file.url))
            })?;
            urls.push(url);
        }

        outcome.pages_discovered = urls.len();
        self.progress.source_started(name, urls.len());
        let handles = spawn_fetches(self.fetcher, urls, BodyKind::Binary, self.politeness);

        for (file, handle) in source.files.iter().zip(handles) {
            match join_fetch(handle).await? {
                Ok(resource) => {
                    let bytes = match resource.payload {
                        Payload::Binary(bytes) => bytes,
                        Payload::Text(text) => text.into_bytes(),
                    };
                    debug!(url = %file.url, dest = %file.dest, size = bytes.len(), "binary fetched");
                    aggregator.add_binary(file.dest.clone(), bytes);
                    outcome.pages_succeeded += 1;
                    self.progress.page_done(&file.url, true);
                }
                Err(e) => {
                    warn!(url = %file.url, kind = e.kind(), error = %e, "binary skipped");
                    outcome.failures.push(PageFailure::new(file.url.as_str(), &e));
                    self.progress.page_done(&file.url, false);
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bounded fetching
// ---------------------------------------------------------------------------

/// Spawn one fetch per URL with at most `politeness.concurrency` requests in
/// flight.
///
/// Each request waits `politeness.delay_ms` after acquiring its slot. Handles
/// are returned in the order of `urls`; awaiting them in that order keeps
/// discovery order while later fetches continue in the background.
fn spawn_fetches(
    fetcher: &Fetcher,
    urls: Vec<Url>,
    body: BodyKind,
    politeness: &PolitenessConfig,
) -> Vec<JoinHandle<Result<FetchedResource>>> {
    let semaphore = Arc::new(Semaphore::new(politeness.concurrency.max(1)));
    let delay = Duration::from_millis(politeness.delay_ms);

    urls.into_iter()
        .map(|url| {
            let fetcher = fetcher.clone();
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| KubedocsError::validation(format!("fetch pool closed: {e}")))?;
                tokio::time::sleep(delay).await;
                fetcher.fetch(&url, body).await
            })
        })
        .collect()
}

/// Wait for one spawned fetch. The outer error is a panicked or cancelled
/// task; the inner one is the fetch result.
async fn join_fetch(
    handle: JoinHandle<Result<FetchedResource>>,
) -> Result<Result<FetchedResource>> {
    handle
        .await
        .map_err(|e| KubedocsError::validation(format!("fetch task failed: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use kubedocs_shared::{
        BinaryFile, Category, CategoryRule, ChangelogSource, ExtractionRule, HtmlSource,
        OutputConfig, RetryConfig, Traversal,
    };
    use std::path::PathBuf;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("kubedocs-pipeline-test-{}", uuid::Uuid::now_v7()))
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_string(format!(
                "<html><head><title>site</title></head><body>\
                 <nav><a href=\"/\">Home</a></nav>{body}\
                 <footer>Copyright</footer></body></html>"
            ))
            .insert_header("content-type", "text/html; charset=utf-8")
    }

    fn doc_page(title: &str, text: &str) -> ResponseTemplate {
        html(&format!(
            "<div class=\"td-content\"><h1>{title}</h1><p>{text}</p></div>"
        ))
    }

    /// Root index linking to `/setup`, `/concepts/a`, `/concepts/b`.
    async fn fixture_site() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html(
                r#"<aside>
                    <a class="td-sidebar-link" href="/setup">Setup</a>
                    <a class="td-sidebar-link" href="/concepts/a">A</a>
                    <a class="td-sidebar-link" href="/concepts/b">B</a>
                </aside>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/setup"))
            .respond_with(doc_page("Getting started", "Install the cluster."))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/concepts/a"))
            .respond_with(doc_page("Alpha", "Alpha content."))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/concepts/b"))
            .respond_with(doc_page("Beta", "Beta content."))
            .mount(&server)
            .await;
        server
    }

    fn html_source(server: &MockServer) -> SourceConfig {
        SourceConfig {
            name: "fixture".into(),
            kind: SourceKind::Html(HtmlSource {
                roots: vec![format!("{}/", server.uri())],
                traversal: Traversal::Index,
                link_selector: "a.td-sidebar-link".into(),
                category: CategoryRule::PathSegment {
                    base_path: "/".into(),
                    fallback: None,
                },
                extraction: vec![ExtractionRule::new(".td-content", 0)],
                denylist: vec![],
                exclude: vec![],
                max_pages_per_root: None,
            }),
        }
    }

    fn config(out: &Path, sources: Vec<SourceConfig>) -> AppConfig {
        AppConfig {
            output: OutputConfig {
                dir: out.to_string_lossy().into_owned(),
                title: "Fixture Docs".into(),
            },
            retry: RetryConfig {
                max_attempts: 1,
                base_delay_ms: 0,
                max_delay_ms: 0,
            },
            politeness: PolitenessConfig {
                concurrency: 2,
                delay_ms: 0,
            },
            sources,
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn three_page_site_end_to_end() {
        let server = fixture_site().await;
        let out = temp_dir();
        let cfg = config(&out, vec![html_source(&server)]);

        let report = run(&cfg, &SilentProgress).await.unwrap();
        assert_eq!(report.pages_succeeded(), 3);
        assert!(!report.is_failure(None));

        let setup = std::fs::read_to_string(out.join("setup.md")).unwrap();
        assert!(setup.starts_with("# Fixture Docs: setup\n"));
        assert!(setup.contains("## Getting started\n"));
        assert!(setup.contains("Install the cluster."));

        let concepts = std::fs::read_to_string(out.join("concepts.md")).unwrap();
        let alpha = concepts.find("## Alpha").unwrap();
        let beta = concepts.find("## Beta").unwrap();
        assert!(alpha < beta);
        assert!(concepts.find("Alpha content.").unwrap() < beta);
        assert!(concepts.contains(&format!("Page Source: {}/concepts/a", server.uri())));
        assert!(!concepts.contains("Copyright"));
        assert!(!concepts.contains("Home"));

        let pages: Vec<(&str, usize)> = report
            .artifacts
            .iter()
            .filter(|a| a.pages > 0)
            .map(|a| (a.path.as_str(), a.pages))
            .collect();
        assert_eq!(pages, vec![("setup.md", 1), ("concepts.md", 2)]);
        assert_eq!(report.artifacts.len(), Category::ALL.len());

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn repeated_runs_are_byte_identical() {
        let server = fixture_site().await;
        let out = temp_dir();
        let cfg = config(&out, vec![html_source(&server)]);

        run(&cfg, &SilentProgress).await.unwrap();
        let concepts = std::fs::read(out.join("concepts.md")).unwrap();
        let manifest = std::fs::read(out.join("manifest.json")).unwrap();

        run(&cfg, &SilentProgress).await.unwrap();
        assert_eq!(std::fs::read(out.join("concepts.md")).unwrap(), concepts);
        assert_eq!(std::fs::read(out.join("manifest.json")).unwrap(), manifest);

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn page_failure_is_isolated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html(
                r#"<a class="td-sidebar-link" href="/concepts/a">A</a>
                   <a class="td-sidebar-link" href="/concepts/b">B</a>
                   <a class="td-sidebar-link" href="/concepts/c">C</a>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/concepts/a"))
            .respond_with(doc_page("Alpha", "Alpha content."))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/concepts/b"))
            .respond_with(html("<p>No content region here.</p>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/concepts/c"))
            .respond_with(doc_page("Gamma", "Gamma content."))
            .mount(&server)
            .await;

        let out = temp_dir();
        let cfg = config(&out, vec![html_source(&server)]);
        let report = run(&cfg, &SilentProgress).await.unwrap();

        let failures: Vec<_> = report.page_failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, "no_content_region");
        assert!(failures[0].url.ends_with("/concepts/b"));
        assert!(!report.is_failure(None));
        assert!(report.is_failure(Some(0)));

        let concepts = std::fs::read_to_string(out.join("concepts.md")).unwrap();
        assert!(concepts.contains("Alpha content."));
        assert!(concepts.contains("Gamma content."));
        assert!(!concepts.contains("No content region"));
        let concepts_record = report
            .artifacts
            .iter()
            .find(|a| a.path == "concepts.md")
            .unwrap();
        assert_eq!(concepts_record.pages, 2);

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn failed_source_does_not_stop_others() {
        let server = fixture_site().await;
        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&broken)
            .await;

        let mut broken_source = html_source(&broken);
        broken_source.name = "broken".into();

        let out = temp_dir();
        let cfg = config(&out, vec![broken_source, html_source(&server)]);
        let report = run(&cfg, &SilentProgress).await.unwrap();

        assert!(report.is_failure(None));
        assert_eq!(report.sources[0].source, "broken");
        assert!(report.sources[0].source_error.is_some());
        assert_eq!(report.sources[1].pages_succeeded, 3);
        assert!(out.join("concepts.md").exists());

        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn changelog_and_binary_sources() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stable.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("v1.10.0"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/CHANGELOG-1.10.md"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# v1.10.0\n\nNew stuff.\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/CHANGELOG-1.9.md"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# v1.9.0\n\nOld stuff.\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guide.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"%PDF-1.4\xff\xfe".to_vec())
                    .insert_header("content-type", "application/pdf"),
            )
            .mount(&server)
            .await;

        let sources = vec![
            SourceConfig {
                name: "changelog".into(),
                kind: SourceKind::Changelog(ChangelogSource {
                    stable_url: format!("{}/stable.txt", server.uri()),
                    url_template: format!("{}/CHANGELOG-{{major}}.{{minor}}.md", server.uri()),
                    min_minor: 9,
                    category: Category::Changelog,
                }),
            },
            SourceConfig {
                name: "pdfs".into(),
                kind: SourceKind::Binary(BinarySource {
                    files: vec![BinaryFile {
                        url: format!("{}/guide.pdf", server.uri()),
                        dest: "provider/guide.pdf".into(),
                    }],
                }),
            },
        ];

        let out = temp_dir();
        let report = run(&config(&out, sources), &SilentProgress).await.unwrap();
        assert!(!report.is_failure(None));

        let changelog = std::fs::read_to_string(out.join("changelog.md")).unwrap();
        let newer = changelog.find("## Kubernetes v1.10").unwrap();
        let older = changelog.find("## Kubernetes v1.9").unwrap();
        assert!(newer < older);
        assert!(changelog.contains("# v1.10.0\n\nNew stuff."));

        assert_eq!(
            std::fs::read(out.join("provider/guide.pdf")).unwrap(),
            b"%PDF-1.4\xff\xfe"
        );

        let _ = std::fs::remove_dir_all(&out);
    }

    struct Recording(Mutex<Vec<String>>);

    impl ProgressReporter for Recording {
        fn source_started(&self, source: &str, pages: usize) {
            self.0.lock().unwrap().push(format!("start {source} {pages}"));
        }
        fn page_done(&self, _url: &str, ok: bool) {
            self.0.lock().unwrap().push(format!("page {ok}"));
        }
        fn source_finished(&self, outcome: &SourceOutcome) {
            self.0.lock().unwrap().push(format!("done {}", outcome.source));
        }
    }

    #[tokio::test]
    async fn progress_is_reported_per_page() {
        let server = fixture_site().await;
        let out = temp_dir();
        let cfg = config(&out, vec![html_source(&server)]);

        let progress = Recording(Mutex::new(Vec::new()));
        run(&cfg, &progress).await.unwrap();

        let events = progress.0.into_inner().unwrap();
        assert_eq!(
            events,
            vec![
                "start fixture 3",
                "page true",
                "page true",
                "page true",
                "done fixture",
            ]
        );

        let _ = std::fs::remove_dir_all(&out);
    }

    struct Timed {
        start: Instant,
        done: Mutex<Vec<(String, u128)>>,
    }

    impl ProgressReporter for Timed {
        fn source_started(&self, _source: &str, _pages: usize) {}
        fn page_done(&self, url: &str, _ok: bool) {
            let elapsed = self.start.elapsed().as_millis();
            self.done.lock().unwrap().push((url.to_string(), elapsed));
        }
        fn source_finished(&self, _outcome: &SourceOutcome) {}
    }

    #[tokio::test]
    async fn pages_are_reported_before_slower_fetches_finish() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html(
                r#"<a class="td-sidebar-link" href="/concepts/fast">Fast</a>
                   <a class="td-sidebar-link" href="/concepts/slow">Slow</a>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/concepts/fast"))
            .respond_with(doc_page("Fast", "Fast content."))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/concepts/slow"))
            .respond_with(doc_page("Slow", "Slow content.").set_delay(Duration::from_millis(1500)))
            .mount(&server)
            .await;

        let out = temp_dir();
        let cfg = config(&out, vec![html_source(&server)]);
        let progress = Timed {
            start: Instant::now(),
            done: Mutex::new(Vec::new()),
        };
        let report = run(&cfg, &progress).await.unwrap();
        assert_eq!(report.pages_succeeded(), 2);

        let done = progress.done.into_inner().unwrap();
        assert_eq!(done.len(), 2);
        assert!(done[0].0.ends_with("/concepts/fast"));
        assert!(done[1].0.ends_with("/concepts/slow"));
        assert!(
            done[1].1 - done[0].1 >= 1000,
            "fast page reported only after the slow fetch: {done:?}"
        );

        let concepts = std::fs::read_to_string(out.join("concepts.md")).unwrap();
        assert!(concepts.find("## Fast").unwrap() < concepts.find("## Slow").unwrap());

        let _ = std::fs::remove_dir_all(&out);
    }
}
