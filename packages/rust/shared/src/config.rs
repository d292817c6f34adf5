//! Application configuration for kubedocs.
//!
//! User config lives at `~/.kubedocs/kubedocs.toml`. A `--config` flag
//! overrides that location; without either, the built-in Kubernetes
//! configuration is used.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{KubedocsError, Result};
use crate::types::Category;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kubedocs.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kubedocs";

// ---------------------------------------------------------------------------
// Config structs (matching kubedocs.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where and how artifacts are written.
    #[serde(default)]
    pub output: OutputConfig,

    /// HTTP client settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Retry policy for transient fetch failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Concurrency and request pacing.
    #[serde(default)]
    pub politeness: PolitenessConfig,

    /// Run-level behaviour.
    #[serde(default)]
    pub run: RunConfig,

    /// Documentation sources, processed in order.
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
            politeness: PolitenessConfig::default(),
            run: RunConfig::default(),
            sources: default_sources(),
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory for all artifacts.
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// Title used in each category file's top heading.
    #[serde(default = "default_output_title")]
    pub title: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            title: default_output_title(),
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_output_title() -> String {
    "Kubernetes Documentation".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum redirects to follow.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    concat!("kubedocs/", env!("CARGO_PKG_VERSION")).into()
}
fn default_max_redirects() -> usize {
    5
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubled for every further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    5_000
}

/// `[politeness]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolitenessConfig {
    /// Maximum in-flight requests per source.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delay in ms each worker waits before issuing a request.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_delay_ms() -> u64 {
    200
}

/// `[run]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum page failures before the run counts as failed.
    /// Unset means page failures never fail the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_tolerance: Option<usize>,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// `[[sources]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source name used in logs and the run report.
    pub name: String,

    /// What kind of source this is and how to traverse it.
    #[serde(flatten)]
    pub kind: SourceKind,
}

/// The three shapes of documentation source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// An HTML documentation tree: discover links, extract, convert.
    Html(HtmlSource),
    /// Versioned Markdown changelogs, passed through as-is.
    Changelog(ChangelogSource),
    /// Binary downloads written verbatim.
    Binary(BinarySource),
}

/// An HTML documentation site section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtmlSource {
    /// Root (index) pages of the documentation tree.
    pub roots: Vec<String>,

    /// How far link discovery reaches beyond the root pages.
    #[serde(default)]
    pub traversal: Traversal,

    /// CSS selector for navigation links on index pages.
    #[serde(default = "default_link_selector")]
    pub link_selector: String,

    /// How pages map to categories.
    pub category: CategoryRule,

    /// Content-region selectors, tried by ascending priority.
    pub extraction: Vec<ExtractionRule>,

    /// Extra selectors removed from the content region.
    #[serde(default)]
    pub denylist: Vec<String>,

    /// Glob patterns (on URL path) excluded from discovery.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Limit on pages taken per root; unset means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages_per_root: Option<usize>,
}

impl HtmlSource {
    /// Extraction rules in evaluation order (ascending priority, stable).
    pub fn ordered_rules(&self) -> Vec<ExtractionRule> {
        let mut rules = self.extraction.clone();
        rules.sort_by_key(|r| r.priority);
        rules
    }
}

fn default_link_selector() -> String {
    "a[href]".into()
}

/// Link discovery depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Traversal {
    /// The root page is the only page; no links are followed.
    Single,
    /// Links are collected from the root page's navigation only.
    #[default]
    Index,
    /// Discovered pages are themselves scanned for links, up to `max_depth`.
    Recursive { max_depth: u32 },
}

/// How a discovered page is assigned a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CategoryRule {
    /// Every page of the source goes to one category.
    Fixed { category: Category },
    /// The first path segment after `base_path` names the category.
    PathSegment {
        base_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<Category>,
    },
}

impl CategoryRule {
    /// Resolve the category for a URL path, or `None` if the page has no home.
    pub fn category_for(&self, path: &str) -> Option<Category> {
        match self {
            Self::Fixed { category } => Some(*category),
            Self::PathSegment {
                base_path,
                fallback,
            } => {
                let base = base_path.trim_end_matches('/');
                let segment = path
                    .strip_prefix(base)
                    .filter(|rest| rest.is_empty() || rest.starts_with('/'))
                    .and_then(|rest| rest.trim_start_matches('/').split('/').next())
                    .unwrap_or("");
                segment.parse().ok().or(*fallback)
            }
        }
    }
}

/// One content-region selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRule {
    /// CSS selector for the content region.
    pub selector: String,
    /// Lower values are tried first.
    #[serde(default)]
    pub priority: i32,
}

impl ExtractionRule {
    /// Convenience constructor.
    pub fn new(selector: impl Into<String>, priority: i32) -> Self {
        Self {
            selector: selector.into(),
            priority,
        }
    }
}

/// Versioned changelog files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogSource {
    /// URL of the stable release marker (e.g. `v1.31.2`).
    pub stable_url: String,
    /// Changelog URL with `{major}` and `{minor}` placeholders.
    pub url_template: String,
    /// Oldest minor version to include.
    pub min_minor: u32,
    /// Destination category.
    #[serde(default = "default_changelog_category")]
    pub category: Category,
}

fn default_changelog_category() -> Category {
    Category::Changelog
}

/// A set of binary downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinarySource {
    /// Files to download.
    pub files: Vec<BinaryFile>,
}

/// One binary download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryFile {
    /// Source URL.
    pub url: String,
    /// Destination path relative to the output directory.
    pub dest: String,
}

// ---------------------------------------------------------------------------
// Built-in sources
// ---------------------------------------------------------------------------

const KUBERNETES_SECTIONS: [&str; 5] = ["setup", "concepts", "tasks", "tutorials", "reference"];

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "kubernetes".into(),
            kind: SourceKind::Html(HtmlSource {
                roots: KUBERNETES_SECTIONS
                    .iter()
                    .map(|s| format!("https://kubernetes.io/docs/{s}/"))
                    .collect(),
                traversal: Traversal::Index,
                link_selector: "a.td-sidebar-link".into(),
                category: CategoryRule::PathSegment {
                    base_path: "/docs/".into(),
                    fallback: None,
                },
                extraction: vec![
                    ExtractionRule::new(".td-content", 0),
                    ExtractionRule::new("main", 10),
                ],
                denylist: kubernetes_denylist(),
                exclude: vec!["/docs/reference/glossary/**".into()],
                max_pages_per_root: None,
            }),
        },
        SourceConfig {
            name: "kubernetes-glossary".into(),
            kind: SourceKind::Html(HtmlSource {
                roots: vec!["https://kubernetes.io/docs/reference/glossary/".into()],
                traversal: Traversal::Single,
                link_selector: default_link_selector(),
                category: CategoryRule::Fixed {
                    category: Category::Glossary,
                },
                extraction: vec![ExtractionRule::new(".td-content", 0)],
                denylist: kubernetes_denylist(),
                exclude: Vec::new(),
                max_pages_per_root: None,
            }),
        },
        SourceConfig {
            name: "kubernetes-changelog".into(),
            kind: SourceKind::Changelog(ChangelogSource {
                stable_url: "https://dl.k8s.io/release/stable.txt".into(),
                url_template: "https://raw.githubusercontent.com/kubernetes/kubernetes/refs/heads/master/CHANGELOG/CHANGELOG-{major}.{minor}.md".into(),
                min_minor: 9,
                category: Category::Changelog,
            }),
        },
        SourceConfig {
            name: "aws-eks".into(),
            kind: SourceKind::Binary(BinarySource {
                files: vec![
                    BinaryFile {
                        url: "https://docs.aws.amazon.com/pdfs/eks/latest/best-practices/eks-bpg.pdf".into(),
                        dest: "provider/aws_eks_good_practice_guide.pdf".into(),
                    },
                    BinaryFile {
                        url: "https://docs.aws.amazon.com/pdfs/eks/latest/userguide/eks-ug.pdf".into(),
                        dest: "provider/aws_eks_docs.pdf".into(),
                    },
                ],
            }),
        },
    ]
}

fn kubernetes_denylist() -> Vec<String> {
    [
        ".td-page-meta",
        ".pageinfo",
        ".td-toc",
        "#pre-footer",
        ".feedback--title",
        ".feedback--answer",
        ".td-breadcrumbs",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Check the configuration before a run. Selector syntax is checked later,
    /// when the extractor and link discoverer compile their rules.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(KubedocsError::config("no sources configured"));
        }
        if self.politeness.concurrency == 0 {
            return Err(KubedocsError::config("politeness.concurrency must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(KubedocsError::config("retry.max_attempts must be at least 1"));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(KubedocsError::config(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
            source.validate()?;
        }
        Ok(())
    }
}

impl SourceConfig {
    fn validate(&self) -> Result<()> {
        let name = &self.name;
        match &self.kind {
            SourceKind::Html(html) => {
                if html.roots.is_empty() {
                    return Err(KubedocsError::config(format!("source '{name}' has no roots")));
                }
                for root in &html.roots {
                    parse_url(name, root)?;
                }
                if html.extraction.is_empty() {
                    return Err(KubedocsError::config(format!(
                        "source '{name}' has no extraction rules"
                    )));
                }
                for pattern in &html.exclude {
                    if glob_to_regex(pattern).is_none() {
                        return Err(KubedocsError::config(format!(
                            "source '{name}': invalid exclude pattern '{pattern}'"
                        )));
                    }
                }
            }
            SourceKind::Changelog(changelog) => {
                parse_url(name, &changelog.stable_url)?;
                if !changelog.url_template.contains("{major}")
                    || !changelog.url_template.contains("{minor}")
                {
                    return Err(KubedocsError::config(format!(
                        "source '{name}': url_template needs {{major}} and {{minor}}"
                    )));
                }
            }
            SourceKind::Binary(binary) => {
                for file in &binary.files {
                    parse_url(name, &file.url)?;
                    let dest = Path::new(&file.dest);
                    let escapes = dest.is_absolute()
                        || dest
                            .components()
                            .any(|c| !matches!(c, Component::Normal(_)));
                    if file.dest.is_empty() || escapes {
                        return Err(KubedocsError::config(format!(
                            "source '{name}': dest '{}' must be a relative path inside the output directory",
                            file.dest
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse_url(source: &str, raw: &str) -> Result<Url> {
    Url::parse(raw)
        .map_err(|e| KubedocsError::config(format!("source '{source}': invalid URL '{raw}': {e}")))
}

/// Convert a glob-like path pattern to an anchored regex.
///
/// `**` matches across path segments, `*` within one segment, `?` one char.
pub fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    regex::Regex::new(&format!("^{escaped}$")).ok()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kubedocs/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| KubedocsError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kubedocs/kubedocs.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KubedocsError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| KubedocsError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KubedocsError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| KubedocsError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KubedocsError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.sources.len(), 4);
        assert_eq!(config.output.dir, "./output");
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retry.max_attempts, 3);
        assert_eq!(parsed.sources.len(), config.sources.len());
        assert!(matches!(parsed.sources[2].kind, SourceKind::Changelog(_)));
    }

    #[test]
    fn config_with_custom_source() {
        let toml_str = r#"
[output]
dir = "/tmp/kubedocs"

[run]
failure_tolerance = 5

[[sources]]
name = "fixture"
kind = "html"
roots = ["https://docs.example.com/"]
link_selector = "nav a"
extraction = [{ selector = "article" }, { selector = "main", priority = 5 }]

[sources.category]
rule = "path_segment"
base_path = "/"

[sources.traversal]
mode = "recursive"
max_depth = 2
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.run.failure_tolerance, Some(5));
        assert_eq!(config.politeness.concurrency, 4);

        let SourceKind::Html(html) = &config.sources[0].kind else {
            panic!("expected html source");
        };
        assert_eq!(html.traversal, Traversal::Recursive { max_depth: 2 });
        assert_eq!(html.ordered_rules()[0].selector, "article");
    }

    #[test]
    fn ordered_rules_sorts_by_priority() {
        let html = HtmlSource {
            roots: vec!["https://example.com/".into()],
            traversal: Traversal::Index,
            link_selector: default_link_selector(),
            category: CategoryRule::Fixed {
                category: Category::Concepts,
            },
            extraction: vec![
                ExtractionRule::new("main", 10),
                ExtractionRule::new(".td-content", 0),
                ExtractionRule::new("article", 10),
            ],
            denylist: vec![],
            exclude: vec![],
            max_pages_per_root: None,
        };
        let selectors: Vec<_> = html
            .ordered_rules()
            .into_iter()
            .map(|r| r.selector)
            .collect();
        assert_eq!(selectors, vec![".td-content", "main", "article"]);
    }

    #[test]
    fn path_segment_category() {
        let rule = CategoryRule::PathSegment {
            base_path: "/docs/".into(),
            fallback: None,
        };
        assert_eq!(rule.category_for("/docs/concepts/overview"), Some(Category::Concepts));
        assert_eq!(rule.category_for("/docs/setup"), Some(Category::Setup));
        assert_eq!(rule.category_for("/docs/contribute/style"), None);
        assert_eq!(rule.category_for("/blog/concepts"), None);

        let root_rule = CategoryRule::PathSegment {
            base_path: "/".into(),
            fallback: Some(Category::Reference),
        };
        assert_eq!(root_rule.category_for("/tasks/a"), Some(Category::Tasks));
        assert_eq!(root_rule.category_for("/other"), Some(Category::Reference));
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let mut config = AppConfig::default();
        let first = config.sources[0].clone();
        config.sources.push(first);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate source name"));
    }

    #[test]
    fn validate_rejects_escaping_dest() {
        let mut config = AppConfig::default();
        config.sources = vec![SourceConfig {
            name: "pdfs".into(),
            kind: SourceKind::Binary(BinarySource {
                files: vec![BinaryFile {
                    url: "https://example.com/guide.pdf".into(),
                    dest: "../guide.pdf".into(),
                }],
            }),
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn glob_patterns() {
        let re = glob_to_regex("/docs/reference/glossary/**").unwrap();
        assert!(re.is_match("/docs/reference/glossary/"));
        assert!(re.is_match("/docs/reference/glossary/pod"));
        assert!(!re.is_match("/docs/reference/kubectl"));

        let single = glob_to_regex("/docs/*/index").unwrap();
        assert!(single.is_match("/docs/tasks/index"));
        assert!(!single.is_match("/docs/tasks/a/index"));
    }
}
