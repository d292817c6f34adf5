//! Shared types, error model, and configuration for kubedocs.
//!
//! This crate is the foundation depended on by all other kubedocs crates.
//! It provides:
//! - [`KubedocsError`], the unified error type
//! - Domain types ([`Category`], [`PageTask`], [`FetchedResource`], [`RunReport`])
//! - Configuration ([`AppConfig`], source definitions, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BinaryFile, BinarySource, CategoryRule, ChangelogSource, ExtractionRule,
    FetchConfig, HtmlSource, OutputConfig, PolitenessConfig, RetryConfig, RunConfig,
    SourceConfig, SourceKind, Traversal, config_dir, config_file_path, glob_to_regex,
    init_config, load_config, load_config_from,
};
pub use error::{FetchErrorKind, KubedocsError, Result};
pub use types::{
    ArtifactRecord, Category, FetchedResource, PageFailure, PageTask, Payload, RunReport,
    SourceOutcome,
};
