//! Page fetching and content extraction.
//!
//! This crate provides:
//! - [`fetch`]: HTTP fetcher with an explicit [`RetryPolicy`]
//! - [`extract`]: selector-rule based content [`Extractor`]

pub mod extract;
pub mod fetch;

pub use extract::{ExtractedFragment, Extractor, title_from_url};
pub use fetch::{BodyKind, Fetcher, RetryPolicy};
