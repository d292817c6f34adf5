//! Pipeline orchestration for kubedocs.
//!
//! This crate ties together discovery, fetching, extraction, Markdown
//! conversion and aggregation into a single run over all configured sources.

pub mod aggregator;
pub mod pipeline;
