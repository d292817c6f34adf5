//! Error types for kubedocs.
//!
//! Library crates use [`KubedocsError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

/// Why an HTTP fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The request or body read timed out.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// The server answered with a non-success status.
    HttpStatus(u16),
    /// The response body could not be read.
    Body,
    /// Any other request error (bad URL, redirect loop, ...).
    Request,
}

impl FetchErrorKind {
    /// Transient failures are worth retrying: timeouts, connection errors,
    /// 5xx responses and 429 rate limiting.
    pub fn is_transient(self) -> bool {
        match self {
            Self::Timeout | Self::Connect => true,
            Self::HttpStatus(code) => code == 429 || (500..600).contains(&code),
            Self::Body | Self::Request => false,
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connect => write!(f, "connection failed"),
            Self::HttpStatus(code) => write!(f, "HTTP {code}"),
            Self::Body => write!(f, "body read failed"),
            Self::Request => write!(f, "request failed"),
        }
    }
}

/// Top-level error type for all kubedocs operations.
#[derive(Debug, thiserror::Error)]
pub enum KubedocsError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed input that is not tied to a single page (version markers, URLs).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A page could not be fetched, after retries where applicable.
    #[error("fetch failed for {url}: {kind} after {attempts} attempt(s)")]
    FetchFailed {
        url: String,
        kind: FetchErrorKind,
        attempts: u32,
    },

    /// None of the configured selector rules matched a non-empty region.
    #[error("no content region found in {url}")]
    NoContentRegion { url: String },

    /// The extracted fragment could not be turned into Markdown.
    #[error("conversion failed for {url}: {reason}")]
    ConversionFailed { url: String, reason: String },

    /// A whole source was skipped because its root could not be discovered.
    #[error("discovery failed for source '{source_name}': {reason}")]
    SourceDiscoveryFailed { source_name: String, reason: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KubedocsError>;

impl KubedocsError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a conversion error for a page.
    pub fn conversion(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConversionFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a source-level discovery error.
    pub fn discovery(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceDiscoveryFailed {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Stable short label for logs and run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Io { .. } => "io",
            Self::Parse { .. } => "parse",
            Self::Validation { .. } => "validation",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::NoContentRegion { .. } => "no_content_region",
            Self::ConversionFailed { .. } => "conversion_failed",
            Self::SourceDiscoveryFailed { .. } => "source_discovery_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = KubedocsError::config("no sources configured");
        assert_eq!(err.to_string(), "config error: no sources configured");

        let err = KubedocsError::FetchFailed {
            url: "https://kubernetes.io/docs/setup".into(),
            kind: FetchErrorKind::HttpStatus(503),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "fetch failed for https://kubernetes.io/docs/setup: HTTP 503 after 3 attempt(s)"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(FetchErrorKind::Timeout.is_transient());
        assert!(FetchErrorKind::Connect.is_transient());
        assert!(FetchErrorKind::HttpStatus(502).is_transient());
        assert!(FetchErrorKind::HttpStatus(429).is_transient());
        assert!(!FetchErrorKind::HttpStatus(404).is_transient());
        assert!(!FetchErrorKind::Body.is_transient());
    }

    #[test]
    fn kind_labels() {
        let err = KubedocsError::NoContentRegion { url: "u".into() };
        assert_eq!(err.kind(), "no_content_region");
        assert_eq!(KubedocsError::conversion("u", "nested table").kind(), "conversion_failed");
        assert_eq!(KubedocsError::discovery("k8s", "404").kind(), "source_discovery_failed");
    }
}
