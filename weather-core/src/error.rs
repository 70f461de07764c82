//! Error types shared by the pipeline and its collaborators.
//!
//! Collaborators report failures through these types; the pipeline converts
//! them into [`ErrorInfo`] values carried on the state, never into panics.

use std::fmt;

use thiserror::Error;

/// The resolver found no usable location in the query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no location found in query")]
pub struct Unresolved;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("query must not be empty")]
pub struct EmptyQuery;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Could not resolve location: {0}")]
    LocationNotFound(String),

    #[error("{provider} request failed with status {status}: {body}")]
    Status { provider: &'static str, status: u16, body: String },

    #[error("Failed to reach {provider}: {message}")]
    Transport { provider: &'static str, message: String },

    #[error("Failed to parse {provider} response: {message}")]
    Decode { provider: &'static str, message: String },

    /// Free-form failure raised by a fetcher that does not fit the other cases.
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("formatter returned an empty answer")]
    Empty,

    #[error("formatter failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to prepare cache directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    LocationUnresolved,
    FetchFailed,
    FormatFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LocationUnresolved => "location_unresolved",
            ErrorKind::FetchFailed => "fetch_failed",
            ErrorKind::FormatFailed => "format_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline failure recorded on the state. Its message is user-facing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub const LOCATION_UNRESOLVED: &'static str = "Could not detect a location.";

    pub fn location_unresolved() -> Self {
        Self { kind: ErrorKind::LocationUnresolved, message: Self::LOCATION_UNRESOLVED.to_string() }
    }

    pub fn fetch_failed(err: &FetchError) -> Self {
        Self { kind: ErrorKind::FetchFailed, message: err.to_string() }
    }

    pub fn format_failed(err: &FormatError) -> Self {
        Self { kind: ErrorKind::FormatFailed, message: err.to_string() }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Shortens an upstream response body for inclusion in an error message.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_fetch_error_keeps_message_verbatim() {
        let info = ErrorInfo::fetch_failed(&FetchError::other("timeout"));
        assert_eq!(info.kind, ErrorKind::FetchFailed);
        assert_eq!(info.message, "timeout");
    }

    #[test]
    fn location_not_found_message() {
        let err = FetchError::LocationNotFound("atlantis".into());
        assert_eq!(err.to_string(), "Could not resolve location: atlantis");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = "é".repeat(150);
        let out = truncate_body(&body);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 203);

        assert_eq!(truncate_body("short"), "short");
    }
}
