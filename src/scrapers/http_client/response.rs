//! HTTP response wrapper.

use std::collections::HashMap;

use reqwest::StatusCode;

/// A successful response with its body fully read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(|s| s.as_str())
    }

    /// Get the Content-Length header.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get("content-length")
            .and_then(|s| s.parse().ok())
    }

    /// Number of body bytes received.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the Content-Type contains `expected` (case-insensitive).
    /// A missing header counts as a mismatch.
    pub fn content_type_matches(&self, expected: &str) -> bool {
        self.content_type()
            .map(|ct| ct.to_ascii_lowercase().contains(&expected.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}
