//! Document records discovered on a portal search page.

use serde::{Deserialize, Serialize};

/// One discoverable document from a portal search-results page.
///
/// Records are produced by the extractor and never mutated afterwards. They
/// round-trip through the cache file as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Stable identifier from the page data (a GUID on most portals).
    pub id: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Longer description, empty when the portal omits it.
    #[serde(default)]
    pub description: String,
    /// Free-text category used for filtering (e.g. "Planning Comments").
    #[serde(default)]
    pub document_type_label: String,
    /// Absolute URL of the document body.
    pub download_url: String,
    /// Filename derived from the page data, not yet sanitized.
    #[serde(default)]
    pub suggested_filename: String,
}

impl DocumentRecord {
    /// Create a record with only the required fields populated.
    pub fn new(id: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            description: String::new(),
            document_type_label: String::new(),
            download_url: download_url.into(),
            suggested_filename: String::new(),
        }
    }

    /// Set the document type label.
    pub fn with_type(mut self, label: impl Into<String>) -> Self {
        self.document_type_label = label.into();
        self
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the suggested filename.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.suggested_filename = filename.into();
        self
    }

    /// Name to use when building the on-disk filename.
    ///
    /// Falls back to the title, then the id, when the portal gave no filename.
    pub fn filename_hint(&self) -> &str {
        [&self.suggested_filename, &self.title, &self.id]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or("document")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_hint_prefers_suggested_filename() {
        let record = DocumentRecord::new("abc", "https://example.com/a")
            .with_title("Title")
            .with_filename("Comment 12");
        assert_eq!(record.filename_hint(), "Comment 12");
    }

    #[test]
    fn test_filename_hint_falls_back_to_title_then_id() {
        let record = DocumentRecord::new("abc", "https://example.com/a").with_title("  Title ");
        assert_eq!(record.filename_hint(), "Title");

        let record = DocumentRecord::new("abc", "https://example.com/a");
        assert_eq!(record.filename_hint(), "abc");
    }

    #[test]
    fn test_missing_optional_fields_deserialize_to_empty() {
        let json = r#"{"id":"1","download_url":"https://example.com/1"}"#;
        let record: DocumentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.title, "");
        assert_eq!(record.document_type_label, "");
        assert_eq!(record.suggested_filename, "");
    }
}
