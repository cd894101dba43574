//! Extraction of document records from a search-results page.
//!
//! Portals embed their result set as a script-level literal
//! (`var model = {...};`). Extraction is two stages: locate the literal in the
//! page text, then decode it. When the literal as a whole is not valid JSON
//! (truncated page, stray JavaScript), the entry array is split textually and
//! each entry decoded on its own, so one bad entry only costs that entry.

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{FieldMapping, Settings};
use crate::models::DocumentRecord;

/// Characters of page text kept around a parse failure for diagnosis.
const FRAGMENT_RADIUS: usize = 60;

/// Errors that stop extraction of a page entirely.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Could not find document data (`var {variable} = ...`) in the page")]
    NotFound { variable: String },

    #[error("Malformed document data: {reason} (near `{fragment}`)")]
    ParseFailure { reason: String, fragment: String },

    #[error("No entry array at `{path}` in document data")]
    MissingRows { path: String },
}

/// Records decoded from one page, plus what was thrown away.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Records in page order.
    pub records: Vec<DocumentRecord>,
    /// Entries that could not become records.
    pub dropped: usize,
    /// One line per dropped entry or recovered parse problem.
    pub diagnostics: Vec<String>,
}

/// Turns page text into `DocumentRecord`s using a `FieldMapping`.
#[derive(Debug, Clone)]
pub struct Extractor {
    mapping: FieldMapping,
    base_url: String,
    locator: Regex,
    placeholder: Regex,
}

impl Extractor {
    pub fn new(mapping: FieldMapping, base_url: impl Into<String>) -> Self {
        let locator = Regex::new(&format!(
            r"\bvar\s+{}\s*=\s*",
            regex::escape(&mapping.model_variable)
        ))
        .expect("escaped variable name is a valid pattern");
        let placeholder =
            Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder pattern is valid");

        Self {
            mapping,
            base_url: base_url.into(),
            locator,
            placeholder,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.mapping.clone(), settings.base_url.clone())
    }

    /// Extract all well-formed entries from `page`, in page order.
    pub fn extract(&self, page: &str) -> Result<Extraction, ExtractError> {
        let blob = self.locate(page)?;
        let mut extraction = Extraction::default();

        let entries = match serde_json::from_str::<Value>(blob) {
            Ok(model) => {
                let rows = extract_path(&model, &self.mapping.rows_path);
                match rows {
                    Value::Array(items) => items.clone(),
                    _ => {
                        return Err(ExtractError::MissingRows {
                            path: self.mapping.rows_path.clone(),
                        })
                    }
                }
            }
            Err(e) => {
                let offset = offset_of(blob, e.line(), e.column());
                debug!("Model is not valid JSON ({}), decoding entries one by one", e);
                self.decode_entries_individually(blob, &mut extraction)
                    .ok_or_else(|| ExtractError::ParseFailure {
                        reason: e.to_string(),
                        fragment: fragment_around(blob, offset),
                    })?
            }
        };

        for (index, entry) in entries.iter().enumerate() {
            match self.map_entry(entry) {
                Ok(record) => extraction.records.push(record),
                Err(reason) => {
                    extraction.dropped += 1;
                    extraction
                        .diagnostics
                        .push(format!("entry {}: {}", index, reason));
                }
            }
        }

        if extraction.dropped > 0 {
            warn!(
                "Dropped {} entries while extracting document data",
                extraction.dropped
            );
        }

        Ok(extraction)
    }

    /// Find the literal assigned to the model variable.
    ///
    /// Returns the balanced literal, or everything after the assignment when
    /// the literal never closes.
    fn locate<'p>(&self, page: &'p str) -> Result<&'p str, ExtractError> {
        let found = self
            .locator
            .find(page)
            .ok_or_else(|| ExtractError::NotFound {
                variable: self.mapping.model_variable.clone(),
            })?;

        let rest = &page[found.end()..];
        if !rest.starts_with(['{', '[']) {
            return Err(ExtractError::ParseFailure {
                reason: "model is not an object or array literal".to_string(),
                fragment: fragment_around(rest, 0),
            });
        }

        Ok(match balanced_end(rest) {
            Some(end) => &rest[..end],
            None => rest,
        })
    }

    /// Fallback decoding: split the entry array by hand and parse each
    /// element separately. Returns `None` if the array cannot be found.
    fn decode_entries_individually(
        &self,
        blob: &str,
        extraction: &mut Extraction,
    ) -> Option<Vec<Value>> {
        let key = self.mapping.rows_path.rsplit('.').next().unwrap_or_default();
        let array = locate_array(blob, key)?;
        let (elements, complete) = split_elements(array);

        if !complete {
            extraction
                .diagnostics
                .push("entry array is truncated".to_string());
        }

        let mut entries = Vec::with_capacity(elements.len());
        for element in elements {
            match serde_json::from_str::<Value>(element) {
                Ok(value) => entries.push(value),
                Err(e) => {
                    extraction.dropped += 1;
                    extraction.diagnostics.push(format!(
                        "undecodable entry ({}): `{}`",
                        e,
                        fragment_around(element, 0)
                    ));
                }
            }
        }
        Some(entries)
    }

    /// Map one decoded entry to a record. Missing optional fields become
    /// empty strings; a missing id or download URL rejects the entry.
    fn map_entry(&self, entry: &Value) -> Result<DocumentRecord, String> {
        let obj = entry
            .as_object()
            .ok_or_else(|| "entry is not an object".to_string())?;
        let m = &self.mapping;

        let id = field_string(obj, &m.id_field)
            .ok_or_else(|| format!("missing required field `{}`", m.id_field))?;

        let direct_url = m
            .download_url_field
            .as_deref()
            .and_then(|field| field_string(obj, field));
        let path = match direct_url {
            Some(url) => url,
            None => self
                .render_template(obj)
                .ok_or_else(|| format!("no download URL for entry `{}`", id))?,
        };

        Ok(DocumentRecord {
            id,
            title: field_string(obj, &m.title_field).unwrap_or_default(),
            description: field_string(obj, &m.description_field).unwrap_or_default(),
            document_type_label: field_string(obj, &m.type_field).unwrap_or_default(),
            download_url: resolve_url(&self.base_url, &path),
            suggested_filename: field_string(obj, &m.filename_field).unwrap_or_default(),
        })
    }

    /// Fill `{Field}` placeholders from the entry. `None` if any is missing.
    fn render_template(&self, obj: &Map<String, Value>) -> Option<String> {
        let template = &self.mapping.download_url_template;
        if template.is_empty() {
            return None;
        }

        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;
        for caps in self.placeholder.captures_iter(template) {
            let whole = caps.get(0)?;
            let value = field_string(obj, &caps[1])?;
            rendered.push_str(&template[last..whole.start()]);
            rendered.extend(url::form_urlencoded::byte_serialize(value.as_bytes()));
            last = whole.end();
        }
        rendered.push_str(&template[last..]);
        Some(rendered)
    }
}

/// Read a field as a trimmed, non-empty string. Numbers are stringified.
fn field_string(obj: &Map<String, Value>, field: &str) -> Option<String> {
    if field.is_empty() {
        return None;
    }
    let value = match obj.get(field)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

/// Resolve a path to a full URL, handling both absolute and relative paths.
pub fn resolve_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(path) {
            return resolved.to_string();
        }
    }

    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{}/{}", base, path)
}

/// Extract a value from nested JSON using dot-notation path.
pub fn extract_path<'a>(data: &'a Value, path: &str) -> &'a Value {
    if path.is_empty() {
        return data;
    }

    let mut current = data;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key).unwrap_or(&Value::Null),
            Value::Array(arr) => match key.parse::<usize>() {
                Ok(idx) => arr.get(idx).unwrap_or(&Value::Null),
                Err(_) => &Value::Null,
            },
            _ => &Value::Null,
        };
    }

    current
}

/// Tracks whether a scanner is inside a string literal.
#[derive(Default)]
struct StringState {
    quote: Option<char>,
    escaped: bool,
}

impl StringState {
    /// Feed one character; returns true if it is part of a string literal.
    fn feed(&mut self, c: char) -> bool {
        match self.quote {
            Some(q) => {
                if self.escaped {
                    self.escaped = false;
                } else if c == '\\' {
                    self.escaped = true;
                } else if c == q {
                    self.quote = None;
                }
                true
            }
            None if c == '"' || c == '\'' => {
                self.quote = Some(c);
                true
            }
            None => false,
        }
    }
}

/// Byte offset just past the bracket closing the one `text` starts with.
fn balanced_end(text: &str) -> Option<usize> {
    let mut strings = StringState::default();
    let mut depth = 0usize;

    for (i, c) in text.char_indices() {
        if strings.feed(c) {
            continue;
        }
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Find the array value of `"key"` and return text starting at its `[`.
fn locate_array<'a>(blob: &'a str, key: &str) -> Option<&'a str> {
    let pattern = Regex::new(&format!(r#"["']{}["']\s*:\s*\["#, regex::escape(key))).ok()?;
    let found = pattern.find(blob)?;
    Some(&blob[found.end() - 1..])
}

/// Split an array literal (starting at `[`) into its top-level elements.
/// The flag is false when the text ends before the array closes.
fn split_elements(array: &str) -> (Vec<&str>, bool) {
    let mut strings = StringState::default();
    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut start = 1;

    for (i, c) in array.char_indices().skip(1) {
        if strings.feed(c) {
            continue;
        }
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' if depth > 0 => depth -= 1,
            ']' => {
                push_trimmed(&mut elements, &array[start..i]);
                return (elements, true);
            }
            ',' if depth == 0 => {
                push_trimmed(&mut elements, &array[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    push_trimmed(&mut elements, &array[start.min(array.len())..]);
    (elements, false)
}

fn push_trimmed<'a>(elements: &mut Vec<&'a str>, piece: &'a str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        elements.push(piece);
    }
}

/// Convert serde_json's 1-based line/column into a byte offset.
fn offset_of(text: &str, line: usize, column: usize) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(text.len())
}

/// A short excerpt of `text` centred on `offset`, on char boundaries.
fn fragment_around(text: &str, offset: usize) -> String {
    let mut start = offset.saturating_sub(FRAGMENT_RADIUS);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (offset + FRAGMENT_RADIUS).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://portal.example.gov.uk/PublicAccess_LIVE/";

    fn extractor() -> Extractor {
        Extractor::new(FieldMapping::default(), BASE)
    }

    fn page(model: &str) -> String {
        format!(
            "<html><head><script>\nvar other = 1;\nvar model = {};\n</script></head><body></body></html>",
            model
        )
    }

    #[test]
    fn test_extracts_entries_in_page_order() {
        let html = page(
            r#"{"Rows":[
                {"Guid":"A1","Doc_Ref2":"Comment 1","Doc_Type":"Planning Comments"},
                {"Guid":"B2","Doc_Ref2":"Plan","Doc_Type":"Drawings"},
                {"Guid":"C3","Doc_Ref2":"Comment 2","Doc_Type":"Planning Comments"}
            ],"Total":3}"#,
        );

        let extraction = extractor().extract(&html).unwrap();
        let ids: Vec<_> = extraction.records.iter().map(|r| r.id.as_str()).collect();

        assert_eq!(ids, ["A1", "B2", "C3"]);
        assert_eq!(extraction.dropped, 0);
        assert_eq!(
            extraction.records[0].download_url,
            "https://portal.example.gov.uk/PublicAccess_LIVE/Document/ViewDocument?id=A1"
        );
        assert_eq!(extraction.records[0].suggested_filename, "Comment 1");
        assert_eq!(extraction.records[1].document_type_label, "Drawings");
    }

    #[test]
    fn test_missing_model_is_not_found() {
        let err = extractor()
            .extract("<html><script>var x = {};</script></html>")
            .unwrap_err();
        assert!(matches!(err, ExtractError::NotFound { .. }));
    }

    #[test]
    fn test_missing_rows_array() {
        let err = extractor().extract(&page(r#"{"Items":[]}"#)).unwrap_err();
        assert!(matches!(err, ExtractError::MissingRows { ref path } if path == "Rows"));
    }

    #[test]
    fn test_entries_without_id_or_url_are_dropped_and_counted() {
        let mapping = FieldMapping {
            download_url_template: "Document/ViewDocument?id={Guid}&ref={Doc_No}".to_string(),
            ..FieldMapping::default()
        };
        let html = page(
            r#"{"Rows":[
                {"Guid":"A1","Doc_No":"1"},
                {"Doc_No":"2"},
                {"Guid":"C3"},
                "not an object",
                {"Guid":"","Doc_No":"5"}
            ]}"#,
        );

        let extraction = Extractor::new(mapping, BASE).extract(&html).unwrap();

        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].id, "A1");
        assert_eq!(extraction.dropped, 4);
        assert_eq!(extraction.diagnostics.len(), 4);
    }

    #[test]
    fn test_optional_fields_default_to_empty() {
        let html = page(r#"{"Rows":[{"Guid":"A1"}]}"#);
        let record = &extractor().extract(&html).unwrap().records[0];
        assert_eq!(record.title, "");
        assert_eq!(record.description, "");
        assert_eq!(record.document_type_label, "");
        assert_eq!(record.suggested_filename, "");
    }

    #[test]
    fn test_numeric_ids_and_direct_url_field() {
        let mapping = FieldMapping {
            id_field: "DocId".to_string(),
            download_url_field: Some("Link".to_string()),
            ..FieldMapping::default()
        };
        let html = page(
            r#"{"Rows":[{"DocId":42,"Link":"/files/42.pdf"},{"DocId":43,"Link":"https://cdn.example.com/43.pdf"}]}"#,
        );

        let extraction = Extractor::new(mapping, BASE).extract(&html).unwrap();

        assert_eq!(extraction.records[0].id, "42");
        assert_eq!(
            extraction.records[0].download_url,
            "https://portal.example.gov.uk/files/42.pdf"
        );
        assert_eq!(
            extraction.records[1].download_url,
            "https://cdn.example.com/43.pdf"
        );
    }

    #[test]
    fn test_braces_inside_strings_do_not_end_model() {
        let html = page(r#"{"Rows":[{"Guid":"A1","Doc_Ref2":"Objection }; see {attached}"}]}"#);
        let extraction = extractor().extract(&html).unwrap();
        assert_eq!(extraction.records[0].suggested_filename, "Objection }; see {attached}");
    }

    #[test]
    fn test_truncated_model_keeps_complete_entries() {
        let html = r#"<script>var model = {"Rows":[{"Guid":"A1","Doc_Type":"Planning Comments"},{"Guid":"B2"},{"Guid":"C"#;

        let extraction = extractor().extract(html).unwrap();
        let ids: Vec<_> = extraction.records.iter().map(|r| r.id.as_str()).collect();

        assert_eq!(ids, ["A1", "B2"]);
        assert_eq!(extraction.dropped, 1);
        assert!(extraction
            .diagnostics
            .iter()
            .any(|d| d.contains("truncated")));
    }

    #[test]
    fn test_one_malformed_entry_does_not_fail_batch() {
        let html = page(r#"{"Rows":[{"Guid":"A1"},{"Guid": undefined},{"Guid":"C3"}]}"#);

        let extraction = extractor().extract(&html).unwrap();
        let ids: Vec<_> = extraction.records.iter().map(|r| r.id.as_str()).collect();

        assert_eq!(ids, ["A1", "C3"]);
        assert_eq!(extraction.dropped, 1);
    }

    #[test]
    fn test_unrecoverable_model_reports_fragment() {
        let html = page(r#"{"Total": oops, "Other": 1}"#);
        match extractor().extract(&html).unwrap_err() {
            ExtractError::ParseFailure { fragment, .. } => assert!(fragment.contains("oops")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_template_values_are_url_encoded() {
        let html = page(r#"{"Rows":[{"Guid":"a b&c"}]}"#);
        let record = &extractor().extract(&html).unwrap().records[0];
        assert!(record.download_url.ends_with("id=a+b%26c"));
    }

    #[test]
    fn test_nested_rows_path() {
        let mapping = FieldMapping {
            rows_path: "Data.Results".to_string(),
            ..FieldMapping::default()
        };
        let html = page(r#"{"Data":{"Results":[{"Guid":"X"}]}}"#);
        let extraction = Extractor::new(mapping, BASE).extract(&html).unwrap();
        assert_eq!(extraction.records.len(), 1);
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://example.com/app/", "Document/1"),
            "https://example.com/app/Document/1"
        );
        assert_eq!(
            resolve_url("https://example.com/app/", "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_split_elements() {
        let (elements, complete) = split_elements(r#"[{"a":[1,2]}, "x,y", 3]"#);
        assert_eq!(elements, [r#"{"a":[1,2]}"#, r#""x,y""#, "3"]);
        assert!(complete);

        let (elements, complete) = split_elements(r#"[1, {"b": 2"#);
        assert_eq!(elements, ["1", r#"{"b": 2"#]);
        assert!(!complete);
    }
}
