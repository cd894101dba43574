//! Document type filtering, duplicate suppression and range selection.

use std::collections::HashSet;

use tracing::info;

use crate::config::{FilterMode, Settings};
use crate::models::DocumentRecord;

/// What to keep from an extracted document list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    /// Category to keep; empty keeps everything.
    pub document_type: String,
    pub mode: FilterMode,
    /// First index kept (0-based, inclusive).
    pub start: usize,
    /// Index after the last kept (exclusive); `None` = to the end.
    pub end: Option<usize>,
    /// Maximum records kept after range selection (0 = no cap).
    pub batch_size: usize,
}

impl FilterConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            document_type: settings.document_type_filter.clone(),
            mode: settings.filter_mode,
            start: 0,
            end: None,
            batch_size: settings.batch_size,
        }
    }

    pub fn with_range(mut self, start: usize, end: Option<usize>) -> Self {
        self.start = start;
        self.end = end;
        self
    }
}

/// Filter output and the counts of what was removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Selected records, in input order.
    pub records: Vec<DocumentRecord>,
    /// Records matching the type filter after duplicates were removed.
    pub matched: usize,
    /// Records removed because their id was seen earlier.
    pub duplicates: usize,
    /// Records removed by the type filter.
    pub excluded: usize,
}

/// Whether `label` passes `filter` (case-insensitive).
pub fn matches_type(label: &str, filter: &str, mode: FilterMode) -> bool {
    let filter = filter.trim();
    if filter.is_empty() {
        return true;
    }
    let label = label.to_lowercase();
    let filter = filter.to_lowercase();
    match mode {
        FilterMode::Substring => label.contains(&filter),
        FilterMode::Exact => label.trim() == filter,
    }
}

/// Drop later records whose id was already seen. Returns the count dropped.
pub fn dedup_by_id(records: Vec<DocumentRecord>) -> (Vec<DocumentRecord>, usize) {
    let mut seen = HashSet::with_capacity(records.len());
    let before = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Keep `start..end` (clamped to bounds), then cap at `batch_size`.
pub fn select_range<T>(
    items: Vec<T>,
    start: usize,
    end: Option<usize>,
    batch_size: usize,
) -> Vec<T> {
    let len = items.len();
    let end = end.unwrap_or(len).min(len);
    let start = start.min(end);
    let take = if batch_size > 0 {
        batch_size.min(end - start)
    } else {
        end - start
    };
    items.into_iter().skip(start).take(take).collect()
}

/// Deduplicate and type-filter, without range selection.
///
/// Running this on its own output changes nothing.
pub fn filter_records(
    records: Vec<DocumentRecord>,
    document_type: &str,
    mode: FilterMode,
) -> FilterOutcome {
    let (unique, duplicates) = dedup_by_id(records);
    let before = unique.len();
    let records: Vec<_> = unique
        .into_iter()
        .filter(|r| matches_type(&r.document_type_label, document_type, mode))
        .collect();

    FilterOutcome {
        matched: records.len(),
        excluded: before - records.len(),
        duplicates,
        records,
    }
}

/// Full filter stage: dedup, type filter, then range and batch selection.
pub fn apply(records: Vec<DocumentRecord>, config: &FilterConfig) -> FilterOutcome {
    let mut outcome = filter_records(records, &config.document_type, config.mode);

    if outcome.duplicates > 0 {
        info!("Dropped {} duplicate document ids", outcome.duplicates);
    }
    info!(
        "Found {} documents matching filter '{}'",
        outcome.matched, config.document_type
    );

    if config.start > 0 || config.end.is_some() || config.batch_size > 0 {
        let records = std::mem::take(&mut outcome.records);
        outcome.records = select_range(records, config.start, config.end, config.batch_size);
        info!(
            "Processing batch from index {} to {}",
            config.start,
            config.start + outcome.records.len()
        );
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, label: &str) -> DocumentRecord {
        DocumentRecord::new(id, format!("https://example.com/{}", id)).with_type(label)
    }

    fn ids(records: &[DocumentRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_matches_type_modes() {
        assert!(matches_type("Planning Comments", "planning comments", FilterMode::Exact));
        assert!(matches_type("Public Planning Comments (late)", "Planning Comments", FilterMode::Substring));
        assert!(!matches_type("Public Planning Comments", "Planning Comments", FilterMode::Exact));
        assert!(!matches_type("Drawings", "Planning Comments", FilterMode::Substring));
        assert!(matches_type("anything", "", FilterMode::Exact));
    }

    #[test]
    fn test_empty_filter_passes_everything() {
        let records = vec![record("a", "X"), record("b", "")];
        let outcome = apply(records.clone(), &FilterConfig::default());
        assert_eq!(outcome.records, records);
        assert_eq!(outcome.excluded, 0);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let records = vec![
            record("a", "Planning Comments").with_title("first"),
            record("b", "Planning Comments"),
            record("a", "Planning Comments").with_title("second"),
        ];
        let outcome = filter_records(records, "Planning Comments", FilterMode::Substring);

        assert_eq!(ids(&outcome.records), ["a", "b"]);
        assert_eq!(outcome.records[0].title, "first");
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let records = vec![
            record("a", "Planning Comments"),
            record("b", "Drawings"),
            record("a", "Planning Comments"),
            record("c", "planning comments"),
        ];
        let once = filter_records(records, "Planning Comments", FilterMode::Substring);
        let twice = filter_records(once.records.clone(), "Planning Comments", FilterMode::Substring);
        assert_eq!(once.records, twice.records);
        assert_eq!(twice.duplicates, 0);
        assert_eq!(twice.excluded, 0);
    }

    #[test]
    fn test_range_selects_half_open_interval() {
        let items: Vec<usize> = (0..10).collect();
        assert_eq!(select_range(items, 2, Some(5), 0), [2, 3, 4]);
    }

    #[test]
    fn test_range_is_clamped() {
        let items: Vec<usize> = (0..4).collect();
        assert_eq!(select_range(items.clone(), 2, Some(50), 0), [2, 3]);
        assert!(select_range(items.clone(), 9, None, 0).is_empty());
        assert!(select_range(items, 3, Some(1), 0).is_empty());
    }

    #[test]
    fn test_batch_caps_after_range() {
        let items: Vec<usize> = (0..10).collect();
        assert_eq!(select_range(items.clone(), 3, None, 2), [3, 4]);
        assert_eq!(select_range(items, 1, Some(3), 5), [1, 2]);
    }

    #[test]
    fn test_apply_preserves_order_and_slices_filtered_list() {
        let records: Vec<_> = (0..10)
            .map(|i| record(&format!("d{}", i), if i % 2 == 0 { "Planning Comments" } else { "Other" }))
            .collect();
        let config = FilterConfig {
            document_type: "Planning Comments".to_string(),
            ..FilterConfig::default()
        }
        .with_range(1, Some(3));

        let outcome = apply(records, &config);

        assert_eq!(outcome.matched, 5);
        assert_eq!(outcome.excluded, 5);
        assert_eq!(ids(&outcome.records), ["d2", "d4"]);
    }
}
