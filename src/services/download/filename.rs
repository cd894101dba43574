//! Target filename sanitization and collision resolution.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Longest base name kept, in characters, before the extension.
pub const MAX_BASE_LEN: usize = 100;

/// Make `name` safe to use as a filename and give it `extension`.
///
/// Characters illegal on common filesystems become `_`, runs of whitespace
/// collapse to one space, and the base is truncated to [`MAX_BASE_LEN`]
/// characters. An empty result becomes `document`.
pub fn sanitize_filename(name: &str, extension: &str) -> String {
    let extension = extension.trim_start_matches('.');
    let mut base = name.trim();

    // Compared on the raw string: a trailing separator means no extension
    let suffix_len = extension.len() + 1;
    if !extension.is_empty() && base.len() > suffix_len {
        let split = base.len() - suffix_len;
        if base.is_char_boundary(split) {
            let (stem, suffix) = base.split_at(split);
            if suffix.starts_with('.') && suffix[1..].eq_ignore_ascii_case(extension) {
                base = stem;
            }
        }
    }

    let replaced: String = base
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_whitespace() => ' ',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");

    // Leading dots would hide the file or walk up a directory
    let trimmed = collapsed.trim_start_matches('.').trim_end_matches(['.', ' ']);
    let truncated: String = trimmed.chars().take(MAX_BASE_LEN).collect();
    let truncated = truncated.trim_end();

    let base = if truncated.is_empty() {
        "document"
    } else {
        truncated
    };

    if extension.is_empty() {
        base.to_string()
    } else {
        format!("{}.{}", base, extension)
    }
}

/// Hands out unique target paths in one directory.
///
/// Names are compared case-insensitively so plans stay distinct on
/// case-insensitive filesystems.
#[derive(Debug)]
pub struct TargetPlanner {
    dir: PathBuf,
    taken: HashSet<String>,
}

impl TargetPlanner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            taken: HashSet::new(),
        }
    }

    /// Reserve a path for `filename`, suffixing ` (1)`, ` (2)`, ... when the
    /// name was already handed out.
    pub fn reserve(&mut self, filename: &str) -> PathBuf {
        if self.taken.insert(filename.to_lowercase()) {
            return self.dir.join(filename);
        }

        let path = Path::new(filename);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename);
        let extension = path.extension().and_then(|e| e.to_str());

        let mut counter = 1;
        loop {
            let candidate = match extension {
                Some(ext) => format!("{} ({}).{}", stem, counter, ext),
                None => format!("{} ({})", stem, counter),
            };
            if self.taken.insert(candidate.to_lowercase()) {
                return self.dir.join(candidate);
            }
            counter += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_illegal_characters() {
        assert_eq!(
            sanitize_filename(r#"a/b\c:d*e?f"g<h>i|j"#, "pdf"),
            "a_b_c_d_e_f_g_h_i_j.pdf"
        );
        assert_eq!(sanitize_filename("tab\there", "pdf"), "tab here.pdf");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(
            sanitize_filename("  Comment   from \n resident  ", "pdf"),
            "Comment from resident.pdf"
        );
    }

    #[test]
    fn test_keeps_existing_extension() {
        assert_eq!(sanitize_filename("Letter.PDF", "pdf"), "Letter.pdf");
        assert_eq!(sanitize_filename("plan.v2", "pdf"), "plan.v2.pdf");
        assert_eq!(sanitize_filename("notes", ""), "notes");
    }

    #[test]
    fn test_trailing_separator_is_not_an_extension() {
        assert_eq!(sanitize_filename("x.pdf/", "pdf"), "x.pdf_.pdf");
        assert_eq!(sanitize_filename("minutes.pdf\\", "pdf"), "minutes.pdf_.pdf");
        assert_eq!(sanitize_filename(".pdf", "pdf"), "pdf.pdf");
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let name = sanitize_filename(&long, "pdf");
        assert_eq!(name.chars().count(), MAX_BASE_LEN + 4);
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn test_empty_and_dot_names_fall_back() {
        assert_eq!(sanitize_filename("", "pdf"), "document.pdf");
        assert_eq!(sanitize_filename("   ", "pdf"), "document.pdf");
        assert_eq!(sanitize_filename("..", "pdf"), "document.pdf");
        assert_eq!(sanitize_filename("../etc/passwd", "pdf"), "_etc_passwd.pdf");
    }

    #[test]
    fn test_collisions_get_numeric_suffix() {
        let mut planner = TargetPlanner::new("/out");
        assert_eq!(planner.reserve("Letter.pdf"), PathBuf::from("/out/Letter.pdf"));
        assert_eq!(planner.reserve("Letter.pdf"), PathBuf::from("/out/Letter (1).pdf"));
        assert_eq!(planner.reserve("letter.PDF"), PathBuf::from("/out/letter (2).PDF"));
        assert_eq!(planner.reserve("Other.pdf"), PathBuf::from("/out/Other.pdf"));
    }

    #[test]
    fn test_suffix_skips_names_already_planned() {
        let mut planner = TargetPlanner::new("/out");
        planner.reserve("a (1).pdf");
        planner.reserve("a.pdf");
        assert_eq!(planner.reserve("a.pdf"), PathBuf::from("/out/a (2).pdf"));
    }
}
