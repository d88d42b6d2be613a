//! Conflict copy naming
//!
//! Conflict copies live beside the original with a timestamp suffix:
//! `report.conflict-20260714-093055.docx`. The suffix sits before the
//! final extension so the copy still opens with the right application.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Build the conflict copy name for `original_name` at `when`
///
/// `report.docx` becomes `report.conflict-YYYYMMDD-HHMMSS.docx`;
/// `Makefile` becomes `Makefile.conflict-YYYYMMDD-HHMMSS`.
#[must_use]
pub fn conflict_copy_name(original_name: &str, when: DateTime<Utc>) -> String {
    let timestamp = when.format("%Y%m%d-%H%M%S");

    if let Some(dot_pos) = original_name.rfind('.') {
        let stem = &original_name[..dot_pos];
        let ext = &original_name[dot_pos..];
        format!("{stem}.conflict-{timestamp}{ext}")
    } else {
        format!("{original_name}.conflict-{timestamp}")
    }
}

/// Pick a conflict copy name that does not collide with an existing file
///
/// Timestamps collide when two conflicts hit the same file within one
/// second; an incrementing suffix disambiguates.
#[must_use]
pub fn unique_conflict_copy_name<F>(original_name: &str, when: DateTime<Utc>, mut exists: F) -> String
where
    F: FnMut(&str) -> bool,
{
    let candidate = conflict_copy_name(original_name, when);
    if !exists(&candidate) {
        return candidate;
    }

    for i in 2..=99 {
        let numbered = if let Some(dot_pos) = candidate.rfind('.') {
            let stem = &candidate[..dot_pos];
            let ext = &candidate[dot_pos..];
            format!("{stem}-{i}{ext}")
        } else {
            format!("{candidate}-{i}")
        };
        if !exists(&numbered) {
            return numbered;
        }
    }

    // 99 collisions within one second is not a naming problem anymore.
    candidate
}

/// Find existing conflict copies of `original` in its directory,
/// newest name last
#[must_use]
pub fn find_conflict_copies(original: &Path) -> Vec<PathBuf> {
    let Some(dir) = original.parent() else {
        return Vec::new();
    };
    let Some(name) = original.file_name().and_then(|n| n.to_str()) else {
        return Vec::new();
    };

    let (stem, ext) = match name.rfind('.') {
        Some(dot_pos) => (&name[..dot_pos], &name[dot_pos..]),
        None => (name, ""),
    };
    let prefix = format!("{stem}.conflict-");

    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut copies: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            let candidate = e.file_name();
            let Some(candidate) = candidate.to_str() else {
                return false;
            };
            candidate.starts_with(&prefix)
                && (ext.is_empty() || candidate.ends_with(ext))
                && candidate != name
        })
        .map(|e| e.path())
        .collect();

    copies.sort();
    copies
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn when() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 14, 9, 30, 55).unwrap()
    }

    #[test]
    fn test_name_with_extension() {
        assert_eq!(
            conflict_copy_name("report.docx", when()),
            "report.conflict-20260714-093055.docx"
        );
    }

    #[test]
    fn test_name_without_extension() {
        assert_eq!(
            conflict_copy_name("Makefile", when()),
            "Makefile.conflict-20260714-093055"
        );
    }

    #[test]
    fn test_name_with_multiple_dots() {
        assert_eq!(
            conflict_copy_name("archive.tar.gz", when()),
            "archive.tar.conflict-20260714-093055.gz"
        );
    }

    #[test]
    fn test_unique_name_avoids_collision() {
        let taken = conflict_copy_name("x.txt", when());
        let name = unique_conflict_copy_name("x.txt", when(), |candidate| candidate == taken);
        assert_ne!(name, taken);
        assert!(name.contains(".conflict-20260714-093055"));
    }

    #[test]
    fn test_find_conflict_copies() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("x.txt");
        std::fs::write(&original, b"current").unwrap();
        std::fs::write(
            dir.path().join("x.conflict-20260714-093055.txt"),
            b"older local",
        )
        .unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"nope").unwrap();

        let copies = find_conflict_copies(&original);
        assert_eq!(copies.len(), 1);
        assert!(copies[0]
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("x.conflict-"));
    }

    #[test]
    fn test_find_conflict_copies_empty_for_clean_dir() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("x.txt");
        std::fs::write(&original, b"current").unwrap();
        assert!(find_conflict_copies(&original).is_empty());
    }
}
