//! Local tree walker
//!
//! Produces the "local" side of the classifier's view: every file and
//! folder below the sync root that passes the skip filters, with
//! NFC-normalized slash-separated relative paths. Hashing is not done
//! here; the classifier requests it lazily per file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

use crate::filter::{FilterDecision, SkipFilter};

// ============================================================================
// Scan output types
// ============================================================================

/// Kind of a local entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalEntryKind {
    File,
    Folder,
}

/// One observed local file or folder
#[derive(Debug, Clone)]
pub struct LocalEntry {
    /// Path relative to the sync root: POSIX separators, NFC
    pub rel_path: String,
    pub kind: LocalEntryKind,
    /// Byte size (0 for folders)
    pub size: u64,
    /// Filesystem modification time
    pub mtime: Option<DateTime<Utc>>,
}

/// Result of one scan pass
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Entries that participate in the cycle, sorted by path
    pub entries: Vec<LocalEntry>,
    /// Human-readable warnings (invalid names, unreadable entries)
    pub warnings: Vec<String>,
}

// ============================================================================
// LocalScanner
// ============================================================================

/// Walks a sync root applying the configured skip filters
#[derive(Clone)]
pub struct LocalScanner {
    root: PathBuf,
    filter: Arc<SkipFilter>,
}

impl LocalScanner {
    /// Create a scanner over `root`
    pub fn new(root: impl Into<PathBuf>, filter: SkipFilter) -> Self {
        Self {
            root: root.into(),
            filter: Arc::new(filter),
        }
    }

    /// The sync root this scanner walks
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree synchronously
    ///
    /// Filesystem traversal is blocking I/O; callers on the async runtime
    /// should wrap this in `spawn_blocking`.
    pub fn scan(&self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        if !self.root.is_dir() {
            outcome
                .warnings
                .push(format!("sync root {} is not a directory", self.root.display()));
            return outcome;
        }

        let mut walker = WalkDir::new(&self.root).follow_links(false).into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    outcome.warnings.push(format!("scan error: {e}"));
                    continue;
                }
            };

            // The root itself is implicit.
            if entry.path() == self.root {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();

            if entry.file_type().is_dir() {
                match self.filter.check_dir(&name) {
                    FilterDecision::Include => {}
                    FilterDecision::Skip(reason) => {
                        debug!(path = %entry.path().display(), reason, "skipping directory");
                        walker.skip_current_dir();
                        continue;
                    }
                    FilterDecision::InvalidName(reason) => {
                        warn!(path = %entry.path().display(), reason, "invalid directory name, skipping subtree");
                        outcome.warnings.push(format!(
                            "invalid name '{}': {reason}",
                            entry.path().display()
                        ));
                        walker.skip_current_dir();
                        continue;
                    }
                }
            } else if entry.file_type().is_file() {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                match self.filter.check_file(&name, size) {
                    FilterDecision::Include => {}
                    FilterDecision::Skip(reason) => {
                        debug!(path = %entry.path().display(), reason, "skipping file");
                        continue;
                    }
                    FilterDecision::InvalidName(reason) => {
                        warn!(path = %entry.path().display(), reason, "invalid file name, skipping");
                        outcome.warnings.push(format!(
                            "invalid name '{}': {reason}",
                            entry.path().display()
                        ));
                        continue;
                    }
                }
            } else {
                // Symlinks and special files are not representable remotely.
                debug!(path = %entry.path().display(), "skipping non-regular entry");
                continue;
            }

            let Some(rel_path) = self.relative_path(entry.path()) else {
                outcome.warnings.push(format!(
                    "path {} escapes the sync root",
                    entry.path().display()
                ));
                continue;
            };

            let metadata = entry.metadata().ok();
            let mtime = metadata
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);

            outcome.entries.push(LocalEntry {
                rel_path,
                kind: if entry.file_type().is_dir() {
                    LocalEntryKind::Folder
                } else {
                    LocalEntryKind::File
                },
                size: if entry.file_type().is_dir() {
                    0
                } else {
                    metadata.map(|m| m.len()).unwrap_or(0)
                },
                mtime,
            });
        }

        outcome.entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        debug!(
            root = %self.root.display(),
            entries = outcome.entries.len(),
            warnings = outcome.warnings.len(),
            "local scan complete"
        );
        outcome
    }

    /// Relative path with POSIX separators in NFC
    fn relative_path(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let joined = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Some(joined.nfc().collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use onedrift_core::config::FilterConfig;

    fn scanner_for(root: &Path, config: FilterConfig) -> LocalScanner {
        LocalScanner::new(root, SkipFilter::new(&config).unwrap())
    }

    fn rel_paths(outcome: &ScanOutcome) -> Vec<&str> {
        outcome.entries.iter().map(|e| e.rel_path.as_str()).collect()
    }

    #[test]
    fn test_walks_nested_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/sub")).unwrap();
        std::fs::write(dir.path().join("docs/a.txt"), b"one").unwrap();
        std::fs::write(dir.path().join("docs/sub/b.txt"), b"two").unwrap();

        let outcome = scanner_for(dir.path(), FilterConfig::default()).scan();
        assert_eq!(
            rel_paths(&outcome),
            vec!["docs", "docs/a.txt", "docs/sub", "docs/sub/b.txt"]
        );

        let file = outcome
            .entries
            .iter()
            .find(|e| e.rel_path == "docs/a.txt")
            .unwrap();
        assert_eq!(file.kind, LocalEntryKind::File);
        assert_eq!(file.size, 3);
        assert!(file.mtime.is_some());
    }

    #[test]
    fn test_skipped_dir_prunes_subtree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), b"x").unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"y").unwrap();

        let outcome = scanner_for(
            dir.path(),
            FilterConfig {
                skip_dirs: vec!["node_modules".to_string()],
                ..Default::default()
            },
        )
        .scan();
        assert_eq!(rel_paths(&outcome), vec!["keep.txt"]);
    }

    #[test]
    fn test_partials_and_conflict_copies_excluded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("movie.mkv.partial"), b"x").unwrap();
        std::fs::write(dir.path().join("x.conflict-20260714-093055.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("x.txt"), b"x").unwrap();

        let outcome = scanner_for(dir.path(), FilterConfig::default()).scan();
        assert_eq!(rel_paths(&outcome), vec!["x.txt"]);
    }

    #[test]
    fn test_invalid_name_warns_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a:b.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("fine.txt"), b"x").unwrap();

        let outcome = scanner_for(dir.path(), FilterConfig::default()).scan();
        assert_eq!(rel_paths(&outcome), vec!["fine.txt"]);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("forbidden character"));
    }

    #[test]
    fn test_nfc_normalization() {
        let dir = tempfile::tempdir().unwrap();
        // NFD spelling: 'e' + combining acute accent.
        let decomposed = "cafe\u{0301}.txt";
        std::fs::write(dir.path().join(decomposed), b"x").unwrap();

        let outcome = scanner_for(dir.path(), FilterConfig::default()).scan();
        assert_eq!(outcome.entries.len(), 1);
        // NFC spelling: precomposed 'é'.
        assert_eq!(outcome.entries[0].rel_path, "caf\u{00e9}.txt");
    }

    #[test]
    fn test_missing_root_warns() {
        let outcome =
            scanner_for(Path::new("/nonexistent/sync/root"), FilterConfig::default()).scan();
        assert!(outcome.entries.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }
}
