//! Skip filters and filename validation
//!
//! Decides which local paths participate in a sync cycle. Skips are
//! configuration-driven (dotfiles, glob patterns, size cap); conflict
//! copies and in-flight `.partial` files are always excluded. Names the
//! remote would reject are reported separately so the scanner can warn.

use glob::Pattern;
use onedrift_core::config::FilterConfig;

/// Windows-reserved device names the remote rejects regardless of extension
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters the remote forbids in item names
const INVALID_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

// ============================================================================
// Filename validation
// ============================================================================

/// Check whether a name is acceptable on the remote
///
/// Rejects Windows-reserved device names (with or without an extension),
/// forbidden characters, and trailing dots or spaces.
pub fn validate_remote_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name is empty".to_string());
    }

    if let Some(c) = name.chars().find(|c| INVALID_CHARS.contains(c)) {
        return Err(format!("name contains forbidden character '{c}'"));
    }

    if name.ends_with('.') || name.ends_with(' ') {
        return Err("name ends with a dot or space".to_string());
    }

    let stem = name.split('.').next().unwrap_or(name);
    if RESERVED_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(stem))
    {
        return Err(format!("'{stem}' is a reserved device name"));
    }

    Ok(())
}

/// Returns true for conflict-copy names: `stem.conflict-YYYYMMDD-HHMMSS.ext`
#[must_use]
pub fn is_conflict_copy(name: &str) -> bool {
    let Some(idx) = name.find(".conflict-") else {
        return false;
    };
    let tail = &name[idx + ".conflict-".len()..];
    // Timestamp shape: 8 digits, '-', 6 digits.
    let mut chars = tail.chars();
    let date_ok = chars.by_ref().take(8).filter(|c| c.is_ascii_digit()).count() == 8;
    let dash_ok = chars.next() == Some('-');
    let time_ok = chars.by_ref().take(6).filter(|c| c.is_ascii_digit()).count() == 6;
    date_ok && dash_ok && time_ok
}

// ============================================================================
// SkipFilter
// ============================================================================

/// Why the scanner left a path out of the cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// Participates in the sync cycle
    Include,
    /// Excluded by configuration or engine-internal naming; the reason
    /// names the rule, e.g. `skip_dirs: "node_modules"`
    Skip(String),
    /// The name would be rejected by the remote; warn and skip
    InvalidName(String),
}

/// Compiled skip rules for one scan
pub struct SkipFilter {
    skip_dotfiles: bool,
    skip_files: Vec<Pattern>,
    skip_dirs: Vec<Pattern>,
    max_file_size: u64,
}

impl SkipFilter {
    /// Compile the configured filter set
    ///
    /// # Errors
    /// Returns an error naming the first malformed glob pattern.
    pub fn new(config: &FilterConfig) -> Result<Self, String> {
        let compile = |patterns: &[String], field: &str| -> Result<Vec<Pattern>, String> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| format!("invalid {field} pattern '{p}': {e}"))
                })
                .collect()
        };

        Ok(Self {
            skip_dotfiles: config.skip_dotfiles,
            skip_files: compile(&config.skip_files, "skip_files")?,
            skip_dirs: compile(&config.skip_dirs, "skip_dirs")?,
            max_file_size: config.max_file_size,
        })
    }

    /// Decide whether a directory participates
    #[must_use]
    pub fn check_dir(&self, name: &str) -> FilterDecision {
        if self.skip_dotfiles && name.starts_with('.') {
            return FilterDecision::Skip("skip_dotfiles".to_string());
        }
        if let Some(pattern) = self.skip_dirs.iter().find(|p| p.matches(name)) {
            return FilterDecision::Skip(format!("skip_dirs: \"{}\"", pattern.as_str()));
        }
        if let Err(reason) = validate_remote_name(name) {
            return FilterDecision::InvalidName(reason);
        }
        FilterDecision::Include
    }

    /// Decide whether a file participates
    #[must_use]
    pub fn check_file(&self, name: &str, size: u64) -> FilterDecision {
        if name.ends_with(".partial") {
            return FilterDecision::Skip("partial download".to_string());
        }
        if is_conflict_copy(name) {
            return FilterDecision::Skip("conflict copy".to_string());
        }
        if self.skip_dotfiles && name.starts_with('.') {
            return FilterDecision::Skip("skip_dotfiles".to_string());
        }
        if let Some(pattern) = self.skip_files.iter().find(|p| p.matches(name)) {
            return FilterDecision::Skip(format!("skip_files: \"{}\"", pattern.as_str()));
        }
        if self.max_file_size > 0 && size > self.max_file_size {
            return FilterDecision::Skip(format!(
                "max_file_size: {} > {}",
                size, self.max_file_size
            ));
        }
        if let Err(reason) = validate_remote_name(name) {
            return FilterDecision::InvalidName(reason);
        }
        FilterDecision::Include
    }

    /// Decide whether a baseline path is excluded by the current rules
    ///
    /// Used for rows that exist in the baseline but were not observed by
    /// the scan: an excluded path is stale (kept for review), never a
    /// local deletion. Returns the excluding rule, if any.
    #[must_use]
    pub fn excludes_path(&self, rel_path: &str, is_dir: bool, size: u64) -> Option<String> {
        let components: Vec<&str> = rel_path.split('/').filter(|c| !c.is_empty()).collect();
        let Some((last, ancestors)) = components.split_last() else {
            return None;
        };

        for dir in ancestors {
            if let FilterDecision::Skip(reason) | FilterDecision::InvalidName(reason) =
                self.check_dir(dir)
            {
                return Some(reason);
            }
        }

        let decision = if is_dir {
            self.check_dir(last)
        } else {
            self.check_file(last, size)
        };
        match decision {
            FilterDecision::Include => None,
            FilterDecision::Skip(reason) | FilterDecision::InvalidName(reason) => Some(reason),
        }
    }

    /// A stable fingerprint of the active rules, stored in the config
    /// snapshot so a later cycle can detect that the filter set changed.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!(
            "dotfiles={};files={};dirs={};max={}",
            self.skip_dotfiles,
            self.skip_files
                .iter()
                .map(Pattern::as_str)
                .collect::<Vec<_>>()
                .join(","),
            self.skip_dirs
                .iter()
                .map(Pattern::as_str)
                .collect::<Vec<_>>()
                .join(","),
            self.max_file_size
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(config: FilterConfig) -> SkipFilter {
        SkipFilter::new(&config).unwrap()
    }

    mod name_validation_tests {
        use super::*;

        #[test]
        fn test_plain_names_ok() {
            assert!(validate_remote_name("report.txt").is_ok());
            assert!(validate_remote_name("Photos 2026").is_ok());
        }

        #[test]
        fn test_reserved_names_rejected() {
            assert!(validate_remote_name("CON").is_err());
            assert!(validate_remote_name("con").is_err());
            assert!(validate_remote_name("PRN.txt").is_err());
            assert!(validate_remote_name("lpt9.log").is_err());
        }

        #[test]
        fn test_forbidden_chars_rejected() {
            for name in ["a:b", "a*b", "a?b", "a\"b", "a<b", "a>b", "a|b", "a\\b"] {
                assert!(validate_remote_name(name).is_err(), "{name}");
            }
        }

        #[test]
        fn test_trailing_dot_and_space_rejected() {
            assert!(validate_remote_name("name.").is_err());
            assert!(validate_remote_name("name ").is_err());
        }

        #[test]
        fn test_reserved_only_as_full_stem() {
            assert!(validate_remote_name("CONSOLE.txt").is_ok());
            assert!(validate_remote_name("auxiliary").is_ok());
        }
    }

    mod conflict_copy_tests {
        use super::*;

        #[test]
        fn test_detects_conflict_copies() {
            assert!(is_conflict_copy("x.conflict-20260714-093055.txt"));
            assert!(is_conflict_copy("Makefile.conflict-20260714-093055"));
        }

        #[test]
        fn test_rejects_lookalikes() {
            assert!(!is_conflict_copy("x.conflict-notadate.txt"));
            assert!(!is_conflict_copy("x.conflict-2026-0714.txt"));
            assert!(!is_conflict_copy("conflict-20260714-093055.txt"));
        }
    }

    mod skip_filter_tests {
        use super::*;

        #[test]
        fn test_default_includes_everything_normal() {
            let f = filter(FilterConfig::default());
            assert_eq!(f.check_file("a.txt", 10), FilterDecision::Include);
            assert_eq!(f.check_dir("docs"), FilterDecision::Include);
        }

        #[test]
        fn test_partial_files_always_skipped() {
            let f = filter(FilterConfig::default());
            assert!(matches!(
                f.check_file("movie.mkv.partial", 100),
                FilterDecision::Skip(_)
            ));
        }

        #[test]
        fn test_conflict_copies_always_skipped() {
            let f = filter(FilterConfig::default());
            assert!(matches!(
                f.check_file("x.conflict-20260714-093055.txt", 5),
                FilterDecision::Skip(_)
            ));
        }

        #[test]
        fn test_dotfiles() {
            let f = filter(FilterConfig {
                skip_dotfiles: true,
                ..Default::default()
            });
            assert!(matches!(f.check_file(".bashrc", 1), FilterDecision::Skip(_)));
            assert!(matches!(f.check_dir(".git"), FilterDecision::Skip(_)));
            assert_eq!(f.check_file("visible.txt", 1), FilterDecision::Include);
        }

        #[test]
        fn test_glob_patterns() {
            let f = filter(FilterConfig {
                skip_files: vec!["*.tmp".to_string(), "~*".to_string()],
                skip_dirs: vec!["node_modules".to_string()],
                ..Default::default()
            });
            assert!(matches!(f.check_file("x.tmp", 1), FilterDecision::Skip(_)));
            assert!(matches!(f.check_file("~lock", 1), FilterDecision::Skip(_)));
            assert!(matches!(
                f.check_dir("node_modules"),
                FilterDecision::Skip(_)
            ));
            assert_eq!(f.check_file("x.txt", 1), FilterDecision::Include);
        }

        #[test]
        fn test_max_file_size() {
            let f = filter(FilterConfig {
                max_file_size: 100,
                ..Default::default()
            });
            assert_eq!(f.check_file("small.bin", 100), FilterDecision::Include);
            assert!(matches!(
                f.check_file("big.bin", 101),
                FilterDecision::Skip(_)
            ));
        }

        #[test]
        fn test_invalid_name_reported_distinctly() {
            let f = filter(FilterConfig::default());
            assert!(matches!(
                f.check_file("CON.txt", 1),
                FilterDecision::InvalidName(_)
            ));
        }

        #[test]
        fn test_bad_glob_is_an_error() {
            let result = SkipFilter::new(&FilterConfig {
                skip_files: vec!["[".to_string()],
                ..Default::default()
            });
            assert!(result.is_err());
        }

        #[test]
        fn test_excludes_path_checks_ancestors() {
            let f = filter(FilterConfig {
                skip_dirs: vec!["node_modules".to_string()],
                ..Default::default()
            });
            assert!(f
                .excludes_path("node_modules/pkg/index.js", false, 10)
                .is_some());
            assert!(f.excludes_path("src/index.js", false, 10).is_none());
            assert!(f.excludes_path("node_modules", true, 0).is_some());
        }

        #[test]
        fn test_fingerprint_changes_with_rules() {
            let a = filter(FilterConfig::default()).fingerprint();
            let b = filter(FilterConfig {
                skip_dirs: vec!["target".to_string()],
                ..Default::default()
            })
            .fingerprint();
            assert_ne!(a, b);
        }
    }
}
