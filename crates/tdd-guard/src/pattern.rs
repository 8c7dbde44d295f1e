//! Enforcement scope matching.
//!
//! A file is subject to the TDD gate when its project-relative path matches
//! at least one enforcement glob. Globs use shell semantics: `*` matches
//! within a single path segment, `**` matches any number of segments.

use std::path::Path;

use glob::{MatchOptions, Pattern, PatternError};

/// `*` and `?` never cross a `/`; only `**` spans directories.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Returns true if `file_path` matches any of `patterns`.
///
/// An empty pattern list matches nothing. Patterns that fail to compile are
/// skipped.
pub fn matches(file_path: &str, patterns: &[String]) -> bool {
    let path = normalize_separators(file_path);
    patterns
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .any(|p| p.matches_with(&path, MATCH_OPTIONS))
}

/// A compiled, ordered set of enforcement globs.
#[derive(Clone, Debug, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    /// Compile every pattern, failing on the first invalid glob.
    pub fn compile<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Pattern::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Returns true if no patterns are present.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The source text of each pattern, in order.
    pub fn as_strs(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }

    /// Returns true if `file_path` matches any pattern in the set.
    pub fn matches(&self, file_path: &str) -> bool {
        let path = normalize_separators(file_path);
        self.patterns
            .iter()
            .any(|p| p.matches_with(&path, MATCH_OPTIONS))
    }
}

/// Express `file_path` relative to `project_root` when it lies beneath it.
///
/// Paths outside the root (or already relative) are returned unchanged.
pub fn project_relative(file_path: &str, project_root: &Path) -> String {
    let path = Path::new(file_path);
    if path.is_absolute()
        && let Ok(rel) = path.strip_prefix(project_root)
    {
        return normalize_separators(&rel.to_string_lossy());
    }
    normalize_separators(file_path)
}

fn normalize_separators(path: &str) -> String {
    let path = path.replace('\\', "/");
    match path.strip_prefix("./") {
        Some(rest) => rest.to_string(),
        None => path,
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pats(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_patterns_match_nothing() {
        assert!(!matches("src/a.ts", &[]));
        assert!(!PatternSet::default().matches("src/a.ts"));
    }

    #[test]
    fn test_double_star_spans_directories() {
        let patterns = pats(&["src/**"]);
        assert!(matches("src/a.ts", &patterns));
        assert!(matches("src/deep/nested/a.ts", &patterns));
        assert!(!matches("docs/readme.md", &patterns));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let patterns = pats(&["src/*.ts"]);
        assert!(matches("src/a.ts", &patterns));
        assert!(!matches("src/nested/a.ts", &patterns));
    }

    #[test]
    fn test_extension_anywhere() {
        let patterns = pats(&["**/*.rs"]);
        assert!(matches("crates/core/src/lib.rs", &patterns));
        assert!(!matches("crates/core/Cargo.toml", &patterns));
    }

    #[test]
    fn test_any_pattern_wins() {
        let patterns = pats(&["lib/**", "src/**"]);
        assert!(matches("src/a.ts", &patterns));
        assert!(matches("lib/b.ts", &patterns));
        assert!(!matches("test/c.ts", &patterns));
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let patterns = pats(&["src/a**b", "src/**"]);
        assert!(matches("src/a.ts", &patterns));
        assert!(PatternSet::compile(["src/a**b"]).is_err());
    }

    #[test]
    fn test_windows_separators_normalized() {
        let set = PatternSet::compile(["src/**"]).unwrap();
        assert!(set.matches("src\\nested\\a.ts"));
        assert!(set.matches("./src/a.ts"));
    }

    #[test]
    fn test_project_relative() {
        let root = Path::new("/work/project");
        assert_eq!(
            project_relative("/work/project/src/a.ts", root),
            "src/a.ts"
        );
        assert_eq!(project_relative("src/a.ts", root), "src/a.ts");
        assert_eq!(project_relative("/elsewhere/a.ts", root), "/elsewhere/a.ts");
    }

    #[test]
    fn test_pattern_set_preserves_order() {
        let set = PatternSet::compile(["b/**", "a/**"]).unwrap();
        let strs: Vec<_> = set.as_strs().collect();
        assert_eq!(strs, vec!["b/**", "a/**"]);
        assert!(!set.is_empty());
    }
}
