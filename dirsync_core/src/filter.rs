use dirsync_common::SyncError;
use glob::Pattern;
use std::path::Path;

/// Exclude filter built from glob patterns.
///
/// A path matching any pattern is skipped by the diff walk together with
/// everything below it, since recursion never reaches excluded children.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    patterns: Vec<Pattern>,
}

impl PathFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exclude pattern (glob syntax).
    pub fn exclude(mut self, pattern: &str) -> Result<Self, SyncError> {
        let compiled = Pattern::new(pattern).map_err(|e| {
            SyncError::Config(format!("Invalid exclude pattern '{}': {}", pattern, e))
        })?;
        self.patterns.push(compiled);
        Ok(self)
    }

    /// Build a filter from a pattern list (e.g. from [`AppConfig`]).
    ///
    /// [`AppConfig`]: dirsync_common::AppConfig
    pub fn from_patterns(patterns: &[String]) -> Result<Self, SyncError> {
        let mut filter = Self::new();
        for pattern in patterns {
            filter = filter.exclude(pattern)?;
        }
        Ok(filter)
    }

    /// True when `path` should be skipped.
    pub fn matches(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.patterns.iter().any(|pattern| pattern.matches(&path_str))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_glob() {
        let filter = PathFilter::new().exclude("*.o").unwrap();
        assert!(filter.matches(Path::new("/obj/main.o")));
        assert!(!filter.matches(Path::new("/src/main.rs")));
    }

    #[test]
    fn test_filter_matches_subtree_prefix() {
        let filter = PathFilter::new().exclude("/target*").unwrap();
        assert!(filter.matches(Path::new("/target")));
        assert!(filter.matches(Path::new("/target/debug")));
        assert!(!filter.matches(Path::new("/src")));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let filter = PathFilter::new();
        assert!(filter.is_empty());
        assert!(!filter.matches(Path::new("/anything")));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = PathFilter::new().exclude("[").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
