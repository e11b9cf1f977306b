//! Include/exclude rules for Nimbus listings
//!
//! A [`Filter`] holds an ordered list of include/exclude glob rules plus
//! size and age bounds and an optional explicit allow-list. Rules are
//! evaluated top-down and the first match wins; when at least one include
//! rule exists, paths matching no rule are excluded, otherwise they are
//! included.
//!
//! Patterns containing a `/` match against the whole relative path with
//! literal separators; patterns without one match against the final path
//! component at any depth.

#![deny(missing_docs)]
#![warn(clippy::all)]

use glob::{MatchOptions, Pattern, PatternError};
use nimbus_types::{Error, Result};
use std::collections::HashSet;
use std::time::{Duration, SystemTime};
use tracing::trace;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// What a matching rule does with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleAction {
    Include,
    Exclude,
}

#[derive(Debug, Clone)]
struct Rule {
    action: RuleAction,
    pattern: Pattern,
    whole_path: bool,
}

impl Rule {
    fn matches(&self, path: &str) -> bool {
        let subject = if self.whole_path {
            path
        } else {
            path.rsplit_once('/').map_or(path, |(_, name)| name)
        };
        self.pattern.matches_with(subject, MATCH_OPTIONS)
    }
}

/// Ordered include/exclude rules with size and age bounds
#[derive(Debug, Clone, Default)]
pub struct Filter {
    rules: Vec<Rule>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    min_age: Option<Duration>,
    max_age: Option<Duration>,
    files_from: Option<HashSet<String>>,
}

impl Filter {
    /// A filter that includes everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an include rule
    pub fn add_include(&mut self, pattern: &str) -> Result<()> {
        self.add_rule(RuleAction::Include, pattern)
    }

    /// Append an exclude rule
    pub fn add_exclude(&mut self, pattern: &str) -> Result<()> {
        self.add_rule(RuleAction::Exclude, pattern)
    }

    fn add_rule(&mut self, action: RuleAction, pattern: &str) -> Result<()> {
        let whole_path = pattern.contains('/');
        let pattern = Pattern::new(pattern.trim_start_matches('/'))
            .map_err(|e: PatternError| Error::usage(format!("bad filter pattern: {}", e)))?;
        self.rules.push(Rule {
            action,
            pattern,
            whole_path,
        });
        Ok(())
    }

    /// Only consider objects at least this large
    pub fn with_min_size(mut self, size: Option<u64>) -> Self {
        self.min_size = size;
        self
    }

    /// Only consider objects at most this large
    pub fn with_max_size(mut self, size: Option<u64>) -> Self {
        self.max_size = size;
        self
    }

    /// Only consider objects at least this old
    pub fn with_min_age(mut self, age: Option<Duration>) -> Self {
        self.min_age = age;
        self
    }

    /// Only consider objects at most this old
    pub fn with_max_age(mut self, age: Option<Duration>) -> Self {
        self.max_age = age;
        self
    }

    /// Restrict to an explicit list of paths
    pub fn with_files_from<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files_from = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Whether no rule or bound is active
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
            && self.min_size.is_none()
            && self.max_size.is_none()
            && self.min_age.is_none()
            && self.max_age.is_none()
            && self.files_from.is_none()
    }

    /// Whether a path passes the name-based rules
    pub fn include_path(&self, path: &str) -> bool {
        if let Some(allowed) = &self.files_from {
            if !allowed.contains(path) {
                return false;
            }
        }
        for rule in &self.rules {
            if rule.matches(path) {
                return rule.action == RuleAction::Include;
            }
        }
        // With include rules present, anything unmatched is excluded.
        !self.rules.iter().any(|r| r.action == RuleAction::Include)
    }

    /// Whether an object passes the rules plus size and age bounds
    pub fn include_object(
        &self,
        path: &str,
        size: Option<u64>,
        mod_time: Option<SystemTime>,
    ) -> bool {
        if !self.include_path(path) {
            trace!(path, "excluded by rules");
            return false;
        }
        if let (Some(min), Some(size)) = (self.min_size, size) {
            if size < min {
                return false;
            }
        }
        if let (Some(max), Some(size)) = (self.max_size, size) {
            if size > max {
                return false;
            }
        }
        if self.min_age.is_some() || self.max_age.is_some() {
            if let Some(mod_time) = mod_time {
                let age = SystemTime::now()
                    .duration_since(mod_time)
                    .unwrap_or(Duration::ZERO);
                if let Some(min) = self.min_age {
                    if age < min {
                        return false;
                    }
                }
                if let Some(max) = self.max_age {
                    if age > max {
                        return false;
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_includes_everything() {
        let filter = Filter::new();
        assert!(filter.is_empty());
        assert!(filter.include_path("anything/at/all"));
    }

    #[test]
    fn test_first_match_wins() {
        let mut filter = Filter::new();
        filter.add_include("*.txt").unwrap();
        filter.add_exclude("*").unwrap();

        assert!(filter.include_path("notes.txt"));
        assert!(filter.include_path("deep/notes.txt"));
        assert!(!filter.include_path("image.png"));
    }

    #[test]
    fn test_include_rules_exclude_the_rest() {
        let mut filter = Filter::new();
        filter.add_include("keep/*").unwrap();

        assert!(filter.include_path("keep/a"));
        assert!(!filter.include_path("drop/a"));
    }

    #[test]
    fn test_exclude_only_keeps_the_rest() {
        let mut filter = Filter::new();
        filter.add_exclude("*.tmp").unwrap();

        assert!(!filter.include_path("scratch.tmp"));
        assert!(filter.include_path("keep.dat"));
    }

    #[test]
    fn test_slash_patterns_match_whole_path() {
        let mut filter = Filter::new();
        filter.add_exclude("build/*").unwrap();

        assert!(!filter.include_path("build/out"));
        // `*` does not cross separators in whole-path patterns.
        assert!(filter.include_path("build/deep/out"));
        assert!(filter.include_path("other/build"));
    }

    #[test]
    fn test_size_bounds() {
        let filter = Filter::new().with_min_size(Some(10)).with_max_size(Some(100));

        assert!(!filter.include_object("small", Some(5), None));
        assert!(filter.include_object("mid", Some(50), None));
        assert!(!filter.include_object("big", Some(500), None));
        // Unknown sizes pass the bounds.
        assert!(filter.include_object("unknown", None, None));
    }

    #[test]
    fn test_age_bounds() {
        let now = SystemTime::now();
        let filter = Filter::new().with_min_age(Some(Duration::from_secs(60)));

        assert!(!filter.include_object("fresh", None, Some(now)));
        assert!(filter.include_object(
            "old",
            None,
            Some(now - Duration::from_secs(3600))
        ));
    }

    #[test]
    fn test_files_from_allow_list() {
        let filter = Filter::new().with_files_from(["a/x", "b/y"]);

        assert!(filter.include_path("a/x"));
        assert!(!filter.include_path("a/z"));
    }

    #[test]
    fn test_bad_pattern_is_usage_error() {
        let mut filter = Filter::new();
        assert!(filter.add_include("[unclosed").is_err());
    }
}
