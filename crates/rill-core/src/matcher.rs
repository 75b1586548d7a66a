//! Pattern matcher capability.
//!
//! A matcher is built from globs, literal paths, or predicate functions,
//! with `!`-prefixed globs acting as exclusions. Paths are matched relative
//! to the matcher's base directory with forward slashes, so the same
//! patterns work across platforms.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::pathx;
use crate::{Error, Result};

/// A single pattern inside a [`Matcher`].
#[derive(Clone)]
pub enum Pattern {
    /// Glob pattern, matched against the slash-normalized relative path.
    Glob { raw: String, compiled: glob::Pattern },
    /// Literal file or directory prefix.
    Path(PathBuf),
    /// Arbitrary predicate.
    Predicate(Arc<dyn Fn(&Path) -> bool + Send + Sync>),
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Glob { raw, .. } => write!(f, "Glob({:?})", raw),
            Pattern::Path(p) => write!(f, "Path({:?})", p),
            Pattern::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// Composite matcher with include and exclude pattern sets.
///
/// An empty include set matches everything, so a matcher built purely from
/// exclusions acts as a filter.
#[derive(Debug, Clone)]
pub struct Matcher {
    base: PathBuf,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

pub(crate) fn match_options() -> glob::MatchOptions {
    let mut options = glob::MatchOptions::new();
    options.require_literal_separator = true;
    options
}

impl Matcher {
    /// Create an empty matcher rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Build a matcher from glob patterns; `!`-prefixed entries exclude.
    pub fn from_patterns(patterns: &[&str], base: &Path) -> Result<Self> {
        let mut matcher = Matcher::new(base);
        for pat in patterns {
            if let Some(negated) = pat.strip_prefix('!') {
                matcher.add_exclude_glob(negated)?;
            } else {
                matcher.add_glob(pat)?;
            }
        }
        Ok(matcher)
    }

    pub fn add_glob(&mut self, pattern: &str) -> Result<&mut Self> {
        self.include.push(compile_glob(pattern)?);
        Ok(self)
    }

    pub fn add_exclude_glob(&mut self, pattern: &str) -> Result<&mut Self> {
        self.exclude.push(compile_glob(pattern)?);
        Ok(self)
    }

    pub fn add_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.include.push(Pattern::Path(path.into()));
        self
    }

    /// Exclude a literal file or directory prefix.
    pub fn add_exclude_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.exclude.push(Pattern::Path(path.into()));
        self
    }

    pub fn add_predicate(
        &mut self,
        predicate: impl Fn(&Path) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.include.push(Pattern::Predicate(Arc::new(predicate)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Test a path against the matcher.
    pub fn matches_path(&self, path: &Path) -> bool {
        let resolved = pathx::resolve_path(&self.base, path);
        let rel = if pathx::in_dir(&self.base, &resolved) {
            pathx::relative_path(&self.base, &resolved)
        } else {
            resolved.clone()
        };
        let rel_str = pathx::to_slash_string(&rel);

        let included = self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| pattern_matches(p, &resolved, &rel_str));
        included
            && !self
                .exclude
                .iter()
                .any(|p| pattern_matches(p, &resolved, &rel_str))
    }
}

fn compile_glob(pattern: &str) -> Result<Pattern> {
    let compiled = glob::Pattern::new(pattern).map_err(|e| Error::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    Ok(Pattern::Glob {
        raw: pattern.to_string(),
        compiled,
    })
}

fn pattern_matches(pattern: &Pattern, resolved: &Path, rel_str: &str) -> bool {
    match pattern {
        Pattern::Glob { compiled, .. } => compiled.matches_with(rel_str, match_options()),
        Pattern::Path(p) => pathx::path_equals(p, resolved) || pathx::in_dir(p, resolved),
        Pattern::Predicate(f) => f(resolved),
    }
}
