// erpload/src/catalog/matcher.rs
use regex::{Regex, RegexBuilder};

use crate::errors::{AppError, Result};

const WILDCARDS: [char; 2] = ['%', '*'];

/// Instance-name patterns compiled once per engine run.
///
/// A pattern without a wildcard matches anywhere in the candidate. A pattern
/// with `%` or `*` is an anchored glob whose literal segments must appear in
/// order. An empty pattern set accepts every candidate.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    patterns: Vec<Pattern>,
}

#[derive(Debug, Clone)]
enum Pattern {
    Substring(String),
    Regex(Regex),
}

impl NameMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S], case_insensitive: bool) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Pattern::compile(p.as_ref(), case_insensitive))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Matcher that accepts everything.
    #[cfg(test)]
    pub fn accept_all() -> Self {
        Self { patterns: Vec::new() }
    }

    pub fn matches_any(&self, candidate: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(candidate))
    }
}

impl Pattern {
    fn compile(pattern: &str, case_insensitive: bool) -> Result<Self> {
        if !pattern.contains(WILDCARDS) {
            return Ok(if case_insensitive {
                Pattern::Regex(build_regex(&regex::escape(pattern), pattern, true)?)
            } else {
                Pattern::Substring(pattern.to_string())
            });
        }
        let body = pattern
            .split(WILDCARDS)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let re = build_regex(&format!("^{}$", body), pattern, case_insensitive)?;
        Ok(Pattern::Regex(re))
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            Pattern::Substring(s) => candidate.contains(s.as_str()),
            Pattern::Regex(re) => re.is_match(candidate),
        }
    }
}

fn build_regex(expr: &str, pattern: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(expr)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| AppError::InvalidInput(format!("bad instance pattern '{}': {}", pattern, e)))
}
