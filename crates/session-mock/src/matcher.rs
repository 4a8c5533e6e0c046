//! Request matching.
//!
//! A matcher decides whether a request belongs to a mock and, if it does,
//! which parts of the URL were captured along the way. Captures feed dynamic
//! response handlers (see `response::ResponseHandler`).

use crate::error::MockError;
use crate::request::Request;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;

/// Outcome of matching a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    /// Capture groups of every occurrence, in order. Group 0 is never included.
    Matches(Vec<String>),
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matches(_))
    }
}

/// Something that can decide whether a request should be mocked.
pub trait RequestMatcher: Send + Sync {
    fn matches(&self, request: &Request) -> MatchResult;
}

/// How the URL half of a `SimpleRequestMatcher` is tested.
#[derive(Debug, Clone)]
enum UrlMatch {
    /// Whole-string equality; never captures anything
    Exact(String),
    Pattern(Arc<Regex>),
}

/// Matches on HTTP method equality plus a test over the URL.
#[derive(Debug, Clone)]
pub struct SimpleRequestMatcher {
    url: UrlMatch,
    method: String,
}

impl SimpleRequestMatcher {
    /// Match exactly this URL (the whole string) and method.
    pub fn exact(url: &str, method: impl Into<String>) -> Self {
        Self {
            url: UrlMatch::Exact(url.to_string()),
            method: method.into(),
        }
    }

    /// Match any URL containing at least one occurrence of `expression`.
    pub fn pattern(expression: &str, method: impl Into<String>) -> Result<Self, MockError> {
        let url_pattern = compile(expression).map_err(|source| MockError::Pattern {
            expression: expression.to_string(),
            source,
        })?;
        Ok(Self {
            url: UrlMatch::Pattern(Arc::new(url_pattern)),
            method: method.into(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The pattern, or the literal URL for an exact matcher
    pub fn expression(&self) -> &str {
        match &self.url {
            UrlMatch::Exact(url) => url,
            UrlMatch::Pattern(pattern) => pattern.as_str(),
        }
    }
}

impl RequestMatcher for SimpleRequestMatcher {
    fn matches(&self, request: &Request) -> MatchResult {
        if request.method != self.method {
            return MatchResult::NoMatch;
        }

        let url_pattern = match &self.url {
            UrlMatch::Exact(url) if *url == request.url => return MatchResult::Matches(Vec::new()),
            UrlMatch::Exact(_) => return MatchResult::NoMatch,
            UrlMatch::Pattern(pattern) => pattern,
        };

        let mut occurrences = 0usize;
        let mut extractions = Vec::new();
        for captures in url_pattern.captures_iter(&request.url) {
            occurrences += 1;
            // Groups that didn't take part in this occurrence still hold their slot
            extractions.extend(
                captures
                    .iter()
                    .skip(1)
                    .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default()),
            );
        }

        if occurrences == 0 {
            MatchResult::NoMatch
        } else {
            MatchResult::Matches(extractions)
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).multi_line(true).build()
}
