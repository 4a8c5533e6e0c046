//! Mock rules: a matcher bound to a response handler and a delay.

use crate::error::MockError;
use crate::matcher::{MatchResult, RequestMatcher};
use crate::request::Request;
use crate::response::ResponseHandler;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Anything the registry can hold and test against a request.
pub trait SessionMock: Send + Sync {
    /// `true` if this mock would answer `request`.
    fn matches(&self, request: &Request) -> bool;
}

/// Everything a task needs to answer a request once a rule has matched it.
#[derive(Clone)]
pub struct Consumed {
    pub extractions: Vec<String>,
    pub handler: ResponseHandler,
    pub delay: Duration,
}

impl fmt::Debug for Consumed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumed")
            .field("extractions", &self.extractions)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// A registered mock. Rules have no structural equality; the registry tells
/// them apart by the `RuleId` it assigns.
pub struct MockRule {
    matcher: Box<dyn RequestMatcher>,
    handler: ResponseHandler,
    delay: Duration,
    single_use: bool,
    spent: AtomicBool,
}

impl MockRule {
    pub fn new(matcher: Box<dyn RequestMatcher>, handler: ResponseHandler, delay: Duration) -> Self {
        Self {
            matcher,
            handler,
            delay,
            single_use: false,
            spent: AtomicBool::new(false),
        }
    }

    /// Allow a single successful `consume`; later calls fail with
    /// `MockError::HasAlreadyRun`.
    pub fn single_use(mut self) -> Self {
        self.single_use = true;
        self
    }

    pub fn is_single_use(&self) -> bool {
        self.single_use
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Resolve the extractions for `request`.
    ///
    /// Callers only get here after the registry reported a match, but the
    /// match is re-checked rather than trusted.
    pub fn consume(&self, request: &Request) -> Result<Consumed, MockError> {
        match self.matcher.matches(request) {
            MatchResult::NoMatch => Err(MockError::InvalidRequest(request.debug_description())),
            MatchResult::Matches(_) if self.single_use && self.spent.swap(true, Ordering::AcqRel) => {
                Err(MockError::HasAlreadyRun)
            }
            MatchResult::Matches(extractions) => Ok(Consumed {
                extractions,
                handler: self.handler.clone(),
                delay: self.delay,
            }),
        }
    }
}

impl SessionMock for MockRule {
    fn matches(&self, request: &Request) -> bool {
        self.matcher.matches(request).is_match()
    }
}

impl fmt::Debug for MockRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRule")
            .field("delay", &self.delay)
            .field("single_use", &self.single_use)
            .finish_non_exhaustive()
    }
}
