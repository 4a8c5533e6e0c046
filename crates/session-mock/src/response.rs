//! Response specifications and the `Mock` registration builder.

use crate::config::MockConfig;
use crate::error::{MockError, NetworkError};
use crate::matcher::{RequestMatcher, SimpleRequestMatcher};
use crate::request::Request;
use crate::rule::MockRule;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What a mocked request resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSpec {
    Success {
        status_code: u16,
        headers: HashMap<String, String>,
        /// `None` skips the data delivery step entirely
        body: Option<Bytes>,
    },
    Failure {
        error: NetworkError,
        /// Falls back to `MockConfig::failure_status_code` when unset
        status_code: Option<u16>,
    },
}

impl ResponseSpec {
    pub fn success(
        status_code: u16,
        headers: HashMap<String, String>,
        body: Option<impl Into<Bytes>>,
    ) -> Self {
        ResponseSpec::Success {
            status_code,
            headers,
            body: body.map(Into::into),
        }
    }

    /// 200 with no headers
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::success(200, HashMap::new(), Some(body))
    }

    pub fn failure(error: NetworkError) -> Self {
        ResponseSpec::Failure {
            error,
            status_code: None,
        }
    }

    pub fn failure_with_status(error: NetworkError, status_code: u16) -> Self {
        ResponseSpec::Failure {
            error,
            status_code: Some(status_code),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ResponseSpec::Failure { .. })
    }
}

/// Computes a response from the matched URL and its extractions.
///
/// Called once per consumed match, when the task is resumed.
pub type ResponseHandler = Arc<dyn Fn(&str, &[String]) -> ResponseSpec + Send + Sync>;

/// Builder describing a mock before it is registered.
///
/// ```
/// use session_mock::{Mock, Request};
/// use std::time::Duration;
///
/// let mock = Mock::request(&Request::get("https://example.com/1"))
///     .body("hello")
///     .header("Content-Type", "text/plain")
///     .delay(Duration::ZERO);
/// ```
pub struct Mock {
    matcher: Box<dyn RequestMatcher>,
    status_code: Option<u16>,
    headers: HashMap<String, String>,
    body: Option<Bytes>,
    failure: Option<NetworkError>,
    handler: Option<ResponseHandler>,
    delay: Option<Duration>,
}

impl Mock {
    /// Mock requests with exactly this URL and method.
    pub fn request(request: &Request) -> Self {
        Self::matching(SimpleRequestMatcher::exact(&request.url, request.method.clone()))
    }

    /// Mock requests whose URL contains a match for `expression`.
    pub fn expression(expression: &str, method: impl Into<String>) -> Result<Self, MockError> {
        Ok(Self::matching(SimpleRequestMatcher::pattern(
            expression, method,
        )?))
    }

    pub fn matching(matcher: impl RequestMatcher + 'static) -> Self {
        Self {
            matcher: Box::new(matcher),
            status_code: None,
            headers: HashMap::new(),
            body: None,
            failure: None,
            handler: None,
            delay: None,
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Respond with a failure instead of a body.
    pub fn fail_with(mut self, error: NetworkError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Compute the response when the task runs. Overrides any fixed
    /// body, headers, status or failure set on this builder.
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &[String]) -> ResponseSpec + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn into_rule(self, config: &MockConfig) -> MockRule {
        let delay = self.delay.unwrap_or_else(|| config.default_delay());
        let handler = match (self.handler, self.failure) {
            (Some(handler), _) => handler,
            (None, Some(error)) => fixed(ResponseSpec::Failure {
                error,
                status_code: self.status_code,
            }),
            (None, None) => fixed(ResponseSpec::Success {
                status_code: self.status_code.unwrap_or(200),
                headers: self.headers,
                body: self.body,
            }),
        };
        MockRule::new(self.matcher, handler, delay)
    }
}

fn fixed(spec: ResponseSpec) -> ResponseHandler {
    Arc::new(move |_url, _extractions| spec.clone())
}

impl fmt::Debug for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mock")
            .field("status_code", &self.status_code)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .field("failure", &self.failure)
            .field("dynamic", &self.handler.is_some())
            .field("delay", &self.delay)
            .finish()
    }
}
