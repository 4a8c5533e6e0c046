//! In-process HTTP session mocking.
//!
//! Requests made through an [`HttpSession`] are matched against registered
//! mocks. A match is answered with a synthetic response delivered the way a
//! real round-trip would be: after a delay, headers then body then
//! completion, and cancellable until the response arrives. Everything else
//! is handed to the wrapped session.
//!
//! # Example
//!
//! ```no_run
//! use session_mock::{send, Interceptor, Mock, MockSession, Request};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let interceptor = Arc::new(Interceptor::new());
//! let session = MockSession::offline(Arc::clone(&interceptor));
//!
//! let request = Request::get("https://example.com/1");
//! let handle = interceptor.mock_next(Mock::request(&request).body("hello"));
//!
//! let (body, response) = send(&session, request).await.unwrap();
//! assert_eq!(response.status_code, 200);
//! assert_eq!(body.as_deref(), Some(&b"hello"[..]));
//! assert!(interceptor.has_mock_consumed(&handle));
//! # }
//! ```

mod config;
mod error;
mod interceptor;
mod matcher;
mod registry;
mod request;
mod response;
mod rule;
mod session;
mod task;

pub use config::{DebugLevel, MockConfig};
pub use error::{MockError, NetworkError};
pub use interceptor::{EvaluationResult, Handle, Interception, Interceptor, RequestEvaluator};
pub use matcher::{MatchResult, RequestMatcher, SimpleRequestMatcher};
pub use registry::{Matched, MockRegistry, RuleId};
pub use request::{HttpResponse, Request};
pub use response::{Mock, ResponseHandler, ResponseSpec};
pub use rule::{Consumed, MockRule, SessionMock};
pub use session::{send, HttpSession, MockSession, OfflineSession};
pub use task::{CompletionHandler, DataTask, Delivery, MockedTask, SessionDelegate, TaskId, TaskState};

// Error codes for callers that inspect `NetworkError::code`
pub use error::{
    URL_ERROR_BAD_SERVER_RESPONSE, URL_ERROR_CANCELLED, URL_ERROR_DOMAIN, URL_ERROR_NOT_CONNECTED,
};
