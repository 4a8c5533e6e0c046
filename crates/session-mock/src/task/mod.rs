//! Data tasks and the surfaces they deliver responses through.
//!
//! A task hands its response to exactly one consumer, picked when the task
//! is created:
//! - `Delivery::Completion`: a single callback receiving body, response and
//!   error together once the task finishes
//! - `Delivery::Delegate`: a session-level observer told about each stage
//!   (response headers, data, completion) separately
//! - `Delivery::Detached`: nobody is listening; the task still runs

mod mocked;

pub use mocked::MockedTask;

use crate::error::NetworkError;
use crate::request::{HttpResponse, Request};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifecycle of a data task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Suspended,
    Running,
    Canceling,
    Completed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Canceling | TaskState::Completed)
    }
}

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

// Starts well above anything a host session would hand out itself
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(100_000);

impl TaskId {
    pub fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Per-call completion callback: `(body, response, error)`.
pub type CompletionHandler =
    Box<dyn FnOnce(Option<Bytes>, Option<HttpResponse>, Option<NetworkError>) + Send>;

/// Session-level observer receiving each delivery stage separately.
///
/// Every method has an empty default body; implement the stages you need.
pub trait SessionDelegate: Send + Sync {
    fn did_receive_response(&self, _task: TaskId, _response: &HttpResponse) {}

    fn did_receive_data(&self, _task: TaskId, _data: &Bytes) {}

    fn did_complete(&self, _task: TaskId, _error: Option<&NetworkError>) {}
}

/// The consumer a task delivers to.
pub enum Delivery {
    Completion(CompletionHandler),
    Delegate(Arc<dyn SessionDelegate>),
    Detached,
}

impl Delivery {
    pub fn completion<F>(handler: F) -> Self
    where
        F: FnOnce(Option<Bytes>, Option<HttpResponse>, Option<NetworkError>) + Send + 'static,
    {
        Delivery::Completion(Box::new(handler))
    }

    pub fn delegate(delegate: Arc<dyn SessionDelegate>) -> Self {
        Delivery::Delegate(delegate)
    }

    pub fn surface(&self) -> &'static str {
        match self {
            Delivery::Completion(_) => "completion",
            Delivery::Delegate(_) => "delegate",
            Delivery::Detached => "detached",
        }
    }

    /// Deliver the final stage, consuming the callback if there is one.
    pub(crate) fn complete(
        self,
        task: TaskId,
        body: Option<Bytes>,
        response: Option<HttpResponse>,
        error: Option<NetworkError>,
    ) {
        match self {
            Delivery::Completion(handler) => handler(body, response, error),
            Delivery::Delegate(delegate) => delegate.did_complete(task, error.as_ref()),
            Delivery::Detached => {}
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Delivery::{}", self.surface())
    }
}

/// The task interface every `HttpSession` hands back.
pub trait DataTask: Send + Sync {
    fn id(&self) -> TaskId;

    fn state(&self) -> TaskState;

    /// Start the task. Calling it again has no effect.
    fn resume(&self);

    /// Stop the task. Safe to call any number of times.
    fn cancel(&self);

    fn original_request(&self) -> Option<Request>;

    fn current_request(&self) -> Option<Request> {
        self.original_request()
    }

    /// Response metadata, once it has been received.
    fn response(&self) -> Option<HttpResponse>;

    fn task_description(&self) -> Option<String>;

    fn set_task_description(&self, description: Option<String>);

    fn count_of_bytes_received(&self) -> u64;

    fn count_of_bytes_expected_to_send(&self) -> i64 {
        0
    }

    /// -1 when unknown
    fn count_of_bytes_expected_to_receive(&self) -> i64 {
        -1
    }
}
