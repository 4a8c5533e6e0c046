//! The session seam.
//!
//! Code that performs HTTP requests takes an `HttpSession`. Production wires
//! in a real client; tests wire in a `MockSession`, which answers from the
//! interceptor's mocks and hands everything else to the session it wraps.

use crate::error::NetworkError;
use crate::interceptor::{Interception, Interceptor};
use crate::request::{HttpResponse, Request};
use crate::task::{DataTask, Delivery, TaskId, TaskState};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

/// A source of data tasks.
pub trait HttpSession: Send + Sync {
    /// Create a suspended task for `request`. Nothing happens until the task
    /// is resumed.
    fn data_task(&self, request: Request, delivery: Delivery) -> Box<dyn DataTask>;

    fn data_task_with_url(&self, url: &str, delivery: Delivery) -> Box<dyn DataTask> {
        self.data_task(Request::get(url), delivery)
    }
}

impl<T: HttpSession + ?Sized> HttpSession for Arc<T> {
    fn data_task(&self, request: Request, delivery: Delivery) -> Box<dyn DataTask> {
        (**self).data_task(request, delivery)
    }
}

/// Perform `request` on `session` and wait for it to finish.
///
/// The task is kept alive until its completion arrives; dropping the returned
/// future cancels it.
pub async fn send<S>(
    session: &S,
    request: Request,
) -> Result<(Option<Bytes>, HttpResponse), NetworkError>
where
    S: HttpSession + ?Sized,
{
    let (tx, rx) = oneshot::channel();
    let task = session.data_task(
        request,
        Delivery::completion(move |body, response, error| {
            let _ = tx.send((body, response, error));
        }),
    );
    task.resume();

    let outcome = rx.await;
    drop(task);

    match outcome {
        Ok((_, _, Some(error))) => Err(error),
        Ok((body, Some(response), None)) => Ok((body, response)),
        Ok((_, None, None)) => Err(NetworkError::bad_server_response()),
        // The task went away without delivering anything
        Err(_) => Err(NetworkError::cancelled()),
    }
}

/// Session wrapper that answers requests from an `Interceptor`.
///
/// Until the interceptor is installed (first mock registered or policy set)
/// every request goes straight to the inner session.
pub struct MockSession<S> {
    inner: S,
    interceptor: Arc<Interceptor>,
}

impl<S: HttpSession> MockSession<S> {
    pub fn new(inner: S, interceptor: Arc<Interceptor>) -> Self {
        Self { inner, interceptor }
    }

    /// Wrap `inner` with the process-wide interceptor
    pub fn global(inner: S) -> Self {
        Self::new(inner, Interceptor::global())
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl MockSession<OfflineSession> {
    /// A session where anything not mocked fails as if the network were down
    pub fn offline(interceptor: Arc<Interceptor>) -> Self {
        Self::new(OfflineSession, interceptor)
    }
}

impl<S: HttpSession> HttpSession for MockSession<S> {
    fn data_task(&self, request: Request, delivery: Delivery) -> Box<dyn DataTask> {
        if !self.interceptor.is_installed() {
            return self.inner.data_task(request, delivery);
        }
        match self.interceptor.intercept(&request, delivery) {
            Interception::Mocked(task) => Box::new(task),
            Interception::PassThrough(delivery) => self.inner.data_task(request, delivery),
        }
    }
}

impl<S> std::fmt::Debug for MockSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("interceptor", &self.interceptor)
            .finish_non_exhaustive()
    }
}

/// A session with no network. Every task fails with
/// `NetworkError::not_connected()` once resumed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineSession;

impl HttpSession for OfflineSession {
    fn data_task(&self, request: Request, delivery: Delivery) -> Box<dyn DataTask> {
        Box::new(OfflineTask::new(request, delivery))
    }
}

struct OfflineInner {
    state: TaskState,
    delivery: Option<Delivery>,
    description: Option<String>,
}

struct OfflineTask {
    id: TaskId,
    request: Request,
    inner: Mutex<OfflineInner>,
}

impl OfflineTask {
    fn new(request: Request, delivery: Delivery) -> Self {
        Self {
            id: TaskId::next(),
            request,
            inner: Mutex::new(OfflineInner {
                state: TaskState::Suspended,
                delivery: Some(delivery),
                description: None,
            }),
        }
    }

    fn finish(&self, error: NetworkError) {
        let delivery = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = TaskState::Completed;
            inner.delivery.take()
        };
        debug!("{} offline: {}", self.id, error);

        let Some(delivery) = delivery else {
            return;
        };
        let id = self.id;
        // Deliver asynchronously when there is a runtime, like a real session would
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { delivery.complete(id, None, None, Some(error)) });
            }
            Err(_) => delivery.complete(id, None, None, Some(error)),
        }
    }
}

impl DataTask for OfflineTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    fn resume(&self) {
        self.finish(NetworkError::not_connected());
    }

    fn cancel(&self) {
        self.finish(NetworkError::cancelled());
    }

    fn original_request(&self) -> Option<Request> {
        Some(self.request.clone())
    }

    fn response(&self) -> Option<HttpResponse> {
        None
    }

    fn task_description(&self) -> Option<String> {
        self.inner.lock().description.clone()
    }

    fn set_task_description(&self, description: Option<String>) {
        self.inner.lock().description = description;
    }

    fn count_of_bytes_received(&self) -> u64 {
        0
    }
}
