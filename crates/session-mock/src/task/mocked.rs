//! The task handed back for a mocked request.
//!
//! State machine:
//!
//! ```text
//! Suspended --resume--> Running --last step--> Completed
//!     |                    |
//!     +------cancel--------+--> Canceling --> Completed
//! ```
//!
//! `resume` evaluates the response handler and spawns one driver on the
//! runtime the task was created on. The driver walks the delivery plan,
//! sleeping until each step's deadline and re-checking the task state under
//! the task lock before firing. Consumer callbacks always run with the lock
//! released.

use super::{DataTask, Delivery, SessionDelegate, TaskId, TaskState};
use crate::config::MockConfig;
use crate::error::{MockError, NetworkError};
use crate::request::{HttpResponse, Request};
use crate::response::ResponseSpec;
use crate::rule::Consumed;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

/// One stage of a simulated network response.
#[derive(Debug)]
enum Step {
    Response(HttpResponse),
    Data(Bytes),
    Complete {
        body: Option<Bytes>,
        response: Option<HttpResponse>,
        error: Option<NetworkError>,
    },
}

#[derive(Debug)]
struct ScheduledStep {
    offset: Duration,
    step: Step,
}

struct Inner {
    state: TaskState,
    /// Taken on resume; the handler runs exactly once
    consumed: Option<Consumed>,
    /// Taken by whichever path delivers the final stage
    delivery: Option<Delivery>,
    response: Option<HttpResponse>,
    bytes_received: u64,
    description: Option<String>,
    driver: Option<AbortHandle>,
}

struct Shared {
    id: TaskId,
    request: Request,
    runtime: Handle,
    step_interval: Duration,
    failure_status_code: u16,
    inner: Mutex<Inner>,
}

/// A stand-in for an in-flight request, answered from a mock.
///
/// Dropping the task cancels any delivery steps that have not fired yet, so
/// keep it alive until the response has arrived.
pub struct MockedTask {
    shared: Arc<Shared>,
}

impl MockedTask {
    /// Create a suspended task. Must be called inside a tokio runtime; the
    /// runtime is where delivery steps will run.
    pub fn new(
        request: Request,
        consumed: Consumed,
        delivery: Delivery,
        config: &MockConfig,
    ) -> Result<Self, MockError> {
        let runtime = Handle::try_current().map_err(|_| MockError::NoRuntime)?;
        let id = TaskId::next();
        debug!(
            "Created {} for {} ({} delivery)",
            id,
            request.debug_description(),
            delivery.surface()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                request,
                runtime,
                step_interval: config.step_interval(),
                failure_status_code: config.failure_status_code,
                inner: Mutex::new(Inner {
                    state: TaskState::Suspended,
                    consumed: Some(consumed),
                    delivery: Some(delivery),
                    response: None,
                    bytes_received: 0,
                    description: None,
                    driver: None,
                }),
            }),
        })
    }
}

impl Shared {
    fn plan(&self, spec: ResponseSpec, delay: Duration) -> Vec<ScheduledStep> {
        match spec {
            ResponseSpec::Success {
                status_code,
                headers,
                body,
            } => {
                let response = HttpResponse::new(self.request.url.clone(), status_code, headers);
                let mut offset = delay;
                let mut plan = vec![ScheduledStep {
                    offset,
                    step: Step::Response(response.clone()),
                }];
                offset += self.step_interval;

                if let Some(ref data) = body {
                    plan.push(ScheduledStep {
                        offset,
                        step: Step::Data(data.clone()),
                    });
                    offset += self.step_interval;
                }

                plan.push(ScheduledStep {
                    offset,
                    step: Step::Complete {
                        body,
                        response: Some(response),
                        error: None,
                    },
                });
                plan
            }
            ResponseSpec::Failure { error, status_code } => {
                let response = HttpResponse::new(
                    self.request.url.clone(),
                    status_code.unwrap_or(self.failure_status_code),
                    Default::default(),
                );
                vec![ScheduledStep {
                    offset: delay,
                    step: Step::Complete {
                        body: None,
                        response: Some(response),
                        error: Some(error),
                    },
                }]
            }
        }
    }

    /// Fire one step. Returns `false` once the task should stop driving.
    fn fire(&self, step: Step) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != TaskState::Running {
            return false;
        }

        match step {
            Step::Response(response) => {
                inner.response = Some(response.clone());
                let delegate = delegate_of(&inner);
                drop(inner);
                if let Some(delegate) = delegate {
                    delegate.did_receive_response(self.id, &response);
                }
                true
            }
            Step::Data(data) => {
                inner.bytes_received += data.len() as u64;
                let delegate = delegate_of(&inner);
                drop(inner);
                if let Some(delegate) = delegate {
                    delegate.did_receive_data(self.id, &data);
                }
                true
            }
            Step::Complete {
                body,
                response,
                error,
            } => {
                if inner.response.is_none() {
                    inner.response = response.clone();
                }
                inner.state = TaskState::Completed;
                inner.driver = None;
                let delivery = inner.delivery.take();
                drop(inner);

                debug!("{} completed (error: {:?})", self.id, error);
                if let Some(delivery) = delivery {
                    // A delegate already saw the response and data stages
                    let response = match delivery {
                        Delivery::Completion(_) => response,
                        _ => None,
                    };
                    delivery.complete(self.id, body, response, error);
                }
                false
            }
        }
    }
}

fn delegate_of(inner: &Inner) -> Option<Arc<dyn SessionDelegate>> {
    match inner.delivery {
        Some(Delivery::Delegate(ref delegate)) => Some(Arc::clone(delegate)),
        _ => None,
    }
}

async fn drive(task: Weak<Shared>, start: Instant, plan: Vec<ScheduledStep>) {
    for scheduled in plan {
        tokio::time::sleep_until(start + scheduled.offset).await;
        let Some(shared) = task.upgrade() else {
            return;
        };
        if !shared.fire(scheduled.step) {
            return;
        }
    }
}

impl DataTask for MockedTask {
    fn id(&self) -> TaskId {
        self.shared.id
    }

    fn state(&self) -> TaskState {
        self.shared.inner.lock().state
    }

    fn resume(&self) {
        let consumed = {
            let mut inner = self.shared.inner.lock();
            if inner.state != TaskState::Suspended {
                debug!("Ignoring resume of {} in state {:?}", self.shared.id, inner.state);
                return;
            }
            let Some(consumed) = inner.consumed.take() else {
                return;
            };
            inner.state = TaskState::Running;
            consumed
        };

        // The handler runs unlocked; a panic in it is a broken mock and propagates
        let spec = (consumed.handler)(&self.shared.request.url, &consumed.extractions);
        let plan = self.shared.plan(spec, consumed.delay);
        debug!(
            "Resumed {} with {} delivery steps after {:?}",
            self.shared.id,
            plan.len(),
            consumed.delay
        );

        let start = Instant::now();
        let driver = self
            .shared
            .runtime
            .spawn(drive(Arc::downgrade(&self.shared), start, plan));

        let mut inner = self.shared.inner.lock();
        if inner.state == TaskState::Running {
            inner.driver = Some(driver.abort_handle());
        } else {
            // Cancelled while the plan was being built
            driver.abort();
        }
    }

    fn cancel(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.state.is_terminal() {
            return;
        }

        if let Some(driver) = inner.driver.take() {
            driver.abort();
        }

        // A completion callback hears nothing until the final step, so it is
        // still owed a result even after the response step has run
        let consumer_saw_response = inner.response.is_some()
            && !matches!(inner.delivery, Some(Delivery::Completion(_)));
        if consumer_saw_response {
            // Past the point of no return: nothing more is delivered
            inner.state = TaskState::Completed;
            inner.delivery = None;
            debug!("Cancelled {} after its response was delivered", self.shared.id);
            return;
        }

        inner.state = TaskState::Canceling;
        let delivery = inner.delivery.take();
        drop(inner);

        debug!("Cancelling {}", self.shared.id);
        let id = self.shared.id;
        let task = Arc::downgrade(&self.shared);
        self.shared.runtime.spawn(async move {
            if let Some(shared) = task.upgrade() {
                shared.inner.lock().state = TaskState::Completed;
            }
            if let Some(delivery) = delivery {
                delivery.complete(id, None, None, Some(NetworkError::cancelled()));
            }
        });
    }

    fn original_request(&self) -> Option<Request> {
        Some(self.shared.request.clone())
    }

    fn response(&self) -> Option<HttpResponse> {
        self.shared.inner.lock().response.clone()
    }

    fn task_description(&self) -> Option<String> {
        self.shared.inner.lock().description.clone()
    }

    fn set_task_description(&self, description: Option<String>) {
        self.shared.inner.lock().description = description;
    }

    fn count_of_bytes_received(&self) -> u64 {
        self.shared.inner.lock().bytes_received
    }
}

impl Drop for MockedTask {
    fn drop(&mut self) {
        if let Some(driver) = self.shared.inner.lock().driver.take() {
            driver.abort();
        }
    }
}

impl std::fmt::Debug for MockedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockedTask")
            .field("id", &self.shared.id)
            .field("request", &self.shared.request)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseHandler;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Response(u16),
        Data(Bytes),
        Complete(Option<NetworkError>),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(Duration, Event)>>,
        start: Mutex<Option<Instant>>,
    }

    impl Recorder {
        fn started(self: &Arc<Self>) -> Arc<Self> {
            *self.start.lock() = Some(Instant::now());
            Arc::clone(self)
        }

        fn push(&self, event: Event) {
            let elapsed = self
                .start
                .lock()
                .map(|start| start.elapsed())
                .unwrap_or_default();
            self.events.lock().push((elapsed, event));
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().iter().map(|(_, e)| e.clone()).collect()
        }
    }

    impl SessionDelegate for Recorder {
        fn did_receive_response(&self, _task: TaskId, response: &HttpResponse) {
            self.push(Event::Response(response.status_code));
        }

        fn did_receive_data(&self, _task: TaskId, data: &Bytes) {
            self.push(Event::Data(data.clone()));
        }

        fn did_complete(&self, _task: TaskId, error: Option<&NetworkError>) {
            self.push(Event::Complete(error.cloned()));
        }
    }

    fn consumed(spec: ResponseSpec, delay: Duration) -> Consumed {
        let handler: ResponseHandler = Arc::new(move |_, _| spec.clone());
        Consumed {
            extractions: Vec::new(),
            handler,
            delay,
        }
    }

    fn request() -> Request {
        Request::get("https://example.com/1")
    }

    fn delegate_task(spec: ResponseSpec, delay: Duration) -> (MockedTask, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let task = MockedTask::new(
            request(),
            consumed(spec, delay),
            Delivery::delegate(recorder.started()),
            &MockConfig::default(),
        )
        .unwrap();
        (task, recorder)
    }

    #[test]
    fn test_requires_runtime() {
        let result = MockedTask::new(
            request(),
            consumed(ResponseSpec::ok("x"), Duration::ZERO),
            Delivery::Detached,
            &MockConfig::default(),
        );
        assert!(matches!(result, Err(MockError::NoRuntime)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_suspended_and_waits_for_resume() {
        let (task, recorder) = delegate_task(ResponseSpec::ok("hello"), Duration::ZERO);
        assert_eq!(task.state(), TaskState::Suspended);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(recorder.events().is_empty());
        assert!(task.response().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_delivers_stages_in_order() {
        let (task, recorder) =
            delegate_task(ResponseSpec::ok("hello"), Duration::from_millis(100));
        task.resume();
        assert_eq!(task.state(), TaskState::Running);

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            recorder.events(),
            vec![
                Event::Response(200),
                Event::Data(Bytes::from_static(b"hello")),
                Event::Complete(None),
            ]
        );
        let offsets: Vec<Duration> = recorder.events.lock().iter().map(|(t, _)| *t).collect();
        for (offset, expected_ms) in offsets.iter().zip([100u64, 120, 140]) {
            let expected = Duration::from_millis(expected_ms);
            assert!(
                *offset >= expected && *offset < expected + Duration::from_millis(5),
                "step at {:?}, expected {:?}",
                offset,
                expected
            );
        }
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.count_of_bytes_received(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_without_body_skips_data() {
        let spec = ResponseSpec::Success {
            status_code: 204,
            headers: HashMap::new(),
            body: None,
        };
        let (task, recorder) = delegate_task(spec, Duration::ZERO);
        task.resume();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            recorder.events(),
            vec![Event::Response(204), Event::Complete(None)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_single_completion() {
        let error = NetworkError::custom("test", 7, "nope");
        let (task, recorder) = delegate_task(
            ResponseSpec::failure(error.clone()),
            Duration::from_millis(50),
        );
        task.resume();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(recorder.events(), vec![Event::Complete(Some(error))]);
        assert_eq!(task.response().map(|r| r.status_code), Some(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_receives_everything_at_once() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let task = MockedTask::new(
            request(),
            consumed(ResponseSpec::ok("hello"), Duration::ZERO),
            Delivery::completion(move |body, response, error| {
                let _ = tx.send((body, response.map(|r| r.status_code), error));
            }),
            &MockConfig::default(),
        )
        .unwrap();
        task.resume();

        let (body, status, error) = rx.await.unwrap();
        assert_eq!(body, Some(Bytes::from_static(b"hello")));
        assert_eq!(status, Some(200));
        assert_eq!(error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_runs_once_on_resume() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler: ResponseHandler = Arc::new(move |_, _| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            ResponseSpec::ok("x")
        });
        let task = MockedTask::new(
            request(),
            Consumed {
                extractions: Vec::new(),
                handler,
                delay: Duration::ZERO,
            },
            Delivery::Detached,
            &MockConfig::default(),
        )
        .unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        task.resume();
        task.resume();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(task.state(), TaskState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_step() {
        let (task, recorder) =
            delegate_task(ResponseSpec::ok("hello"), Duration::from_millis(200));
        task.resume();
        tokio::time::sleep(Duration::from_millis(50)).await;

        task.cancel();
        assert_eq!(task.state(), TaskState::Canceling);
        task.cancel();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            recorder.events(),
            vec![Event::Complete(Some(NetworkError::cancelled()))]
        );
        assert_eq!(task.state(), TaskState::Completed);
        assert!(task.response().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_suspended() {
        let (task, recorder) = delegate_task(ResponseSpec::ok("hello"), Duration::ZERO);
        task.cancel();
        task.resume();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            recorder.events(),
            vec![Event::Complete(Some(NetworkError::cancelled()))]
        );
        assert_eq!(task.state(), TaskState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_headers_delivers_nothing_more() {
        let (task, recorder) =
            delegate_task(ResponseSpec::ok("hello"), Duration::from_millis(100));
        task.resume();
        tokio::time::sleep(Duration::from_millis(110)).await;
        assert_eq!(recorder.events(), vec![Event::Response(200)]);

        task.cancel();
        assert_eq!(task.state(), TaskState::Completed);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.events(), vec![Event::Response(200)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_headers_still_completes_callback() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let task = MockedTask::new(
            request(),
            consumed(ResponseSpec::ok("hello"), Duration::from_millis(100)),
            Delivery::completion(move |body, _, error| sink.lock().push((body, error))),
            &MockConfig::default(),
        )
        .unwrap();
        task.resume();
        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(task.response().is_some());
        assert!(calls.lock().is_empty());

        task.cancel();
        task.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(*calls.lock(), vec![(None, Some(NetworkError::cancelled()))]);
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.count_of_bytes_received(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_steps() {
        let (task, recorder) =
            delegate_task(ResponseSpec::ok("hello"), Duration::from_millis(100));
        task.resume();
        drop(task);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(recorder.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_metadata() {
        let (task, _recorder) = delegate_task(ResponseSpec::ok("hello"), Duration::ZERO);
        assert_eq!(task.original_request(), Some(request()));
        assert_eq!(task.current_request(), Some(request()));
        assert_eq!(task.count_of_bytes_expected_to_send(), 0);
        assert_eq!(task.count_of_bytes_expected_to_receive(), -1);

        task.set_task_description(Some("fetch".to_string()));
        assert_eq!(task.task_description().as_deref(), Some("fetch"));
    }
}
