//! The interception service.
//!
//! `Interceptor` owns the mock registry and the policies that apply to
//! requests no mock answers. It provides:
//! - the registration surface (`mock_next`, `mock_every`, `remove_all_mocks`, ...)
//! - `intercept`, which sessions call for every outgoing request
//! - a one-time installation step, triggered by the first registration or
//!   policy change
//!
//! Tests normally build their own `Interceptor`. `Interceptor::global()` is
//! the process-wide instance for code that can't have one injected.

use crate::config::{DebugLevel, MockConfig};
use crate::error::MockError;
use crate::registry::{MockRegistry, RuleId};
use crate::request::Request;
use crate::response::Mock;
use crate::rule::MockRule;
use crate::task::{Delivery, MockedTask};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tracing::info;

/// Verdict for a request that no mock matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationResult {
    /// Let the underlying session perform it
    PassThrough,
    /// Unmocked traffic is a bug; fail loudly
    Reject,
}

/// Decides what happens to requests that no mock matched.
pub type RequestEvaluator = Arc<dyn Fn(&Request) -> EvaluationResult + Send + Sync>;

fn default_evaluator() -> RequestEvaluator {
    Arc::new(|_| EvaluationResult::PassThrough)
}

/// Opaque reference to a mock registered with `mock_next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    id: RuleId,
}

impl Handle {
    pub fn id(&self) -> RuleId {
        self.id
    }
}

/// What a session should do with a request.
#[derive(Debug)]
pub enum Interception {
    /// A mock answered; resume this task instead of performing the request
    Mocked(MockedTask),
    /// No mock answered; the delivery is handed back untouched
    PassThrough(Delivery),
}

static GLOBAL: Lazy<Arc<Interceptor>> =
    Lazy::new(|| Arc::new(Interceptor::with_config(MockConfig::from_env())));

pub struct Interceptor {
    registry: Arc<MockRegistry<MockRule>>,
    config: MockConfig,
    debug_level: RwLock<DebugLevel>,
    evaluator: RwLock<RequestEvaluator>,
    install: Once,
    installed: AtomicBool,
    install_count: AtomicUsize,
}

impl Interceptor {
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self::with_registry(config, Arc::new(MockRegistry::new()))
    }

    pub fn with_registry(config: MockConfig, registry: Arc<MockRegistry<MockRule>>) -> Self {
        Self {
            registry,
            debug_level: RwLock::new(config.debug_level),
            config,
            evaluator: RwLock::new(default_evaluator()),
            install: Once::new(),
            installed: AtomicBool::new(false),
            install_count: AtomicUsize::new(0),
        }
    }

    /// The process-wide interceptor, configured from the environment
    pub fn global() -> Arc<Interceptor> {
        Arc::clone(&GLOBAL)
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MockRegistry<MockRule>> {
        &self.registry
    }

    // ===== Installation =====

    /// Install the interception hook. Runs at most once per interceptor,
    /// however many threads race to trigger it.
    pub fn ensure_installed(&self) {
        if self.installed.load(Ordering::Acquire) {
            return;
        }
        self.install.call_once(|| {
            self.install_count.fetch_add(1, Ordering::SeqCst);
            self.installed.store(true, Ordering::Release);
            info!("Session mocking enabled");
        });
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// How many times installation actually ran (0 or 1)
    pub fn install_count(&self) -> usize {
        self.install_count.load(Ordering::SeqCst)
    }

    // ===== Registration =====

    /// The next request matching `mock` gets its response; later ones don't.
    pub fn mock_next(&self, mock: Mock) -> Handle {
        let id = self
            .registry
            .add_ephemeral(mock.into_rule(&self.config).single_use());
        self.ensure_installed();
        Handle { id }
    }

    /// Every request matching `mock` gets its response.
    pub fn mock_every(&self, mock: Mock) {
        self.registry.add_permanent(mock.into_rule(&self.config));
        self.ensure_installed();
    }

    pub fn remove_all_mocks(&self) {
        self.registry.remove_all();
    }

    /// Remove the mocks that would answer `request`; other mocks stay.
    pub fn remove_all_mocks_of(&self, request: &Request) {
        self.registry.remove_all_matching(request);
    }

    pub fn has_mock_consumed(&self, handle: &Handle) -> bool {
        !self.registry.contains_ephemeral(handle.id)
    }

    // ===== Policies =====

    pub fn debug_level(&self) -> DebugLevel {
        *self.debug_level.read()
    }

    pub fn set_debug_level(&self, level: DebugLevel) {
        *self.debug_level.write() = level;
        self.ensure_installed();
    }

    pub fn set_request_evaluator<F>(&self, evaluator: F)
    where
        F: Fn(&Request) -> EvaluationResult + Send + Sync + 'static,
    {
        *self.evaluator.write() = Arc::new(evaluator);
        self.ensure_installed();
    }

    /// Go back to letting every unmocked request through
    pub fn reset_request_evaluator(&self) {
        *self.evaluator.write() = default_evaluator();
    }

    // ===== Interception =====

    /// Answer `request` from a mock, or hand the delivery back for the real
    /// session.
    ///
    /// # Panics
    ///
    /// - when no mock matches and the evaluator returns `Reject`
    /// - when the registry hands out a mock that doesn't match, or a
    ///   single-use mock that was already consumed
    /// - when a mock matches outside of a tokio runtime
    pub fn intercept(&self, request: &Request, delivery: Delivery) -> Interception {
        // A mocked task needs a runtime; fail before an ephemeral mock is used up
        if tokio::runtime::Handle::try_current().is_err() && self.registry.has_match(request) {
            panic!("{}", MockError::NoRuntime);
        }

        if let Some(matched) = self.registry.next_match(request) {
            let consumed = match matched.mock.consume(request) {
                Ok(consumed) => consumed,
                Err(e) => panic!("{e}"),
            };
            let task = match MockedTask::new(request.clone(), consumed, delivery, &self.config) {
                Ok(task) => task,
                Err(e) => panic!("{e}"),
            };
            if self.debug_level().logs_mocked() {
                info!("request: {} mocked", request.debug_description());
            }
            return Interception::Mocked(task);
        }

        let evaluator = Arc::clone(&*self.evaluator.read());
        if evaluator(request) == EvaluationResult::Reject {
            panic!(
                "{}",
                MockError::PolicyViolation(request.debug_description())
            );
        }

        if self.debug_level().logs_unmocked() {
            info!("request: {} not mocked", request.debug_description());
        }
        Interception::PassThrough(delivery)
    }
}

impl Default for Interceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("debug_level", &self.debug_level())
            .field("installed", &self.is_installed())
            .finish()
    }
}
