//! Thread-safe mock registry.
//!
//! Mocks live in two pools:
//! - ephemeral: answered at most once, then removed
//! - permanent: answered any number of times
//!
//! Ephemeral mocks take precedence; within a pool the first registered
//! match wins. A single reader/writer lock guards both pools, so a lookup
//! that removes an ephemeral mock is atomic with respect to every other
//! registry operation.

use crate::request::Request;
use crate::rule::SessionMock;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Identity of a registered mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(u64);

impl RuleId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

struct Entry<T> {
    id: RuleId,
    mock: Arc<T>,
}

impl<T> Entry<T> {
    fn new(id: RuleId, mock: T) -> Self {
        Self {
            id,
            mock: Arc::new(mock),
        }
    }
}

/// Both pools, protected by a single lock.
struct Pools<T> {
    permanent: Vec<Entry<T>>,
    ephemeral: Vec<Entry<T>>,
}

/// A mock selected for a request.
#[derive(Debug)]
pub struct Matched<T> {
    pub id: RuleId,
    pub mock: Arc<T>,
    /// `true` if the mock was removed from the ephemeral pool by this lookup
    pub ephemeral: bool,
}

pub struct MockRegistry<T: SessionMock> {
    pools: RwLock<Pools<T>>,
    next_id: AtomicU64,
}

impl<T: SessionMock> MockRegistry<T> {
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(Pools {
                permanent: Vec::new(),
                ephemeral: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> RuleId {
        RuleId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add a mock that is never removed by a lookup
    pub fn add_permanent(&self, mock: T) -> RuleId {
        let id = self.allocate_id();
        self.pools.write().permanent.push(Entry::new(id, mock));
        debug!("Registered permanent mock {}", id);
        id
    }

    /// Add a mock that is removed the first time a lookup returns it
    pub fn add_ephemeral(&self, mock: T) -> RuleId {
        let id = self.allocate_id();
        self.pools.write().ephemeral.push(Entry::new(id, mock));
        debug!("Registered ephemeral mock {}", id);
        id
    }

    pub fn remove_all(&self) {
        let mut pools = self.pools.write();
        pools.permanent.clear();
        pools.ephemeral.clear();
        debug!("Removed all mocks");
    }

    /// Remove every mock, in either pool, that matches `request`.
    /// Mocks for other requests are kept.
    pub fn remove_all_matching(&self, request: &Request) {
        let mut pools = self.pools.write();
        let before = pools.permanent.len() + pools.ephemeral.len();
        pools.permanent.retain(|entry| !entry.mock.matches(request));
        pools.ephemeral.retain(|entry| !entry.mock.matches(request));
        let removed = before - (pools.permanent.len() + pools.ephemeral.len());
        debug!(
            "Removed {} mocks matching {}",
            removed,
            request.debug_description()
        );
    }

    /// Find the mock that should answer `request`.
    ///
    /// An ephemeral match is removed before the lock is released, so no two
    /// callers can ever receive the same ephemeral mock.
    pub fn next_match(&self, request: &Request) -> Option<Matched<T>> {
        let mut pools = self.pools.write();

        if let Some(index) = pools
            .ephemeral
            .iter()
            .position(|entry| entry.mock.matches(request))
        {
            let entry = pools.ephemeral.remove(index);
            debug!(
                "Consumed ephemeral mock {} for {}",
                entry.id,
                request.debug_description()
            );
            return Some(Matched {
                id: entry.id,
                mock: entry.mock,
                ephemeral: true,
            });
        }

        pools
            .permanent
            .iter()
            .find(|entry| entry.mock.matches(request))
            .map(|entry| Matched {
                id: entry.id,
                mock: Arc::clone(&entry.mock),
                ephemeral: false,
            })
    }

    /// `true` if some mock would answer `request`. Nothing is consumed.
    pub fn has_match(&self, request: &Request) -> bool {
        let pools = self.pools.read();
        pools
            .ephemeral
            .iter()
            .chain(pools.permanent.iter())
            .any(|entry| entry.mock.matches(request))
    }

    /// `true` while the ephemeral mock `id` is still waiting to be used
    pub fn contains_ephemeral(&self, id: RuleId) -> bool {
        self.pools.read().ephemeral.iter().any(|entry| entry.id == id)
    }

    pub fn ephemeral_count(&self) -> usize {
        self.pools.read().ephemeral.len()
    }

    pub fn permanent_count(&self) -> usize {
        self.pools.read().permanent.len()
    }

    pub fn len(&self) -> usize {
        let pools = self.pools.read();
        pools.ephemeral.len() + pools.permanent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: SessionMock> Default for MockRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SessionMock> fmt::Debug for MockRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pools = self.pools.read();
        f.debug_struct("MockRegistry")
            .field("ephemeral", &pools.ephemeral.len())
            .field("permanent", &pools.permanent.len())
            .finish()
    }
}
