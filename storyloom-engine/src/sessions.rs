//! Per-session live state and cached reachability graphs.
//!
//! Every session owns one slot holding its live [`WorldState`]. The slot's
//! async mutex is held for the whole of a turn, which serialises turns
//! within a session while distinct sessions proceed in parallel. An empty
//! slot means "reload from the store before the next turn".

use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use storyloom_core::types::SessionId;
use storyloom_core::world::{ReachabilityGraph, WorldState};

/// A session's live state; `None` until loaded or after a failed commit.
pub type SessionSlot = Arc<AsyncMutex<Option<WorldState>>>;

/// Registry of session slots.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: DashMap<SessionId, SessionSlot>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot for `session_id`, if the session is registered.
    #[must_use]
    pub fn get(&self, session_id: &SessionId) -> Option<SessionSlot> {
        self.slots.get(session_id).map(|slot| Arc::clone(slot.value()))
    }

    /// Register a freshly created session's state.
    pub fn insert(&self, state: WorldState) {
        let id = state.session_id.clone();
        self.slots.insert(id, Arc::new(AsyncMutex::new(Some(state))));
    }

    /// Register a loaded state unless the session already has a slot, and
    /// return the session's slot either way.
    pub fn get_or_insert(&self, state: WorldState) -> SessionSlot {
        Arc::clone(
            self.slots
                .entry(state.session_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(Some(state))))
                .value(),
        )
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Bounded LRU cache of reachability graphs, keyed by session.
///
/// Locations never change within a session, so a graph stays valid for the
/// session's lifetime.
#[derive(Debug)]
pub struct GraphCache {
    graphs: Mutex<LruCache<SessionId, Arc<ReachabilityGraph>>>,
}

impl GraphCache {
    /// Create a cache holding up to `capacity` graphs (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            graphs: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The graph for `state`'s session, building it on a miss.
    pub fn get_or_build(&self, state: &WorldState) -> Arc<ReachabilityGraph> {
        let mut graphs = self.graphs.lock();
        if let Some(graph) = graphs.get(&state.session_id) {
            return Arc::clone(graph);
        }
        let graph = Arc::new(ReachabilityGraph::build(state.locations.values()));
        debug!(session = %state.session_id, nodes = graph.len(), "Reachability graph built");
        graphs.put(state.session_id.clone(), Arc::clone(&graph));
        graph
    }

    /// Number of cached graphs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graphs.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graphs.lock().is_empty()
    }
}
