//! Directed reachability over `connected_to` edges.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::LocationId;
use crate::world::location::Location;

/// Adjacency view of the location graph.
///
/// Built once per session; locations are immutable so the graph never needs
/// rebuilding. Edges to unknown locations are dropped at build time.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityGraph {
    adjacency: HashMap<LocationId, Vec<LocationId>>,
}

impl ReachabilityGraph {
    /// Build from location nodes.
    pub fn build<'a>(locations: impl IntoIterator<Item = &'a Location>) -> Self {
        let nodes: Vec<&Location> = locations.into_iter().collect();
        let known: HashSet<&LocationId> = nodes.iter().map(|l| &l.location_id).collect();

        let adjacency = nodes
            .iter()
            .map(|loc| {
                let edges = loc
                    .connected_to
                    .iter()
                    .filter(|to| known.contains(to))
                    .cloned()
                    .collect();
                (loc.location_id.clone(), edges)
            })
            .collect();

        Self { adjacency }
    }

    /// Whether the location is a node of the graph.
    #[must_use]
    pub fn contains(&self, id: &LocationId) -> bool {
        self.adjacency.contains_key(id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Breadth-first search from `start` to `goal` along directed edges.
    ///
    /// A node is reachable from itself. Unknown endpoints are never
    /// reachable.
    #[must_use]
    pub fn is_reachable(&self, start: &LocationId, goal: &LocationId) -> bool {
        if !self.contains(start) || !self.contains(goal) {
            return false;
        }
        if start == goal {
            return true;
        }

        let mut seen: HashSet<&LocationId> = HashSet::from([start]);
        let mut queue: VecDeque<&LocationId> = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for next in self.adjacency.get(node).into_iter().flatten() {
                if next == goal {
                    return true;
                }
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }
}
