//! Undirected adjacency of who may message whom.

use std::collections::{HashMap, HashSet};

use relay_core::ParticipantId;

/// Symmetric pairing relation: `b ∈ peers(a)` iff `a ∈ peers(b)`.
///
/// An identity keeps an entry (possibly empty) after its last peer leaves,
/// so "never paired" and "paired, but not with this target" stay distinct.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PairingGraph {
    adjacency: HashMap<ParticipantId, HashSet<ParticipantId>>,
}

impl PairingGraph {
    /// Add the edge between `a` and `b`. Idempotent.
    pub fn pair(&mut self, a: ParticipantId, b: ParticipantId) {
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    /// Drop `id` from every peer's set, then drop its own entry.
    ///
    /// Returns the peers it was paired with.
    pub fn unpair(&mut self, id: ParticipantId) -> Vec<ParticipantId> {
        let Some(peers) = self.adjacency.remove(&id) else {
            return Vec::new();
        };
        for peer in &peers {
            if let Some(set) = self.adjacency.get_mut(peer) {
                set.remove(&id);
            }
        }
        let mut peers: Vec<_> = peers.into_iter().filter(|p| *p != id).collect();
        peers.sort();
        peers
    }

    pub fn can_reach(&self, a: ParticipantId, b: ParticipantId) -> bool {
        self.adjacency.get(&a).is_some_and(|set| set.contains(&b))
    }

    pub fn peers_of(&self, a: ParticipantId) -> HashSet<ParticipantId> {
        self.adjacency.get(&a).cloned().unwrap_or_default()
    }

    /// Whether `a` has an adjacency entry at all.
    pub fn has_entry(&self, a: ParticipantId) -> bool {
        self.adjacency.contains_key(&a)
    }

    /// Number of distinct edges.
    pub fn edge_count(&self) -> usize {
        let mut twice = 0;
        let mut loops = 0;
        for (id, set) in &self.adjacency {
            twice += set.len();
            if set.contains(id) {
                loops += 1;
            }
        }
        (twice - loops) / 2 + loops
    }

    /// Checks the symmetry invariant across the whole graph.
    pub fn is_symmetric(&self) -> bool {
        self.adjacency
            .iter()
            .all(|(a, set)| set.iter().all(|b| self.can_reach(*b, *a)))
    }
}
