//! The registry and pairing graph behind one lock.
//!
//! Every read and every multi-step mutation of either structure goes
//! through `RelayHub`, holding a single `parking_lot::Mutex` for the whole
//! step. The lock is never held across an `.await`; callers get cloned
//! `Arc<Connection>` handles and enqueue after it is released.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::{ParticipantId, RelayError, Role};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::pairing::PairingGraph;
use crate::registry::{Connection, Registry};

#[derive(Default)]
struct HubState {
    registry: Registry,
    graph: PairingGraph,
}

/// Point-in-time sizes of the registry and pairing graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered participant connections.
    pub connections: usize,
    /// Distinct requester/responder pairings.
    pub pairings: usize,
}

pub struct RelayHub {
    state: Mutex<HubState>,
    queue_capacity: usize,
}

impl RelayHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new connection for `participant`.
    ///
    /// An existing record for the same id is replaced but not closed.
    pub fn connect(
        &self,
        participant: ParticipantId,
        role: Role,
    ) -> (Arc<Connection>, mpsc::Receiver<String>) {
        let (conn, rx) = Connection::new(participant, role, self.queue_capacity);
        let displaced = self.state.lock().registry.register(conn.clone());
        if let Some(old) = displaced {
            warn!(
                participant = %participant,
                old_connection = %old.id,
                new_connection = %conn.id,
                "participant reconnected, replacing previous connection"
            );
        }
        (conn, rx)
    }

    /// Tear down a connection: unregister it, unpair its identity and close it.
    ///
    /// When a newer connection has since registered under the same id, the
    /// registry entry and pairings belong to that one and are left alone.
    /// Returns the peers that lost their pairing.
    pub fn disconnect(&self, conn: &Connection) -> Vec<ParticipantId> {
        let former_peers = {
            let mut state = self.state.lock();
            let removed = state.registry.unregister(conn.participant, &conn.id);
            if removed.is_some() {
                Some(state.graph.unpair(conn.participant))
            } else {
                None
            }
        };
        conn.close();
        match former_peers {
            Some(peers) => peers,
            None => {
                debug!(
                    participant = %conn.participant,
                    connection = %conn.id,
                    "superseded connection closed, registry untouched"
                );
                Vec::new()
            }
        }
    }

    pub fn lookup(&self, participant: ParticipantId) -> Option<Arc<Connection>> {
        self.state.lock().registry.lookup(participant)
    }

    pub fn pair(&self, a: ParticipantId, b: ParticipantId) {
        self.state.lock().graph.pair(a, b);
    }

    pub fn unpair(&self, participant: ParticipantId) -> Vec<ParticipantId> {
        self.state.lock().graph.unpair(participant)
    }

    pub fn can_reach(&self, a: ParticipantId, b: ParticipantId) -> bool {
        self.state.lock().graph.can_reach(a, b)
    }

    pub fn peers_of(&self, a: ParticipantId) -> HashSet<ParticipantId> {
        self.state.lock().graph.peers_of(a)
    }

    pub fn has_pairing_entry(&self, a: ParticipantId) -> bool {
        self.state.lock().graph.has_entry(a)
    }

    /// Number of registered connections (diagnostics only).
    pub fn connection_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    /// Number of distinct pairings (diagnostics only).
    pub fn pairing_count(&self) -> usize {
        self.state.lock().graph.edge_count()
    }

    /// Both counts read under one lock, so they describe the same moment.
    pub fn stats(&self) -> HubStats {
        let state = self.state.lock();
        HubStats {
            connections: state.registry.len(),
            pairings: state.graph.edge_count(),
        }
    }

    /// Find the connection `sender` may route a message to.
    ///
    /// Checked in order: the sender has an adjacency entry, `target` is in
    /// it, and `target` is still registered.
    pub fn resolve_target(
        &self,
        sender: ParticipantId,
        target: ParticipantId,
    ) -> Result<Arc<Connection>, RelayError> {
        let state = self.state.lock();
        if !state.graph.has_entry(sender) {
            return Err(RelayError::PeerNotPaired { sender });
        }
        if !state.graph.can_reach(sender, target) {
            return Err(RelayError::PeerNotAuthorized { sender, target });
        }
        state
            .registry
            .lookup(target)
            .ok_or(RelayError::PeerDisconnected { target })
    }

    /// Pair a requester with a responder, both of whom must be connected.
    pub fn pair_connected(
        &self,
        requester: ParticipantId,
        responder: ParticipantId,
    ) -> Result<(Arc<Connection>, Arc<Connection>), RelayError> {
        let mut state = self.state.lock();
        let requester_conn = state
            .registry
            .lookup(requester)
            .ok_or(RelayError::PeerNotConnected {
                id: requester,
                role: Role::Requester,
            })?;
        let responder_conn = state
            .registry
            .lookup(responder)
            .ok_or(RelayError::PeerNotConnected {
                id: responder,
                role: Role::Responder,
            })?;
        state.graph.pair(requester, responder);
        Ok((requester_conn, responder_conn))
    }

    /// Close and forget every connection, e.g. on server shutdown.
    pub fn close_all(&self) -> usize {
        let drained = {
            let mut state = self.state.lock();
            state.graph = PairingGraph::default();
            state.registry.drain()
        };
        for conn in &drained {
            conn.close();
        }
        drained.len()
    }

    #[cfg(test)]
    pub(crate) fn graph_snapshot(&self) -> PairingGraph {
        self.state.lock().graph.clone()
    }
}
