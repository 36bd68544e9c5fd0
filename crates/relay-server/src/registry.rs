//! Connection records and the registry that indexes them by participant.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::{ConnectionId, ParticipantId, RelayError, Role};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One live participant connection.
///
/// Shared between the registry and the connection's pump. The outbound
/// queue is bounded; a full queue makes `enqueue` wait, which is how a slow
/// reader pushes back on the peers writing to it.
pub struct Connection {
    pub participant: ParticipantId,
    pub role: Role,
    pub id: ConnectionId,
    outbound: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection record and the receiving end of its outbound queue.
    pub fn new(
        participant: ParticipantId,
        role: Role,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            participant,
            role,
            id: ConnectionId::new(),
            outbound: tx,
            closed: CancellationToken::new(),
        });
        (conn, rx)
    }

    /// Queue an encoded frame for this connection's writer.
    ///
    /// Waits while the queue is full. Fails with `DeliverySkipped` once the
    /// connection is closed or its writer has gone away.
    pub async fn enqueue(&self, frame: String) -> Result<(), RelayError> {
        let skipped = RelayError::DeliverySkipped {
            target: self.participant,
        };
        if self.closed.is_cancelled() {
            return Err(skipped);
        }
        tokio::select! {
            sent = self.outbound.send(frame) => sent.map_err(|_| skipped),
            _ = self.closed.cancelled() => Err(skipped),
        }
    }

    /// Signal the writer to send a close frame and stop.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the connection is closed.
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("participant", &self.participant)
            .field("role", &self.role)
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Live connections keyed by participant id. At most one record per id.
#[derive(Default)]
pub struct Registry {
    connections: HashMap<ParticipantId, Arc<Connection>>,
}

impl Registry {
    /// Insert a record, returning whichever record it displaced.
    ///
    /// The displaced connection is left running; nothing here closes it.
    pub fn register(&mut self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        self.connections.insert(conn.participant, conn)
    }

    /// Remove the record for `participant` if it is still `connection`.
    pub fn unregister(
        &mut self,
        participant: ParticipantId,
        connection: &ConnectionId,
    ) -> Option<Arc<Connection>> {
        match self.connections.get(&participant) {
            Some(current) if current.id == *connection => self.connections.remove(&participant),
            _ => None,
        }
    }

    pub fn lookup(&self, participant: ParticipantId) -> Option<Arc<Connection>> {
        self.connections.get(&participant).cloned()
    }

    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.connections.contains_key(&participant)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub(crate) fn drain(&mut self) -> Vec<Arc<Connection>> {
        self.connections.drain().map(|(_, conn)| conn).collect()
    }
}
