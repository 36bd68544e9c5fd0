//! The assembled relay: hub, lookup collaborator, dispatcher and pump.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, Stream};
use relay_core::{DataLookup, ParticipantId, RelayError, Role};

use crate::dispatch::{Dispatcher, RecordLinks};
use crate::hub::RelayHub;
use crate::pump::Pump;
use crate::session;

/// Knobs the relay itself needs, independent of how it is served.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub queue_capacity: usize,
    pub ping_interval: Option<Duration>,
    pub record_base_url: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            ping_interval: Some(Duration::from_secs(30)),
            record_base_url: "https://records.local/record_p/".to_owned(),
        }
    }
}

pub struct Relay {
    hub: Arc<RelayHub>,
    lookup: Arc<dyn DataLookup>,
    pump: Pump,
}

impl Relay {
    pub fn new(config: &RelayConfig, lookup: Arc<dyn DataLookup>) -> Self {
        let hub = Arc::new(RelayHub::new(config.queue_capacity));
        let dispatcher = Arc::new(Dispatcher::new(
            hub.clone(),
            lookup.clone(),
            RecordLinks::new(config.record_base_url.clone()),
        ));
        let pump = Pump::new(hub.clone(), dispatcher, config.ping_interval);
        Self { hub, lookup, pump }
    }

    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.hub
    }

    /// Register `participant` and serve its connection until it closes.
    pub async fn serve<W, R, E>(&self, participant: ParticipantId, role: Role, sink: W, stream: R)
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let (conn, outbound) = self.hub.connect(participant, role);
        self.pump.run(conn, outbound, sink, stream).await;
    }

    /// Pair a connected requester with a connected responder.
    pub async fn start_session(
        &self,
        requester: ParticipantId,
        responder: ParticipantId,
    ) -> Result<(), RelayError> {
        session::start_session(&self.hub, &self.lookup, requester, responder).await
    }

    /// Close every connection; their pumps unwind on their own.
    pub fn shutdown(&self) -> usize {
        self.hub.close_all()
    }
}
