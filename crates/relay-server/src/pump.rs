//! Per-connection reader and writer loops.
//!
//! The writer runs as its own task and drains the connection's outbound
//! queue onto the wire. The reader runs in the caller's task, hands every
//! frame to the dispatcher and tears the connection down when the wire
//! closes. Both are generic over the frame sink and stream so they can run
//! against in-memory channels.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::Dispatcher;
use crate::hub::RelayHub;
use crate::registry::Connection;

pub struct Pump {
    hub: Arc<RelayHub>,
    dispatcher: Arc<Dispatcher>,
    ping_interval: Option<Duration>,
}

impl Pump {
    /// `ping_interval` of `None` disables server pings.
    pub fn new(
        hub: Arc<RelayHub>,
        dispatcher: Arc<Dispatcher>,
        ping_interval: Option<Duration>,
    ) -> Self {
        Self {
            hub,
            dispatcher,
            ping_interval,
        }
    }

    /// Run both loops for `conn` until the wire closes or the connection is
    /// closed, then unregister and unpair it.
    #[instrument(skip_all, fields(participant = %conn.participant, role = %conn.role, connection = %conn.id))]
    pub async fn run<W, R, E>(
        &self,
        conn: Arc<Connection>,
        outbound: mpsc::Receiver<String>,
        sink: W,
        stream: R,
    ) where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        info!("participant connected");
        let writer = tokio::spawn(write_loop(
            sink,
            outbound,
            conn.close_signal(),
            self.ping_interval,
        ));

        self.read_loop(&conn, stream).await;

        let former_peers = self.hub.disconnect(&conn);
        info!(?former_peers, "participant disconnected");
        if let Err(e) = writer.await {
            warn!(error = %e, "writer task failed");
        }
    }

    async fn read_loop<R, E>(&self, conn: &Arc<Connection>, mut stream: R)
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let closed = conn.close_signal();
        loop {
            let next = tokio::select! {
                _ = closed.cancelled() => break,
                next = stream.next() => next,
            };
            let text = match next {
                None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "read failed");
                    break;
                }
                Some(Ok(Message::Text(text))) => text.to_string(),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!(len = data.len(), "dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) => {
                    debug!("peer sent close frame");
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            };

            match self.dispatcher.handle_frame(conn, &text).await {
                Ok(queued) => debug!(queued, "frame relayed"),
                Err(e) => warn!(error_kind = e.error_kind(), error = %e, "frame dropped"),
            }
        }
    }
}

async fn write_loop<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<String>,
    closed: CancellationToken,
    ping_interval: Option<Duration>,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display + Send,
{
    let mut pings = ping_interval
        .filter(|p| !p.is_zero())
        .map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    debug!(error = %e, "write failed");
                    break;
                }
            }
            _ = next_ping(&mut pings) => {
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    debug!(error = %e, "ping failed");
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

async fn next_ping(pings: &mut Option<Interval>) {
    match pings {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
