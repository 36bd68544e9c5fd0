//! Starting a chat between a requester and a responder.
//!
//! A chat ends without a dedicated operation: either side disconnecting
//! unpairs it, and a close-chat frame tells the peer it is over.

use std::sync::Arc;

use relay_core::{DataLookup, ParticipantId, RelayError, ServerMessage};
use tracing::{info, instrument, warn};

use crate::dispatch::{deliver, Delivery};
use crate::hub::RelayHub;

/// Pair two connected participants and tell each side who the other is.
///
/// Fails with `PeerNotConnected` naming whichever side is missing. Name
/// lookups that fail are logged and leave the name out; a paired
/// notification that cannot be queued is logged and not reported.
#[instrument(skip_all, fields(requester = %requester, responder = %responder))]
pub async fn start_session(
    hub: &RelayHub,
    lookup: &Arc<dyn DataLookup>,
    requester: ParticipantId,
    responder: ParticipantId,
) -> Result<(), RelayError> {
    let (requester_conn, responder_conn) = hub.pair_connected(requester, responder)?;

    let patient_name = display_name(lookup, requester).await;
    let doctor_name = display_name(lookup, responder).await;

    let paired = |receiver: ParticipantId| ServerMessage::ChatPaired {
        receiver,
        patient: requester,
        doctor: responder,
        patient_name: patient_name.clone(),
        doctor_name: doctor_name.clone(),
    };

    let queued = deliver(vec![
        Delivery::new(requester_conn, paired(requester)),
        Delivery::new(responder_conn, paired(responder)),
    ])
    .await;
    info!(queued, "chat session started");
    Ok(())
}

async fn display_name(lookup: &Arc<dyn DataLookup>, id: ParticipantId) -> Option<String> {
    match lookup.display_name(id).await {
        Ok(name) => name,
        Err(e) => {
            warn!(participant = %id, error = %e, "display name lookup failed");
            None
        }
    }
}
