use crate::ids::{ParticipantId, Role};

/// Everything that can go wrong while relaying a frame or starting a chat.
///
/// None of these are fatal: callers log them and carry on. Only a transport
/// read/write failure ends a connection, and that never surfaces as a
/// `RelayError`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("{role} {id} is not connected")]
    PeerNotConnected { id: ParticipantId, role: Role },
    #[error("participant {sender} has no active pairing")]
    PeerNotPaired { sender: ParticipantId },
    #[error("participant {sender} is not paired with {target}")]
    PeerNotAuthorized {
        sender: ParticipantId,
        target: ParticipantId,
    },
    #[error("participant {target} has disconnected")]
    PeerDisconnected { target: ParticipantId },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("outbound queue for {target} is closed")]
    DeliverySkipped { target: ParticipantId },
    #[error("unknown message type {0}")]
    UnknownMessageType(i64),
    #[error("lookup failed: {0}")]
    Lookup(String),
    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl RelayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::PeerNotConnected { .. } => "peer_not_connected",
            Self::PeerNotPaired { .. } => "peer_not_paired",
            Self::PeerNotAuthorized { .. } => "peer_not_authorized",
            Self::PeerDisconnected { .. } => "peer_disconnected",
            Self::MalformedMessage(_) => "malformed_message",
            Self::DeliverySkipped { .. } => "delivery_skipped",
            Self::UnknownMessageType(_) => "unknown_message_type",
            Self::Lookup(_) => "lookup_failed",
            Self::Encode(_) => "encode_failed",
        }
    }

    /// Whether the failure is a routing rejection (bad or departed target).
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            Self::PeerNotPaired { .. }
                | Self::PeerNotAuthorized { .. }
                | Self::PeerDisconnected { .. }
        )
    }
}

/// Failure reported by a data-lookup backend.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("lookup backend error: {0}")]
    Backend(String),
}

impl From<LookupError> for RelayError {
    fn from(e: LookupError) -> Self {
        RelayError::Lookup(e.to_string())
    }
}
