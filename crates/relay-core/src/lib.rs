pub mod errors;
pub mod ids;
pub mod lookup;
pub mod message;

pub use errors::{LookupError, RelayError};
pub use ids::{ConnectionId, ParticipantId, Role};
pub use lookup::{CaseRecord, DataLookup, InMemoryDirectory};
pub use message::{ClientMessage, DocumentRef, Envelope, ServerMessage};
