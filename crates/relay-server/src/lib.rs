//! WebSocket relay pairing requesters with responders.
//!
//! [`RelayHub`] owns the connection registry and pairing graph behind one
//! lock. Each connection runs a [`Pump`]: a writer task draining its
//! outbound queue and a reader loop feeding the [`Dispatcher`]. The axum
//! surface in [`server`] upgrades participant sockets and exposes the
//! session start trigger.

pub mod config;
pub mod dispatch;
pub mod health;
pub mod hub;
pub mod pairing;
pub mod pump;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;

pub use config::{load_settings_from_path, settings_path, RelaySettings, SettingsError};
pub use dispatch::{Dispatcher, RecordLinks};
pub use hub::RelayHub;
pub use pump::Pump;
pub use registry::Connection;
pub use relay::{Relay, RelayConfig};
pub use server::{build_router, start, AppState, ServerHandle};
