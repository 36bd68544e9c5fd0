//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::hub::HubStats;

#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    #[serde(flatten)]
    pub hub: HubStats,
}

impl HealthResponse {
    /// Report for a relay started at `started`. The relay is healthy
    /// whenever it can answer at all.
    pub fn report(started: Instant, hub: HubStats) -> Self {
        Self {
            status: "ok",
            uptime_secs: started.elapsed().as_secs(),
            hub,
        }
    }
}
