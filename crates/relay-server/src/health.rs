//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::channel::ChannelState;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the endpoint answers.
    pub status: String,
    /// Channel lifecycle state.
    pub state: ChannelState,
    /// Seconds since the channel was created.
    pub uptime_secs: u64,
    /// Live transport sessions.
    pub sessions: usize,
    /// Upgraded requests whose initial leg is still tracked.
    pub pending: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, state: ChannelState, sessions: usize, pending: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        state,
        uptime_secs: start_time.elapsed().as_secs(),
        sessions,
        pending,
    }
}
