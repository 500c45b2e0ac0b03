//! Status - outbox の状況を外から見るためのスナップショット
//!
//! Failed は自動では再配送されないので、監視側はここの `failed` を見て判断する。

use serde::Serialize;

use super::poller::PollerState;
use crate::domain::OutboxCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    #[serde(serialize_with = "poller_state_str")]
    pub poller: PollerState,
    pub outbox: OutboxCounts,
}

impl StatusReport {
    /// Anything left for the poller to look at (Pending or stuck Processing).
    pub fn has_backlog(&self) -> bool {
        self.outbox.pending > 0 || self.outbox.processing > 0
    }
}

fn poller_state_str<S: serde::Serializer>(state: &PollerState, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(match state {
        PollerState::NotRunning => "not_running",
        PollerState::Running => "running",
        PollerState::Stopped => "stopped",
    })
}
