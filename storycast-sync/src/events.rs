//! Observability signals emitted by the broadcasters.
//!
//! None of these are errors: a timed-out target or a slow cycle is
//! reported here and the broadcaster carries on with the next cycle.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A cycle's messages were handed to `targets` surfaces.
    Delivered {
        cycle: u64,
        targets: usize,
        structural: bool,
    },
    /// One target applied the cycle.
    Acknowledged {
        target_id: String,
        cycle: u64,
        latency: Duration,
    },
    /// Every target of the cycle acknowledged; `latency` is the time
    /// until the last one did.
    AllAcknowledged {
        cycle: u64,
        targets: usize,
        latency: Duration,
    },
    /// A target did not acknowledge within the ack timeout.
    TargetTimedOut {
        target_id: String,
        cycle: u64,
        waited: Duration,
    },
    /// Round-trip latency went over the threshold. `awaiting_ack` is set
    /// when the sampling pass caught a cycle that is still unacknowledged.
    LatencyExceeded {
        cycle: u64,
        latency: Duration,
        threshold: Duration,
        awaiting_ack: bool,
    },
}

impl SyncEvent {
    pub fn cycle(&self) -> u64 {
        match self {
            SyncEvent::Delivered { cycle, .. }
            | SyncEvent::Acknowledged { cycle, .. }
            | SyncEvent::AllAcknowledged { cycle, .. }
            | SyncEvent::TargetTimedOut { cycle, .. }
            | SyncEvent::LatencyExceeded { cycle, .. } => *cycle,
        }
    }

    /// Warnings worth surfacing to a user.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            SyncEvent::TargetTimedOut { .. } | SyncEvent::LatencyExceeded { .. }
        )
    }
}
