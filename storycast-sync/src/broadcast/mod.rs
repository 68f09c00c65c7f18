//! Broadcasters: push authoritative editor state to rendering targets.
//!
//! ```text
//!  update(state) ──► Outbox ──structural──► debounce timer ─┐
//!                      │                                    │ (last state wins)
//!                      └──navigation──────────────┐         │
//!                                                 ▼         ▼
//!                                          start cycle N ──► surfaces
//!                                                 │
//!                      ack / timeout per target ◄─┘
//!                                 │
//!                                 ▼
//!                       latency vs. threshold ──► SyncEvent
//! ```
//!
//! Each broadcaster is an explicitly spawned task that owns all of its
//! state. Commands, acknowledgments and timer expiries are all queued
//! into that one task, so an ack and a timeout for the same target are
//! never acted on together: whichever is dequeued first retires the
//! pending entry and the other finds nothing to do.

mod outbox;
mod stats;
pub mod multi;
pub mod single;

pub use multi::MultiBroadcaster;
pub use single::SingleBroadcaster;
pub use stats::BroadcastStats;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use storycast_core::EditorState;

use crate::events::SyncEvent;
use crate::protocol::AckMessage;
use crate::surface::{AckSink, RenderSurface};
use stats::AtomicBroadcastStats;

/// Broadcaster timing configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiet period before a structural change is sent
    pub debounce: Duration,
    /// Latency threshold for up to `many_targets_threshold` targets
    pub latency_warning: Duration,
    /// Latency threshold above `many_targets_threshold` targets
    pub latency_warning_many: Duration,
    pub many_targets_threshold: usize,
    /// How long a target may take to acknowledge a cycle
    pub ack_timeout: Duration,
    /// Period of the latency sampling pass
    pub sample_interval: Duration,
    /// Latency samples older than this are discarded
    pub sample_window: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            latency_warning: Duration::from_millis(100),
            latency_warning_many: Duration::from_millis(150),
            many_targets_threshold: 3,
            ack_timeout: Duration::from_millis(1000),
            sample_interval: Duration::from_secs(5),
            sample_window: Duration::from_secs(5),
        }
    }
}

impl SyncConfig {
    /// Config for testing: defaults, but a sampling pass every 250ms.
    pub fn for_testing() -> Self {
        Self {
            sample_interval: Duration::from_millis(250),
            ..Self::default()
        }
    }

    /// More targets legitimately take longer to all acknowledge.
    pub fn latency_threshold(&self, target_count: usize) -> Duration {
        if target_count > self.many_targets_threshold {
            self.latency_warning_many
        } else {
            self.latency_warning
        }
    }
}

/// Where the broadcaster is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastPhase {
    Idle,
    /// A structural change is waiting out the debounce window
    Pending,
    /// Messages delivered, waiting for acknowledgments
    Sent,
    Acknowledged,
    TimedOut,
}

/// Returned when a command is issued to a broadcaster that has closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcasterClosed;

impl std::fmt::Display for BroadcasterClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Broadcaster closed")
    }
}

impl std::error::Error for BroadcasterClosed {}

pub(crate) enum Command {
    Update(EditorState),
    Resync,
    AddTarget(Arc<dyn RenderSurface>),
    RemoveTarget(String),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimerEvent {
    Debounce { generation: u64 },
    AckTimeout { cycle: u64, target_id: String },
}

/// Everything a broadcaster task needs to talk to the outside.
pub(crate) struct Outlets {
    pub timers: mpsc::UnboundedSender<TimerEvent>,
    pub phase: watch::Sender<BroadcastPhase>,
    pub stats: Arc<AtomicBroadcastStats>,
    pub events: mpsc::UnboundedSender<SyncEvent>,
}

impl Outlets {
    pub fn emit(&self, event: SyncEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    pub fn set_phase(&self, phase: BroadcastPhase) {
        self.phase.send_replace(phase);
    }

    pub fn phase(&self) -> BroadcastPhase {
        *self.phase.borrow()
    }
}

struct Inlets {
    commands: mpsc::UnboundedReceiver<Command>,
    acks: mpsc::UnboundedReceiver<AckMessage>,
    timers: mpsc::UnboundedReceiver<TimerEvent>,
}

/// Event handlers of a broadcaster task.
pub(crate) trait Driver: Send + 'static {
    fn on_command(&mut self, command: Command);
    fn on_ack(&mut self, ack: AckMessage);
    fn on_timer(&mut self, event: TimerEvent);
    fn on_sample(&mut self);
    /// Cancel every outstanding timer.
    fn shutdown(&mut self);
}

async fn drive<D: Driver>(mut driver: D, mut inlets: Inlets, sample_interval: Duration) {
    let mut sampling = tokio::time::interval(sample_interval);
    sampling.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing to sample yet.
    sampling.tick().await;

    loop {
        tokio::select! {
            command = inlets.commands.recv() => match command {
                Some(Command::Close) | None => break,
                Some(command) => driver.on_command(command),
            },
            Some(ack) = inlets.acks.recv() => driver.on_ack(ack),
            Some(event) = inlets.timers.recv() => driver.on_timer(event),
            _ = sampling.tick() => driver.on_sample(),
        }
    }

    driver.shutdown();
}

/// Caller-side half shared by both broadcasters.
pub(crate) struct Handle {
    commands: mpsc::UnboundedSender<Command>,
    acks: AckSink,
    phase: watch::Receiver<BroadcastPhase>,
    stats: Arc<AtomicBroadcastStats>,
    events: Option<mpsc::UnboundedReceiver<SyncEvent>>,
    task: Option<JoinHandle<()>>,
}

impl Handle {
    /// Wire up channels and spawn the task built by `make_driver`.
    pub fn spawn<D, F>(sample_interval: Duration, make_driver: F) -> Self
    where
        D: Driver,
        F: FnOnce(Outlets) -> D,
    {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (acks, acks_rx) = mpsc::unbounded_channel();
        let (timers, timers_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(BroadcastPhase::Idle);
        let stats = Arc::new(AtomicBroadcastStats::new());

        let driver = make_driver(Outlets {
            timers,
            phase: phase_tx,
            stats: stats.clone(),
            events: events_tx,
        });
        let inlets = Inlets {
            commands: commands_rx,
            acks: acks_rx,
            timers: timers_rx,
        };
        let task = tokio::spawn(drive(driver, inlets, sample_interval));

        Self {
            commands,
            acks,
            phase: phase_rx,
            stats,
            events: Some(events_rx),
            task: Some(task),
        }
    }

    pub fn send(&self, command: Command) -> Result<(), BroadcasterClosed> {
        self.commands.send(command).map_err(|_| BroadcasterClosed)
    }

    pub fn ack_sink(&self) -> AckSink {
        self.acks.clone()
    }

    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.events.take()
    }

    pub fn phase(&self) -> BroadcastPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<BroadcastPhase> {
        self.phase.clone()
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats.snapshot()
    }

    pub async fn close(mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("Broadcaster task failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(100));
        assert_eq!(config.ack_timeout, Duration::from_millis(1000));
        assert_eq!(config.sample_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_latency_threshold_scales_with_targets() {
        let config = SyncConfig::default();
        for n in 0..=3 {
            assert_eq!(config.latency_threshold(n), Duration::from_millis(100));
        }
        for n in [4, 5, 12] {
            assert_eq!(config.latency_threshold(n), Duration::from_millis(150));
        }
    }

    #[test]
    fn test_closed_display() {
        assert_eq!(BroadcasterClosed.to_string(), "Broadcaster closed");
    }
}
