//! Broadcaster for one rendering target.
//!
//! ```text
//!   Idle ──structural──► Pending ──debounce──► Sent ──ack──► Acknowledged ──► Idle
//!     │                     │                    │
//!     └──navigation─────────┴──────────────────► │ ──ack timeout──► TimedOut ──► Idle
//! ```
//!
//! Until a surface is attached, offered state is held and sent as soon as
//! one is.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use storycast_core::EditorState;

use super::outbox::{Offer, Outbox};
use super::stats::{AtomicBroadcastStats, LatencyWindow};
use super::{
    BroadcastPhase, BroadcastStats, BroadcasterClosed, Command, Driver, Handle, Outlets, SyncConfig,
    TimerEvent,
};
use crate::events::SyncEvent;
use crate::protocol::{AckMessage, BroadcastMessage};
use crate::surface::{AckSink, RenderSurface};
use crate::timer::TimerHandle;

/// Owned handle to a single-target broadcaster task.
pub struct SingleBroadcaster {
    handle: Handle,
}

impl SingleBroadcaster {
    /// Spawn the broadcaster task. Requires a tokio runtime.
    pub fn spawn(config: SyncConfig) -> Self {
        let sample_interval = config.sample_interval;
        let handle = Handle::spawn(sample_interval, move |outlets| SingleTask::new(config, outlets));
        Self { handle }
    }

    /// Where the target's sandbox should send its acknowledgments.
    pub fn ack_sink(&self) -> AckSink {
        self.handle.ack_sink()
    }

    /// Attach (or replace) the render surface. The latest state is sent
    /// to it right away.
    pub fn attach(&self, surface: Arc<dyn RenderSurface>) -> Result<(), BroadcasterClosed> {
        self.handle.send(Command::AddTarget(surface))
    }

    pub fn detach(&self, target_id: impl Into<String>) -> Result<(), BroadcasterClosed> {
        self.handle.send(Command::RemoveTarget(target_id.into()))
    }

    /// Offer a new editor snapshot.
    pub fn update(&self, state: EditorState) -> Result<(), BroadcasterClosed> {
        self.handle.send(Command::Update(state))
    }

    /// Send the latest state again, bypassing change detection.
    pub fn resync(&self) -> Result<(), BroadcasterClosed> {
        self.handle.send(Command::Resync)
    }

    /// Take the event receiver (can only be called once).
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.handle.take_events()
    }

    pub fn phase(&self) -> BroadcastPhase {
        self.handle.phase()
    }

    pub fn watch_phase(&self) -> watch::Receiver<BroadcastPhase> {
        self.handle.watch_phase()
    }

    pub fn stats(&self) -> BroadcastStats {
        self.handle.stats()
    }

    /// Stop the task, cancelling the debounce and ack timers.
    pub async fn close(self) {
        self.handle.close().await
    }
}

struct InFlight {
    cycle: u64,
    sent_at: Instant,
    timeout: TimerHandle,
    reported_slow: bool,
}

struct SingleTask {
    config: SyncConfig,
    outlets: Outlets,
    surface: Option<Arc<dyn RenderSurface>>,
    outbox: Outbox,
    /// Held while no surface is attached
    held: Option<EditorState>,
    cycle: u64,
    in_flight: Option<InFlight>,
    latencies: LatencyWindow,
}

impl SingleTask {
    fn new(config: SyncConfig, outlets: Outlets) -> Self {
        Self {
            outbox: Outbox::new(config.debounce),
            latencies: LatencyWindow::new(config.sample_window),
            config,
            outlets,
            surface: None,
            held: None,
            cycle: 0,
            in_flight: None,
        }
    }

    fn stats(&self) -> &AtomicBroadcastStats {
        &self.outlets.stats
    }

    fn settle_phase(&self) {
        let phase = if self.in_flight.is_some() {
            BroadcastPhase::Sent
        } else if self.outbox.has_pending() {
            BroadcastPhase::Pending
        } else {
            BroadcastPhase::Idle
        };
        self.outlets.set_phase(phase);
    }

    fn send(&mut self, state: EditorState, structural: bool) {
        let Some(surface) = self.surface.clone() else {
            log::debug!("No surface attached; holding state");
            self.held = Some(state);
            self.settle_phase();
            return;
        };

        self.cycle += 1;
        let cycle = self.cycle;
        let message = BroadcastMessage::from_state(&state, None, cycle);
        self.outbox.start(state);

        // A superseded cycle's timer is dropped (and cancelled) here.
        self.in_flight = Some(InFlight {
            cycle,
            sent_at: Instant::now(),
            timeout: TimerHandle::arm(
                self.config.ack_timeout,
                &self.outlets.timers,
                TimerEvent::AckTimeout {
                    cycle,
                    target_id: surface.target_id().to_string(),
                },
            ),
            reported_slow: false,
        });

        if let Err(e) = surface.send(message) {
            // Left in flight: the ack timeout reports it.
            log::warn!("Delivery of cycle {cycle} to {} failed: {e}", surface.target_id());
        }
        AtomicBroadcastStats::bump(&self.stats().cycles, 1);
        AtomicBroadcastStats::bump(&self.stats().messages_sent, 1);
        log::trace!("Cycle {cycle} sent to {}", surface.target_id());
        self.outlets.set_phase(BroadcastPhase::Sent);
        self.outlets.emit(SyncEvent::Delivered {
            cycle,
            targets: 1,
            structural,
        });
    }

    fn finish(&mut self, outcome: BroadcastPhase) {
        self.in_flight = None;
        self.outbox.settle();
        self.outlets.set_phase(outcome);
        if let Some(state) = self.held.take() {
            self.send(state, true);
            return;
        }
        self.settle_phase();
    }
}

impl Driver for SingleTask {
    fn on_command(&mut self, command: Command) {
        match command {
            Command::Update(state) => {
                if self.surface.is_none() {
                    self.held = Some(state);
                    return;
                }
                match self.outbox.offer(state, &self.outlets.timers) {
                    Offer::Unchanged => {}
                    Offer::Deferred => {
                        if self.in_flight.is_none() {
                            self.outlets.set_phase(BroadcastPhase::Pending);
                        }
                    }
                    Offer::Ready(state) => self.send(state, false),
                }
            }
            Command::Resync => {
                self.outbox.cancel_pending();
                if let Some(state) = self.held.take().or_else(|| self.outbox.latest()) {
                    self.send(state, true);
                }
            }
            Command::AddTarget(surface) => {
                log::info!("Attached surface {}", surface.target_id());
                self.surface = Some(surface);
                let state = self.held.take().or_else(|| self.outbox.latest());
                self.outbox.cancel_pending();
                if let Some(state) = state {
                    self.send(state, true);
                }
            }
            Command::RemoveTarget(target_id) => {
                let attached = self.surface.as_ref().is_some_and(|s| s.target_id() == target_id);
                if attached {
                    log::info!("Detached surface {target_id}");
                    self.surface = None;
                    if let Some(mut in_flight) = self.in_flight.take() {
                        in_flight.timeout.cancel();
                    }
                    self.outbox.settle();
                    self.held = self.outbox.latest();
                    self.outbox.cancel_pending();
                    self.settle_phase();
                }
            }
            Command::Close => {}
        }
    }

    fn on_ack(&mut self, ack: AckMessage) {
        let current = self.in_flight.as_ref().is_some_and(|f| {
            ack.cycle.map_or(true, |c| c == f.cycle)
                && self.surface.as_ref().is_some_and(|s| s.target_id() == ack.target_id)
        });
        if !current {
            log::trace!("Ignoring stale ack from {} (cycle {:?})", ack.target_id, ack.cycle);
            AtomicBroadcastStats::bump(&self.stats().stale_acks, 1);
            return;
        }
        let Some(mut in_flight) = self.in_flight.take() else {
            return;
        };
        in_flight.timeout.cancel();

        let latency = in_flight.sent_at.elapsed();
        self.latencies.record(latency);
        self.outlets.stats.publish_latency(&self.latencies);
        AtomicBroadcastStats::bump(&self.stats().acks, 1);
        self.outlets.emit(SyncEvent::Acknowledged {
            target_id: ack.target_id,
            cycle: in_flight.cycle,
            latency,
        });

        let threshold = self.config.latency_warning;
        // One latency warning per cycle: skipped if sampling already flagged it.
        if latency > threshold && !in_flight.reported_slow {
            log::warn!(
                "Render latency {}ms exceeded {}ms (cycle {})",
                latency.as_millis(),
                threshold.as_millis(),
                in_flight.cycle
            );
            AtomicBroadcastStats::bump(&self.stats().latency_warnings, 1);
            self.outlets.emit(SyncEvent::LatencyExceeded {
                cycle: in_flight.cycle,
                latency,
                threshold,
                awaiting_ack: false,
            });
        }

        self.finish(BroadcastPhase::Acknowledged);
    }

    fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Debounce { generation } => {
                if let Some(state) = self.outbox.debounce_elapsed(generation) {
                    self.send(state, true);
                } else {
                    self.settle_phase();
                }
            }
            TimerEvent::AckTimeout { cycle, target_id } => {
                if !self.in_flight.as_ref().is_some_and(|f| f.cycle == cycle) {
                    return;
                }
                log::warn!(
                    "Target {target_id} did not acknowledge cycle {cycle} within {}ms",
                    self.config.ack_timeout.as_millis()
                );
                AtomicBroadcastStats::bump(&self.stats().timeouts, 1);
                self.outlets.emit(SyncEvent::TargetTimedOut {
                    target_id,
                    cycle,
                    waited: self.config.ack_timeout,
                });
                self.finish(BroadcastPhase::TimedOut);
            }
        }
    }

    fn on_sample(&mut self) {
        if self.latencies.discard_stale() > 0 {
            self.outlets.stats.publish_latency(&self.latencies);
        }

        let threshold = self.config.latency_warning;
        let Some(in_flight) = self.in_flight.as_mut() else {
            return;
        };
        let waiting = in_flight.sent_at.elapsed();
        if waiting > threshold && !in_flight.reported_slow {
            in_flight.reported_slow = true;
            log::warn!(
                "Cycle {} still unacknowledged after {}ms",
                in_flight.cycle,
                waiting.as_millis()
            );
            AtomicBroadcastStats::bump(&self.outlets.stats.latency_warnings, 1);
            self.outlets.emit(SyncEvent::LatencyExceeded {
                cycle: in_flight.cycle,
                latency: waiting,
                threshold,
                awaiting_ack: true,
            });
        }
    }

    fn shutdown(&mut self) {
        self.outbox.close();
        if let Some(mut in_flight) = self.in_flight.take() {
            in_flight.timeout.cancel();
        }
        log::debug!("Single-target broadcaster stopped after {} cycles", self.cycle);
    }
}
