//! Broadcaster for a dynamic set of rendering targets.
//!
//! Every cycle snapshots the active targets into a fresh pending set. Each
//! entry owns its ack timeout, so retiring an entry (ack, timeout, removal
//! or a superseding cycle) also cancels its timer:
//!
//! ```text
//!   cycle N ──► { pixel-7: timer, ipad-mini: timer, laptop: timer }
//!                    │ ack            │ timeout        │ ack
//!                    ▼                ▼                ▼
//!                 retired       TargetTimedOut      retired
//!                                     │
//!         pending empty ──► no timeouts? ──yes──► AllAcknowledged(latency)
//!                                     └────no───► inconclusive
//! ```
//!
//! Targets added mid-cycle get the next cycle's message.

use std::collections::HashMap;
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

/// Owned handle to a multi-target broadcaster task.
///
/// ```ignore
/// let mut broadcaster = MultiBroadcaster::spawn(SyncConfig::default());
/// let events = broadcaster.take_events().unwrap();
/// let (surface, sandbox) = channel_surface("pixel-7", broadcaster.ack_sink());
/// broadcaster.add_target(Arc::new(surface))?;
/// broadcaster.update(state)?;
/// ```
pub struct MultiBroadcaster {
    handle: Handle,
}

impl MultiBroadcaster {
    /// Spawn the broadcaster task. Requires a tokio runtime.
    pub fn spawn(config: SyncConfig) -> Self {
        let sample_interval = config.sample_interval;
        let handle = Handle::spawn(sample_interval, move |outlets| MultiTask::new(config, outlets));
        Self { handle }
    }

    /// Where sandboxes send their acknowledgments.
    pub fn ack_sink(&self) -> AckSink {
        self.handle.ack_sink()
    }

    /// Activate a target. A surface with the same id is replaced.
    pub fn add_target(&self, surface: Arc<dyn RenderSurface>) -> Result<(), BroadcasterClosed> {
        self.handle.send(Command::AddTarget(surface))
    }

    /// Deactivate a target, retiring its pending entry if it has one.
    pub fn remove_target(&self, target_id: impl Into<String>) -> Result<(), BroadcasterClosed> {
        self.handle.send(Command::RemoveTarget(target_id.into()))
    }

    pub fn update(&self, state: EditorState) -> Result<(), BroadcasterClosed> {
        self.handle.send(Command::Update(state))
    }

    /// Start a cycle with the latest state, e.g. after adding targets.
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

    /// Stop the task, cancelling every outstanding timer.
    pub async fn close(self) {
        self.handle.close().await
    }
}

/// Bookkeeping for the cycle in flight.
struct Cycle {
    id: u64,
    started: Instant,
    /// Targets the cycle was delivered to, minus any removed since
    size: usize,
    pending: HashMap<String, TimerHandle>,
    timed_out: usize,
    reported_slow: bool,
}

struct MultiTask {
    config: SyncConfig,
    outlets: Outlets,
    targets: Vec<Arc<dyn RenderSurface>>,
    outbox: Outbox,
    next_cycle: u64,
    current: Option<Cycle>,
    latencies: LatencyWindow,
}

impl MultiTask {
    fn new(config: SyncConfig, outlets: Outlets) -> Self {
        Self {
            outbox: Outbox::new(config.debounce),
            latencies: LatencyWindow::new(config.sample_window),
            config,
            outlets,
            targets: Vec::new(),
            next_cycle: 0,
            current: None,
        }
    }

    fn stats(&self) -> &AtomicBroadcastStats {
        &self.outlets.stats
    }

    fn settle_phase(&self) {
        let phase = if self.current.is_some() {
            BroadcastPhase::Sent
        } else if self.outbox.has_pending() {
            BroadcastPhase::Pending
        } else {
            BroadcastPhase::Idle
        };
        self.outlets.set_phase(phase);
    }

    fn start_cycle(&mut self, state: EditorState, structural: bool) {
        if let Some(previous) = self.current.take() {
            log::debug!(
                "Cycle {} superseded with {} target(s) still pending",
                previous.id,
                previous.pending.len()
            );
        }

        if self.targets.is_empty() {
            log::debug!("No active targets; nothing to broadcast");
            self.outbox.start(state);
            self.outbox.settle();
            self.settle_phase();
            return;
        }

        self.next_cycle += 1;
        let id = self.next_cycle;
        let mut pending = HashMap::with_capacity(self.targets.len());

        for surface in &self.targets {
            let target_id = surface.target_id().to_string();
            let message = BroadcastMessage::from_state(&state, Some(target_id.clone()), id);
            let timer = TimerHandle::arm(
                self.config.ack_timeout,
                &self.outlets.timers,
                TimerEvent::AckTimeout {
                    cycle: id,
                    target_id: target_id.clone(),
                },
            );
            if let Err(e) = surface.send(message) {
                // Stays pending: its timeout reports it.
                log::warn!("Delivery of cycle {id} to {target_id} failed: {e}");
            }
            pending.insert(target_id, timer);
        }

        let size = pending.len();
        self.outbox.start(state);
        self.current = Some(Cycle {
            id,
            started: Instant::now(),
            size,
            pending,
            timed_out: 0,
            reported_slow: false,
        });

        AtomicBroadcastStats::bump(&self.stats().cycles, 1);
        AtomicBroadcastStats::bump(&self.stats().messages_sent, size as u64);
        log::trace!("Cycle {id} delivered to {size} target(s)");
        self.outlets.set_phase(BroadcastPhase::Sent);
        self.outlets.emit(SyncEvent::Delivered {
            cycle: id,
            targets: size,
            structural,
        });
    }

    /// Close the cycle once nothing is pending.
    fn check_complete(&mut self) {
        if !self.current.as_ref().is_some_and(|c| c.pending.is_empty()) {
            return;
        }
        let Some(cycle) = self.current.take() else {
            return;
        };
        self.outbox.settle();

        if cycle.size == 0 {
            log::debug!("Cycle {} lost all of its targets", cycle.id);
            self.settle_phase();
            return;
        }

        if cycle.timed_out > 0 {
            log::debug!(
                "Cycle {} inconclusive: {} of {} target(s) timed out",
                cycle.id,
                cycle.timed_out,
                cycle.size
            );
            self.outlets.set_phase(BroadcastPhase::TimedOut);
            self.settle_phase();
            return;
        }

        let latency = cycle.started.elapsed();
        self.latencies.record(latency);
        self.outlets.stats.publish_latency(&self.latencies);
        self.outlets.emit(SyncEvent::AllAcknowledged {
            cycle: cycle.id,
            targets: cycle.size,
            latency,
        });

        let threshold = self.config.latency_threshold(cycle.size);
        // One latency warning per cycle: skipped if sampling already flagged it.
        if latency > threshold && !cycle.reported_slow {
            log::warn!(
                "All {} target(s) acknowledged cycle {} after {}ms (threshold {}ms)",
                cycle.size,
                cycle.id,
                latency.as_millis(),
                threshold.as_millis()
            );
            AtomicBroadcastStats::bump(&self.stats().latency_warnings, 1);
            self.outlets.emit(SyncEvent::LatencyExceeded {
                cycle: cycle.id,
                latency,
                threshold,
                awaiting_ack: false,
            });
        }

        self.outlets.set_phase(BroadcastPhase::Acknowledged);
        self.settle_phase();
    }

    fn add_target(&mut self, surface: Arc<dyn RenderSurface>) {
        let id = surface.target_id().to_string();
        if let Some(existing) = self.targets.iter_mut().find(|s| s.target_id() == id) {
            log::debug!("Replacing surface for {id}");
            *existing = surface;
        } else {
            log::info!("Target {id} activated ({} active)", self.targets.len() + 1);
            self.targets.push(surface);
        }
    }

    fn remove_target(&mut self, target_id: &str) {
        let before = self.targets.len();
        self.targets.retain(|s| s.target_id() != target_id);
        if self.targets.len() == before {
            log::debug!("Remove of unknown target {target_id}");
            return;
        }
        log::info!("Target {target_id} deactivated ({} active)", self.targets.len());

        if let Some(cycle) = self.current.as_mut() {
            if cycle.pending.remove(target_id).is_some() {
                cycle.size -= 1;
                self.check_complete();
            }
        }
    }
}

impl Driver for MultiTask {
    fn on_command(&mut self, command: Command) {
        match command {
            Command::Update(state) => match self.outbox.offer(state, &self.outlets.timers) {
                Offer::Unchanged => {}
                Offer::Deferred => {
                    if self.current.is_none() {
                        self.outlets.set_phase(BroadcastPhase::Pending);
                    }
                }
                Offer::Ready(state) => self.start_cycle(state, false),
            },
            Command::Resync => {
                let latest = self.outbox.latest();
                self.outbox.cancel_pending();
                if let Some(state) = latest {
                    self.start_cycle(state, true);
                }
            }
            Command::AddTarget(surface) => self.add_target(surface),
            Command::RemoveTarget(target_id) => self.remove_target(&target_id),
            Command::Close => {}
        }
    }

    fn on_ack(&mut self, ack: AckMessage) {
        let retired = match self.current.as_mut() {
            Some(cycle) if ack.cycle.map_or(true, |c| c == cycle.id) => cycle
                .pending
                .remove(&ack.target_id)
                .map(|mut timer| {
                    timer.cancel();
                    (cycle.id, cycle.started.elapsed())
                }),
            _ => None,
        };

        let Some((cycle, latency)) = retired else {
            log::trace!("Ignoring stale ack from {} (cycle {:?})", ack.target_id, ack.cycle);
            AtomicBroadcastStats::bump(&self.stats().stale_acks, 1);
            return;
        };

        AtomicBroadcastStats::bump(&self.stats().acks, 1);
        self.outlets.emit(SyncEvent::Acknowledged {
            target_id: ack.target_id,
            cycle,
            latency,
        });
        self.check_complete();
    }

    fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Debounce { generation } => {
                if let Some(state) = self.outbox.debounce_elapsed(generation) {
                    self.start_cycle(state, true);
                } else {
                    self.settle_phase();
                }
            }
            TimerEvent::AckTimeout { cycle, target_id } => {
                let Some(current) = self.current.as_mut().filter(|c| c.id == cycle) else {
                    return;
                };
                // Already acknowledged or removed.
                if current.pending.remove(&target_id).is_none() {
                    return;
                }
                current.timed_out += 1;

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
                self.check_complete();
            }
        }
    }

    fn on_sample(&mut self) {
        if self.latencies.discard_stale() > 0 {
            self.outlets.stats.publish_latency(&self.latencies);
        }

        let Some(cycle) = self.current.as_mut() else {
            return;
        };
        let threshold = self.config.latency_threshold(cycle.size);
        let waiting = cycle.started.elapsed();
        if waiting > threshold && !cycle.reported_slow {
            cycle.reported_slow = true;
            log::warn!(
                "Cycle {} still waiting on {} of {} target(s) after {}ms",
                cycle.id,
                cycle.pending.len(),
                cycle.size,
                waiting.as_millis()
            );
            AtomicBroadcastStats::bump(&self.outlets.stats.latency_warnings, 1);
            self.outlets.emit(SyncEvent::LatencyExceeded {
                cycle: cycle.id,
                latency: waiting,
                threshold,
                awaiting_ack: true,
            });
        }
    }

    fn shutdown(&mut self) {
        self.outbox.close();
        // Dropping the cycle cancels its ack timers.
        self.current = None;
        log::debug!(
            "Multi-target broadcaster stopped after {} cycles ({} targets)",
            self.next_cycle,
            self.targets.len()
        );
    }
}
