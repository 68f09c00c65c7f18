//! Coalescing of editor snapshots into broadcast cycles.
//!
//! The outbox tracks three snapshots:
//!
//! - `pending`: latest structural edit waiting out the debounce window
//! - `in_flight`: state of the cycle currently awaiting acknowledgment
//! - `last_broadcast`: state of the last cycle that completed
//!
//! New snapshots are compared against the newest of the three, so an
//! unchanged snapshot is ignored wherever it arrives and a pure
//! navigation on top of a pending edit flushes that edit immediately
//! (carrying the navigation with it).

use std::time::Duration;
use tokio::sync::mpsc;

use storycast_core::{has_changed, EditorState};

use super::TimerEvent;
use crate::timer::TimerHandle;

#[derive(Debug, PartialEq)]
pub(crate) enum Offer {
    /// Nothing the renderers don't already have (or are about to get)
    Unchanged,
    /// Structural change parked behind the debounce timer
    Deferred,
    /// Navigation: send this now
    Ready(EditorState),
}

pub(crate) struct Outbox {
    debounce: Duration,
    pending: Option<EditorState>,
    in_flight: Option<EditorState>,
    last_broadcast: Option<EditorState>,
    timer: TimerHandle,
    generation: u64,
}

impl Outbox {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: None,
            in_flight: None,
            last_broadcast: None,
            timer: TimerHandle::idle(),
            generation: 0,
        }
    }

    fn reference(&self) -> Option<&EditorState> {
        self.pending
            .as_ref()
            .or(self.in_flight.as_ref())
            .or(self.last_broadcast.as_ref())
    }

    /// What the renderers have, or will have once the cycle in flight lands.
    fn delivered(&self) -> Option<&EditorState> {
        self.in_flight.as_ref().or(self.last_broadcast.as_ref())
    }

    pub fn offer(&mut self, state: EditorState, timers: &mpsc::UnboundedSender<TimerEvent>) -> Offer {
        let change = has_changed(self.reference(), &state);
        if !change.changed {
            return Offer::Unchanged;
        }

        if change.structural {
            if self.timer.is_armed() {
                log::trace!("Debounce restarted (generation {})", self.generation + 1);
            }
            self.generation += 1;
            self.timer.cancel();
            self.timer = TimerHandle::arm(
                self.debounce,
                timers,
                TimerEvent::Debounce {
                    generation: self.generation,
                },
            );
            self.pending = Some(state);
            Offer::Deferred
        } else {
            self.cancel_pending();
            Offer::Ready(state)
        }
    }

    /// The debounce timer for `generation` expired.
    ///
    /// Returns the coalesced state, unless the timer is stale or the edits
    /// cancelled each other out.
    pub fn debounce_elapsed(&mut self, generation: u64) -> Option<EditorState> {
        if generation != self.generation {
            return None;
        }
        let state = self.pending.take()?;
        if !has_changed(self.delivered(), &state).changed {
            log::trace!("Coalesced edits reverted to the delivered state");
            return None;
        }
        Some(state)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel_pending(&mut self) {
        self.timer.cancel();
        self.pending = None;
    }

    /// Latest known state, for resyncing renderers.
    pub fn latest(&self) -> Option<EditorState> {
        self.reference().cloned()
    }

    /// A new cycle begins with `state`. A superseded in-flight cycle was
    /// still delivered, so it becomes the baseline.
    pub fn start(&mut self, state: EditorState) {
        if let Some(previous) = self.in_flight.replace(state) {
            self.last_broadcast = Some(previous);
        }
    }

    /// The cycle in flight completed (acknowledged or exhausted).
    pub fn settle(&mut self) {
        if let Some(state) = self.in_flight.take() {
            self.last_broadcast = Some(state);
        }
    }

    pub fn close(&mut self) {
        self.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use storycast_core::Slide;

    fn deck(title: &str, active: Option<usize>) -> EditorState {
        EditorState::new(
            vec![
                Slide::with_id("a", Map::new()).set("title", title),
                Slide::with_id("b", Map::new()).set("title", "Second"),
            ],
            active,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_state_is_deferred() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut outbox = Outbox::new(Duration::from_millis(100));

        assert_eq!(outbox.offer(deck("v1", Some(0)), &tx), Offer::Deferred);
        assert!(outbox.has_pending());

        let TimerEvent::Debounce { generation } = rx.recv().await.unwrap() else {
            panic!("expected debounce event");
        };
        assert_eq!(outbox.debounce_elapsed(generation), Some(deck("v1", Some(0))));
        assert!(!outbox.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_makes_old_generation_stale() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut outbox = Outbox::new(Duration::from_millis(100));

        outbox.offer(deck("v1", Some(0)), &tx);
        outbox.offer(deck("v2", Some(0)), &tx);
        outbox.offer(deck("v3", Some(0)), &tx);

        let TimerEvent::Debounce { generation } = rx.recv().await.unwrap() else {
            panic!("expected debounce event");
        };
        assert_eq!(generation, 3);
        assert_eq!(outbox.debounce_elapsed(1), None);
        assert_eq!(outbox.debounce_elapsed(3), Some(deck("v3", Some(0))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_flushes_pending_edit() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut outbox = Outbox::new(Duration::from_millis(100));
        outbox.start(deck("v1", Some(0)));
        outbox.settle();

        assert_eq!(outbox.offer(deck("v2", Some(0)), &tx), Offer::Deferred);
        let offer = outbox.offer(deck("v2", Some(1)), &tx);
        assert_eq!(offer, Offer::Ready(deck("v2", Some(1))));
        assert!(!outbox.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_state_is_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut outbox = Outbox::new(Duration::from_millis(100));
        outbox.start(deck("v1", Some(0)));

        // Against the in-flight cycle.
        assert_eq!(outbox.offer(deck("v1", Some(0)), &tx), Offer::Unchanged);
        outbox.settle();
        // Against the last broadcast.
        assert_eq!(outbox.offer(deck("v1", Some(0)), &tx), Offer::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_edit_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut outbox = Outbox::new(Duration::from_millis(100));
        outbox.start(deck("v1", Some(0)));
        outbox.settle();

        outbox.offer(deck("typo", Some(0)), &tx);
        outbox.offer(deck("v1", Some(0)), &tx);

        let TimerEvent::Debounce { generation } = rx.recv().await.unwrap() else {
            panic!("expected debounce event");
        };
        assert_eq!(outbox.debounce_elapsed(generation), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_supersedes_in_flight() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut outbox = Outbox::new(Duration::from_millis(100));
        outbox.start(deck("v1", Some(0)));
        outbox.start(deck("v1", Some(1)));
        outbox.settle();

        assert_eq!(outbox.latest(), Some(deck("v1", Some(1))));
        assert_eq!(outbox.offer(deck("v1", Some(1)), &tx), Offer::Unchanged);
    }
}
