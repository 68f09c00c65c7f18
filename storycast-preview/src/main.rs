//! Storycast Preview: live multi-device preview of a slide deck.
//!
//! Drives the multi-target broadcaster from a scripted editing session:
//! typing bursts (coalesced by the debounce), slide navigation (sent at
//! once), enabling devices under the memory budget and disabling them
//! again. Every enabled device runs an in-process sandbox that renders to
//! the log and acknowledges.
//!
//! ```text
//! storycast-preview [PREFS_PATH]     # default: storycast-preview.json
//! RUST_LOG=debug storycast-preview   # show every rendered frame
//! ```

mod state;

use log::{info, warn};
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use storycast_core::{Slide, DEVICES};
use storycast_sync::{EnableOutcome, JsonFilePreferenceStore, SyncConfig, SyncEvent};
use state::PreviewState;

const DEFAULT_PREFS_PATH: &str = "storycast-preview.json";

/// Outcome counts over the session.
#[derive(Debug, Default)]
struct Tally {
    delivered: u64,
    all_acknowledged: u64,
    timeouts: u64,
    slow: u64,
}

fn log_events(mut events: mpsc::UnboundedReceiver<SyncEvent>) -> JoinHandle<Tally> {
    tokio::spawn(async move {
        let mut tally = Tally::default();
        while let Some(event) = events.recv().await {
            match event {
                SyncEvent::Delivered { cycle, targets, structural } => {
                    tally.delivered += 1;
                    let kind = if structural { "content" } else { "navigation" };
                    log::debug!("Cycle {cycle}: {kind} update sent to {targets} device(s)");
                }
                SyncEvent::Acknowledged { target_id, cycle, latency } => {
                    log::trace!("{target_id} applied cycle {cycle} in {}ms", latency.as_millis());
                }
                SyncEvent::AllAcknowledged { cycle, targets, latency } => {
                    tally.all_acknowledged += 1;
                    info!("Cycle {cycle}: {targets} device(s) in sync after {}ms", latency.as_millis());
                }
                SyncEvent::TargetTimedOut { target_id, cycle, .. } => {
                    tally.timeouts += 1;
                    warn!("{target_id} missed cycle {cycle}");
                }
                SyncEvent::LatencyExceeded { cycle, latency, threshold, .. } => {
                    tally.slow += 1;
                    warn!(
                        "Cycle {cycle} slow: {}ms over a {}ms budget",
                        latency.as_millis(),
                        threshold.as_millis()
                    );
                }
            }
        }
        tally
    })
}

fn report_enable(id: &str, outcome: &EnableOutcome) {
    match outcome {
        EnableOutcome::Enabled { warning: false } => info!("Enabled {id}"),
        EnableOutcome::Enabled { warning: true } => warn!("Enabled {id}; memory usage is high"),
        EnableOutcome::AlreadyEnabled => info!("{id} already enabled"),
        EnableOutcome::Refused(check) => warn!(
            "Refused {id}: projected usage {:.0} would reach the hard limit",
            check.projected
        ),
        EnableOutcome::UnknownDevice => warn!("Unknown device {id}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let prefs_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFS_PATH));
    info!("Starting Storycast Preview (preferences: {})", prefs_path.display());

    let mut state = PreviewState::new(JsonFilePreferenceStore::new(prefs_path), SyncConfig::default());
    let tally = match state.take_events() {
        Some(events) => log_events(events),
        None => return Err("event stream already taken".into()),
    };

    let prefs = state.settings.preferences();
    info!(
        "Preview {} with layout {}, {} device(s) enabled",
        if prefs.enabled { "on" } else { "off" },
        prefs.layout,
        prefs.enabled_devices.len()
    );
    state.sync_sandboxes()?;

    // Typing a title: each keystroke is a structural edit, coalesced.
    let title = "Welcome to Storycast";
    for end in 1..=title.len() {
        state.edit(|deck| deck.slides[0] = deck.slides[0].clone().set("title", &title[..end]))?;
        sleep(Duration::from_millis(25)).await;
    }
    sleep(Duration::from_millis(300)).await;

    // Paging through the deck is sent immediately.
    for index in [1, 2, 1, 0] {
        state.navigate(index)?;
        sleep(Duration::from_millis(150)).await;
    }

    state.edit(|deck| {
        let closing = Slide::new(Default::default())
            .set("type", "title")
            .set("title", "Thanks for watching");
        deck.slides.push(closing);
        deck.slides.swap(1, 2);
    })?;
    sleep(Duration::from_millis(300)).await;

    // Add devices until the budget says no.
    for device in DEVICES {
        let outcome = state.enable_device(device.id)?;
        report_enable(device.id, &outcome);
        if matches!(outcome, EnableOutcome::Refused(_)) {
            break;
        }
        sleep(Duration::from_millis(200)).await;
    }

    let usage = state.memory_usage();
    info!(
        "Estimated usage {:.0} ({:.0}% of limit, {:?}) with {} sandbox(es); at most {} allowed",
        usage.estimated_usage,
        usage.percentage_of_limit,
        usage.status,
        state.running(),
        state.settings.max_devices(state.editor.content_char_count())
    );

    if let Some(last) = state.settings.active_profiles().last() {
        let id = last.id;
        state.disable_device(id)?;
        info!("Disabled {id}");
    }
    if let Some(e) = state.settings.last_save_error() {
        warn!("Preferences are not being saved: {e}");
    }

    state.navigate(state.editor.slides.len() - 1)?;
    sleep(Duration::from_millis(1500)).await;

    let stats = state.broadcaster().stats();
    state.shutdown().await;
    let tally = tally.await?;
    info!(
        "Session: {} cycles, {} fully acknowledged, {} timeouts, {} slow; mean latency {:?}",
        tally.delivered, tally.all_acknowledged, tally.timeouts, tally.slow, stats.mean_latency
    );
    Ok(())
}
