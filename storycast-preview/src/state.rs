//! Preview state: owns the editor deck, the preview settings, the
//! broadcaster and one in-process sandbox per active device.
//!
//! `PreviewState` is the single source of truth for the running preview.
//! Every device mutation re-syncs the running sandboxes with the active
//! profiles, and newly started sandboxes are brought up to date with a
//! resync cycle.

use std::collections::HashMap;
use std::sync::Arc;
use serde_json::{json, Map};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use storycast_core::{DeviceProfile, EditorState, MemoryBudget, MemoryEstimate, Slide};
use storycast_sync::{
    channel_surface, BroadcastMessage, BroadcasterClosed, EnableOutcome, MultiBroadcaster, PreferenceStore,
    PreviewSettings, SyncConfig, SyncEvent,
};

/// Owns the entire preview pipeline.
pub struct PreviewState<S> {
    pub settings: PreviewSettings<S>,
    pub editor: EditorState,
    broadcaster: MultiBroadcaster,
    /// Running sandbox tasks by device id.
    sandboxes: HashMap<String, JoinHandle<()>>,
}

impl<S: PreferenceStore> PreviewState<S> {
    /// Load preferences from `store` and spawn the broadcaster. Requires a
    /// tokio runtime.
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self {
            settings: PreviewSettings::load(store, MemoryBudget::default()),
            editor: demo_deck(),
            broadcaster: MultiBroadcaster::spawn(config),
            sandboxes: HashMap::new(),
        }
    }

    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.broadcaster.take_events()
    }

    pub fn running(&self) -> usize {
        self.sandboxes.len()
    }

    pub fn broadcaster(&self) -> &MultiBroadcaster {
        &self.broadcaster
    }

    /// Start sandboxes for newly active devices and stop the rest.
    pub fn sync_sandboxes(&mut self) -> Result<(), BroadcasterClosed> {
        let active: Vec<&'static DeviceProfile> = self.settings.active_profiles();

        let stale: Vec<String> = self
            .sandboxes
            .keys()
            .filter(|id| !active.iter().any(|p| p.id == id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            self.broadcaster.remove_target(id.clone())?;
            if let Some(task) = self.sandboxes.remove(&id) {
                task.abort();
            }
            log::info!("Stopped sandbox {id}");
        }

        let mut started = 0;
        for profile in active {
            if self.sandboxes.contains_key(profile.id) {
                continue;
            }
            let (surface, sandbox) = channel_surface(profile.id, self.broadcaster.ack_sink());
            self.broadcaster.add_target(Arc::new(surface))?;
            let task = tokio::spawn(sandbox.serve(render_to_log(profile)));
            self.sandboxes.insert(profile.id.to_string(), task);
            started += 1;

            let size = profile.display_size();
            log::info!("Started sandbox {} ({}x{})", profile.name, size.width, size.height);
        }

        if started > 0 {
            self.broadcaster.resync()?;
        }
        Ok(())
    }

    /// Apply an edit to the deck and offer the result to the broadcaster.
    pub fn edit(&mut self, apply: impl FnOnce(&mut EditorState)) -> Result<(), BroadcasterClosed> {
        apply(&mut self.editor);
        self.broadcaster.update(self.editor.clone())
    }

    pub fn navigate(&mut self, index: usize) -> Result<(), BroadcasterClosed> {
        self.edit(|deck| deck.active_index = Some(index.min(deck.slides.len().saturating_sub(1))))
    }

    pub fn enable_device(&mut self, id: &str) -> Result<EnableOutcome, BroadcasterClosed> {
        let outcome = self.settings.enable_device(id, self.editor.content_char_count());
        if matches!(outcome, EnableOutcome::Enabled { .. }) {
            self.sync_sandboxes()?;
        }
        Ok(outcome)
    }

    pub fn disable_device(&mut self, id: &str) -> Result<bool, BroadcasterClosed> {
        let disabled = self.settings.disable_device(id);
        if disabled {
            self.sync_sandboxes()?;
        }
        Ok(disabled)
    }

    pub fn memory_usage(&self) -> MemoryEstimate {
        self.settings.memory_usage(self.editor.content_char_count())
    }

    /// Close the broadcaster, then stop every sandbox.
    pub async fn shutdown(self) {
        let stats = self.broadcaster.stats();
        self.broadcaster.close().await;
        for (_, task) in self.sandboxes {
            task.abort();
        }
        log::info!(
            "Preview stopped: {} cycles, {} messages, {} acks, {} timeouts",
            stats.cycles,
            stats.messages_sent,
            stats.acks,
            stats.timeouts
        );
    }
}

/// Simulated renderer: logs what the device would show.
fn render_to_log(profile: &'static DeviceProfile) -> impl FnMut(&BroadcastMessage) + Send + 'static {
    move |message: &BroadcastMessage| {
        let title = message
            .active_index
            .and_then(|i| message.slides.get(i))
            .and_then(|slide| slide.field("title"))
            .and_then(|title| title.as_str())
            .unwrap_or("");
        log::debug!(
            "[{}] cycle {}: slide {:?} of {} \"{title}\"",
            profile.id,
            message.cycle,
            message.active_index,
            message.slides.len()
        );
    }
}

/// Starting deck for the preview session.
pub fn demo_deck() -> EditorState {
    let slides = vec![
        Slide::new(Map::new())
            .set("type", "title")
            .set("title", "")
            .set("background", json!({"color": "#101820"})),
        Slide::new(Map::new())
            .set("type", "image")
            .set("title", "Behind the scenes")
            .set("media", json!({"url": "https://cdn.example/bts.jpg", "fit": "cover"})),
        Slide::new(Map::new())
            .set("type", "quote")
            .set("title", "In their words")
            .set("text", "Ship small, ship often."),
    ];
    EditorState::new(slides, Some(0))
}
