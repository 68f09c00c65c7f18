//! # storycast-sync: editor → renderer synchronization
//!
//! Pushes authoritative editor state into one or many isolated rendering
//! sandboxes with bounded latency, and reports per-target delivery failure.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  update()   ┌──────────────────┐  UPDATE_STORY  ┌─────────────┐
//! │ editor state │ ──────────► │   Broadcaster    │ ─────────────► │ RenderSurface│
//! └──────────────┘             │ (spawned task)   │                │ (per target) │
//!                              │ outbox/debounce  │ ◄───── ACK ─── └──────┬──────┘
//!                              │ pending + timers │    AckSink            │
//!                              └────────┬─────────┘                 sandbox renders
//!                                       │
//!                                       ▼
//!                                   SyncEvent
//!                     (delivered, acknowledged, timed out, slow)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: `UPDATE_STORY` / `ACK` messages and their JSON frames
//! - [`surface`]: render-surface capability and in-process channel surface
//! - [`timer`]: cancellable one-shot timers
//! - [`broadcast`]: single- and multi-target broadcasters
//! - [`events`]: observability signals
//! - [`preferences`]: enabled devices, order and layout, with storage
//! - [`transport`]: WebSocket surface and sandbox host

pub mod protocol;
pub mod surface;
pub mod timer;
pub mod events;
pub mod broadcast;
pub mod preferences;
pub mod transport;

// Re-exports for convenience
pub use protocol::{AckMessage, BroadcastMessage, ProtocolError, WireMessage};
pub use surface::{channel_surface, AckSink, ChannelSurface, RenderSurface, SandboxEndpoint, SandboxRenderer, SurfaceError};
pub use timer::TimerHandle;
pub use events::SyncEvent;
pub use broadcast::{
    BroadcastPhase, BroadcastStats, BroadcasterClosed, MultiBroadcaster, SingleBroadcaster, SyncConfig,
};
pub use preferences::{
    EnableOutcome, GridLayout, JsonFilePreferenceStore, MemoryPreferenceStore, PreferenceError,
    PreferenceRecord, PreferenceStore, Preferences, PreviewSettings,
};
pub use transport::{HostConfig, HostError, HostStats, SandboxHost, WsSurface};
