//! WebSocket transport for out-of-process sandboxes.
//!
//! ```text
//!  editor                                   sandbox process
//! ┌──────────────┐   UPDATE_STORY (text)   ┌──────────────────┐
//! │  WsSurface   │ ──────────────────────► │   SandboxHost    │
//! │  (per target)│ ◄────────────────────── │ SandboxRenderer  │
//! └──────┬───────┘        ACK (text)       └──────────────────┘
//!        │
//!        ▼
//!    AckSink ──► broadcaster
//! ```
//!
//! Frames use the JSON codec in [`crate::protocol`].

pub mod host;
pub mod ws_surface;

pub use host::{HostConfig, HostError, HostStats, SandboxHost};
pub use ws_surface::WsSurface;
