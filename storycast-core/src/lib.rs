//! # storycast-core: editor state model and sync policies
//!
//! Everything in this crate is pure: no runtime, no I/O, no timers.
//! The async broadcasters in `storycast-sync` call into these modules to
//! decide *whether* and *how urgently* a renderer needs new state, and
//! how many renderers the host can afford to run.
//!
//! ```text
//!   EditorState ──► detect::has_changed ──► Change { changed, structural }
//!                                                │
//!   device::DEVICES ──► memory::MemoryBudget ────┤ admission control
//!                                                ▼
//!                                     storycast-sync broadcasters
//! ```
//!
//! ## Modules
//!
//! - [`story`]: `Slide` and `EditorState` snapshots
//! - [`detect`]: content-aware change detection
//! - [`device`]: static catalog of rendering-target profiles
//! - [`memory`]: resource estimate and admission policy

pub mod story;
pub mod detect;
pub mod device;
pub mod memory;

pub use story::{EditorState, Slide, TRANSIENT_FIELDS};
pub use detect::{has_changed, slides_equal, Change};
pub use device::{
    all_device_ids, device_by_id, devices_by_category, DeviceCategory, DeviceProfile,
    DisplaySize, DEFAULT_DEVICE, DEVICES,
};
pub use memory::{AdmissionCheck, MemoryBudget, MemoryEstimate, MemoryStatus};
