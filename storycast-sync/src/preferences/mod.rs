//! Preview preferences: which devices are enabled, in what order, and how
//! they are laid out.
//!
//! ```text
//!  PreferenceStore ──load──► PreferenceRecord ──sanitize──► Preferences
//!        ▲                                                     │
//!        └───────────────save (after every mutation)──── PreviewSettings
//!                                                              │
//!                                   MemoryBudget admission ◄───┘ enable_device
//! ```
//!
//! Storage failures never escape: a record that cannot be loaded gives the
//! defaults, and a failed save leaves the in-memory preferences in charge.

mod record;
mod settings;
mod store;

pub use record::{GridLayout, PreferenceRecord, Preferences};
pub use settings::{EnableOutcome, PreviewSettings};
pub use store::{
    load_or_default, JsonFilePreferenceStore, MemoryPreferenceStore, PreferenceError, PreferenceStore,
};
