//! Preview settings: in-memory preferences, admission-checked and
//! persisted after every mutation.
//!
//! A failed save is logged and kept in [`PreviewSettings::last_save_error`];
//! the in-memory preferences stay authoritative for the session.

use storycast_core::{device_by_id, AdmissionCheck, DeviceProfile, MemoryBudget, MemoryEstimate};

use super::record::{GridLayout, Preferences};
use super::store::{load_or_default, PreferenceError, PreferenceStore};
use crate::protocol::epoch_millis;

/// Result of asking to enable a device.
#[derive(Debug, Clone, PartialEq)]
pub enum EnableOutcome {
    /// Enabled; `warning` is set once usage crosses the warning limit
    Enabled { warning: bool },
    AlreadyEnabled,
    /// One more sandbox would cross the hard limit
    Refused(AdmissionCheck),
    UnknownDevice,
}

pub struct PreviewSettings<S> {
    prefs: Preferences,
    store: S,
    budget: MemoryBudget,
    last_save_error: Option<PreferenceError>,
}

impl<S: PreferenceStore> PreviewSettings<S> {
    /// Load from `store`. Malformed or missing records give defaults.
    pub fn load(store: S, budget: MemoryBudget) -> Self {
        let prefs = load_or_default(&store);
        Self {
            prefs,
            store,
            budget,
            last_save_error: None,
        }
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn last_save_error(&self) -> Option<&PreferenceError> {
        self.last_save_error.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.prefs.enabled
    }

    /// Master switch for the preview.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.prefs.enabled != enabled {
            self.prefs.enabled = enabled;
            self.persist();
        }
    }

    /// Enable a device if one more sandbox fits the memory budget for
    /// `content_chars` of slide content. Checked before enabling.
    pub fn enable_device(&mut self, id: &str, content_chars: usize) -> EnableOutcome {
        if device_by_id(id).is_none() {
            return EnableOutcome::UnknownDevice;
        }
        if self.prefs.is_device_enabled(id) {
            return EnableOutcome::AlreadyEnabled;
        }

        let check = self
            .budget
            .can_admit_one_more(self.prefs.enabled_devices.len(), content_chars);
        if !check.allowed {
            log::info!(
                "Not enabling {id}: projected usage {:.0} reaches the limit of {:.0}",
                check.projected,
                self.budget.hard_limit
            );
            return EnableOutcome::Refused(check);
        }
        if check.would_warn {
            log::warn!("Enabling {id} puts projected usage at {:.0}", check.projected);
        }

        self.prefs.enabled_devices.insert(id.to_string());
        self.persist();
        EnableOutcome::Enabled {
            warning: check.would_warn,
        }
    }

    /// Returns whether the device was enabled.
    pub fn disable_device(&mut self, id: &str) -> bool {
        let removed = self.prefs.enabled_devices.remove(id);
        if removed {
            self.persist();
        }
        removed
    }

    /// Move `id` to `index` in the display order (clamped to the end).
    pub fn move_device(&mut self, id: &str, index: usize) -> bool {
        let Some(from) = self.prefs.device_order.iter().position(|d| d == id) else {
            return false;
        };
        let device = self.prefs.device_order.remove(from);
        let to = index.min(self.prefs.device_order.len());
        self.prefs.device_order.insert(to, device);
        if from != to {
            self.persist();
        }
        true
    }

    /// Replace the display order. Unknown ids are dropped and missing
    /// devices appended.
    pub fn set_order(&mut self, order: Vec<String>) {
        self.prefs.device_order = order;
        self.prefs.sanitize();
        self.persist();
    }

    pub fn set_layout(&mut self, layout: GridLayout) {
        if self.prefs.layout != layout {
            self.prefs.layout = layout;
            self.persist();
        }
    }

    /// Profiles to run sandboxes for, in display order. Empty while the
    /// master switch is off.
    pub fn active_profiles(&self) -> Vec<&'static DeviceProfile> {
        if !self.prefs.enabled {
            return Vec::new();
        }
        self.prefs.enabled_in_order().filter_map(device_by_id).collect()
    }

    pub fn memory_usage(&self, content_chars: usize) -> MemoryEstimate {
        self.budget.usage(self.active_profiles().len(), content_chars)
    }

    pub fn max_devices(&self, content_chars: usize) -> usize {
        self.budget.max_admissible(content_chars)
    }

    /// Write the current preferences. Failures are kept, not returned.
    fn persist(&mut self) {
        let record = self.prefs.to_record(epoch_millis());
        match self.store.save(&record) {
            Ok(()) => {
                if self.last_save_error.take().is_some() {
                    log::info!("Preference storage recovered");
                }
            }
            Err(e) => {
                log::warn!("Failed to save preferences: {e}");
                self.last_save_error = Some(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::MemoryPreferenceStore;
    use storycast_core::{MemoryStatus, DEFAULT_DEVICE};

    fn settings() -> PreviewSettings<MemoryPreferenceStore> {
        PreviewSettings::load(MemoryPreferenceStore::new(), MemoryBudget::default())
    }

    #[test]
    fn test_enable_until_budget_refuses() {
        let mut settings = settings();
        let candidates = ["iphone-se", "pixel-7", "galaxy-s23", "ipad-mini", "ipad-pro-11", "laptop"];

        let outcomes: Vec<_> = candidates
            .iter()
            .map(|id| settings.enable_device(id, 0))
            .collect();

        // 1 default + 5 more = 6 × 50 = 300 < 350; the 7th would reach 350.
        assert_eq!(outcomes[0], EnableOutcome::Enabled { warning: false });
        assert_eq!(outcomes[3], EnableOutcome::Enabled { warning: true });
        assert_eq!(outcomes[4], EnableOutcome::Enabled { warning: true });
        match &outcomes[5] {
            EnableOutcome::Refused(check) => {
                assert!(check.would_exceed);
                assert_eq!(check.projected, 350.0);
            }
            other => panic!("expected refusal, got {other:?}"),
        }
        assert_eq!(settings.active_profiles().len(), settings.max_devices(0));
        assert!(!settings.preferences().is_device_enabled("laptop"));
    }

    #[test]
    fn test_large_content_still_allows_first_device() {
        let mut settings = settings();
        settings.disable_device(DEFAULT_DEVICE);
        assert_eq!(
            settings.enable_device("laptop", 1_000_000),
            EnableOutcome::Enabled { warning: true }
        );
        assert!(matches!(settings.enable_device("pixel-7", 1_000_000), EnableOutcome::Refused(_)));
    }

    #[test]
    fn test_enable_edge_cases() {
        let mut settings = settings();
        assert_eq!(settings.enable_device("nokia-3310", 0), EnableOutcome::UnknownDevice);
        assert_eq!(settings.enable_device(DEFAULT_DEVICE, 0), EnableOutcome::AlreadyEnabled);
        assert_eq!(settings.store().saves(), 0);
    }

    #[test]
    fn test_every_mutation_persists() {
        let mut settings = settings();
        settings.enable_device("laptop", 0);
        settings.set_layout(GridLayout::TwoByOne);
        settings.move_device("laptop", 0);
        settings.set_enabled(false);
        assert_eq!(settings.store().saves(), 4);

        let reloaded = PreviewSettings::load(
            MemoryPreferenceStore::with_contents(settings.store().contents().unwrap()),
            MemoryBudget::default(),
        );
        assert_eq!(reloaded.preferences(), settings.preferences());
    }

    #[test]
    fn test_save_failure_keeps_memory_state() {
        let mut settings = settings();
        settings.store_mut().set_available(false);

        assert_eq!(settings.enable_device("pixel-7", 0), EnableOutcome::Enabled { warning: false });
        assert!(matches!(settings.last_save_error(), Some(PreferenceError::Unavailable(_))));
        assert!(settings.preferences().is_device_enabled("pixel-7"));

        settings.store_mut().set_available(true);
        settings.set_layout(GridLayout::Single);
        assert_eq!(settings.last_save_error(), None);
    }

    #[test]
    fn test_quota_failure_is_reported() {
        let mut settings = PreviewSettings::load(MemoryPreferenceStore::with_quota(8), MemoryBudget::default());
        settings.set_layout(GridLayout::ThreeByTwo);
        assert!(matches!(
            settings.last_save_error(),
            Some(PreferenceError::QuotaExceeded { quota: 8, .. })
        ));
        assert_eq!(settings.preferences().layout, GridLayout::ThreeByTwo);
    }

    #[test]
    fn test_active_profiles_follow_order_and_switch() {
        let mut settings = settings();
        settings.enable_device("laptop", 0);
        settings.move_device("laptop", 0);

        let ids: Vec<_> = settings.active_profiles().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["laptop", DEFAULT_DEVICE]);

        settings.set_enabled(false);
        assert!(settings.active_profiles().is_empty());
        assert_eq!(settings.memory_usage(0).estimated_usage, 0.0);
    }

    #[test]
    fn test_memory_usage_report() {
        let mut settings = settings();
        for id in ["iphone-se", "pixel-7", "galaxy-s23", "ipad-mini"] {
            settings.enable_device(id, 0);
        }
        let usage = settings.memory_usage(10_000);
        assert_eq!(usage.estimated_usage, 300.0);
        assert_eq!(usage.status, MemoryStatus::Warning);
    }

    #[test]
    fn test_set_order_sanitizes() {
        let mut settings = settings();
        settings.set_order(vec!["desktop-1080p".into(), "bogus".into()]);
        let order = &settings.preferences().device_order;
        assert_eq!(order[0], "desktop-1080p");
        assert!(!order.iter().any(|id| id == "bogus"));
        assert_eq!(order.len(), storycast_core::DEVICES.len());
    }

    #[test]
    fn test_move_unknown_device() {
        let mut settings = settings();
        assert!(!settings.move_device("bogus", 0));
        assert!(settings.move_device("pixel-7", 100));
        assert_eq!(settings.preferences().device_order.last().unwrap(), "pixel-7");
    }
}
