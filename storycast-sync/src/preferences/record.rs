//! Preview preferences and their persisted record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use storycast_core::{all_device_ids, device_by_id, DEFAULT_DEVICE};

/// How sandboxes are arranged in the preview pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GridLayout {
    #[serde(rename = "1x1")]
    Single,
    #[serde(rename = "2x1")]
    TwoByOne,
    #[serde(rename = "2x2")]
    TwoByTwo,
    #[serde(rename = "3x2")]
    ThreeByTwo,
    /// Columns follow the number of active sandboxes
    #[default]
    #[serde(rename = "auto")]
    Auto,
}

impl GridLayout {
    pub const ALL: [GridLayout; 5] = [
        GridLayout::Single,
        GridLayout::TwoByOne,
        GridLayout::TwoByTwo,
        GridLayout::ThreeByTwo,
        GridLayout::Auto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GridLayout::Single => "1x1",
            GridLayout::TwoByOne => "2x1",
            GridLayout::TwoByTwo => "2x2",
            GridLayout::ThreeByTwo => "3x2",
            GridLayout::Auto => "auto",
        }
    }

    /// Number of columns used to lay out `count` sandboxes.
    pub fn columns(&self, count: usize) -> usize {
        match self {
            GridLayout::Single => 1,
            GridLayout::TwoByOne | GridLayout::TwoByTwo => 2,
            GridLayout::ThreeByTwo => 3,
            GridLayout::Auto => match count {
                0 | 1 => 1,
                2 | 4 => 2,
                _ => 3,
            },
        }
    }
}

impl fmt::Display for GridLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted form. Every field is required, so a record missing one fails
/// to decode and is replaced by defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    pub enabled: bool,
    pub grid_config: GridLayout,
    pub enabled_device_types: Vec<String>,
    pub device_order: Vec<String>,
    /// Epoch milliseconds of the last save
    pub last_updated: u64,
}

/// In-memory preview preferences.
#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    /// Master switch for the whole preview
    pub enabled: bool,
    /// Every known device, in display order
    pub device_order: Vec<String>,
    pub enabled_devices: BTreeSet<String>,
    pub layout: GridLayout,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enabled: true,
            device_order: all_device_ids().into_iter().map(String::from).collect(),
            enabled_devices: BTreeSet::from([DEFAULT_DEVICE.to_string()]),
            layout: GridLayout::default(),
        }
    }
}

impl Preferences {
    pub fn from_record(record: PreferenceRecord) -> Self {
        let mut prefs = Self {
            enabled: record.enabled,
            device_order: record.device_order,
            enabled_devices: record.enabled_device_types.into_iter().collect(),
            layout: record.grid_config,
        };
        if prefs.sanitize() {
            log::debug!("Preference record referenced stale or missing devices; repaired");
        }
        prefs
    }

    pub fn to_record(&self, last_updated: u64) -> PreferenceRecord {
        PreferenceRecord {
            enabled: self.enabled,
            grid_config: self.layout,
            enabled_device_types: self.enabled_in_order().map(String::from).collect(),
            device_order: self.device_order.clone(),
            last_updated,
        }
    }

    /// Drop unknown and duplicate ids, then append registry devices missing
    /// from the order. Returns whether anything changed.
    pub fn sanitize(&mut self) -> bool {
        let before = (self.device_order.clone(), self.enabled_devices.clone());

        let mut seen = BTreeSet::new();
        self.device_order
            .retain(|id| device_by_id(id).is_some() && seen.insert(id.clone()));
        for id in all_device_ids() {
            if !seen.contains(id) {
                self.device_order.push(id.to_string());
            }
        }
        self.enabled_devices.retain(|id| device_by_id(id).is_some());

        before != (self.device_order.clone(), self.enabled_devices.clone())
    }

    /// Enabled device ids in display order.
    pub fn enabled_in_order(&self) -> impl Iterator<Item = &str> {
        self.device_order
            .iter()
            .filter(|id| self.enabled_devices.contains(*id))
            .map(String::as_str)
    }

    pub fn is_device_enabled(&self, id: &str) -> bool {
        self.enabled_devices.contains(id)
    }
}
