//! Static catalog of rendering-target profiles.
//!
//! Lookups never fail loudly: an unknown id is simply `None`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCategory {
    Mobile,
    Tablet,
    Desktop,
}

/// A device a preview sandbox can emulate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviceProfile {
    pub id: &'static str,
    pub name: &'static str,
    /// Intrinsic viewport width in CSS pixels
    pub width: u32,
    /// Intrinsic viewport height in CSS pixels
    pub height: u32,
    /// Scale applied when the sandbox is laid out in the preview grid
    pub scale: f32,
    pub category: DeviceCategory,
}

/// On-screen size of a scaled sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DeviceProfile {
    pub fn display_size(&self) -> DisplaySize {
        DisplaySize {
            width: (self.width as f32 * self.scale).round() as u32,
            height: (self.height as f32 * self.scale).round() as u32,
        }
    }
}

/// Device enabled when no preferences exist yet.
pub const DEFAULT_DEVICE: &str = "iphone-14-pro";

pub const DEVICES: &[DeviceProfile] = &[
    DeviceProfile {
        id: "iphone-se",
        name: "iPhone SE",
        width: 375,
        height: 667,
        scale: 0.5,
        category: DeviceCategory::Mobile,
    },
    DeviceProfile {
        id: "iphone-14-pro",
        name: "iPhone 14 Pro",
        width: 393,
        height: 852,
        scale: 0.5,
        category: DeviceCategory::Mobile,
    },
    DeviceProfile {
        id: "pixel-7",
        name: "Pixel 7",
        width: 412,
        height: 915,
        scale: 0.5,
        category: DeviceCategory::Mobile,
    },
    DeviceProfile {
        id: "galaxy-s23",
        name: "Galaxy S23",
        width: 360,
        height: 780,
        scale: 0.5,
        category: DeviceCategory::Mobile,
    },
    DeviceProfile {
        id: "ipad-mini",
        name: "iPad Mini",
        width: 744,
        height: 1133,
        scale: 0.4,
        category: DeviceCategory::Tablet,
    },
    DeviceProfile {
        id: "ipad-pro-11",
        name: "iPad Pro 11\"",
        width: 834,
        height: 1194,
        scale: 0.4,
        category: DeviceCategory::Tablet,
    },
    DeviceProfile {
        id: "laptop",
        name: "Laptop",
        width: 1366,
        height: 768,
        scale: 0.25,
        category: DeviceCategory::Desktop,
    },
    DeviceProfile {
        id: "desktop-1080p",
        name: "Desktop 1080p",
        width: 1920,
        height: 1080,
        scale: 0.25,
        category: DeviceCategory::Desktop,
    },
];

pub fn device_by_id(id: &str) -> Option<&'static DeviceProfile> {
    DEVICES.iter().find(|d| d.id == id)
}

/// All ids in catalog order.
pub fn all_device_ids() -> Vec<&'static str> {
    DEVICES.iter().map(|d| d.id).collect()
}

pub fn devices_by_category(category: DeviceCategory) -> Vec<&'static DeviceProfile> {
    DEVICES.iter().filter(|d| d.category == category).collect()
}
