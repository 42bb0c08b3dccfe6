//! Device profiles applied to a freshly launched session.

use pagecarbon_core_types::DeviceType;
use serde::{Deserialize, Serialize};

/// Viewport dimensions plus the emulation flags that go with them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
}

/// Deterministic mapping from device class to emulation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device: DeviceType,
    pub viewport: Viewport,
    /// Touch emulation. Desktop profiles force this off: enabling touch on a
    /// desktop target races with teardown inside Chromium and throws.
    pub touch: bool,
}

impl DeviceProfile {
    pub fn for_device(device: DeviceType) -> Self {
        match device {
            DeviceType::Desktop => Self {
                device,
                viewport: Viewport {
                    width: 1366,
                    height: 768,
                    device_scale_factor: 1.0,
                    mobile: false,
                },
                touch: false,
            },
            DeviceType::Mobile => Self {
                device,
                viewport: Viewport {
                    width: 390,
                    height: 844,
                    device_scale_factor: 3.0,
                    mobile: true,
                },
                touch: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_profile_forces_touch_off() {
        let profile = DeviceProfile::for_device(DeviceType::Desktop);
        assert!(!profile.touch);
        assert!(!profile.viewport.mobile);
        assert_eq!(profile.viewport.device_scale_factor, 1.0);
    }

    #[test]
    fn mobile_profile_is_scaled_and_touch_capable() {
        let profile = DeviceProfile::for_device(DeviceType::Mobile);
        assert!(profile.touch);
        assert!(profile.viewport.mobile);
        assert_eq!(profile.viewport.width, 390);
        assert_eq!(profile.viewport.device_scale_factor, 3.0);
    }

    #[test]
    fn mapping_is_deterministic() {
        assert_eq!(
            DeviceProfile::for_device(DeviceType::Mobile),
            DeviceProfile::for_device(DeviceType::Mobile)
        );
    }
}
