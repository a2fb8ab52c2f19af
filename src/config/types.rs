use serde::{Deserialize, Serialize};

use crate::device::constants::{
    EMULATOR_CONNECT_DELAY, EMULATOR_FRAME_HEIGHT, EMULATOR_FRAME_INTERVAL, EMULATOR_FRAME_WIDTH, PERMISSION_TIMEOUT,
};
use crate::device::types::DeviceSelector;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmulatorConfig {
    pub connect_delay_ms: u64,
    pub frame_interval_ms: u64,
    pub width: u32,
    pub height: u32,
    // answer to the USB permission prompt of the emulated FLIR ONE
    pub grant_permission: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            connect_delay_ms: EMULATOR_CONNECT_DELAY,
            frame_interval_ms: EMULATOR_FRAME_INTERVAL,
            width: EMULATOR_FRAME_WIDTH,
            height: EMULATOR_FRAME_HEIGHT,
            grant_permission: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub permission_timeout_ms: u64,
    pub default_device: DeviceSelector,
    pub emulator: EmulatorConfig,
}

impl Config {
    /// Clamp values that would make the link unusable.
    pub fn sanitize(&mut self) {
        self.permission_timeout_ms = self.permission_timeout_ms.max(1);
        self.emulator.frame_interval_ms = self.emulator.frame_interval_ms.max(1);
        self.emulator.width = self.emulator.width.clamp(1, 4096);
        self.emulator.height = self.emulator.height.clamp(1, 4096);
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            permission_timeout_ms: PERMISSION_TIMEOUT,
            default_device: DeviceSelector::CppEmulator,
            emulator: EmulatorConfig::default(),
        }
    }
}
