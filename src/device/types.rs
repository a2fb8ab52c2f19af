use std::fmt;
use std::hash::{Hash, Hasher};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::device::constants::{CPP_EMULATOR_DEVICE_ID, FLIR_ONE_EMULATOR_DEVICE_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommunicationInterface {
    Usb,
    Emulator,
    Network,
}

impl fmt::Display for CommunicationInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            CommunicationInterface::Usb => "USB",
            CommunicationInterface::Emulator => "EMULATOR",
            CommunicationInterface::Network => "NETWORK",
        };

        write!(f, "{}", result)
    }
}

/// A discoverable camera, as reported by the discovery transport.
///
/// Two identities are the same device when their device ids match; the
/// interface is informational.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    device_id: String,
    interface: CommunicationInterface,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>, interface: CommunicationInterface) -> Self {
        DeviceIdentity { device_id: device_id.into(), interface }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn interface(&self) -> CommunicationInterface {
        self.interface
    }

    /// USB cameras must be authorized by the user before the connect protocol may run.
    pub fn requires_permission(&self) -> bool {
        self.interface == CommunicationInterface::Usb
    }
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.device_id == other.device_id
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.device_id.hash(state);
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.device_id, self.interface)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum DeviceSelector {
    FlirOne,
    CppEmulator,
    FlirOneEmulator,
}

impl DeviceSelector {
    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        match self {
            DeviceSelector::FlirOne => identity.interface() == CommunicationInterface::Usb,
            DeviceSelector::CppEmulator => {
                identity.interface() == CommunicationInterface::Emulator
                    && identity.device_id().contains(CPP_EMULATOR_DEVICE_ID)
            },
            DeviceSelector::FlirOneEmulator => {
                identity.interface() == CommunicationInterface::Emulator
                    && identity.device_id().contains(FLIR_ONE_EMULATOR_DEVICE_ID)
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnecting => "DISCONNECTING",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Stopped,
    Discovering,
}

/// A processed (visualized) image and its raw companion, captured at the same instant.
#[derive(Debug, Clone)]
pub struct FramePair {
    processed: RgbaImage,
    raw: RgbaImage,
}

impl FramePair {
    pub fn new(processed: RgbaImage, raw: RgbaImage) -> Self {
        FramePair { processed, raw }
    }

    pub fn processed(&self) -> &RgbaImage {
        &self.processed
    }

    pub fn raw(&self) -> &RgbaImage {
        &self.raw
    }

    pub fn into_parts(self) -> (RgbaImage, RgbaImage) {
        (self.processed, self.raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionErrorKind {
    Timeout,
    Cancelled,
    DeviceMissing,
    Other,
}

impl fmt::Display for PermissionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            PermissionErrorKind::Timeout => "TIMEOUT",
            PermissionErrorKind::Cancelled => "CANCELLED",
            PermissionErrorKind::DeviceMissing => "DEVICE_MISSING",
            PermissionErrorKind::Other => "OTHER",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted(DeviceIdentity),
    Denied(DeviceIdentity),
    Error(PermissionErrorKind, DeviceIdentity),
}

/// Error code reported by the camera or the discovery transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    pub code: i32,
    pub message: String,
}

impl ErrorCode {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        ErrorCode { code, message: message.into() }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Events broadcast by the link task to every observer.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    ConnectionChanged {
        identity: Option<DeviceIdentity>,
        state: ConnectionState,
    },
    DiscoveryChanged(DiscoveryState),
    DeviceFound(DeviceIdentity),
    /// A human readable message meant for the user.
    Notice(String),
    /// A frame pair could not be buffered because the stream was torn down.
    FrameDropped,
}

#[derive(Debug, Clone)]
pub struct LinkSnapshot {
    pub connection: ConnectionState,
    pub identity: Option<DeviceIdentity>,
    pub discovery: DiscoveryState,
    pub discovered: Vec<DeviceIdentity>,
}
