//! Interfaces to the collaborators the camera link drives: the discovery
//! transport, the USB permission prompt, the camera protocol itself and the
//! consumer of frame pairs.
//!
//! Callbacks from these collaborators arrive on threads the link does not own.
//! They never touch link state directly; the handles below only post events to
//! the link task.

use std::io;
use futures::channel::mpsc::UnboundedSender;
use futures::channel::oneshot;
use log::debug;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::device::connection::LinkEvent;
use crate::device::types::{CommunicationInterface, DeviceIdentity, ErrorCode, FramePair, PermissionOutcome};
use crate::stream::dispatcher::FrameArrivals;

pub trait DiscoveryTransport: Send + Sync {
    /// Begin reporting cameras through `events` until `stop_discovery` is called.
    fn start_discovery(&self, events: DiscoveryEvents) -> io::Result<()>;

    fn stop_discovery(&self);
}

pub trait PermissionCapability: Send + Sync {
    /// Ask the user to authorize access to `identity`. The outcome is sent at most once.
    fn request(&self, identity: &DeviceIdentity) -> oneshot::Receiver<PermissionOutcome>;
}

/// The camera protocol. `connect` and `disconnect` block on device I/O and are
/// always called from a dedicated worker thread.
pub trait DeviceProtocol: Send + Sync {
    fn connect(&self, identity: &DeviceIdentity, status: LinkStatus) -> io::Result<()>;

    fn disconnect(&self) -> io::Result<()>;

    /// Start pushing frame pairs into `arrivals` from the camera's own thread(s).
    fn start_stream(&self, arrivals: FrameArrivals);
}

/// Receives completed frame pairs. Called from the link task, so it must not block.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, pair: FramePair);
}

impl FrameSink for tokio::sync::mpsc::Sender<FramePair> {
    fn deliver(&self, pair: FramePair) {
        match self.try_send(pair) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => debug!("Frame sink is busy, frame pair superseded"),
            Err(TrySendError::Closed(_)) => debug!("Frame sink is closed, frame pair dropped"),
        }
    }
}

/// Handed to the discovery transport; may be cloned and used from any thread.
#[derive(Clone)]
pub struct DiscoveryEvents {
    events: UnboundedSender<LinkEvent>,
}

impl DiscoveryEvents {
    pub(crate) fn new(events: UnboundedSender<LinkEvent>) -> Self {
        DiscoveryEvents { events }
    }

    pub fn found(&self, identity: DeviceIdentity) {
        debug!("onCameraFound identity: {}", identity);
        post(&self.events, LinkEvent::DeviceFound(identity));
    }

    pub fn error(&self, interface: CommunicationInterface, code: ErrorCode) {
        debug!("onDiscoveryError interface: {} error: {}", interface, code);
        post(&self.events, LinkEvent::DiscoveryFailed { interface, code });
    }
}

/// Handed to the camera on connect so that it can report a lost link.
#[derive(Clone)]
pub struct LinkStatus {
    session: Uuid,
    events: UnboundedSender<LinkEvent>,
}

impl LinkStatus {
    pub(crate) fn new(session: Uuid, events: UnboundedSender<LinkEvent>) -> Self {
        LinkStatus { session, events }
    }

    pub fn disconnected(&self, code: Option<ErrorCode>) {
        debug!("onDisconnected session: {} error: {:?}", self.session, code);
        post(&self.events, LinkEvent::LinkLost { session: self.session, code });
    }
}

pub(crate) fn post(events: &UnboundedSender<LinkEvent>, event: LinkEvent) {
    if events.unbounded_send(event).is_err() {
        debug!("Camera link task has stopped, event dropped");
    }
}
