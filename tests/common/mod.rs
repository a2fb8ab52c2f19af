#![allow(dead_code)]

use std::io;
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use futures::StreamExt;
use futures::channel::mpsc::{unbounded, UnboundedReceiver};
use futures::channel::oneshot;
use image::{Rgba, RgbaImage};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use thermal_camera_link::device::capability::{DeviceProtocol, DiscoveryEvents, DiscoveryTransport, LinkStatus, PermissionCapability};
use thermal_camera_link::device::connection::{spawn_link, Capabilities, LinkHandle, LinkSettings};
use thermal_camera_link::device::types::{
    CommunicationInterface, ConnectionState, DeviceIdentity, ErrorCode, FramePair, PermissionOutcome, StatusEvent,
};
use thermal_camera_link::stream::dispatcher::FrameArrivals;

pub const EVENT_DEADLINE: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn emulator_identity() -> DeviceIdentity {
    DeviceIdentity::new("C++ Emulator", CommunicationInterface::Emulator)
}

pub fn usb_identity() -> DeviceIdentity {
    DeviceIdentity::new("FLIR ONE Camera", CommunicationInterface::Usb)
}

#[derive(Default)]
pub struct MockDiscovery {
    events: Mutex<Option<DiscoveryEvents>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl MockDiscovery {
    pub fn found(&self, identity: DeviceIdentity) {
        lock(&self.events).as_ref().expect("discovery was not started").found(identity);
    }

    pub fn fail(&self, code: ErrorCode) {
        lock(&self.events).as_ref().expect("discovery was not started").error(CommunicationInterface::Usb, code);
    }
}

impl DiscoveryTransport for MockDiscovery {
    fn start_discovery(&self, events: DiscoveryEvents) -> io::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *lock(&self.events) = Some(events);
        Ok(())
    }

    fn stop_discovery(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockPermission {
    pending: Mutex<Vec<oneshot::Sender<PermissionOutcome>>>,
    pub requests: AtomicUsize,
}

impl MockPermission {
    pub fn answer(&self, outcome: PermissionOutcome) {
        let reply = lock(&self.pending).remove(0);
        reply.send(outcome).expect("permission request was abandoned");
    }
}

impl PermissionCapability for MockPermission {
    fn request(&self, _identity: &DeviceIdentity) -> oneshot::Receiver<PermissionOutcome> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).push(tx);
        rx
    }
}

pub enum ConnectBehaviour {
    Succeed,
    Fail(io::ErrorKind),
    Panic,
}

/// A camera whose connect handshake finishes only when the test allows it.
pub struct MockCamera {
    behaviour_tx: Mutex<mpsc::Sender<ConnectBehaviour>>,
    behaviour_rx: Mutex<mpsc::Receiver<ConnectBehaviour>>,
    disconnect_gate: Mutex<Option<mpsc::Receiver<()>>>,
    disconnect_release: Mutex<Option<mpsc::Sender<()>>>,
    status: Mutex<Option<LinkStatus>>,
    arrivals: Mutex<Option<FrameArrivals>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub streams: AtomicUsize,
    pub stream_closed_at_release: AtomicBool,
}

impl Default for MockCamera {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel();
        MockCamera {
            behaviour_tx: Mutex::new(tx),
            behaviour_rx: Mutex::new(rx),
            disconnect_gate: Mutex::new(None),
            disconnect_release: Mutex::new(None),
            status: Mutex::new(None),
            arrivals: Mutex::new(None),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            streams: AtomicUsize::new(0),
            stream_closed_at_release: AtomicBool::new(false),
        }
    }
}

impl MockCamera {
    pub fn allow_connect(&self, behaviour: ConnectBehaviour) {
        lock(&self.behaviour_tx).send(behaviour).expect("camera dropped");
    }

    /// Make the next release block until `allow_disconnect`.
    pub fn hold_disconnect(&self) {
        let (release, gate) = mpsc::channel();
        *lock(&self.disconnect_gate) = Some(gate);
        *lock(&self.disconnect_release) = Some(release);
    }

    pub fn allow_disconnect(&self) {
        if let Some(release) = lock(&self.disconnect_release).take() {
            let _ = release.send(());
        }
    }

    pub fn lose_link(&self, code: Option<ErrorCode>) {
        lock(&self.status).as_ref().expect("camera was never connected").disconnected(code);
    }

    pub fn arrivals(&self) -> Option<FrameArrivals> {
        lock(&self.arrivals).clone()
    }
}

impl DeviceProtocol for MockCamera {
    fn connect(&self, _identity: &DeviceIdentity, status: LinkStatus) -> io::Result<()> {
        *lock(&self.status) = Some(status);
        self.connects.fetch_add(1, Ordering::SeqCst);

        let behaviour = lock(&self.behaviour_rx)
            .recv_timeout(EVENT_DEADLINE)
            .unwrap_or(ConnectBehaviour::Fail(io::ErrorKind::TimedOut));

        match behaviour {
            ConnectBehaviour::Succeed => Ok(()),
            ConnectBehaviour::Fail(kind) => Err(io::Error::new(kind, "handshake failed")),
            ConnectBehaviour::Panic => panic!("camera firmware crashed"),
        }
    }

    fn disconnect(&self) -> io::Result<()> {
        let gate = lock(&self.disconnect_gate).take();
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(EVENT_DEADLINE);
        }

        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if let Some(arrivals) = lock(&self.arrivals).as_ref() {
            self.stream_closed_at_release.store(arrivals.is_closed(), Ordering::SeqCst);
        }
        Ok(())
    }

    fn start_stream(&self, arrivals: FrameArrivals) {
        self.streams.fetch_add(1, Ordering::SeqCst);
        *lock(&self.arrivals) = Some(arrivals);
    }
}

pub struct Harness {
    pub link: LinkHandle,
    pub task: JoinHandle<()>,
    pub cancel: CancellationToken,
    pub events: UnboundedReceiver<StatusEvent>,
    pub frames: tokio::sync::mpsc::Receiver<FramePair>,
    pub discovery: Arc<MockDiscovery>,
    pub permission: Arc<MockPermission>,
    pub camera: Arc<MockCamera>,
}

pub fn start_link() -> Harness {
    start_link_with(LinkSettings::default())
}

pub fn start_link_with(settings: LinkSettings) -> Harness {
    let discovery = Arc::new(MockDiscovery::default());
    let permission = Arc::new(MockPermission::default());
    let camera = Arc::new(MockCamera::default());
    let (frame_sender, frames) = tokio::sync::mpsc::channel(32);
    let (observer, events) = unbounded();
    let cancel = CancellationToken::new();

    let capabilities = Capabilities {
        discovery: discovery.clone(),
        permission: permission.clone(),
        device: camera.clone(),
        sink: Arc::new(frame_sender),
    };
    let (link, task) = spawn_link(cancel.clone(), capabilities, settings, vec![observer]);

    Harness { link, task, cancel, events, frames, discovery, permission, camera }
}

pub async fn next_event(events: &mut UnboundedReceiver<StatusEvent>) -> StatusEvent {
    timeout(EVENT_DEADLINE, events.next())
        .await
        .expect("timed out waiting for a status event")
        .expect("status channel closed")
}

/// The next connection state change, skipping other events.
pub async fn next_state(events: &mut UnboundedReceiver<StatusEvent>) -> (Option<DeviceIdentity>, ConnectionState) {
    loop {
        if let StatusEvent::ConnectionChanged { identity, state } = next_event(events).await {
            return (identity, state);
        }
    }
}

/// The next notice, skipping other events.
pub async fn next_notice(events: &mut UnboundedReceiver<StatusEvent>) -> String {
    loop {
        if let StatusEvent::Notice(message) = next_event(events).await {
            return message;
        }
    }
}

pub fn test_image(value: u8) -> RgbaImage {
    RgbaImage::from_pixel(4, 3, Rgba([value, 0, 0, 255]))
}

/// Push a frame pair from a blocking thread, the way a camera callback would.
pub async fn push_frame(arrivals: FrameArrivals, value: u8) -> bool {
    tokio::task::spawn_blocking(move || arrivals.paired_images(test_image(value), test_image(value)).is_ok())
        .await
        .expect("frame producer panicked")
}

/// Poll `condition` until it holds, failing the test after `EVENT_DEADLINE`.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let polling = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    timeout(EVENT_DEADLINE, polling).await.expect("condition never held");
}
