//! In-process stand-ins for the camera SDK: a discovery transport that reports
//! the two emulators (and optionally a USB FLIR ONE), a permission prompt with a
//! fixed answer, and a camera that streams synthetic thermal frames.

use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use futures::channel::oneshot;
use image::{Rgba, RgbaImage};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::types::EmulatorConfig;
use crate::device::capability::{DeviceProtocol, DiscoveryEvents, DiscoveryTransport, LinkStatus, PermissionCapability};
use crate::device::constants::{CPP_EMULATOR_DEVICE_ID, FLIR_ONE_DEVICE_ID, FLIR_ONE_EMULATOR_DEVICE_ID};
use crate::device::types::{CommunicationInterface, DeviceIdentity, ErrorCode, PermissionOutcome};
use crate::stream::dispatcher::FrameArrivals;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct EmulatedDiscovery {
    report_usb_camera: bool,
    scan_delay: Duration,
    running: Mutex<Option<CancellationToken>>,
}

impl EmulatedDiscovery {
    pub fn new(report_usb_camera: bool) -> Self {
        EmulatedDiscovery {
            report_usb_camera,
            scan_delay: Duration::from_millis(50),
            running: Mutex::new(None),
        }
    }

    fn identities(&self) -> Vec<DeviceIdentity> {
        let mut identities = vec![
            DeviceIdentity::new(CPP_EMULATOR_DEVICE_ID, CommunicationInterface::Emulator),
            DeviceIdentity::new(FLIR_ONE_EMULATOR_DEVICE_ID, CommunicationInterface::Emulator),
        ];
        if self.report_usb_camera {
            identities.push(DeviceIdentity::new(FLIR_ONE_DEVICE_ID, CommunicationInterface::Usb));
        }
        identities
    }
}

impl DiscoveryTransport for EmulatedDiscovery {
    fn start_discovery(&self, events: DiscoveryEvents) -> io::Result<()> {
        let cancel = CancellationToken::new();
        if let Some(previous) = lock(&self.running).replace(cancel.clone()) {
            previous.cancel();
        }

        let identities = self.identities();
        let scan_delay = self.scan_delay;

        thread::Builder::new()
            .name("emulator-discovery".to_string())
            .spawn(move || {
                for identity in identities {
                    thread::sleep(scan_delay);
                    if cancel.is_cancelled() {
                        break;
                    }
                    events.found(identity);
                }
            })?;

        Ok(())
    }

    fn stop_discovery(&self) {
        if let Some(cancel) = lock(&self.running).take() {
            cancel.cancel();
        }
    }
}

/// Answers every permission request with the same outcome.
pub struct EmulatedPermission {
    grant: bool,
}

impl EmulatedPermission {
    pub fn new(grant: bool) -> Self {
        EmulatedPermission { grant }
    }
}

impl PermissionCapability for EmulatedPermission {
    fn request(&self, identity: &DeviceIdentity) -> oneshot::Receiver<PermissionOutcome> {
        let (tx, rx) = oneshot::channel();
        let outcome = if self.grant {
            PermissionOutcome::Granted(identity.clone())
        } else {
            PermissionOutcome::Denied(identity.clone())
        };

        info!("Permission for {} answered with {:?}", identity, outcome);
        let _ = tx.send(outcome);
        rx
    }
}

struct Stream {
    cancel: CancellationToken,
    producer: JoinHandle<()>,
}

#[derive(Default)]
struct CameraState {
    connected: Option<DeviceIdentity>,
    status: Option<LinkStatus>,
    stream: Option<Stream>,
}

pub struct EmulatedCamera {
    config: EmulatorConfig,
    state: Mutex<CameraState>,
}

impl EmulatedCamera {
    pub fn new(config: EmulatorConfig) -> Self {
        EmulatedCamera { config, state: Mutex::new(CameraState::default()) }
    }

    pub fn connected(&self) -> Option<DeviceIdentity> {
        lock(&self.state).connected.clone()
    }

    /// Pretend the cable was pulled: stop streaming and report the lost link.
    pub fn simulate_link_loss(&self, code: Option<ErrorCode>) {
        let (status, stream) = {
            let mut state = lock(&self.state);
            state.connected = None;
            (state.status.take(), state.stream.take())
        };

        // a producer blocked on a full buffer is only released once the link tears the stream down
        if let Some(status) = status {
            status.disconnected(code);
        }
        stop_stream(stream);
    }
}

fn stop_stream(stream: Option<Stream>) {
    if let Some(stream) = stream {
        stream.cancel.cancel();
        if stream.producer.join().is_err() {
            warn!("Emulated frame producer panicked");
        }
    }
}

impl DeviceProtocol for EmulatedCamera {
    fn connect(&self, identity: &DeviceIdentity, status: LinkStatus) -> io::Result<()> {
        if identity.interface() == CommunicationInterface::Network {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "network cameras are not emulated"));
        }

        info!("Emulated handshake with {}", identity);
        thread::sleep(Duration::from_millis(self.config.connect_delay_ms));

        let mut state = lock(&self.state);
        state.connected = Some(identity.clone());
        state.status = Some(status);
        Ok(())
    }

    fn disconnect(&self) -> io::Result<()> {
        let stream = {
            let mut state = lock(&self.state);
            state.connected = None;
            state.status = None;
            state.stream.take()
        };

        stop_stream(stream);
        Ok(())
    }

    fn start_stream(&self, arrivals: FrameArrivals) {
        let cancel = CancellationToken::new();
        let producer_cancel = cancel.clone();
        let interval = Duration::from_millis(self.config.frame_interval_ms);
        let (width, height) = (self.config.width, self.config.height);

        let spawned = thread::Builder::new()
            .name("emulator-stream".to_string())
            .spawn(move || {
                let mut frame: u32 = 0;
                while !producer_cancel.is_cancelled() && !arrivals.is_closed() {
                    let raw = raw_frame(width, height, frame);
                    let processed = colorize(&raw);

                    if arrivals.paired_images(processed, raw).is_err() {
                        break;
                    }
                    frame = frame.wrapping_add(1);
                    thread::sleep(interval);
                }
                debug!("Emulated frame producer stopped after {} frames", frame);
            });

        match spawned {
            Ok(producer) => {
                let previous = lock(&self.state).stream.replace(Stream { cancel, producer });
                stop_stream(previous);
            },
            Err(err) => warn!("Failed to start emulated frame producer: {}", err),
        }
    }
}

/// A warm spot drifting across a cooler background, as 8 bit luminance.
fn raw_frame(width: u32, height: u32, frame: u32) -> RgbaImage {
    let center_x = (frame.wrapping_mul(3) % width.max(1)) as i64;
    let center_y = (height / 2) as i64;
    let radius = (width.min(height) / 4).max(1) as i64;

    RgbaImage::from_fn(width, height, |x, y| {
        let dx = x as i64 - center_x;
        let dy = y as i64 - center_y;
        let distance = ((dx * dx + dy * dy) as f64).sqrt();
        let heat = (1.0 - distance / (radius as f64 * 2.0)).clamp(0.0, 1.0);
        let background = 40.0 + 20.0 * (y as f64 / height.max(1) as f64);
        let value = (background + heat * (255.0 - background)).round() as u8;
        Rgba([value, value, value, 255])
    })
}

/// Map luminance onto a black → red → yellow → white palette.
fn colorize(raw: &RgbaImage) -> RgbaImage {
    RgbaImage::from_fn(raw.width(), raw.height(), |x, y| {
        let value = raw.get_pixel(x, y)[0] as u16;
        let red = (value * 3).min(255) as u8;
        let green = value.saturating_sub(85).saturating_mul(3).min(255) as u8;
        let blue = value.saturating_sub(170).saturating_mul(3).min(255) as u8;
        Rgba([red, green, blue, 255])
    })
}
