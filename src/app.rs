use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use futures::StreamExt;
use futures::channel::mpsc::{unbounded, UnboundedReceiver};
use log::{debug, error, info, warn};
use tokio::spawn;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::connection::{spawn_link, Capabilities, ConnectOutcome, DisconnectOutcome, LinkHandle, LinkSettings};
use crate::device::constants::FRAME_WAIT_DEADLINE;
use crate::device::emulator::{EmulatedCamera, EmulatedDiscovery, EmulatedPermission};
use crate::device::types::{DeviceSelector, DiscoveryState, FramePair, StatusEvent};
use crate::error::AppRunError;

#[derive(Parser, Debug)]
#[command(version, about = "Connect to a thermal camera and stream processed/raw frame pairs")]
pub struct Args {
    /// Camera to connect to; defaults to `defaultDevice` from the config file
    #[arg(long, value_enum)]
    pub device: Option<DeviceSelector>,

    /// Number of frame pairs to receive before disconnecting
    #[arg(long, default_value_t = 20)]
    pub frames: usize,

    /// How long to wait for the camera to be discovered, e.g. "5s" or "1m"
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    pub discovery_timeout: Duration,

    /// Use this config file instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,
}

async fn load_config(config_io: &ConfigIO) -> Config {
    match config_io.read().await {
        Ok(config) => {
            debug!("Loaded config from {}", config_io.path().to_string_lossy());
            config
        },
        Err(err) => {
            if err.is_file_not_found_error() {
                info!("Config file not found, using defaults");
            } else {
                error!("Failed to load config, using defaults: {}", err);
            }
            Config::default()
        },
    }
}

async fn log_status(mut events: UnboundedReceiver<StatusEvent>) {
    while let Some(event) = events.next().await {
        match event {
            StatusEvent::ConnectionChanged { identity, state } => {
                let device_id = identity.as_ref().map(|identity| identity.device_id()).unwrap_or("");
                info!("Connection status: {} {}", device_id, state);
            },
            StatusEvent::DiscoveryChanged(DiscoveryState::Discovering) => info!("Discovery status: discovering"),
            StatusEvent::DiscoveryChanged(DiscoveryState::Stopped) => info!("Discovery status: not discovering"),
            StatusEvent::DeviceFound(identity) => info!("Camera available: {}", identity),
            StatusEvent::Notice(message) => warn!("{}", message),
            StatusEvent::FrameDropped => debug!("Frame pair dropped"),
        }
    }
}

async fn wait_for_device(link: &LinkHandle, selector: DeviceSelector, waited: Duration) -> Result<(), AppRunError> {
    let mut events = link.subscribe().await?;
    link.start_discovery().await?;

    let found = async {
        while let Some(event) = events.next().await {
            if let StatusEvent::DeviceFound(identity) = event {
                if selector.matches(&identity) {
                    return true;
                }
            }
        }
        false
    };

    match timeout(waited, found).await {
        Ok(true) => Ok(()),
        _ => Err(AppRunError::NothingDiscovered { waited: waited.into() }),
    }
}

async fn receive_frames(frames: &mut tokio::sync::mpsc::Receiver<FramePair>, count: usize) {
    for index in 0..count {
        match timeout(Duration::from_millis(FRAME_WAIT_DEADLINE), frames.recv()).await {
            Ok(Some(pair)) => {
                let (processed, raw) = pair.into_parts();
                info!(
                    "Frame pair {}: processed {}x{}, raw {}x{}",
                    index + 1, processed.width(), processed.height(), raw.width(), raw.height(),
                );
            },
            Ok(None) => break,
            Err(_) => {
                warn!("No frame pair received within {}ms", FRAME_WAIT_DEADLINE);
                break;
            },
        }
    }
}

async fn stream_frames(args: Args, config_io: ConfigIO) -> Result<(), AppRunError> {
    let config = load_config(&config_io).await;
    let selector = args.device.unwrap_or(config.default_device);

    let cancel = CancellationToken::new();
    // stops the link on every early return
    let _link_guard = cancel.clone().drop_guard();

    let (frame_sender, mut frame_receiver) = tokio::sync::mpsc::channel::<FramePair>(8);
    let capabilities = Capabilities {
        discovery: Arc::new(EmulatedDiscovery::new(true)),
        permission: Arc::new(EmulatedPermission::new(config.emulator.grant_permission)),
        device: Arc::new(EmulatedCamera::new(config.emulator.clone())),
        sink: Arc::new(frame_sender),
    };

    let (status_sender, status_receiver) = unbounded();
    let (link, link_task) = spawn_link(cancel.clone(), capabilities, LinkSettings::from(&config), vec![status_sender]);
    let status_task = spawn(log_status(status_receiver));

    wait_for_device(&link, selector, args.discovery_timeout).await?;

    let attempt = link.connect_selected(selector).await?;
    match attempt.wait().await? {
        ConnectOutcome::Connected(identity) => info!("Streaming from {}", identity),
        ConnectOutcome::Failed(err) => return Err(err.into()),
        ConnectOutcome::Cancelled => {
            info!("Connect attempt was cancelled");
            return Ok(());
        },
    }

    receive_frames(&mut frame_receiver, args.frames).await;

    if let Some(completion) = link.disconnect().await? {
        match completion.wait().await? {
            DisconnectOutcome::Released => info!("Camera released"),
            DisconnectOutcome::ReleaseFailed(message) => warn!("{}", message),
        }
    }

    link.shutdown().await?;
    if let Err(err) = link_task.await {
        warn!("Camera link task failed: {}", err);
    }
    drop(link);
    if let Err(err) = status_task.await {
        warn!("Status task failed: {}", err);
    }
    Ok(())
}

pub fn run_application(args: Args) -> Result<(), AppRunError> {
    let config_io = match &args.config {
        Some(path) => ConfigIO::open(path)?,
        None => ConfigIO::new_sync()?,
    };
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| AppRunError::Runtime { source })?;

    runtime.block_on(stream_frames(args, config_io))
}
