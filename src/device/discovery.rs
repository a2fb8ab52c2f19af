use std::sync::Arc;
use indexmap::IndexSet;
use log::{debug, info, warn};

use crate::device::capability::{DiscoveryEvents, DiscoveryTransport};
use crate::device::types::{CommunicationInterface, DeviceIdentity, DeviceSelector, DiscoveryState, ErrorCode};
use crate::error::DiscoveryError;

/// Drives the discovery transport and keeps the deduplicated set of found cameras.
///
/// Only the link task touches this; callbacks from the transport reach it as events.
pub struct DiscoveryCoordinator {
    transport: Arc<dyn DiscoveryTransport>,
    state: DiscoveryState,
    registry: IndexSet<DeviceIdentity>,
}

impl DiscoveryCoordinator {
    pub fn new(transport: Arc<dyn DiscoveryTransport>) -> Self {
        DiscoveryCoordinator {
            transport,
            state: DiscoveryState::Stopped,
            registry: IndexSet::new(),
        }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Found cameras, in arrival order.
    pub fn discovered(&self) -> impl Iterator<Item = &DeviceIdentity> {
        self.registry.iter()
    }

    pub fn select(&self, selector: DeviceSelector) -> Option<DeviceIdentity> {
        self.registry.iter().find(|identity| selector.matches(identity)).cloned()
    }

    /// Returns true if discovery was started by this call.
    pub fn start(&mut self, events: DiscoveryEvents) -> Result<bool, DiscoveryError> {
        if self.state == DiscoveryState::Discovering {
            debug!("Discovery already running");
            return Ok(false);
        }

        self.transport.start_discovery(events).map_err(|source| DiscoveryError::Start { source })?;
        info!("Discovery started");
        self.state = DiscoveryState::Discovering;
        Ok(true)
    }

    /// Returns true if discovery was stopped by this call. The registry is cleared.
    pub fn stop(&mut self) -> bool {
        if self.state == DiscoveryState::Stopped {
            return false;
        }

        self.transport.stop_discovery();
        self.registry.clear();
        self.state = DiscoveryState::Stopped;
        info!("Discovery stopped");
        true
    }

    /// Returns true if the identity was not known yet.
    pub fn on_found(&mut self, identity: DeviceIdentity) -> bool {
        if self.state == DiscoveryState::Stopped {
            debug!("Ignoring camera {} found after discovery stopped", identity);
            return false;
        }

        let device = identity.to_string();
        let added = self.registry.insert(identity);
        if added {
            info!("Found camera {}", device);
        }
        added
    }

    pub fn on_error(&mut self, interface: CommunicationInterface, code: ErrorCode) -> DiscoveryError {
        warn!("Discovery error on {}: {}", interface, code);
        self.stop();
        DiscoveryError::Transport { interface, code }
    }
}
