use std::io;
use log::{info, warn};
use uuid::Uuid;

use crate::device::types::{ConnectionState, DeviceIdentity};
use crate::error::{LinkError, PermissionError, ProtocolError, SessionError};
use crate::device::types::PermissionOutcome;

pub type SessionId = Uuid;

/// The owned handle of one connect → disconnect span.
#[derive(Debug, Clone)]
pub struct SessionTicket {
    pub id: SessionId,
    pub identity: DeviceIdentity,
}

#[derive(Debug)]
pub enum DisconnectPlan {
    /// Nothing is connected; nothing happens.
    NotConnected,
    /// Already disconnecting; the running teardown will finish the job.
    InProgress,
    /// Connected: deactivate the stream, then release the device.
    Teardown(SessionTicket),
    /// A connect attempt is in flight; it is reversed once it resolves.
    AfterConnect(SessionTicket),
    /// The permission prompt was still open. The session ended right away and
    /// the eventual outcome is stale.
    PermissionWithdrawn(SessionTicket),
}

#[derive(Debug)]
pub enum PermissionResolution {
    Proceed(SessionTicket),
    Rejected(PermissionError),
    Stale,
}

#[derive(Debug)]
pub enum ConnectResolution {
    Connected(SessionTicket),
    Failed(LinkError),
    /// The device connected, but disconnect was requested meanwhile; release it.
    Cancelled(SessionTicket),
    Stale { succeeded: bool },
}

/// State machine of the single camera connection.
///
/// Transitions: DISCONNECTED → CONNECTING → CONNECTED → DISCONNECTING →
/// DISCONNECTED, with shortcuts from CONNECTING to DISCONNECTING (cancel) or
/// DISCONNECTED (failure, link lost) and from CONNECTED to DISCONNECTED (link lost).
#[derive(Debug)]
pub struct ConnectionSession {
    state: ConnectionState,
    current: Option<SessionTicket>,
    awaiting_permission: bool,
}

impl ConnectionSession {
    pub fn new() -> Self {
        ConnectionSession {
            state: ConnectionState::Disconnected,
            current: None,
            awaiting_permission: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.current.as_ref().map(|ticket| &ticket.identity)
    }

    pub fn ticket(&self) -> Option<&SessionTicket> {
        self.current.as_ref()
    }

    pub fn is_awaiting_permission(&self) -> bool {
        self.awaiting_permission
    }

    /// Start a connect attempt. On success the state is CONNECTING and the
    /// returned ticket names the new session.
    pub fn begin_connect(&mut self, identity: Option<DeviceIdentity>) -> Result<SessionTicket, SessionError> {
        if let Some(current) = &self.current {
            let device_id = current.identity.device_id().to_string();
            if self.state == ConnectionState::Disconnecting {
                warn!("connect(), {} is still being released", device_id);
                return Err(SessionError::Busy { device_id });
            }
            warn!("connect(), only one camera connection is supported at a time");
            return Err(SessionError::AlreadyConnected { device_id });
        }

        let identity = match identity {
            Some(identity) => identity,
            None => {
                warn!("connect(), can't connect, no camera available");
                return Err(SessionError::NoDevice);
            },
        };

        let ticket = SessionTicket { id: Uuid::new_v4(), identity };
        self.awaiting_permission = ticket.identity.requires_permission();
        self.current = Some(ticket.clone());
        self.transition(ConnectionState::Connecting);
        Ok(ticket)
    }

    pub fn permission_resolved(&mut self, session: SessionId, outcome: PermissionOutcome) -> PermissionResolution {
        if !self.is_current(session) || !self.awaiting_permission {
            return PermissionResolution::Stale;
        }
        self.awaiting_permission = false;

        let device_id = |identity: &DeviceIdentity| identity.device_id().to_string();
        let error = match outcome {
            PermissionOutcome::Granted(_) => {
                return match &self.current {
                    Some(ticket) => PermissionResolution::Proceed(ticket.clone()),
                    None => PermissionResolution::Stale,
                };
            },
            PermissionOutcome::Denied(identity) => PermissionError::Denied { device_id: device_id(&identity) },
            PermissionOutcome::Error(kind, identity) => PermissionError::Failed { kind, device_id: device_id(&identity) },
        };

        self.finish();
        PermissionResolution::Rejected(error)
    }

    pub fn connect_finished(&mut self, session: SessionId, result: io::Result<()>) -> ConnectResolution {
        if !self.is_current(session) || self.awaiting_permission {
            return ConnectResolution::Stale { succeeded: result.is_ok() };
        }

        match (self.state, result) {
            (ConnectionState::Connecting, Ok(())) => {
                self.transition(ConnectionState::Connected);
                match &self.current {
                    Some(ticket) => ConnectResolution::Connected(ticket.clone()),
                    None => ConnectResolution::Stale { succeeded: true },
                }
            },
            (ConnectionState::Disconnecting, Ok(())) => {
                info!("Connect completed after disconnect was requested, releasing the camera");
                match &self.current {
                    Some(ticket) => ConnectResolution::Cancelled(ticket.clone()),
                    None => ConnectResolution::Stale { succeeded: true },
                }
            },
            (ConnectionState::Connecting, Err(source)) | (ConnectionState::Disconnecting, Err(source)) => {
                info!("Could not connect: {}", source);
                let device_id = self.identity().map(|identity| identity.device_id().to_string()).unwrap_or_default();
                self.finish();
                ConnectResolution::Failed(ProtocolError::Connect { device_id, source }.into())
            },
            (_, result) => ConnectResolution::Stale { succeeded: result.is_ok() },
        }
    }

    pub fn begin_disconnect(&mut self) -> DisconnectPlan {
        let ticket = match &self.current {
            None => return DisconnectPlan::NotConnected,
            Some(ticket) => ticket.clone(),
        };

        match self.state {
            ConnectionState::Disconnected => DisconnectPlan::NotConnected,
            ConnectionState::Disconnecting => DisconnectPlan::InProgress,
            ConnectionState::Connected => {
                self.transition(ConnectionState::Disconnecting);
                DisconnectPlan::Teardown(ticket)
            },
            ConnectionState::Connecting if self.awaiting_permission => {
                self.finish();
                DisconnectPlan::PermissionWithdrawn(ticket)
            },
            ConnectionState::Connecting => {
                self.transition(ConnectionState::Disconnecting);
                DisconnectPlan::AfterConnect(ticket)
            },
        }
    }

    /// The device was released. Returns the identity of the ended session.
    pub fn disconnect_finished(&mut self, session: SessionId) -> Option<SessionTicket> {
        if !self.is_current(session) || self.state != ConnectionState::Disconnecting {
            return None;
        }
        self.finish()
    }

    /// Unsolicited disconnect reported by the camera. Moves straight to
    /// DISCONNECTED unless a caller-initiated teardown is already running.
    pub fn link_lost(&mut self, session: SessionId) -> Option<(ConnectionState, SessionTicket)> {
        if !self.is_current(session) {
            return None;
        }

        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                let previous = self.state;
                self.awaiting_permission = false;
                self.finish().map(|ticket| (previous, ticket))
            },
            _ => None,
        }
    }

    fn is_current(&self, session: SessionId) -> bool {
        matches!(&self.current, Some(ticket) if ticket.id == session)
    }

    fn finish(&mut self) -> Option<SessionTicket> {
        self.transition(ConnectionState::Disconnected);
        self.awaiting_permission = false;
        self.current.take()
    }

    fn transition(&mut self, to: ConnectionState) {
        debug_assert!(is_legal(self.state, to), "illegal transition {} -> {}", self.state, to);

        let device_id = self.identity().map(|identity| identity.device_id()).unwrap_or("");
        info!("{} {} -> {}", device_id, self.state, to);
        self.state = to;
    }
}

impl Default for ConnectionSession {
    fn default() -> Self {
        ConnectionSession::new()
    }
}

fn is_legal(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    matches!(
        (from, to),
        (Disconnected, Connecting)
            | (Connecting, Connected)
            | (Connecting, Disconnecting)
            | (Connecting, Disconnected)
            | (Connected, Disconnecting)
            | (Connected, Disconnected)
            | (Disconnecting, Disconnected)
    )
}
