use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use futures::{SinkExt, StreamExt};
use futures::channel::mpsc::{channel, unbounded, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot;
use log::{debug, error, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::device::capability::{post, DeviceProtocol, DiscoveryEvents, DiscoveryTransport, FrameSink, LinkStatus, PermissionCapability};
use crate::device::constants::{COMMAND_CHANNEL_CAPACITY, PERMISSION_TIMEOUT, SHUTDOWN_DEADLINE, WORKER_THREAD_PREFIX};
use crate::device::discovery::DiscoveryCoordinator;
use crate::device::session::{ConnectResolution, ConnectionSession, DisconnectPlan, PermissionResolution, SessionId, SessionTicket};
use crate::device::types::{CommunicationInterface, ConnectionState, DeviceIdentity, DeviceSelector, DiscoveryState, ErrorCode, LinkSnapshot, PermissionErrorKind, PermissionOutcome, StatusEvent};
use crate::error::{readable_thread_panic_error, LinkError, ProtocolError};
use crate::stream::dispatcher::StreamDispatcher;

/// Events posted to the link task from worker threads and collaborator callbacks.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    DeviceFound(DeviceIdentity),
    DiscoveryFailed { interface: CommunicationInterface, code: ErrorCode },
    PermissionResolved { session: SessionId, outcome: PermissionOutcome },
    ConnectFinished { session: SessionId, result: io::Result<()> },
    DisconnectFinished { session: SessionId, result: io::Result<()> },
    LinkLost { session: SessionId, code: Option<ErrorCode> },
    FrameReady { session: SessionId },
    FrameAbandoned { session: SessionId },
}

#[derive(Debug)]
pub enum ConnectOutcome {
    Connected(DeviceIdentity),
    Failed(LinkError),
    /// Disconnect was requested before the connect attempt completed.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Released,
    /// The camera reported an error while being released; the link is disconnected regardless.
    ReleaseFailed(String),
}

/// Resolves once the operation it was handed out for reaches a terminal state.
#[derive(Debug)]
pub struct Completion<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Completion<T> {
    pub async fn wait(self) -> Result<T, LinkError> {
        self.receiver.await.map_err(|_| LinkError::NoReply)
    }
}

pub struct Capabilities {
    pub discovery: Arc<dyn DiscoveryTransport>,
    pub permission: Arc<dyn PermissionCapability>,
    pub device: Arc<dyn DeviceProtocol>,
    pub sink: Arc<dyn FrameSink>,
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub permission_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        LinkSettings { permission_timeout: Duration::from_millis(PERMISSION_TIMEOUT) }
    }
}

impl From<&Config> for LinkSettings {
    fn from(config: &Config) -> Self {
        LinkSettings { permission_timeout: Duration::from_millis(config.permission_timeout_ms) }
    }
}

enum ConnectTarget {
    Identity(DeviceIdentity),
    Selected(DeviceSelector),
}

enum Command {
    Connect { target: ConnectTarget, reply: oneshot::Sender<Result<Completion<ConnectOutcome>, LinkError>> },
    Disconnect { reply: oneshot::Sender<Option<Completion<DisconnectOutcome>>> },
    StartDiscovery { reply: oneshot::Sender<Result<(), LinkError>> },
    StopDiscovery { reply: oneshot::Sender<()> },
    Snapshot { reply: oneshot::Sender<LinkSnapshot> },
    Subscribe { observer: UnboundedSender<StatusEvent> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Clonable front end of the link task.
#[derive(Clone)]
pub struct LinkHandle {
    commands: Sender<Command>,
}

impl LinkHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, LinkError> {
        let (reply, response) = oneshot::channel();
        let mut commands = self.commands.clone();
        commands.send(make(reply)).await?;
        response.await.map_err(|_| LinkError::NoReply)
    }

    /// Start connecting to `identity`. Resolves as soon as the link is CONNECTING;
    /// the returned completion resolves with the outcome of the attempt.
    pub async fn connect(&self, identity: DeviceIdentity) -> Result<Completion<ConnectOutcome>, LinkError> {
        self.request(|reply| Command::Connect { target: ConnectTarget::Identity(identity), reply }).await?
    }

    /// Like `connect`, with the first discovered camera matching `selector`.
    pub async fn connect_selected(&self, selector: DeviceSelector) -> Result<Completion<ConnectOutcome>, LinkError> {
        self.request(|reply| Command::Connect { target: ConnectTarget::Selected(selector), reply }).await?
    }

    /// `None` if nothing was connected. Otherwise the completion resolves once DISCONNECTED.
    pub async fn disconnect(&self) -> Result<Option<Completion<DisconnectOutcome>>, LinkError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    pub async fn start_discovery(&self) -> Result<(), LinkError> {
        self.request(|reply| Command::StartDiscovery { reply }).await?
    }

    pub async fn stop_discovery(&self) -> Result<(), LinkError> {
        self.request(|reply| Command::StopDiscovery { reply }).await
    }

    pub async fn snapshot(&self) -> Result<LinkSnapshot, LinkError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn subscribe(&self) -> Result<UnboundedReceiver<StatusEvent>, LinkError> {
        let (observer, events) = unbounded();
        let mut commands = self.commands.clone();
        commands.send(Command::Subscribe { observer }).await?;
        Ok(events)
    }

    /// Stop the link task. Resolves after the stream was torn down and the
    /// camera released.
    pub async fn shutdown(&self) -> Result<(), LinkError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

struct PendingConnect {
    session: SessionId,
    reply: oneshot::Sender<ConnectOutcome>,
}

struct LinkTask {
    capabilities: Capabilities,
    settings: LinkSettings,
    session: ConnectionSession,
    discovery: DiscoveryCoordinator,
    dispatcher: StreamDispatcher,
    events: UnboundedSender<LinkEvent>,
    observers: Vec<UnboundedSender<StatusEvent>>,
    pending_connect: Option<PendingConnect>,
    pending_disconnect: Vec<oneshot::Sender<DisconnectOutcome>>,
    // session of a connect worker that has not reported back yet
    connect_in_flight: Option<SessionId>,
}

impl LinkTask {
    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { target, reply } => {
                let _ = reply.send(self.connect(target));
            },
            Command::Disconnect { reply } => {
                let _ = reply.send(self.disconnect());
            },
            Command::StartDiscovery { reply } => {
                let events = DiscoveryEvents::new(self.events.clone());
                let result: Result<(), LinkError> = match self.discovery.start(events) {
                    Ok(started) => {
                        if started {
                            self.broadcast(StatusEvent::DiscoveryChanged(DiscoveryState::Discovering));
                        }
                        Ok(())
                    },
                    Err(err) => {
                        self.notice(err.to_string());
                        Err(err.into())
                    },
                };
                let _ = reply.send(result);
            },
            Command::StopDiscovery { reply } => {
                self.stop_discovery();
                let _ = reply.send(());
            },
            Command::Snapshot { reply } => {
                let _ = reply.send(LinkSnapshot {
                    connection: self.session.state(),
                    identity: self.session.identity().cloned(),
                    discovery: self.discovery.state(),
                    discovered: self.discovery.discovered().cloned().collect(),
                });
            },
            Command::Subscribe { observer } => {
                self.observers.push(observer);
            },
            // handled by the task loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            },
        }
    }

    fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::DeviceFound(identity) => {
                if self.discovery.on_found(identity.clone()) {
                    self.broadcast(StatusEvent::DeviceFound(identity));
                }
            },
            LinkEvent::DiscoveryFailed { interface, code } => {
                let err = self.discovery.on_error(interface, code);
                self.broadcast(StatusEvent::DiscoveryChanged(DiscoveryState::Stopped));
                self.notice(err.to_string());
            },
            LinkEvent::PermissionResolved { session, outcome } => {
                match self.with_session(|s| s.permission_resolved(session, outcome)) {
                    PermissionResolution::Proceed(ticket) => self.spawn_connect(ticket),
                    PermissionResolution::Rejected(err) => {
                        self.notice(err.to_string());
                        self.resolve_connect(session, ConnectOutcome::Failed(err.into()));
                    },
                    PermissionResolution::Stale => debug!("Ignoring stale permission outcome for session {}", session),
                }
            },
            LinkEvent::ConnectFinished { session, result } => {
                if self.connect_in_flight == Some(session) {
                    self.connect_in_flight = None;
                }
                match self.with_session(|s| s.connect_finished(session, result)) {
                    ConnectResolution::Connected(ticket) => self.start_stream(ticket),
                    ConnectResolution::Failed(err) => {
                        self.notice(err.to_string());
                        self.resolve_connect(session, ConnectOutcome::Failed(err));
                        self.resolve_disconnects(DisconnectOutcome::Released);
                    },
                    ConnectResolution::Cancelled(ticket) => {
                        self.resolve_connect(session, ConnectOutcome::Cancelled);
                        self.spawn_disconnect(ticket);
                    },
                    ConnectResolution::Stale { succeeded } => {
                        debug!("Ignoring stale connect result for session {}", session);
                        if succeeded && self.session.state() == ConnectionState::Disconnected {
                            warn!("Camera connected after its session ended, releasing it");
                            self.spawn_release(session);
                        }
                    },
                }
            },
            LinkEvent::DisconnectFinished { session, result } => {
                let ended = self.with_session(|s| s.disconnect_finished(session));
                if ended.is_none() {
                    debug!("Ignoring stale disconnect result for session {}", session);
                    if let Err(err) = result {
                        warn!("Releasing a stale camera session failed: {}", err);
                    }
                    return;
                }

                let outcome = match (result, ended) {
                    (Err(source), Some(ticket)) => {
                        let err = ProtocolError::Disconnect { device_id: ticket.identity.device_id().to_string(), source };
                        let message = err.to_string();
                        self.notice(message.clone());
                        DisconnectOutcome::ReleaseFailed(message)
                    },
                    _ => DisconnectOutcome::Released,
                };
                self.resolve_disconnects(outcome);
            },
            LinkEvent::LinkLost { session, code } => {
                if let Some((previous, ticket)) = self.with_session(|s| s.link_lost(session)) {
                    self.dispatcher.deactivate();

                    let reason = code.map(|code| code.to_string()).unwrap_or_else(|| "no error code".to_string());
                    let err = ProtocolError::LinkLost { device_id: ticket.identity.device_id().to_string(), reason };
                    self.notice(err.to_string());

                    if previous == ConnectionState::Connecting {
                        self.resolve_connect(session, ConnectOutcome::Failed(err.into()));
                    }
                } else {
                    debug!("Ignoring link lost notification for session {}", session);
                }
            },
            LinkEvent::FrameReady { session } => {
                self.dispatcher.drain(session);
            },
            LinkEvent::FrameAbandoned { session } => {
                warn!("Frame pair of session {} abandoned", session);
                self.broadcast(StatusEvent::FrameDropped);
            },
        }
    }

    fn connect(&mut self, target: ConnectTarget) -> Result<Completion<ConnectOutcome>, LinkError> {
        let identity = match target {
            ConnectTarget::Identity(identity) => Some(identity),
            ConnectTarget::Selected(selector) => self.discovery.select(selector),
        };

        let ticket = match self.with_session(|s| s.begin_connect(identity)) {
            Ok(ticket) => ticket,
            Err(err) => {
                self.notice(format!("connect(), {}", err));
                return Err(err.into());
            },
        };

        // a connect attempt always ends discovery
        self.stop_discovery();

        let (reply, receiver) = oneshot::channel();
        self.pending_connect = Some(PendingConnect { session: ticket.id, reply });

        if ticket.identity.requires_permission() {
            self.request_permission(ticket);
        } else {
            self.spawn_connect(ticket);
        }

        Ok(Completion { receiver })
    }

    fn disconnect(&mut self) -> Option<Completion<DisconnectOutcome>> {
        match self.with_session(|s| s.begin_disconnect()) {
            DisconnectPlan::NotConnected => {
                debug!("disconnect() called while not connected");
                return None;
            },
            DisconnectPlan::InProgress => {},
            DisconnectPlan::Teardown(ticket) => {
                self.dispatcher.deactivate();
                self.spawn_disconnect(ticket);
            },
            DisconnectPlan::AfterConnect(ticket) => {
                info!("Disconnect requested while connecting to {}", ticket.identity);
            },
            DisconnectPlan::PermissionWithdrawn(ticket) => {
                info!("Permission request for {} withdrawn", ticket.identity);
                self.resolve_connect(ticket.id, ConnectOutcome::Cancelled);

                let (reply, receiver) = oneshot::channel();
                let _ = reply.send(DisconnectOutcome::Released);
                return Some(Completion { receiver });
            },
        }

        let (reply, receiver) = oneshot::channel();
        self.pending_disconnect.push(reply);
        Some(Completion { receiver })
    }

    fn stop_discovery(&mut self) {
        if self.discovery.stop() {
            self.broadcast(StatusEvent::DiscoveryChanged(DiscoveryState::Stopped));
        }
    }

    fn request_permission(&self, ticket: SessionTicket) {
        let receiver = self.capabilities.permission.request(&ticket.identity);
        let permission_timeout = self.settings.permission_timeout;
        let events = self.events.clone();

        spawn(async move {
            let SessionTicket { id, identity } = ticket;
            let outcome = match timeout(permission_timeout, receiver).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => PermissionOutcome::Error(PermissionErrorKind::Cancelled, identity),
                Err(_) => PermissionOutcome::Error(PermissionErrorKind::Timeout, identity),
            };
            post(&events, LinkEvent::PermissionResolved { session: id, outcome });
        });
    }

    fn spawn_connect(&mut self, ticket: SessionTicket) {
        self.connect_in_flight = Some(ticket.id);
        let device = self.capabilities.device.clone();
        let status = LinkStatus::new(ticket.id, self.events.clone());

        spawn_worker(Worker::Connect, ticket.id, self.events.clone(), move || {
            device.connect(&ticket.identity, status)
        });
    }

    fn spawn_disconnect(&self, ticket: SessionTicket) {
        info!("Releasing {}", ticket.identity);
        self.spawn_release(ticket.id);
    }

    fn spawn_release(&self, session: SessionId) {
        let device = self.capabilities.device.clone();
        spawn_worker(Worker::Disconnect, session, self.events.clone(), move || device.disconnect());
    }

    fn start_stream(&mut self, ticket: SessionTicket) {
        let result = self.dispatcher.activate(
            ticket.id,
            self.capabilities.device.as_ref(),
            self.capabilities.sink.clone(),
            self.events.clone(),
        );

        match result {
            Ok(()) => self.resolve_connect(ticket.id, ConnectOutcome::Connected(ticket.identity)),
            Err(err) => {
                error!("Could not start the stream for {}: {}", ticket.identity, err);
                self.notice(err.to_string());
                self.resolve_connect(ticket.id, ConnectOutcome::Failed(err.into()));
            },
        }
    }

    /// Apply a change to the session and broadcast the new state if it changed.
    fn with_session<R>(&mut self, change: impl FnOnce(&mut ConnectionSession) -> R) -> R {
        let before = self.session.state();
        let identity = self.session.identity().cloned();

        let result = change(&mut self.session);

        let state = self.session.state();
        if state != before {
            let identity = self.session.identity().cloned().or(identity);
            self.broadcast(StatusEvent::ConnectionChanged { identity, state });
        }
        result
    }

    fn resolve_connect(&mut self, session: SessionId, outcome: ConnectOutcome) {
        let matches = matches!(&self.pending_connect, Some(pending) if pending.session == session);
        if !matches {
            return;
        }

        if let Some(pending) = self.pending_connect.take() {
            let _ = pending.reply.send(outcome);
        }
    }

    fn resolve_disconnects(&mut self, outcome: DisconnectOutcome) {
        for reply in self.pending_disconnect.drain(..) {
            let _ = reply.send(outcome.clone());
        }
    }

    fn notice(&mut self, message: String) {
        info!("{}", message);
        self.broadcast(StatusEvent::Notice(message));
    }

    fn broadcast(&mut self, event: StatusEvent) {
        self.observers.retain(|observer| observer.unbounded_send(event.clone()).is_ok());
    }

    /// Disconnect through the regular path and keep handling worker results
    /// until the session is DISCONNECTED, so an in-flight handshake is
    /// reversed instead of being left connected.
    async fn shut_down(mut self, events: &mut UnboundedReceiver<LinkEvent>) {
        self.stop_discovery();

        if self.session.state() != ConnectionState::Disconnected || self.connect_in_flight.is_some() {
            info!("Releasing the camera before the link stops");
            let _ = self.disconnect();

            let deadline = Duration::from_millis(SHUTDOWN_DEADLINE);
            let released = timeout(deadline, async {
                while self.session.state() != ConnectionState::Disconnected || self.connect_in_flight.is_some() {
                    match events.next().await {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
            }).await;

            if released.is_err() {
                warn!("Camera was not released within {}ms, it may still be connected", SHUTDOWN_DEADLINE);
            }
        }

        if let Some(discarded) = self.dispatcher.deactivate() {
            debug!("Discarded {} frame pairs on shutdown", discarded);
        }

        self.pending_connect = None;
        self.resolve_disconnects(DisconnectOutcome::Released);
    }
}

#[derive(Debug, Clone, Copy)]
enum Worker {
    Connect,
    Disconnect,
}

impl Worker {
    fn name(self) -> &'static str {
        match self {
            Worker::Connect => "connect",
            Worker::Disconnect => "disconnect",
        }
    }

    fn finished(self, session: SessionId, result: io::Result<()>) -> LinkEvent {
        match self {
            Worker::Connect => LinkEvent::ConnectFinished { session, result },
            Worker::Disconnect => LinkEvent::DisconnectFinished { session, result },
        }
    }
}

/// Run blocking camera I/O on its own named thread and post the result.
/// A panic or a failed spawn is reported as an error result, so the session
/// always gets an answer.
fn spawn_worker<W>(worker: Worker, session: SessionId, events: UnboundedSender<LinkEvent>, work: W)
where
    W: FnOnce() -> io::Result<()> + Send + 'static,
{
    let worker_events = events.clone();

    let spawned = thread::Builder::new()
        .name(format!("{}-{}", WORKER_THREAD_PREFIX, worker.name()))
        .spawn(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(result) => result,
                Err(payload) => {
                    let message = readable_thread_panic_error(&payload);
                    error!("Camera {} worker crashed: {}", worker.name(), message);
                    Err(io::Error::new(io::ErrorKind::Other, message))
                },
            };
            post(&worker_events, worker.finished(session, result));
        });

    if let Err(err) = spawned {
        error!("Failed to spawn {} worker: {}", worker.name(), err);
        post(&events, worker.finished(session, Err(err)));
    }
}

/// Start the camera link task.
///
/// All link state lives inside the task; `LinkHandle` sends it commands and
/// observers receive every status change in order.
pub fn spawn_link(
    cancel: CancellationToken,
    capabilities: Capabilities,
    settings: LinkSettings,
    observers: Vec<UnboundedSender<StatusEvent>>,
) -> (LinkHandle, JoinHandle<()>) {
    let (command_sender, mut command_receiver): (Sender<Command>, Receiver<Command>) = channel(COMMAND_CHANNEL_CAPACITY);
    let (event_sender, mut event_receiver) = unbounded::<LinkEvent>();

    let mut task = LinkTask {
        discovery: DiscoveryCoordinator::new(capabilities.discovery.clone()),
        capabilities,
        settings,
        session: ConnectionSession::new(),
        dispatcher: StreamDispatcher::new(),
        events: event_sender,
        observers,
        pending_connect: None,
        pending_disconnect: Vec::new(),
        connect_in_flight: None,
    };

    let handle = spawn(async move {
        let mut shutdown_reply = None;

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                command = command_receiver.next() => match command {
                    Some(Command::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break 'mainloop;
                    },
                    Some(command) => task.handle_command(command),
                    None => break 'mainloop,
                },
                Some(event) = event_receiver.next() => {
                    task.handle_event(event);
                },
            }
        }

        info!("Camera link stopping");
        task.shut_down(&mut event_receiver).await;

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    });

    (LinkHandle { commands: command_sender }, handle)
}
