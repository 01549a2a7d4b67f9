//! The session actor.
//!
//! A [`Session`] owns one link and every piece of connection state. It runs
//! as a single task; the application talks to it through a cloneable
//! [`SessionHandle`].

use std::fmt;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use commu_link::{ChannelState, Link, LinkEvent, LinkEvents, LinkState, PeerEndpoint, Role};
use commu_protocol::{Framer, Message, Payload, ProtocolError, Reassembler};
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::error::{SessionError, SessionResult};
use crate::reconnect::{ReconnectDecision, ReconnectState};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    /// Lost the channel; a reconnect may be pending.
    Disconnected,
    /// Gave up. `create_host` or `connect_to_peer` may start over.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Snapshot of a session, readable from any handle.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    pub state: SessionState,
    pub role: Option<Role>,
    /// Identifier this peer is reachable under.
    pub local_id: Option<String>,
    pub remote: Option<PeerEndpoint>,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

/// Shared, read-mostly session status.
pub type SharedSessionStatus = Arc<RwLock<SessionStatus>>;

enum Command {
    CreateHost {
        reply: oneshot::Sender<SessionResult<String>>,
    },
    Connect {
        remote_id: String,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Send {
        message: Message,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Shutdown,
}

type Timer = Option<Pin<Box<Sleep>>>;

/// Connection controller for one peer link.
pub struct Session<L: Link> {
    config: SessionConfig,
    link: L,
    framer: Framer,
    reassembler: Reassembler,
    dispatcher: Dispatcher,
    status: SharedSessionStatus,
    command_tx: mpsc::Sender<Command>,
    commands: mpsc::Receiver<Command>,

    state: SessionState,
    role: Option<Role>,
    remote_id: Option<String>,
    endpoint: Option<PeerEndpoint>,
    reconnect: ReconnectState,
    /// Events of the current connection attempt only.
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    retry: Timer,
    accept_deadline: Timer,
    peer_leaving: bool,
    /// Set when a command cut a connection attempt short.
    interrupt: Option<Interrupt>,
}

impl<L: Link> Session<L> {
    /// Creates a session driving `link`.
    ///
    /// Fails if the link MTU cannot carry a frame header.
    pub fn new(config: SessionConfig, link: L, dispatcher: Dispatcher) -> SessionResult<Self> {
        let framer = Framer::new(link.mtu()).map_err(SessionError::Encode)?;
        let reassembler = Reassembler::with_limits(config.reassembly_timeout, config.max_in_flight);
        let (command_tx, command_rx) = mpsc::channel(16);
        let reconnect = ReconnectState::new(config.max_reconnect_attempts);
        Ok(Self {
            config,
            link,
            framer,
            reassembler,
            dispatcher,
            status: Arc::new(RwLock::new(SessionStatus::default())),
            command_tx,
            commands: command_rx,
            state: SessionState::Idle,
            role: None,
            remote_id: None,
            endpoint: None,
            reconnect,
            events: None,
            retry: None,
            accept_deadline: None,
            peer_leaving: false,
            interrupt: None,
        })
    }

    /// Returns a handle for sending commands to the session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            command_tx: self.command_tx.clone(),
            status: self.status.clone(),
        }
    }

    /// Returns the shared status.
    pub fn status(&self) -> SharedSessionStatus {
        self.status.clone()
    }

    /// Runs the session on a new task.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Runs the session loop until shut down or every handle is dropped.
    pub async fn run(mut self) {
        // Release our own sender so the loop ends once every handle is gone.
        let (detached, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.command_tx, detached));

        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(transport = %self.link.kind(), mtu = self.link.mtu(), "Session started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = next_event(&mut self.events) => {
                    if let Some(event) = event {
                        self.handle_link_event(event).await;
                    }
                }
                () = fire(&mut self.retry) => {
                    self.retry = None;
                    self.reconnect_now().await;
                }
                () = fire(&mut self.accept_deadline) => {
                    self.accept_deadline = None;
                    self.guest_missing().await;
                }
                _ = sweep.tick() => {
                    let purged = self.reassembler.purge_expired(now());
                    if purged > 0 {
                        debug!(purged, "Dropped stale partial messages");
                    }
                }
            }

            match self.interrupt.take() {
                Some(Interrupt::Disconnect(reply)) => {
                    self.disconnect().await;
                    let _ = reply.send(Ok(()));
                }
                Some(Interrupt::Shutdown) => break,
                None => {}
            }
        }

        info!("Session stopping");
        self.close_link().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::CreateHost { reply } => {
                let _ = reply.send(self.create_host().await);
            }
            Command::Connect { remote_id, reply } => {
                let _ = reply.send(self.connect_to_peer(remote_id).await);
            }
            Command::Send { message, reply } => {
                let _ = reply.send(self.send(&message).await);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown => {}
        }
    }

    fn ensure_can_start(&self, operation: &'static str) -> SessionResult<()> {
        match self.state {
            SessionState::Idle | SessionState::Failed => Ok(()),
            state => Err(SessionError::invalid_state(operation, state)),
        }
    }

    async fn create_host(&mut self) -> SessionResult<String> {
        self.ensure_can_start("create a host")?;
        self.begin(Role::Host, None);
        self.set_state(SessionState::Connecting, None).await;

        match self.attempt().await {
            Ok(endpoint) => {
                let id = endpoint.peer_id.clone();
                info!(peer_id = %id, "Hosting, waiting for a guest");
                self.endpoint = Some(endpoint);
                self.publish_status().await;
                Ok(id)
            }
            Err(err) => {
                if self.interrupt.is_none() {
                    self.fail(err.to_string()).await;
                }
                Err(err)
            }
        }
    }

    async fn connect_to_peer(&mut self, remote_id: String) -> SessionResult<()> {
        self.ensure_can_start("connect")?;
        self.begin(Role::Guest, Some(remote_id));
        self.set_state(SessionState::Connecting, None).await;

        match self.attempt().await {
            Ok(endpoint) => {
                self.endpoint = Some(endpoint);
                self.on_open(None).await;
                Ok(())
            }
            Err(err) => {
                if self.interrupt.is_none() {
                    self.fail(err.to_string()).await;
                }
                Err(err)
            }
        }
    }

    fn begin(&mut self, role: Role, remote_id: Option<String>) {
        self.role = Some(role);
        self.remote_id = remote_id;
        self.endpoint = None;
        self.peer_leaving = false;
        self.reconnect.reset();
        self.reassembler.clear();
        self.retry = None;
        self.accept_deadline = None;
    }

    /// One listen or dial with a fresh event channel.
    ///
    /// Commands are still served while the link works: other requests are
    /// refused, and a disconnect or shutdown abandons the attempt and is
    /// left in `self.interrupt` for the run loop.
    async fn attempt(&mut self) -> SessionResult<PeerEndpoint> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events = Some(events_rx);

        let outcome = {
            let open = establish(
                &mut self.link,
                self.role,
                self.remote_id.as_deref(),
                &self.config,
                self.state,
                events_tx,
            );
            tokio::pin!(open);

            loop {
                tokio::select! {
                    result = &mut open => break Some(result),
                    command = self.commands.recv() => match command {
                        Some(Command::Disconnect { reply }) => {
                            self.interrupt = Some(Interrupt::Disconnect(reply));
                            break None;
                        }
                        Some(Command::Shutdown) | None => {
                            self.interrupt = Some(Interrupt::Shutdown);
                            break None;
                        }
                        Some(command) => refuse_while_connecting(command, self.state),
                    },
                }
            }
        };

        let result = outcome.unwrap_or_else(|| {
            info!("Connection attempt abandoned");
            Err(match self.interrupt {
                Some(Interrupt::Shutdown) => SessionError::Closed,
                _ => SessionError::TransportClosed("connection attempt cancelled".to_string()),
            })
        });
        if result.is_err() {
            self.events = None;
        }
        result
    }

    async fn on_open(&mut self, detail: Option<String>) {
        self.reconnect.reset();
        self.retry = None;
        self.accept_deadline = None;
        self.peer_leaving = false;
        if let Some(endpoint) = self.endpoint.as_mut() {
            endpoint.channel_state = ChannelState::Open;
        }
        info!(role = ?self.role, peer = ?self.remote_id, "Channel open");
        self.set_state(SessionState::Open, detail).await;

        if self.config.announce_on_open {
            let device_id = self.link.local_id().unwrap_or("unknown").to_string();
            let hello = Message::connection_established(device_id, self.role == Some(Role::Host));
            if let Err(e) = self.send(&hello).await {
                warn!(error = %e, "Failed to announce connection");
            }
        }
    }

    async fn send(&mut self, message: &Message) -> SessionResult<()> {
        if self.state != SessionState::Open {
            return Err(SessionError::NotConnected);
        }

        let frames = self.framer.encode(message).map_err(SessionError::Encode)?;
        let count = frames.len();
        for frame in frames {
            if let Err(e) = self.link.send(&frame.to_bytes()).await {
                warn!(kind = %message.kind(), error = %e, "Send failed");
                return Err(e.into());
            }
        }
        debug!(kind = %message.kind(), frames = count, "Sent message");
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.retry = None;
        self.accept_deadline = None;
        if self.state == SessionState::Open
            && let Err(e) = self.send(&Message::disconnect(None)).await
        {
            debug!(error = %e, "Could not notify peer of disconnect");
        }
        self.close_link().await;
        self.reconnect.reset();
        info!("Disconnected");
        self.set_state(SessionState::Idle, Some("disconnected".to_string()))
            .await;
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Frame(bytes) => self.handle_frame(&bytes),
            LinkEvent::StateChanged {
                state: LinkState::Open,
                detail,
            } => {
                if self.state == SessionState::Connecting {
                    self.on_open(detail).await;
                }
            }
            LinkEvent::StateChanged { state, detail } => {
                self.link_down(state, detail).await;
            }
        }
    }

    fn handle_frame(&mut self, bytes: &[u8]) {
        match self.framer.decode(bytes, &mut self.reassembler, now()) {
            Ok(Some(message)) => {
                if let Payload::Disconnect(ref goodbye) = message.payload {
                    info!(reason = ?goodbye.reason, "Peer is leaving");
                    self.peer_leaving = true;
                }
                let handled = self.dispatcher.dispatch(&message);
                debug!(kind = %message.kind(), handled, "Dispatched message");
            }
            Ok(None) => {}
            Err(ProtocolError::UnknownKind(kind)) => {
                debug!(%kind, "Ignoring unknown message type");
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                self.dispatcher.error(&SessionError::Decode(e));
            }
        }
    }

    async fn link_down(&mut self, state: LinkState, detail: Option<String>) {
        self.events = None;
        let reason = detail.unwrap_or_else(|| format!("link {state}"));

        if self.peer_leaving {
            info!("Peer left");
            self.close_link().await;
            self.reconnect.reset();
            self.set_state(SessionState::Idle, Some("peer disconnected".to_string()))
                .await;
            return;
        }

        warn!(%state, %reason, "Link lost");
        if let Some(endpoint) = self.endpoint.as_mut() {
            endpoint.channel_state = ChannelState::Closed;
        }
        self.accept_deadline = None;
        self.set_state(SessionState::Disconnected, Some(reason.clone()))
            .await;
        self.schedule_reconnect(reason).await;
    }

    async fn schedule_reconnect(&mut self, reason: String) {
        match self.reconnect.on_failure(self.config.reconnect_base_delay) {
            ReconnectDecision::Retry { attempt, delay } => {
                warn!(
                    attempt,
                    max = self.reconnect.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                self.publish_status().await;
            }
            ReconnectDecision::GiveUp => {
                error!(
                    attempts = self.reconnect.attempts,
                    %reason,
                    "Reconnect attempts exhausted"
                );
                self.fail(format!("reconnect attempts exhausted: {reason}"))
                    .await;
            }
        }
    }

    async fn reconnect_now(&mut self) {
        info!(
            attempt = self.reconnect.attempts,
            role = ?self.role,
            "Reconnecting"
        );
        self.set_state(SessionState::Connecting, None).await;

        match self.attempt().await {
            Ok(endpoint) => {
                let open = endpoint.channel_state == ChannelState::Open;
                self.endpoint = Some(endpoint);
                if open {
                    self.on_open(Some("reconnected".to_string())).await;
                } else {
                    // Host: the guest has to come back within the connect timeout.
                    self.accept_deadline =
                        Some(Box::pin(tokio::time::sleep(self.config.connect_timeout)));
                }
            }
            Err(_) if self.interrupt.is_some() => {}
            Err(e) => {
                warn!(error = %e, "Reconnect attempt failed");
                self.set_state(SessionState::Disconnected, Some(e.to_string()))
                    .await;
                self.schedule_reconnect(e.to_string()).await;
            }
        }
    }

    async fn guest_missing(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        let reason = "guest did not return in time".to_string();
        warn!("{reason}");
        self.link.close().await;
        self.events = None;
        self.set_state(SessionState::Disconnected, Some(reason.clone()))
            .await;
        self.schedule_reconnect(reason).await;
    }

    /// Terminal failure: close everything and forget the peer.
    async fn fail(&mut self, reason: String) {
        self.close_link().await;
        self.status.write().await.last_error = Some(reason.clone());
        self.set_state(SessionState::Failed, Some(reason)).await;
    }

    async fn close_link(&mut self) {
        self.retry = None;
        self.accept_deadline = None;
        self.events = None;
        self.link.close().await;
        self.reassembler.clear();
        self.endpoint = None;
        self.peer_leaving = false;
    }

    async fn set_state(&mut self, state: SessionState, detail: Option<String>) {
        let changed = self.state != state;
        self.state = state;
        self.publish_status().await;
        if changed {
            debug!(%state, detail = ?detail, "Session state changed");
            self.dispatcher.connection_changed(state, detail.as_deref());
        }
    }

    async fn publish_status(&mut self) {
        let local_id = self.link.local_id().map(str::to_string);
        let mut status = self.status.write().await;
        status.state = self.state;
        status.role = self.role;
        status.local_id = local_id;
        status.remote = self.endpoint.clone();
        status.reconnect_attempts = self.reconnect.attempts;
    }
}

/// A command that ended a connection attempt early.
enum Interrupt {
    Disconnect(oneshot::Sender<SessionResult<()>>),
    Shutdown,
}

async fn establish<L: Link>(
    link: &mut L,
    role: Option<Role>,
    remote_id: Option<&str>,
    config: &SessionConfig,
    state: SessionState,
    events: LinkEvents,
) -> SessionResult<PeerEndpoint> {
    let result = match (role, remote_id) {
        (Some(Role::Host), _) => {
            let timeout = config.host_timeout;
            tokio::time::timeout(timeout, link.listen(events))
                .await
                .map_err(|_| {
                    SessionError::Timeout(format!("advertising took over {}s", timeout.as_secs()))
                })
        }
        (Some(Role::Guest), Some(remote_id)) => {
            let timeout = config.connect_timeout;
            tokio::time::timeout(timeout, link.dial(remote_id, events))
                .await
                .map_err(|_| {
                    SessionError::Timeout(format!("no connection within {}s", timeout.as_secs()))
                })
        }
        (role, _) => Err(SessionError::invalid_state(
            if role.is_some() { "dial without a target" } else { "open without a role" },
            state,
        )),
    };
    result?.map_err(SessionError::from)
}

/// Answers a command that arrived while a connection attempt is running.
fn refuse_while_connecting(command: Command, state: SessionState) {
    match command {
        Command::CreateHost { reply } => {
            let _ = reply.send(Err(SessionError::invalid_state("create a host", state)));
        }
        Command::Connect { reply, .. } => {
            let _ = reply.send(Err(SessionError::invalid_state("connect", state)));
        }
        Command::Send { reply, .. } => {
            let _ = reply.send(Err(SessionError::NotConnected));
        }
        Command::Disconnect { .. } | Command::Shutdown => {}
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn next_event(slot: &mut Option<mpsc::UnboundedReceiver<LinkEvent>>) -> Option<LinkEvent> {
    let event = match slot {
        Some(rx) => rx.recv().await,
        None => pending().await,
    };
    if event.is_none() {
        *slot = None;
    }
    event
}

async fn fire(timer: &mut Timer) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

/// Handle for talking to a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<Command>,
    status: SharedSessionStatus,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Advertises this peer as host. Returns the identifier to hand to the
    /// guest; the session turns `Open` once the guest connects.
    pub async fn create_host(&self) -> SessionResult<String> {
        self.request(|reply| Command::CreateHost { reply }).await
    }

    /// Connects to a host. Resolves once the channel is open.
    pub async fn connect_to_peer(&self, remote_id: impl Into<String>) -> SessionResult<()> {
        let remote_id = remote_id.into();
        self.request(|reply| Command::Connect { remote_id, reply })
            .await
    }

    /// Sends a message. Fails with [`SessionError::NotConnected`] unless open.
    pub async fn send_message(&self, message: Message) -> SessionResult<()> {
        self.request(|reply| Command::Send { message, reply }).await
    }

    /// Leaves the session and returns to `Idle`.
    pub async fn disconnect(&self) -> SessionResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Stops the session task.
    pub async fn shutdown(&self) -> SessionResult<()> {
        self.command_tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn state(&self) -> SessionState {
        self.status.read().await.state
    }

    pub async fn status(&self) -> SessionStatus {
        self.status.read().await.clone()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<SessionResult<T>>) -> Command,
    ) -> SessionResult<T> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }
}
