//! In-process relay transport.
//!
//! A [`Relay`] plays the part of a signaling broker: hosts register under a
//! peer id, guests look the id up and hand the host an offer. Once the host
//! accepts, the two links exchange frames over a pair of channels that no
//! longer touch the broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use commu_core::generate_peer_id;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{LinkError, LinkResult};
use crate::link::{
    ChannelState, Link, LinkEvent, LinkEvents, LinkState, PeerEndpoint, Role, TransportKind,
    check_frame_size,
};

/// Relay link configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Largest frame accepted by `send`.
    pub mtu: usize,
    /// How long a guest waits for the host to accept.
    pub connect_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mtu: 16 * 1024,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl RelayConfig {
    /// Builder: set the MTU.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Builder: set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

type FrameTx = mpsc::UnboundedSender<Vec<u8>>;
type FrameRx = mpsc::UnboundedReceiver<Vec<u8>>;

/// Guest half of a freshly accepted connection.
struct Pipe {
    tx: FrameTx,
    rx: FrameRx,
}

struct Offer {
    guest_id: String,
    reply: oneshot::Sender<Pipe>,
}

struct Registration {
    generation: u64,
    offers: mpsc::UnboundedSender<Offer>,
    severed: watch::Sender<bool>,
}

#[derive(Default)]
struct Registry {
    next_generation: u64,
    hosts: HashMap<String, Registration>,
}

/// Broker connecting [`RelayLink`]s within one process.
#[derive(Clone, Default)]
pub struct Relay {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Relay")
            .field("hosts", &registry.hosts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a link attached to this relay.
    pub fn link(&self) -> RelayLink {
        self.link_with_config(RelayConfig::default())
    }

    pub fn link_with_config(&self, config: RelayConfig) -> RelayLink {
        RelayLink {
            relay: self.clone(),
            config,
            local_id: None,
            registration: None,
            outbound: Outbound::default(),
            task: None,
        }
    }

    /// Returns true while a host is advertised under `id`.
    pub fn is_registered(&self, id: &str) -> bool {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry
            .hosts
            .get(id)
            .is_some_and(|reg| !reg.offers.is_closed())
    }

    /// Drops the advertisement under `id` and breaks any connection made
    /// through it, as a network failure would.
    ///
    /// Both ends see `StateChanged(Error)`. Returns false if nothing was
    /// registered.
    pub fn sever(&self, id: &str) -> bool {
        let removed = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.hosts.remove(id)
        };
        match removed {
            Some(reg) => {
                info!(peer_id = id, "Severing relay connection");
                let _ = reg.severed.send(true);
                true
            }
            None => false,
        }
    }

    fn register(
        &self,
        id: &str,
        offers: mpsc::UnboundedSender<Offer>,
    ) -> LinkResult<(u64, watch::Receiver<bool>)> {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if registry
            .hosts
            .get(id)
            .is_some_and(|reg| !reg.offers.is_closed())
        {
            return Err(LinkError::signaling(format!("peer id {id} is already taken")));
        }

        registry.next_generation += 1;
        let generation = registry.next_generation;
        let (severed, severed_rx) = watch::channel(false);
        registry.hosts.insert(
            id.to_string(),
            Registration {
                generation,
                offers,
                severed,
            },
        );
        Ok((generation, severed_rx))
    }

    fn unregister(&self, id: &str, generation: u64) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if registry
            .hosts
            .get(id)
            .is_some_and(|reg| reg.generation == generation)
        {
            registry.hosts.remove(id);
        }
    }

    fn lookup(&self, id: &str) -> Option<(mpsc::UnboundedSender<Offer>, watch::Receiver<bool>)> {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry
            .hosts
            .get(id)
            .map(|reg| (reg.offers.clone(), reg.severed.subscribe()))
    }
}

/// Sender half of the current connection, if any.
#[derive(Clone, Default)]
struct Outbound(Arc<Mutex<Option<FrameTx>>>);

impl Outbound {
    fn set(&self, tx: FrameTx) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn is_open(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    fn send(&self, frame: &[u8]) -> LinkResult<()> {
        let guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(LinkError::NotConnected)?;
        tx.send(frame.to_vec())
            .map_err(|_| LinkError::TransportClosed("peer went away".to_string()))
    }
}

/// Link over a [`Relay`].
pub struct RelayLink {
    relay: Relay,
    config: RelayConfig,
    local_id: Option<String>,
    registration: Option<u64>,
    outbound: Outbound,
    task: Option<JoinHandle<()>>,
}

impl RelayLink {
    fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.outbound.clear();
        if let (Some(generation), Some(id)) = (self.registration.take(), self.local_id.as_deref())
        {
            self.relay.unregister(id, generation);
        }
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Link for RelayLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    fn mtu(&self) -> usize {
        self.config.mtu
    }

    fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    fn is_open(&self) -> bool {
        self.outbound.is_open()
    }

    async fn listen(&mut self, events: LinkEvents) -> LinkResult<PeerEndpoint> {
        self.teardown();
        let id = self.local_id.get_or_insert_with(generate_peer_id).clone();

        let (offers_tx, offers_rx) = mpsc::unbounded_channel();
        let (generation, severed) = self.relay.register(&id, offers_tx)?;
        self.registration = Some(generation);
        info!(peer_id = %id, "Advertising on relay");

        self.task = Some(tokio::spawn(serve_host(
            offers_rx,
            severed,
            events,
            self.outbound.clone(),
        )));

        Ok(PeerEndpoint {
            peer_id: id,
            role: Role::Host,
            channel_state: ChannelState::Connecting,
        })
    }

    async fn dial(&mut self, remote_id: &str, events: LinkEvents) -> LinkResult<PeerEndpoint> {
        self.teardown();
        let guest_id = self.local_id.get_or_insert_with(generate_peer_id).clone();

        let (offers, severed) = self
            .relay
            .lookup(remote_id)
            .ok_or_else(|| LinkError::unreachable(remote_id, "no such peer on the relay"))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        offers
            .send(Offer {
                guest_id,
                reply: reply_tx,
            })
            .map_err(|_| LinkError::unreachable(remote_id, "peer stopped listening"))?;

        let pipe = tokio::time::timeout(self.config.connect_timeout, reply_rx)
            .await
            .map_err(|_| LinkError::timeout("relay connect", self.config.connect_timeout))?
            .map_err(|_| LinkError::unreachable(remote_id, "peer refused the connection"))?;

        self.outbound.set(pipe.tx);
        self.task = Some(tokio::spawn(pump(
            pipe.rx,
            severed,
            None,
            events,
            self.outbound.clone(),
        )));
        info!(peer_id = remote_id, "Connected over relay");

        Ok(PeerEndpoint {
            peer_id: remote_id.to_string(),
            role: Role::Guest,
            channel_state: ChannelState::Open,
        })
    }

    async fn send(&mut self, frame: &[u8]) -> LinkResult<()> {
        check_frame_size(frame, self.config.mtu)?;
        self.outbound.send(frame)
    }

    async fn close(&mut self) {
        debug!(peer_id = ?self.local_id, "Closing relay link");
        self.teardown();
    }
}

async fn serve_host(
    mut offers: mpsc::UnboundedReceiver<Offer>,
    severed: watch::Receiver<bool>,
    events: LinkEvents,
    outbound: Outbound,
) {
    let rx = loop {
        let Some(offer) = offers.recv().await else {
            let _ = events.send(LinkEvent::state(
                LinkState::Error,
                "relay advertisement withdrawn",
            ));
            return;
        };

        let (host_tx, guest_rx) = mpsc::unbounded_channel();
        let (guest_tx, host_rx) = mpsc::unbounded_channel();
        let pipe = Pipe {
            tx: guest_tx,
            rx: guest_rx,
        };
        if offer.reply.send(pipe).is_err() {
            debug!(guest = %offer.guest_id, "Guest gave up before accept");
            continue;
        }

        info!(guest = %offer.guest_id, "Accepted relay guest");
        outbound.set(host_tx);
        if events.send(LinkEvent::state(LinkState::Open, offer.guest_id)).is_err() {
            return;
        }
        break host_rx;
    };

    pump(rx, severed, Some(offers), events, outbound).await;
}

/// Forwards inbound frames until the channel ends, then reports the one
/// terminal state.
async fn pump(
    mut rx: FrameRx,
    mut severed: watch::Receiver<bool>,
    mut extra_offers: Option<mpsc::UnboundedReceiver<Offer>>,
    events: LinkEvents,
    outbound: Outbound,
) {
    let mut watching = true;
    let (state, detail) = loop {
        tokio::select! {
            biased;
            changed = severed.changed(), if watching => {
                if *severed.borrow() {
                    break (LinkState::Error, "relay connection lost");
                }
                if changed.is_err() {
                    watching = false;
                }
            }
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if events.send(LinkEvent::Frame(frame)).is_err() {
                        return;
                    }
                }
                // A sever also ends the other half; report it as such.
                None if *severed.borrow() => break (LinkState::Error, "relay connection lost"),
                None => break (LinkState::Closed, "peer closed the channel"),
            },
            offer = recv_offer(&mut extra_offers) => match offer {
                Some(offer) => {
                    warn!(guest = %offer.guest_id, "Rejecting guest, already connected");
                    drop(offer);
                }
                None => extra_offers = None,
            },
        }
    };

    outbound.clear();
    debug!(%state, detail, "Relay channel ended");
    let _ = events.send(LinkEvent::state(state, detail));
}

async fn recv_offer(offers: &mut Option<mpsc::UnboundedReceiver<Offer>>) -> Option<Offer> {
    match offers {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (LinkEvents, mpsc::UnboundedReceiver<LinkEvent>) {
        mpsc::unbounded_channel()
    }

    async fn connected_pair(
        relay: &Relay,
    ) -> (
        RelayLink,
        mpsc::UnboundedReceiver<LinkEvent>,
        RelayLink,
        mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let mut host = relay.link();
        let (host_tx, mut host_rx) = channel();
        let endpoint = host.listen(host_tx).await.unwrap();
        assert_eq!(endpoint.channel_state, ChannelState::Connecting);

        let mut guest = relay.link();
        let (guest_tx, guest_rx) = channel();
        let endpoint = guest.dial(&endpoint.peer_id, guest_tx).await.unwrap();
        assert_eq!(endpoint.channel_state, ChannelState::Open);
        assert!(guest.is_open());

        match host_rx.recv().await.unwrap() {
            LinkEvent::StateChanged { state, .. } => assert_eq!(state, LinkState::Open),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(host.is_open());
        (host, host_rx, guest, guest_rx)
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let relay = Relay::new();
        let (mut host, mut host_rx, mut guest, mut guest_rx) = connected_pair(&relay).await;

        host.send(b"ping").await.unwrap();
        assert_eq!(guest_rx.recv().await, Some(LinkEvent::Frame(b"ping".to_vec())));

        guest.send(b"pong").await.unwrap();
        assert_eq!(host_rx.recv().await, Some(LinkEvent::Frame(b"pong".to_vec())));
    }

    #[tokio::test]
    async fn unknown_peer_is_unreachable() {
        let relay = Relay::new();
        let mut guest = relay.link();
        let (tx, _rx) = channel();
        assert!(matches!(
            guest.dial("quiet-otter-123", tx).await,
            Err(LinkError::PeerUnreachable { .. })
        ));
    }

    #[tokio::test]
    async fn send_before_open() {
        let relay = Relay::new();
        let mut link = relay.link();
        assert!(matches!(link.send(b"x").await, Err(LinkError::NotConnected)));

        let (tx, _rx) = channel();
        link.listen(tx).await.unwrap();
        assert!(matches!(link.send(b"x").await, Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn oversized_frame() {
        let relay = Relay::new();
        let (mut host, _hrx, _guest, _grx) = connected_pair(&relay).await;
        let big = vec![0u8; host.mtu() + 1];
        assert!(matches!(
            host.send(&big).await,
            Err(LinkError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn second_guest_is_refused() {
        let relay = Relay::new();
        let (host, _hrx, _guest, _grx) = connected_pair(&relay).await;

        let mut intruder = relay.link();
        let (tx, _rx) = channel();
        let err = intruder
            .dial(host.local_id().unwrap(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::PeerUnreachable { .. }));
    }

    #[tokio::test]
    async fn close_notifies_peer_once() {
        let relay = Relay::new();
        let (mut host, _hrx, _guest, mut guest_rx) = connected_pair(&relay).await;

        host.close().await;
        assert!(!relay.is_registered(host.local_id().unwrap()));
        assert_eq!(
            guest_rx.recv().await,
            Some(LinkEvent::state(LinkState::Closed, "peer closed the channel"))
        );
        // The pump ended, so the sender is gone and nothing else arrives.
        assert_eq!(guest_rx.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sever_breaks_both_ends() {
        let relay = Relay::new();
        // Whichever pump notices first, neither end may report a clean close.
        for _ in 0..50 {
            let (host, mut host_rx, guest, mut guest_rx) = connected_pair(&relay).await;

            assert!(relay.sever(host.local_id().unwrap()));
            for rx in [&mut host_rx, &mut guest_rx] {
                match rx.recv().await.unwrap() {
                    LinkEvent::StateChanged { state, .. } => assert_eq!(state, LinkState::Error),
                    other => panic!("unexpected event {other:?}"),
                }
            }
            assert!(!host.is_open());
            assert!(!guest.is_open());
        }
    }

    #[tokio::test]
    async fn relisten_keeps_id() {
        let relay = Relay::new();
        let mut host = relay.link();
        let (tx, _rx) = channel();
        let first = host.listen(tx).await.unwrap().peer_id;
        let (tx, _rx2) = channel();
        let second = host.listen(tx).await.unwrap().peer_id;
        assert_eq!(first, second);
        assert!(relay.is_registered(&first));
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let relay = Relay::new();
        let mut host = relay.link();
        let (tx, _rx) = channel();
        let id = host.listen(tx).await.unwrap().peer_id;

        let mut other = relay.link();
        other.local_id = Some(id);
        let (tx, _rx2) = channel();
        assert!(matches!(other.listen(tx).await, Err(LinkError::Signaling(_))));
    }

    #[tokio::test]
    async fn open_dispatches_by_role() {
        let relay = Relay::new();
        let mut link = relay.link();
        let (tx, _rx) = channel();
        assert!(matches!(
            link.open(Role::Guest, None, tx).await,
            Err(LinkError::InvalidTarget(_))
        ));
        let (tx, _rx) = channel();
        let endpoint = link.open(Role::Host, None, tx).await.unwrap();
        assert_eq!(endpoint.role, Role::Host);
    }
}
