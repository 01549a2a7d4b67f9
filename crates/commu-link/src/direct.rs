//! Direct TCP transport.
//!
//! The host binds a listener, then publishes an offer and its candidate
//! addresses in the signaling store under a 6-character connection code.
//! The guest reads them, leaves an answer naming itself, connects and
//! performs a version handshake; the host only accepts a guest whose answer
//! it finds. After that every frame travels with a length prefix:
//!
//! ```text
//! +----------------+------------------+
//! | length (4 BE)  |  frame bytes     |
//! +----------------+------------------+
//! ```

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use commu_core::{generate_connection_code, generate_peer_id, normalize_connection_code};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{LinkError, LinkResult};
use crate::link::{
    ChannelState, Link, LinkEvent, LinkEvents, LinkState, PeerEndpoint, Role, TransportKind,
    check_frame_size,
};
use crate::signaling::{SIGNAL_TTL, SignalKind, SignalingStore};

/// Version exchanged in the handshake.
pub const DIRECT_PROTOCOL_VERSION: u32 = 1;

/// Handshake messages are small; anything bigger is not a peer.
const MAX_HANDSHAKE_SIZE: usize = 4 * 1024;

/// Direct link configuration.
#[derive(Debug, Clone)]
pub struct DirectConfig {
    /// Address the host listens on. Port 0 picks a free port.
    pub bind_addr: SocketAddr,
    /// Address advertised to guests. Defaults to loopback when binding to
    /// an unspecified address.
    pub advertise_ip: Option<IpAddr>,
    /// Largest frame accepted by `send`.
    pub mtu: usize,
    /// Bound on establishing the TCP connection and handshake.
    pub connect_timeout: Duration,
    /// Bound on binding and publishing the offer.
    pub advertise_timeout: Duration,
    /// Lifetime of published signaling entries.
    pub signal_ttl: Duration,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            advertise_ip: None,
            mtu: 64 * 1024,
            connect_timeout: Duration::from_secs(15),
            advertise_timeout: Duration::from_secs(10),
            signal_ttl: SIGNAL_TTL,
        }
    }
}

impl DirectConfig {
    /// Builder: set bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Builder: set advertised address.
    pub fn with_advertise_ip(mut self, ip: IpAddr) -> Self {
        self.advertise_ip = Some(ip);
        self
    }

    /// Builder: set MTU.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Builder: set connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: set advertise timeout.
    pub fn with_advertise_timeout(mut self, timeout: Duration) -> Self {
        self.advertise_timeout = timeout;
        self
    }

    fn candidate_for(&self, local: SocketAddr) -> SocketAddr {
        let ip = match self.advertise_ip {
            Some(ip) => ip,
            None if local.ip().is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            None => local.ip(),
        };
        SocketAddr::new(ip, local.port())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OfferRecord {
    version: u32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnswerRecord {
    guest_id: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    version: u32,
    code: String,
    guest_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloAck {
    accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

type Writer = Arc<Mutex<Option<OwnedWriteHalf>>>;

/// Link over a TCP stream.
pub struct DirectLink {
    config: DirectConfig,
    store: Arc<dyn SignalingStore>,
    local_id: Option<String>,
    advertised: bool,
    writer: Writer,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DirectLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectLink")
            .field("local_id", &self.local_id)
            .field("advertised", &self.advertised)
            .finish_non_exhaustive()
    }
}

impl DirectLink {
    pub fn new(config: DirectConfig, store: Arc<dyn SignalingStore>) -> Self {
        Self {
            config,
            store,
            local_id: None,
            advertised: false,
            writer: Arc::new(Mutex::new(None)),
            task: None,
        }
    }

    async fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if self.advertised {
            self.advertised = false;
            if let Some(code) = self.local_id.as_deref()
                && let Err(e) = self.store.clear(code)
            {
                debug!(code, error = %e, "Failed to clear signaling entries");
            }
        }
    }

    fn publish(&self, code: &str, candidate: SocketAddr) -> LinkResult<()> {
        let ttl = self.config.signal_ttl;
        let offer = OfferRecord {
            version: DIRECT_PROTOCOL_VERSION,
            created_at: Utc::now(),
        };
        self.store.put(
            &SignalKind::Offer.key(code),
            &serde_json::to_string(&offer)?,
            ttl,
        )?;
        self.store.put(
            &SignalKind::Ice.key(code),
            &serde_json::to_string(&vec![candidate.to_string()])?,
            ttl,
        )?;
        Ok(())
    }

    fn resolve(&self, code: &str) -> LinkResult<Vec<SocketAddr>> {
        let offer = self
            .store
            .get(&SignalKind::Offer.key(code))?
            .ok_or_else(|| LinkError::unreachable(code, "no offer published for this code"))?;
        let offer: OfferRecord = serde_json::from_str(&offer)?;
        if offer.version != DIRECT_PROTOCOL_VERSION {
            return Err(LinkError::unreachable(
                code,
                format!("host speaks protocol version {}", offer.version),
            ));
        }

        let candidates = self
            .store
            .get(&SignalKind::Ice.key(code))?
            .ok_or_else(|| LinkError::unreachable(code, "host published no addresses"))?;
        let candidates: Vec<String> = serde_json::from_str(&candidates)?;
        let addrs: Vec<SocketAddr> = candidates.iter().filter_map(|c| c.parse().ok()).collect();
        if addrs.is_empty() {
            return Err(LinkError::unreachable(code, "no usable address"));
        }
        Ok(addrs)
    }

    async fn connect_any(&self, code: &str, addrs: &[SocketAddr]) -> LinkResult<TcpStream> {
        let mut last_error = None;
        for addr in addrs {
            debug!(%addr, "Trying candidate");
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%addr, error = %e, "Candidate failed");
                    last_error = Some(e);
                }
            }
        }
        let reason = last_error.map_or_else(|| "no candidates".to_string(), |e| e.to_string());
        Err(LinkError::unreachable(code, reason))
    }
}

impl Drop for DirectLink {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.advertised
            && let Some(code) = self.local_id.as_deref()
        {
            let _ = self.store.clear(code);
        }
    }
}

impl Link for DirectLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    fn mtu(&self) -> usize {
        self.config.mtu
    }

    fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    fn is_open(&self) -> bool {
        // Contended only while a send holds the writer.
        self.writer.try_lock().map_or(true, |w| w.is_some())
    }

    async fn listen(&mut self, events: LinkEvents) -> LinkResult<PeerEndpoint> {
        self.teardown().await;
        let code = self
            .local_id
            .get_or_insert_with(generate_connection_code)
            .clone();

        let advertise = async {
            let listener = TcpListener::bind(self.config.bind_addr).await?;
            let candidate = self.config.candidate_for(listener.local_addr()?);
            self.publish(&code, candidate)?;
            Ok::<_, LinkError>((listener, candidate))
        };
        let (listener, candidate) =
            tokio::time::timeout(self.config.advertise_timeout, advertise)
                .await
                .map_err(|_| LinkError::timeout("advertise", self.config.advertise_timeout))??;
        self.advertised = true;
        info!(%code, %candidate, "Advertising direct link");

        self.task = Some(tokio::spawn(serve_host(
            listener,
            code.clone(),
            self.config.clone(),
            self.store.clone(),
            self.writer.clone(),
            events,
        )));

        Ok(PeerEndpoint {
            peer_id: code,
            role: Role::Host,
            channel_state: ChannelState::Connecting,
        })
    }

    async fn dial(&mut self, remote_id: &str, events: LinkEvents) -> LinkResult<PeerEndpoint> {
        self.teardown().await;
        let code = normalize_connection_code(remote_id).ok_or_else(|| {
            LinkError::InvalidTarget(format!("{remote_id:?} is not a connection code"))
        })?;
        let guest_id = self.local_id.get_or_insert_with(generate_peer_id).clone();

        let addrs = self.resolve(&code)?;
        let answer = AnswerRecord {
            guest_id: guest_id.clone(),
            created_at: Utc::now(),
        };
        self.store.put(
            &SignalKind::Answer.key(&code),
            &serde_json::to_string(&answer)?,
            self.config.signal_ttl,
        )?;

        let timeout = self.config.connect_timeout;
        let connect = async {
            let mut stream = self.connect_any(&code, &addrs).await?;
            let hello = Hello {
                version: DIRECT_PROTOCOL_VERSION,
                code: code.clone(),
                guest_id,
            };
            write_frame(&mut stream, &serde_json::to_vec(&hello)?).await?;
            let ack: HelloAck = read_json(&mut stream).await?;
            if !ack.accepted {
                return Err(LinkError::unreachable(
                    &code,
                    ack.reason.unwrap_or_else(|| "handshake rejected".to_string()),
                ));
            }
            Ok(stream)
        };
        let stream = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| LinkError::timeout("direct connect", timeout))??;

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);
        self.task = Some(tokio::spawn(read_frames(
            reader,
            self.config.mtu,
            self.writer.clone(),
            events,
        )));
        info!(%code, "Connected over direct link");

        Ok(PeerEndpoint {
            peer_id: code,
            role: Role::Guest,
            channel_state: ChannelState::Open,
        })
    }

    async fn send(&mut self, frame: &[u8]) -> LinkResult<()> {
        check_frame_size(frame, self.config.mtu)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(LinkError::NotConnected)?;
        if let Err(e) = write_frame(writer, frame).await {
            guard.take();
            return Err(LinkError::TransportClosed(e.to_string()));
        }
        Ok(())
    }

    async fn close(&mut self) {
        debug!(code = ?self.local_id, "Closing direct link");
        self.teardown().await;
    }
}

async fn serve_host(
    listener: TcpListener,
    code: String,
    config: DirectConfig,
    store: Arc<dyn SignalingStore>,
    writer: Writer,
    events: LinkEvents,
) {
    let stream = loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                let _ = events.send(LinkEvent::state(LinkState::Error, e.to_string()));
                return;
            }
        };

        match tokio::time::timeout(config.connect_timeout, accept_hello(&mut stream, &code, store.as_ref())).await
        {
            Ok(Ok(guest_id)) => {
                info!(%addr, %guest_id, "Accepted direct guest");
                break stream;
            }
            Ok(Err(e)) => warn!(%addr, error = %e, "Rejected connection"),
            Err(_) => warn!(%addr, "Handshake timed out"),
        }
    };
    // One guest per host: stop accepting.
    drop(listener);

    let (reader, write_half) = stream.into_split();
    *writer.lock().await = Some(write_half);
    if events
        .send(LinkEvent::state(LinkState::Open, "guest connected"))
        .is_err()
    {
        return;
    }

    read_frames(reader, config.mtu, writer, events).await;
}

async fn accept_hello(
    stream: &mut TcpStream,
    code: &str,
    store: &dyn SignalingStore,
) -> LinkResult<String> {
    let hello: Hello = read_json(stream).await?;
    let rejection = if hello.version != DIRECT_PROTOCOL_VERSION {
        Some(format!("unsupported protocol version {}", hello.version))
    } else if hello.code != code {
        Some("wrong connection code".to_string())
    } else if !answered_by(store, code, &hello.guest_id) {
        Some("no signaling answer from this guest".to_string())
    } else {
        None
    };

    let ack = HelloAck {
        accepted: rejection.is_none(),
        reason: rejection.clone(),
    };
    write_frame(stream, &serde_json::to_vec(&ack)?).await?;
    match rejection {
        Some(reason) => Err(LinkError::unreachable(hello.guest_id, reason)),
        None => Ok(hello.guest_id),
    }
}

/// Whether the answer left under `code` names `guest_id`.
fn answered_by(store: &dyn SignalingStore, code: &str, guest_id: &str) -> bool {
    let answer = match store.get(&SignalKind::Answer.key(code)) {
        Ok(Some(answer)) => answer,
        Ok(None) => return false,
        Err(e) => {
            debug!(code, error = %e, "Could not read answer");
            return false;
        }
    };
    match serde_json::from_str::<AnswerRecord>(&answer) {
        Ok(record) => record.guest_id == guest_id,
        Err(e) => {
            debug!(code, error = %e, "Ignoring malformed answer");
            false
        }
    }
}

async fn read_frames(mut reader: OwnedReadHalf, mtu: usize, writer: Writer, events: LinkEvents) {
    let (state, detail) = loop {
        match read_frame(&mut reader, mtu).await {
            Ok(Some(frame)) => {
                if events.send(LinkEvent::Frame(frame)).is_err() {
                    return;
                }
            }
            Ok(None) => break (LinkState::Closed, "peer closed the connection".to_string()),
            Err(e) => break (LinkState::Error, e.to_string()),
        }
    };

    writer.lock().await.take();
    debug!(%state, %detail, "Direct channel ended");
    let _ = events.send(LinkEvent::state(state, detail));
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    let len = u32::try_from(frame.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    let mut buffer = Vec::with_capacity(4 + frame.len());
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(frame);
    writer.write_all(&buffer).await?;
    writer.flush().await
}

/// Reads one length-prefixed frame. `Ok(None)` on clean EOF.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max: usize) -> LinkResult<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max {
        return Err(LinkError::FrameTooLarge { size: len, max });
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

async fn read_json<T: DeserializeOwned, R: AsyncRead + Unpin>(reader: &mut R) -> LinkResult<T> {
    let bytes = read_frame(reader, MAX_HANDSHAKE_SIZE)
        .await?
        .ok_or_else(|| LinkError::TransportClosed("closed during handshake".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| LinkError::TransportClosed(format!("bad handshake: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::MemoryStore;
    use commu_core::is_connection_code;
    use tokio::sync::mpsc;

    fn loopback_config() -> DirectConfig {
        DirectConfig::default()
            .with_bind_addr("127.0.0.1:0".parse().unwrap())
            .with_connect_timeout(Duration::from_secs(5))
    }

    fn pair() -> (DirectLink, DirectLink, Arc<dyn SignalingStore>) {
        let store: Arc<dyn SignalingStore> = Arc::new(MemoryStore::new());
        (
            DirectLink::new(loopback_config(), store.clone()),
            DirectLink::new(loopback_config(), store.clone()),
            store,
        )
    }

    async fn expect_state(rx: &mut mpsc::UnboundedReceiver<LinkEvent>, expected: LinkState) {
        match rx.recv().await {
            Some(LinkEvent::StateChanged { state, .. }) => assert_eq!(state, expected),
            other => panic!("expected {expected}, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn host_and_guest_exchange_frames() {
        let (mut host, mut guest, store) = pair();
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let endpoint = host.listen(host_tx).await.unwrap();
        assert!(is_connection_code(&endpoint.peer_id));
        assert!(store.get(&SignalKind::Offer.key(&endpoint.peer_id)).unwrap().is_some());

        let (guest_tx, mut guest_rx) = mpsc::unbounded_channel();
        let code = endpoint.peer_id.to_lowercase();
        let guest_end = guest.dial(&code, guest_tx).await.unwrap();
        assert_eq!(guest_end.channel_state, ChannelState::Open);
        assert!(store.get(&SignalKind::Answer.key(&endpoint.peer_id)).unwrap().is_some());

        expect_state(&mut host_rx, LinkState::Open).await;

        guest.send(b"hello host").await.unwrap();
        assert_eq!(host_rx.recv().await, Some(LinkEvent::Frame(b"hello host".to_vec())));
        host.send(b"hello guest").await.unwrap();
        assert_eq!(guest_rx.recv().await, Some(LinkEvent::Frame(b"hello guest".to_vec())));

        host.close().await;
        expect_state(&mut guest_rx, LinkState::Closed).await;
        assert!(store.get(&SignalKind::Offer.key(&endpoint.peer_id)).unwrap().is_none());
        assert!(matches!(guest.send(b"late").await, Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn guest_without_answer_is_refused() {
        let (mut host, mut guest, store) = pair();
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let code = host.listen(host_tx).await.unwrap().peer_id;
        let addrs = host.resolve(&code).unwrap();

        // Knows the address but skipped the rendezvous.
        let mut stream = TcpStream::connect(addrs[0]).await.unwrap();
        let hello = Hello {
            version: DIRECT_PROTOCOL_VERSION,
            code: code.clone(),
            guest_id: "sly-fox-001".to_string(),
        };
        write_frame(&mut stream, &serde_json::to_vec(&hello).unwrap())
            .await
            .unwrap();
        let ack: HelloAck = read_json(&mut stream).await.unwrap();
        assert!(!ack.accepted);
        assert_eq!(ack.reason.as_deref(), Some("no signaling answer from this guest"));
        assert!(store.get(&SignalKind::Answer.key(&code)).unwrap().is_none());

        // The host keeps listening for a guest that did answer.
        let (guest_tx, _guest_rx) = mpsc::unbounded_channel();
        guest.dial(&code, guest_tx).await.unwrap();
        expect_state(&mut host_rx, LinkState::Open).await;
    }

    #[tokio::test]
    async fn unknown_code_is_unreachable() {
        let (_, mut guest, _) = pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            guest.dial("ZZZZZZ", tx).await,
            Err(LinkError::PeerUnreachable { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_code_is_invalid_target() {
        let (_, mut guest, _) = pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            guest.dial("not a code", tx).await,
            Err(LinkError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn send_while_listening_is_not_connected() {
        let (mut host, _, _) = pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        host.listen(tx).await.unwrap();
        assert!(matches!(host.send(b"x").await, Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn relisten_reuses_code() {
        let (mut host, _, _) = pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = host.listen(tx).await.unwrap().peer_id;
        let (tx, _rx2) = mpsc::unbounded_channel();
        let second = host.listen(tx).await.unwrap().peer_id;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn frame_length_prefix() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"abc").await.unwrap();
        assert_eq!(buffer, [0, 0, 0, 3, b'a', b'b', b'c']);

        let mut reader = &buffer[..];
        assert_eq!(read_frame(&mut reader, 16).await.unwrap(), Some(b"abc".to_vec()));
        assert_eq!(read_frame(&mut reader, 16).await.unwrap(), None);

        let mut reader = &buffer[..];
        assert!(matches!(
            read_frame(&mut reader, 2).await,
            Err(LinkError::FrameTooLarge { size: 3, max: 2 })
        ));
    }

    #[test]
    fn candidate_address() {
        let config = DirectConfig::default();
        let local: SocketAddr = "0.0.0.0:4242".parse().unwrap();
        assert_eq!(config.candidate_for(local), "127.0.0.1:4242".parse().unwrap());

        let config = config.with_advertise_ip("192.168.1.20".parse().unwrap());
        assert_eq!(config.candidate_for(local), "192.168.1.20:4242".parse().unwrap());
    }
}
