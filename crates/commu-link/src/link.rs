//! The link capability shared by every transport.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{LinkError, LinkResult};

/// Which side of the link this peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Advertises an identifier and accepts one guest.
    Host,
    /// Dials a host's identifier.
    Guest,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Guest => f.write_str("guest"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// The remote side as seen from this peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    /// Identifier the link is reachable under. For a host this is its own
    /// advertised id, for a guest the id it dialed.
    pub peer_id: String,
    pub role: Role,
    pub channel_state: ChannelState,
}

/// State reported by a link after it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Open,
    Closed,
    Error,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Notification pushed by a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One inbound frame, exactly as the peer sent it.
    Frame(Vec<u8>),
    /// The channel changed state. `Closed` and `Error` are terminal and
    /// reported at most once per open.
    StateChanged {
        state: LinkState,
        detail: Option<String>,
    },
}

impl LinkEvent {
    pub fn state(state: LinkState, detail: impl Into<String>) -> Self {
        Self::StateChanged {
            state,
            detail: Some(detail.into()),
        }
    }
}

/// Sink for link events, supplied on every open.
pub type LinkEvents = mpsc::UnboundedSender<LinkEvent>;

/// Transport family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Short-range radio with a tiny MTU. Not available in this build.
    Radio,
    /// TCP with store-mediated rendezvous.
    #[default]
    Direct,
    /// In-process broker.
    Relay,
}

impl TransportKind {
    /// Fails with [`LinkError::Unsupported`] for transports this build
    /// cannot drive.
    pub fn ensure_available(self) -> LinkResult<()> {
        match self {
            Self::Radio => Err(LinkError::Unsupported(
                "short-range radio is not available on this platform".to_string(),
            )),
            Self::Direct | Self::Relay => Ok(()),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radio => f.write_str("radio"),
            Self::Direct => f.write_str("direct"),
            Self::Relay => f.write_str("relay"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "radio" | "ble" => Ok(Self::Radio),
            "direct" | "tcp" => Ok(Self::Direct),
            "relay" => Ok(Self::Relay),
            other => Err(LinkError::Unsupported(format!("unknown transport {other:?}"))),
        }
    }
}

/// A bidirectional frame channel to one peer.
///
/// A link is owned by a single session and reused across reconnect attempts:
/// every [`listen`](Link::listen) or [`dial`](Link::dial) gets a fresh event
/// channel, and any previous connection is torn down first without emitting
/// further events.
pub trait Link: Send + 'static {
    fn kind(&self) -> TransportKind;

    /// Largest frame [`send`](Link::send) accepts.
    fn mtu(&self) -> usize;

    /// Identifier this peer is known under, once one was allocated.
    fn local_id(&self) -> Option<&str>;

    fn is_open(&self) -> bool;

    /// Advertises the local identifier and waits for one guest in the
    /// background.
    ///
    /// Returns once advertised, with the endpoint still `Connecting`.
    /// `StateChanged(Open)` follows when a guest is accepted. Listening again
    /// reuses the identifier allocated the first time.
    fn listen(&mut self, events: LinkEvents) -> impl Future<Output = LinkResult<PeerEndpoint>> + Send;

    /// Connects to a host and returns once the channel is ready both ways.
    fn dial(
        &mut self,
        remote_id: &str,
        events: LinkEvents,
    ) -> impl Future<Output = LinkResult<PeerEndpoint>> + Send;

    /// Sends one frame. Never queues: fails with [`LinkError::NotConnected`]
    /// unless the channel is open.
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = LinkResult<()>> + Send;

    /// Closes the channel and stops advertising. Emits no further events.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Opens the link for `role`.
    fn open(
        &mut self,
        role: Role,
        target: Option<&str>,
        events: LinkEvents,
    ) -> impl Future<Output = LinkResult<PeerEndpoint>> + Send {
        async move {
            match (role, target) {
                (Role::Host, _) => self.listen(events).await,
                (Role::Guest, Some(remote_id)) => self.dial(remote_id, events).await,
                (Role::Guest, None) => Err(LinkError::InvalidTarget(
                    "guest needs a remote identifier".to_string(),
                )),
            }
        }
    }
}

/// Rejects frames larger than `mtu`.
pub(crate) fn check_frame_size(frame: &[u8], mtu: usize) -> LinkResult<()> {
    if frame.len() > mtu {
        return Err(LinkError::FrameTooLarge {
            size: frame.len(),
            max: mtu,
        });
    }
    Ok(())
}
