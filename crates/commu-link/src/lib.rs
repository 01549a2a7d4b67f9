//! Peer link transports for commu.
//!
//! A [`Link`] moves opaque frames between exactly two peers. The host side
//! advertises an identifier and waits for one guest; the guest dials that
//! identifier. Inbound frames and state changes are pushed as [`LinkEvent`]s
//! on a channel handed over when the link is opened.
//!
//! Transports:
//!
//! - [`DirectLink`]: TCP stream, rendezvous through a [`SignalingStore`]
//!   under a 6-character connection code.
//! - [`RelayLink`]: in-process channel brokered by a [`Relay`], keyed by
//!   `adjective-noun-NNN` peer ids.
//!
//! [`TransportKind::Radio`] is recognised but not available in this build.

pub mod direct;
mod error;
mod link;
pub mod relay;
pub mod signaling;

pub use direct::{DirectConfig, DirectLink};
pub use error::{LinkError, LinkResult};
pub use link::{
    ChannelState, Link, LinkEvent, LinkEvents, LinkState, PeerEndpoint, Role, TransportKind,
};
pub use relay::{Relay, RelayConfig, RelayLink};
pub use signaling::{FileStore, MemoryStore, SIGNAL_TTL, SignalKind, SignalingStore};
