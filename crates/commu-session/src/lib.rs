//! Session controller for commu peer links.
//!
//! A [`Session`] drives one [`Link`](commu_link::Link) through its
//! lifecycle:
//!
//! ```text
//! Idle -> Connecting -> Open -> Disconnected -> Connecting -> ... -> Failed
//!                         \-- disconnect() / peer goodbye --> Idle
//! ```
//!
//! After an unexpected drop the session retries up to
//! [`SessionConfig::max_reconnect_attempts`] times, waiting
//! `reconnect_base_delay * attempt` before each try. Hosts re-listen under
//! the same identifier, guests re-dial it.
//!
//! ```rust,no_run
//! use commu_link::Relay;
//! use commu_protocol::{Message, MessageKind};
//! use commu_session::{Dispatcher, Session, SessionConfig};
//!
//! # async fn demo() -> Result<(), commu_session::SessionError> {
//! let relay = Relay::new();
//! let dispatcher = Dispatcher::new().on(MessageKind::Answer, |msg| println!("{msg:?}"));
//! let (host, _task) = Session::new(SessionConfig::default(), relay.link(), dispatcher)?.spawn();
//!
//! let id = host.create_host().await?;
//! println!("share this id with the guest: {id}");
//! host.send_message(Message::question("Ready?")).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod dispatch;
mod error;
mod reconnect;
mod session;

pub use config::SessionConfig;
pub use dispatch::Dispatcher;
pub use error::{SessionError, SessionResult};
pub use reconnect::{ReconnectDecision, ReconnectState};
pub use session::{Session, SessionHandle, SessionState, SessionStatus, SharedSessionStatus};
