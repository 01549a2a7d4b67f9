//! Message types, wire codec, framing and reassembly for the commu peer link.
//!
//! # Wire format
//!
//! Every application [`Message`] is encoded as a UTF-8 JSON object:
//!
//! ```text
//! {"type":"question","data":{"text":"hi"},"timestamp":"2025-01-01T10:00:00Z"}
//! ```
//!
//! The encoded bytes are then cut into transport-sized [`Frame`]s. Each frame
//! starts with a header:
//!
//! ```text
//! +-----------+-----------+--------------------------+-----------+
//! | index (1) | total (1) | message id (4 BE, total>1) |  payload  |
//! +-----------+-----------+--------------------------+-----------+
//! ```
//!
//! A message that fits in one frame carries only the 2-byte header and never
//! touches the [`Reassembler`].
//!
//! # Example
//!
//! ```rust
//! use std::time::Instant;
//! use commu_protocol::{Framer, Message, Reassembler};
//!
//! let mut framer = Framer::new(64).unwrap();
//! let message = Message::question("Do you like tea?");
//! let frames = framer.encode(&message).unwrap();
//!
//! let mut reassembler = Reassembler::new();
//! let mut decoded = None;
//! for frame in frames {
//!     decoded = framer.decode(&frame.to_bytes(), &mut reassembler, Instant::now()).unwrap();
//! }
//! assert_eq!(decoded, Some(message));
//! ```

mod error;
mod framing;
mod reassembly;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{Frame, Framer, MAX_FRAMES, MULTI_FRAME_HEADER_LEN, SINGLE_FRAME_HEADER_LEN};
pub use reassembly::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_REASSEMBLY_TIMEOUT, Reassembler};
pub use types::{
    Answer, AnswerKind, ConnectionEstablished, Disconnect, Message, MessageKind, Participant,
    ParticipantRole, Payload, Question, RoomCreated, RoomFull, RoomJoined, TextMessage,
};
