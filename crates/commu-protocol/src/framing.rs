//! Splitting encoded messages into transport-sized frames.
//!
//! ```text
//! single:  | index (1) | total=1 (1) | payload ...                  |
//! multi:   | index (1) | total (1)   | message id (4 BE) | chunk ... |
//! ```

use std::time::Instant;

use crate::error::{ProtocolError, ProtocolResult};
use crate::reassembly::Reassembler;
use crate::types::Message;

/// Header length of a frame carrying a whole message.
pub const SINGLE_FRAME_HEADER_LEN: usize = 2;

/// Header length of a frame carrying one chunk of a larger message.
pub const MULTI_FRAME_HEADER_LEN: usize = 6;

/// Maximum number of frames per message, bounded by the 1-byte counters.
pub const MAX_FRAMES: usize = u8::MAX as usize;

/// One unit handed to a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence_index: u8,
    pub total_count: u8,
    /// Present only when `total_count > 1`.
    pub message_id: Option<u32>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A frame carrying a complete message.
    pub fn single(payload: Vec<u8>) -> Self {
        Self {
            sequence_index: 0,
            total_count: 1,
            message_id: None,
            payload,
        }
    }

    pub fn is_single(&self) -> bool {
        self.total_count == 1
    }

    /// Serializes header and payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(MULTI_FRAME_HEADER_LEN + self.payload.len());
        buffer.push(self.sequence_index);
        buffer.push(self.total_count);
        if let Some(id) = self.message_id {
            buffer.extend_from_slice(&id.to_be_bytes());
        }
        buffer.extend_from_slice(&self.payload);
        buffer
    }

    /// Parses and validates a received frame.
    pub fn parse(bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.len() < SINGLE_FRAME_HEADER_LEN {
            return Err(ProtocolError::FrameTooShort {
                len: bytes.len(),
                needed: SINGLE_FRAME_HEADER_LEN,
            });
        }

        let (index, total) = (bytes[0], bytes[1]);
        if total == 0 || index >= total {
            return Err(ProtocolError::InvalidHeader { index, total });
        }

        if total == 1 {
            return Ok(Self::single(bytes[SINGLE_FRAME_HEADER_LEN..].to_vec()));
        }

        let Some(id_bytes) = bytes.get(SINGLE_FRAME_HEADER_LEN..MULTI_FRAME_HEADER_LEN) else {
            return Err(ProtocolError::FrameTooShort {
                len: bytes.len(),
                needed: MULTI_FRAME_HEADER_LEN,
            });
        };
        let mut id = [0u8; 4];
        id.copy_from_slice(id_bytes);

        Ok(Self {
            sequence_index: index,
            total_count: total,
            message_id: Some(u32::from_be_bytes(id)),
            payload: bytes[MULTI_FRAME_HEADER_LEN..].to_vec(),
        })
    }
}

/// Encodes messages into frames for one link and decodes frames back.
///
/// A framer is bound to the MTU of the link it feeds. Message identifiers
/// start at a random value so that a restarted peer does not collide with
/// buffers still held by the other side.
#[derive(Debug)]
pub struct Framer {
    mtu: usize,
    next_message_id: u32,
}

impl Framer {
    /// Creates a framer for a link that accepts frames of at most `mtu` bytes.
    pub fn new(mtu: usize) -> ProtocolResult<Self> {
        let min = MULTI_FRAME_HEADER_LEN + 1;
        if mtu < min {
            return Err(ProtocolError::MtuTooSmall { mtu, min });
        }
        Ok(Self {
            mtu,
            next_message_id: rand::random(),
        })
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Bytes of message payload carried by each frame of a split message.
    pub fn payload_capacity(&self) -> usize {
        self.mtu - MULTI_FRAME_HEADER_LEN
    }

    /// Encodes a message and splits it into frames.
    pub fn encode(&mut self, message: &Message) -> ProtocolResult<Vec<Frame>> {
        let bytes = message.to_json()?;
        self.split(&bytes)
    }

    /// Splits already-encoded bytes into frames.
    ///
    /// Fails with [`ProtocolError::TooManyFrames`] before producing anything
    /// when the input would need more than [`MAX_FRAMES`] frames.
    pub fn split(&mut self, bytes: &[u8]) -> ProtocolResult<Vec<Frame>> {
        if bytes.len() <= self.mtu - SINGLE_FRAME_HEADER_LEN {
            return Ok(vec![Frame::single(bytes.to_vec())]);
        }

        let capacity = self.payload_capacity();
        let needed = bytes.len().div_ceil(capacity);
        if needed > MAX_FRAMES {
            return Err(ProtocolError::TooManyFrames {
                needed,
                max: MAX_FRAMES,
            });
        }

        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        // needed <= 255 so these casts are lossless
        let total = needed as u8;
        Ok(bytes
            .chunks(capacity)
            .enumerate()
            .map(|(index, chunk)| Frame {
                sequence_index: index as u8,
                total_count: total,
                message_id: Some(id),
                payload: chunk.to_vec(),
            })
            .collect())
    }

    /// Decodes one received frame.
    ///
    /// Returns `Ok(None)` while a split message is still incomplete.
    pub fn decode(
        &self,
        bytes: &[u8],
        reassembler: &mut Reassembler,
        now: Instant,
    ) -> ProtocolResult<Option<Message>> {
        let frame = Frame::parse(bytes)?;
        match reassembler.accept(frame, now)? {
            Some(complete) => Message::from_json(&complete).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Payload, TextMessage};

    fn message_of_len(len: usize) -> Message {
        let at = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let text = |s: String| Message::with_timestamp(Payload::Text(TextMessage { text: s }), at);
        let base = text(String::new()).to_json().unwrap().len();
        let msg = text("a".repeat(len - base));
        assert_eq!(msg.to_json().unwrap().len(), len);
        msg
    }

    #[test]
    fn small_message_is_one_frame() {
        let mut framer = Framer::new(512).unwrap();
        let msg = Message::question("Coffee?");
        let frames = framer.encode(&msg).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_single());
        assert_eq!(frames[0].to_bytes()[..2], [0, 1]);

        let mut reassembler = Reassembler::new();
        let decoded = framer
            .decode(&frames[0].to_bytes(), &mut reassembler, Instant::now())
            .unwrap();
        assert_eq!(decoded, Some(msg));
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn exact_single_frame_boundary() {
        let mut framer = Framer::new(64).unwrap();
        assert_eq!(framer.split(&[7u8; 62]).unwrap().len(), 1);
        assert_eq!(framer.split(&[7u8; 63]).unwrap().len(), 2);
    }

    #[test]
    fn five_hundred_bytes_over_twenty_byte_chunks() {
        let mut framer = Framer::new(20 + MULTI_FRAME_HEADER_LEN).unwrap();
        assert_eq!(framer.payload_capacity(), 20);

        let msg = message_of_len(500);
        let frames = framer.encode(&msg).unwrap();
        assert_eq!(frames.len(), 25);

        let id = frames[0].message_id.unwrap();
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.sequence_index as usize, i);
            assert_eq!(frame.total_count, 25);
            assert_eq!(frame.message_id, Some(id));
            assert!(frame.to_bytes().len() <= framer.mtu());
        }

        // Reverse order, with one duplicate thrown in.
        let mut reassembler = Reassembler::new();
        let now = Instant::now();
        let mut out = Vec::new();
        let dup = frames[10].to_bytes();
        assert!(framer.decode(&dup, &mut reassembler, now).unwrap().is_none());
        for frame in frames.iter().rev() {
            if let Some(m) = framer.decode(&frame.to_bytes(), &mut reassembler, now).unwrap() {
                out.push(m);
            }
        }
        assert_eq!(out, vec![msg]);
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn sizes_up_to_the_frame_cap() {
        let mut framer = Framer::new(16).unwrap();
        let capacity = framer.payload_capacity();
        let largest = capacity * MAX_FRAMES;
        let mut reassembler = Reassembler::new();
        let now = Instant::now();

        let sizes = (100..largest).step_by(97).chain([largest]);
        for (round, len) in sizes.enumerate() {
            let msg = message_of_len(len);
            let mut frames = framer.encode(&msg).unwrap();
            assert_eq!(frames.len(), len.div_ceil(capacity));
            if round % 2 == 1 {
                frames.reverse();
            }

            let mut decoded = None;
            for frame in &frames {
                if let Some(m) = framer.decode(&frame.to_bytes(), &mut reassembler, now).unwrap() {
                    assert!(decoded.is_none(), "completed twice at {len} bytes");
                    decoded = Some(m);
                }
            }
            assert_eq!(decoded.as_ref(), Some(&msg), "round trip at {len} bytes");
            assert_eq!(reassembler.in_flight(), 0);
        }

        assert!(matches!(
            framer.encode(&message_of_len(largest + 1)),
            Err(ProtocolError::TooManyFrames { needed: 256, .. })
        ));
    }

    #[test]
    fn ids_advance_per_split_message() {
        let mut framer = Framer::new(16).unwrap();
        let a = framer.split(&[1u8; 40]).unwrap();
        let b = framer.split(&[1u8; 40]).unwrap();
        let ida = a[0].message_id.unwrap();
        assert_eq!(b[0].message_id, Some(ida.wrapping_add(1)));

        // Single frames do not consume an id.
        framer.split(&[1u8; 3]).unwrap();
        let c = framer.split(&[1u8; 40]).unwrap();
        assert_eq!(c[0].message_id, Some(ida.wrapping_add(2)));
    }

    #[test]
    fn too_many_frames() {
        let mut framer = Framer::new(7).unwrap();
        assert_eq!(framer.split(&vec![0u8; 255]).unwrap().len(), 255);
        let err = framer.split(&vec![0u8; 256]).unwrap_err();
        assert!(matches!(err, ProtocolError::TooManyFrames { needed: 256, max: 255 }));
    }

    #[test]
    fn mtu_too_small() {
        assert!(matches!(
            Framer::new(6),
            Err(ProtocolError::MtuTooSmall { mtu: 6, min: 7 })
        ));
    }

    #[test]
    fn parse_rejects_bad_headers() {
        assert!(matches!(
            Frame::parse(&[0]),
            Err(ProtocolError::FrameTooShort { len: 1, .. })
        ));
        assert!(matches!(
            Frame::parse(&[0, 0, b'{']),
            Err(ProtocolError::InvalidHeader { index: 0, total: 0 })
        ));
        assert!(matches!(
            Frame::parse(&[3, 3, 0, 0, 0, 1]),
            Err(ProtocolError::InvalidHeader { index: 3, total: 3 })
        ));
        assert!(matches!(
            Frame::parse(&[0, 2, 0, 0]),
            Err(ProtocolError::FrameTooShort { needed: 6, .. })
        ));
    }

    #[test]
    fn decode_malformed_single_frame() {
        let framer = Framer::new(64).unwrap();
        let mut reassembler = Reassembler::new();
        let err = framer
            .decode(&[0, 1, b'{', b'x'], &mut reassembler, Instant::now())
            .unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn decode_malformed_split_message_leaves_no_buffer() {
        let mut framer = Framer::new(8).unwrap();
        let frames = framer.split(b"this is not json at all").unwrap();
        let mut reassembler = Reassembler::new();
        let now = Instant::now();
        let mut result = Ok(None);
        for frame in &frames {
            result = framer.decode(&frame.to_bytes(), &mut reassembler, now);
        }
        assert!(result.unwrap_err().is_decode_error());
        assert_eq!(reassembler.in_flight(), 0);
    }
}
