//! Reassembly of split messages.
//!
//! Buffers are keyed by message id. Frames may arrive in any order and
//! duplicates are ignored. Incomplete buffers are dropped after a period of
//! inactivity, and the number of concurrent buffers is capped so a peer that
//! never finishes its messages cannot grow memory without bound. Ids of
//! recently completed messages are remembered for the same period, so a late
//! duplicate frame is dropped instead of opening a buffer that never fills.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{ProtocolError, ProtocolResult};
use crate::framing::Frame;

/// Idle time after which an incomplete message is discarded.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of incomplete messages held at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

#[derive(Debug)]
struct Buffer {
    chunks: Vec<Option<Vec<u8>>>,
    received: usize,
    last_activity: Instant,
}

impl Buffer {
    fn new(total: u8, now: Instant) -> Self {
        Self {
            chunks: vec![None; total as usize],
            received: 0,
            last_activity: now,
        }
    }

    fn total(&self) -> u8 {
        // Built from a u8 total.
        self.chunks.len() as u8
    }

    fn insert(&mut self, index: u8, payload: Vec<u8>, now: Instant) {
        self.last_activity = now;
        let slot = &mut self.chunks[index as usize];
        if slot.is_none() {
            *slot = Some(payload);
            self.received += 1;
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.chunks.len()
    }

    fn assemble(self) -> Vec<u8> {
        self.chunks.into_iter().flatten().flatten().collect()
    }
}

/// Holds partially received messages until all their frames are in.
#[derive(Debug)]
pub struct Reassembler {
    buffers: HashMap<u32, Buffer>,
    completed: HashMap<u32, Instant>,
    timeout: Duration,
    max_in_flight: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_REASSEMBLY_TIMEOUT, DEFAULT_MAX_IN_FLIGHT)
    }

    pub fn with_limits(timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            completed: HashMap::new(),
            timeout,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of incomplete messages currently buffered.
    pub fn in_flight(&self) -> usize {
        self.buffers.len()
    }

    /// Feeds one frame in.
    ///
    /// Returns the complete message bytes once the last missing frame
    /// arrives. A single frame is returned immediately. A frame whose total
    /// disagrees with the buffer already open for its id discards that
    /// buffer and yields [`ProtocolError::ReassemblyConflict`].
    pub fn accept(&mut self, frame: Frame, now: Instant) -> ProtocolResult<Option<Vec<u8>>> {
        if frame.total_count == 0 || frame.sequence_index >= frame.total_count {
            return Err(ProtocolError::InvalidHeader {
                index: frame.sequence_index,
                total: frame.total_count,
            });
        }
        let Some(id) = frame.message_id.filter(|_| !frame.is_single()) else {
            return Ok(Some(frame.payload));
        };

        self.purge_expired(now);
        if self.completed.contains_key(&id) {
            return Ok(None);
        }

        if let Some(buffer) = self.buffers.get(&id) {
            let expected = buffer.total();
            if expected != frame.total_count {
                self.buffers.remove(&id);
                return Err(ProtocolError::ReassemblyConflict {
                    message_id: id,
                    expected,
                    got: frame.total_count,
                });
            }
        } else {
            if self.buffers.len() >= self.max_in_flight {
                self.evict_oldest();
            }
            self.buffers.insert(id, Buffer::new(frame.total_count, now));
        }

        let complete = match self.buffers.get_mut(&id) {
            Some(buffer) => {
                buffer.insert(frame.sequence_index, frame.payload, now);
                buffer.is_complete()
            }
            None => false,
        };

        if complete {
            self.remember_completed(id, now);
            Ok(self.buffers.remove(&id).map(Buffer::assemble))
        } else {
            Ok(None)
        }
    }

    /// Drops buffers idle for longer than the timeout.
    ///
    /// Returns the number of buffers dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.buffers.len();
        let timeout = self.timeout;
        self.buffers
            .retain(|_, buffer| now.saturating_duration_since(buffer.last_activity) < timeout);
        self.completed
            .retain(|_, at| now.saturating_duration_since(*at) < timeout);
        before - self.buffers.len()
    }

    /// Drops every buffer and forgets completed ids.
    pub fn clear(&mut self) {
        self.buffers.clear();
        self.completed.clear();
    }

    fn remember_completed(&mut self, id: u32, now: Instant) {
        if self.completed.len() >= self.max_in_flight {
            let oldest = self
                .completed
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                self.completed.remove(&oldest);
            }
        }
        self.completed.insert(id, now);
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .buffers
            .iter()
            .min_by_key(|(_, buffer)| buffer.last_activity)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            self.buffers.remove(&id);
        }
    }
}
