use log::debug;

use crate::servo::protocol::packet::frame_checksum;
use crate::servo::protocol::stservo_def::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    /// Fewer bytes than the assumed minimum frame.
    Accumulating,
    /// Leading bytes were discarded while looking for a valid header.
    HeaderSearch,
    /// A valid header fixed the exact frame length; waiting for the rest.
    LengthKnown,
    Complete,
    TimedOut,
    Corrupt,
}

impl FramerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FramerState::Complete | FramerState::TimedOut | FramerState::Corrupt
        )
    }
}

/// Resynchronizing status-packet receiver.
///
/// Bytes are pushed in whatever chunks the transport delivers. The framer
/// drops noise ahead of a plausible `FF FF id len err` header, learns the
/// exact frame length from it and verifies the checksum once complete. It
/// never touches the transport or the clock; the caller reports deadline
/// expiry through [`RxFramer::expire`].
#[derive(Debug, Clone)]
pub struct RxFramer {
    buffer: Vec<u8>,
    wait_length: usize,
    state: FramerState,
}

impl RxFramer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(RXPACKET_MAX_LEN),
            wait_length: MIN_PACKET_LEN,
            state: FramerState::Accumulating,
        }
    }

    pub fn state(&self) -> FramerState {
        self.state
    }

    /// Bytes still missing for the current length expectation.
    pub fn wanted(&self) -> usize {
        if self.state.is_terminal() {
            return 0;
        }
        self.wait_length.saturating_sub(self.buffer.len())
    }

    pub fn wait_length(&self) -> usize {
        self.wait_length
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// The validated frame once [`FramerState::Complete`] is reached.
    pub fn frame(&self) -> Option<&[u8]> {
        if self.state == FramerState::Complete {
            Some(&self.buffer[..self.wait_length])
        } else {
            None
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn push(&mut self, bytes: &[u8]) -> FramerState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.buffer.extend_from_slice(bytes);
        self.advance()
    }

    /// Deadline hit: nothing at all is a timeout, anything else is a broken
    /// frame.
    pub fn expire(&mut self) -> FramerState {
        if !self.state.is_terminal() {
            self.state = if self.buffer.is_empty() {
                FramerState::TimedOut
            } else {
                FramerState::Corrupt
            };
        }
        self.state
    }

    fn advance(&mut self) -> FramerState {
        loop {
            if self.buffer.len() < self.wait_length {
                return self.state;
            }

            let header = self
                .buffer
                .windows(2)
                .position(|pair| pair[0] == HEADER_BYTE && pair[1] == HEADER_BYTE);

            match header {
                Some(0) => {}
                Some(idx) => {
                    debug!("rx resync: dropping {} stale bytes", idx);
                    self.buffer.drain(..idx);
                    self.state = FramerState::HeaderSearch;
                    continue;
                }
                None => {
                    // Keep the last byte, it may be the first half of a header.
                    let idx = self.buffer.len() - 1;
                    debug!("rx resync: no header in {} bytes", self.buffer.len());
                    self.buffer.drain(..idx);
                    self.state = FramerState::HeaderSearch;
                    continue;
                }
            }

            if self.buffer[PKT_ID] > MAX_ID
                || (self.buffer[PKT_LENGTH] as usize) < 2
                || self.buffer[PKT_LENGTH] as usize > RXPACKET_MAX_LEN
                || self.buffer[PKT_ERROR] > 0x7F
            {
                self.buffer.remove(0);
                self.state = FramerState::HeaderSearch;
                continue;
            }

            let expected = self.buffer[PKT_LENGTH] as usize + PKT_LENGTH + 1;
            if self.wait_length != expected {
                self.wait_length = expected;
                self.state = FramerState::LengthKnown;
                continue;
            }

            let frame = &self.buffer[..self.wait_length];
            self.state = if frame_checksum(frame) == frame[self.wait_length - 1] {
                FramerState::Complete
            } else {
                FramerState::Corrupt
            };
            return self.state;
        }
    }
}

impl Default for RxFramer {
    fn default() -> Self {
        Self::new()
    }
}
