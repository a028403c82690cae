use std::collections::VecDeque;
use std::time::Instant;

use crate::servo::protocol::stservo_def::DEFAULT_BAUDRATE;
use crate::servo::sim::FeetechBusSim;

/// Byte transport under the packet engine.
///
/// Reads are non-blocking: `read_port` returns whatever is available, up to
/// `length` bytes, possibly nothing. `get_current_time` is a monotonic clock
/// in milliseconds used for receive deadlines.
pub trait PortHandler {
    fn open_port(&mut self) -> bool;
    fn close_port(&mut self);
    fn is_open(&self) -> bool;
    fn clear_port(&mut self);
    fn read_port(&mut self, length: usize) -> Vec<u8>;
    fn write_port(&mut self, packet: &[u8]) -> usize;
    fn get_current_time(&self) -> f64;
    fn set_baud_rate(&mut self, baudrate: u32) -> bool;
    fn get_baud_rate(&self) -> u32;
    fn get_bytes_available(&self) -> usize;
}

/// In-memory transport wired to a [`FeetechBusSim`].
///
/// Every written packet is handed to the simulator and its reply, if any,
/// becomes readable immediately. Written packets are recorded for
/// inspection.
#[derive(Debug)]
pub struct SimPort {
    sim: FeetechBusSim,
    rx_buffer: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    baudrate: u32,
    is_open: bool,
    start_time: Instant,
}

impl SimPort {
    pub fn new(sim: FeetechBusSim) -> Self {
        Self {
            sim,
            rx_buffer: VecDeque::new(),
            written: Vec::new(),
            baudrate: DEFAULT_BAUDRATE,
            is_open: true,
            start_time: Instant::now(),
        }
    }

    pub fn sim(&self) -> &FeetechBusSim {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut FeetechBusSim {
        &mut self.sim
    }

    /// Packets written since the last call, oldest first.
    pub fn take_written(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.written)
    }
}

impl PortHandler for SimPort {
    fn open_port(&mut self) -> bool {
        self.is_open = true;
        true
    }

    fn close_port(&mut self) {
        self.is_open = false;
        self.rx_buffer.clear();
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn clear_port(&mut self) {
        self.rx_buffer.clear();
    }

    fn read_port(&mut self, length: usize) -> Vec<u8> {
        let take = length.min(self.rx_buffer.len());
        self.rx_buffer.drain(..take).collect()
    }

    fn write_port(&mut self, packet: &[u8]) -> usize {
        if !self.is_open {
            return 0;
        }
        self.written.push(packet.to_vec());
        if let Ok(Some(response)) = self.sim.handle_frame(packet) {
            self.rx_buffer.extend(response);
        }
        packet.len()
    }

    fn get_current_time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }

    fn set_baud_rate(&mut self, baudrate: u32) -> bool {
        self.baudrate = baudrate;
        true
    }

    fn get_baud_rate(&self) -> u32 {
        self.baudrate
    }

    fn get_bytes_available(&self) -> usize {
        self.rx_buffer.len()
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new(FeetechBusSim::new())
    }
}
