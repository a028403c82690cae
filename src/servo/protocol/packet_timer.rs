use crate::servo::protocol::stservo_def::{DEFAULT_BAUDRATE, LATENCY_TIMER_MS};

/// Receive deadline for one transaction.
///
/// The budget covers the wire time of the expected reply plus three bytes
/// of slack and a fixed adapter latency. Times are milliseconds on the
/// port's monotonic clock.
#[derive(Debug, Clone)]
pub struct PacketTimer {
    tx_time_per_byte_ms: f64,
    latency_ms: f64,
    packet_start_time: f64,
    packet_timeout_ms: f64,
}

impl PacketTimer {
    pub fn new(baudrate: u32) -> Self {
        let mut timer = Self {
            tx_time_per_byte_ms: 0.0,
            latency_ms: LATENCY_TIMER_MS,
            packet_start_time: 0.0,
            packet_timeout_ms: 0.0,
        };
        timer.set_baud_rate(baudrate);
        timer
    }

    pub fn set_baud_rate(&mut self, baudrate: u32) {
        let baudrate = if baudrate == 0 { DEFAULT_BAUDRATE } else { baudrate };
        // 10 bit times per byte on an 8-N-1 line.
        self.tx_time_per_byte_ms = (1000.0 / baudrate as f64) * 10.0;
    }

    pub fn set_latency(&mut self, latency_ms: f64) {
        self.latency_ms = latency_ms.max(0.0);
    }

    pub fn tx_time_per_byte_ms(&self) -> f64 {
        self.tx_time_per_byte_ms
    }

    /// Arms the deadline for a reply of `packet_length` bytes.
    pub fn set_packet_timeout(&mut self, now_ms: f64, packet_length: usize) {
        self.packet_start_time = now_ms;
        self.packet_timeout_ms = (self.tx_time_per_byte_ms * packet_length as f64)
            + (self.tx_time_per_byte_ms * 3.0)
            + self.latency_ms;
    }

    pub fn timeout_ms(&self) -> f64 {
        self.packet_timeout_ms
    }

    pub fn time_since_start(&mut self, now_ms: f64) -> f64 {
        let elapsed = now_ms - self.packet_start_time;
        if elapsed < 0.0 {
            self.packet_start_time = now_ms;
            return 0.0;
        }
        elapsed
    }

    /// True once the budget has elapsed. An unarmed timer counts as expired,
    /// so a receive loop can never wait forever.
    pub fn is_packet_timeout(&mut self, now_ms: f64) -> bool {
        if self.time_since_start(now_ms) > self.packet_timeout_ms {
            self.packet_timeout_ms = 0.0;
            return true;
        }
        false
    }
}

impl Default for PacketTimer {
    fn default() -> Self {
        Self::new(DEFAULT_BAUDRATE)
    }
}
