use crate::servo::protocol::byte_order::Endianness;
use crate::servo::protocol::stservo_def::{DEFAULT_BAUDRATE, LATENCY_TIMER_MS};

/// Settings for one physical bus.
#[derive(Clone, Debug, PartialEq)]
pub struct BusConfig {
    pub port_name: String,
    pub baudrate: u32,
    pub endianness: Endianness,
    /// Fixed allowance added to every receive deadline, in milliseconds.
    pub latency_ms: f64,
}

impl BusConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    pub fn with_baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baudrate: DEFAULT_BAUDRATE,
            endianness: Endianness::Little,
            latency_ms: LATENCY_TIMER_MS,
        }
    }
}
