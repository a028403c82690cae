use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::servo::config::BusConfig;
use crate::servo::protocol::port_handler::PortHandler;

/// Read timeout handed to the OS driver. Short enough that `read_port`
/// behaves as a non-blocking poll inside the receive loop.
const READ_TIMEOUT: Duration = Duration::from_millis(2);

/// Serial device transport (8-N-1, no flow control).
pub struct SerialPortHandler {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
    baudrate: u32,
    start_time: Instant,
}

impl SerialPortHandler {
    /// Opens `port_name` right away.
    pub fn open(port_name: &str, baudrate: u32) -> std::io::Result<Self> {
        let port = open_device(port_name, baudrate)?;
        Ok(Self {
            port_name: port_name.to_string(),
            port: Some(port),
            baudrate,
            start_time: Instant::now(),
        })
    }

    /// Builds a closed handler; call [`PortHandler::open_port`] before use.
    pub fn from_config(config: &BusConfig) -> Self {
        Self {
            port_name: config.port_name.clone(),
            port: None,
            baudrate: config.baudrate,
            start_time: Instant::now(),
        }
    }

    pub fn from_port(port: Box<dyn SerialPort>, baudrate: u32) -> Self {
        Self {
            port_name: port.name().unwrap_or_default(),
            port: Some(port),
            baudrate,
            start_time: Instant::now(),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

fn open_device(port_name: &str, baudrate: u32) -> std::io::Result<Box<dyn SerialPort>> {
    let port = serialport::new(port_name, baudrate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()?;
    port.clear(ClearBuffer::All)?;
    debug!("opened {} @ {} baud", port_name, baudrate);
    Ok(port)
}

/// Logs a failed device operation. Returns whether it succeeded.
fn check_io(result: std::io::Result<()>, action: &str, port_name: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!("{} {} failed: {}", action, port_name, err);
            false
        }
    }
}

impl PortHandler for SerialPortHandler {
    fn open_port(&mut self) -> bool {
        self.port = None;
        match open_device(&self.port_name, self.baudrate) {
            Ok(port) => {
                self.port = Some(port);
                true
            }
            Err(err) => {
                warn!("failed to open {}: {}", self.port_name, err);
                false
            }
        }
    }

    fn close_port(&mut self) {
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn clear_port(&mut self) {
        if let Some(port) = self.port.as_mut() {
            let cleared = port.clear(ClearBuffer::All).map_err(std::io::Error::from);
            check_io(cleared, "clearing", &self.port_name);
        }
    }

    fn read_port(&mut self, length: usize) -> Vec<u8> {
        let Some(port) = self.port.as_mut() else {
            return Vec::new();
        };
        if length == 0 {
            return Vec::new();
        }

        let mut out = vec![0u8; length];
        match port.read(&mut out) {
            Ok(read_len) => {
                out.truncate(read_len);
                out
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::TimedOut
                    || err.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Vec::new()
            }
            Err(err) => {
                warn!("read from {} failed: {}", self.port_name, err);
                Vec::new()
            }
        }
    }

    fn write_port(&mut self, packet: &[u8]) -> usize {
        let Some(port) = self.port.as_mut() else {
            return 0;
        };
        if packet.is_empty() {
            return 0;
        }

        if let Err(err) = port.write_all(packet) {
            warn!("write to {} failed: {}", self.port_name, err);
            return 0;
        }
        if !check_io(port.flush(), "flushing", &self.port_name) {
            return 0;
        }
        packet.len()
    }

    fn get_current_time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }

    fn set_baud_rate(&mut self, baudrate: u32) -> bool {
        if let Some(port) = self.port.as_mut() {
            if let Err(err) = port.set_baud_rate(baudrate) {
                warn!("cannot set {} baud on {}: {}", baudrate, self.port_name, err);
                return false;
            }
        }
        self.baudrate = baudrate;
        true
    }

    fn get_baud_rate(&self) -> u32 {
        self.baudrate
    }

    fn get_bytes_available(&self) -> usize {
        self.port
            .as_ref()
            .and_then(|port| port.bytes_to_read().ok())
            .unwrap_or(0) as usize
    }
}
