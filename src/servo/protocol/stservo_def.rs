pub const BROADCAST_ID: u8 = 0xFE;
pub const MAX_ID: u8 = 0xFD;
pub const RESERVED_ID: u8 = 0xFF;

pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const LATENCY_TIMER_MS: f64 = 50.0;

pub const INST_PING: u8 = 0x01;
pub const INST_READ: u8 = 0x02;
pub const INST_WRITE: u8 = 0x03;
pub const INST_REG_WRITE: u8 = 0x04;
pub const INST_ACTION: u8 = 0x05;
pub const INST_SYNC_READ: u8 = 0x82;
pub const INST_SYNC_WRITE: u8 = 0x83;

pub const HEADER_BYTE: u8 = 0xFF;

pub const TXPACKET_MAX_LEN: usize = 250;
pub const RXPACKET_MAX_LEN: usize = 250;

/// HEADER0 HEADER1 ID LENGTH ERROR CHECKSUM
pub const MIN_PACKET_LEN: usize = 6;

pub const ERRBIT_VOLTAGE: u8 = 0x01;
pub const ERRBIT_ANGLE: u8 = 0x02;
pub const ERRBIT_OVERHEAT: u8 = 0x04;
pub const ERRBIT_OVERELE: u8 = 0x08;
pub const ERRBIT_OVERLOAD: u8 = 0x20;

pub const PKT_HEADER0: usize = 0;
pub const PKT_HEADER1: usize = 1;
pub const PKT_ID: usize = 2;
pub const PKT_LENGTH: usize = 3;
pub const PKT_INSTRUCTION: usize = 4;
pub const PKT_ERROR: usize = 4;
pub const PKT_PARAMETER0: usize = 5;
