//! Protocol engine for Feetech STS/SCS serial servo buses.
//!
//! The [`servo::protocol`] module holds the packet codec, the resynchronizing
//! receive framer, the transaction engine and the group sync read/write
//! helpers. [`servo::sim`] provides an in-memory bus for tests and tooling.

pub mod servo;

pub use servo::config::BusConfig;
pub use servo::protocol::byte_order::Endianness;
pub use servo::protocol::comm::{into_result, BusError, CommResult, ErrorByte};
pub use servo::protocol::group_sync_read::GroupSyncRead;
pub use servo::protocol::group_sync_write::GroupSyncWrite;
pub use servo::protocol::port_handler::{PortHandler, SimPort};
pub use servo::protocol::protocol_packet_handler::ProtocolPacketHandler;
pub use servo::protocol::serial_port::SerialPortHandler;
