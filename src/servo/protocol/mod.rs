pub mod byte_order;
pub mod comm;
pub mod group_sync_read;
pub mod group_sync_write;
pub mod packet;
pub mod packet_timer;
pub mod port_handler;
pub mod protocol_packet_handler;
pub mod rx_framer;
pub mod serial_port;
pub mod stservo_def;
