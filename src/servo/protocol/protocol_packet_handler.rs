use log::{debug, trace, warn};

use crate::servo::config::BusConfig;
use crate::servo::protocol::byte_order::Endianness;
use crate::servo::protocol::comm::{CommResult, ErrorByte};
use crate::servo::protocol::packet::{build_packet, parse_status, Instruction, ProtocolError, StatusPacket};
use crate::servo::protocol::packet_timer::PacketTimer;
use crate::servo::protocol::port_handler::PortHandler;
use crate::servo::protocol::rx_framer::{FramerState, RxFramer};
use crate::servo::protocol::stservo_def::*;
use crate::servo::sts::STS_MODEL_L;

/// Transaction engine for one bus.
///
/// Owns the transport and serializes access to it: while a transaction is
/// in flight (including the gap between a `*_tx` call and its matching
/// `*_rx` call) any other transaction fails with [`CommResult::PortBusy`].
#[derive(Debug)]
pub struct ProtocolPacketHandler<P: PortHandler> {
    port: P,
    endianness: Endianness,
    timer: PacketTimer,
    is_using: bool,
}

impl<P: PortHandler> ProtocolPacketHandler<P> {
    pub fn new(port: P, endianness: Endianness) -> Self {
        let timer = PacketTimer::new(port.get_baud_rate());
        Self {
            port,
            endianness,
            timer,
            is_using: false,
        }
    }

    pub fn with_config(mut port: P, config: &BusConfig) -> Self {
        if !port.set_baud_rate(config.baudrate) {
            warn!("transport rejected {} baud", config.baudrate);
        }
        let mut handler = Self::new(port, config.endianness);
        handler.timer.set_latency(config.latency_ms);
        handler
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_port(self) -> P {
        self.port
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }

    pub fn is_using(&self) -> bool {
        self.is_using
    }

    pub fn set_baud_rate(&mut self, baudrate: u32) -> bool {
        if !self.port.set_baud_rate(baudrate) {
            return false;
        }
        self.timer.set_baud_rate(baudrate);
        true
    }

    pub fn get_protocol_version(&self) -> f32 {
        1.0
    }

    pub fn tx_rx_result(&self, result: CommResult) -> &'static str {
        result.description()
    }

    pub fn rx_packet_error(&self, error: ErrorByte) -> &'static str {
        error.description()
    }

    fn arm_timeout(&mut self, packet_length: usize) {
        let now = self.port.get_current_time();
        self.timer.set_packet_timeout(now, packet_length);
    }

    /// Writes an already framed packet. Leaves the port marked busy on
    /// success; the caller releases it after receiving (or not expecting) a
    /// reply.
    pub fn tx_packet(&mut self, packet: &[u8]) -> CommResult {
        if self.is_using {
            return CommResult::PortBusy;
        }
        self.is_using = true;

        if packet.len() < MIN_PACKET_LEN || packet.len() > TXPACKET_MAX_LEN {
            self.is_using = false;
            return CommResult::TxError;
        }

        trace!("tx {:02X?}", packet);
        self.port.clear_port();
        let written = self.port.write_port(packet);
        if written != packet.len() {
            warn!("short write: {} of {} bytes", written, packet.len());
            self.is_using = false;
            return CommResult::TxFail;
        }

        CommResult::Success
    }

    fn tx_instruction(&mut self, id: u8, instruction: &Instruction) -> CommResult {
        if self.is_using {
            return CommResult::PortBusy;
        }
        if id > BROADCAST_ID {
            return CommResult::NotAvailable;
        }
        match build_packet(id, instruction) {
            Ok(packet) => self.tx_packet(&packet),
            Err(err) => {
                warn!("not sending instruction 0x{:02X} to {}: {}", instruction.code(), id, err);
                err.into()
            }
        }
    }

    /// Receives one status packet under the armed deadline and releases the
    /// port. On failure the returned bytes are whatever was buffered.
    pub fn rx_packet(&mut self) -> (Vec<u8>, CommResult) {
        let mut framer = RxFramer::new();

        let result = loop {
            let chunk = self.port.read_port(framer.wanted());
            match framer.push(&chunk) {
                FramerState::Complete => break CommResult::Success,
                FramerState::Corrupt => break CommResult::RxCorrupt,
                _ => {}
            }

            let now = self.port.get_current_time();
            if self.timer.is_packet_timeout(now) {
                break match framer.expire() {
                    FramerState::TimedOut => CommResult::RxTimeout,
                    _ => CommResult::RxCorrupt,
                };
            }
            if chunk.is_empty() {
                std::hint::spin_loop();
            }
        };

        self.is_using = false;
        let packet = match framer.frame() {
            Some(frame) => frame.to_vec(),
            None => framer.into_bytes(),
        };
        match result {
            CommResult::Success => trace!("rx {:02X?}", packet),
            CommResult::RxCorrupt => warn!("corrupt status packet {:02X?}", packet),
            _ => debug!("no status packet"),
        }
        (packet, result)
    }

    /// Receives status packets until one from `id` arrives or the deadline
    /// passes. Replies from other ids are skipped, but still count against
    /// the deadline.
    fn rx_status(&mut self, id: u8) -> (Option<StatusPacket>, CommResult) {
        loop {
            let (packet, result) = self.rx_packet();
            if !result.is_success() {
                return (None, result);
            }
            match parse_status(&packet, id) {
                Ok(status) => return (Some(status), CommResult::Success),
                Err(ProtocolError::IdMismatch { actual, .. }) => {
                    debug!("skipping status packet from id {} while waiting for {}", actual, id);
                    let now = self.port.get_current_time();
                    if self.timer.is_packet_timeout(now) {
                        return (None, CommResult::RxTimeout);
                    }
                }
                Err(err) => return (None, err.into()),
            }
        }
    }

    pub fn tx_rx_packet(
        &mut self,
        id: u8,
        instruction: &Instruction,
    ) -> (Option<StatusPacket>, CommResult, ErrorByte) {
        let result = self.tx_instruction(id, instruction);
        if !result.is_success() {
            return (None, result, ErrorByte::NONE);
        }

        if id == BROADCAST_ID {
            self.is_using = false;
            return (None, result, ErrorByte::NONE);
        }

        let reply_length = match instruction {
            Instruction::Read { length, .. } => *length as usize + MIN_PACKET_LEN,
            _ => MIN_PACKET_LEN,
        };
        self.arm_timeout(reply_length);

        let (status, result) = self.rx_status(id);
        let error = status.as_ref().map(|s| s.error).unwrap_or_default();
        (status, result, error)
    }

    /// Pings `id` and, when it answers, reads its model number.
    pub fn ping(&mut self, sts_id: u8) -> (u16, CommResult, ErrorByte) {
        if sts_id >= BROADCAST_ID {
            return (0, CommResult::NotAvailable, ErrorByte::NONE);
        }

        let (_, result, error) = self.tx_rx_packet(sts_id, &Instruction::Ping);
        if !result.is_success() {
            return (0, result, error);
        }

        let (data, result, error) = self.read_tx_rx(sts_id, STS_MODEL_L, 2);
        let model_number = if result.is_success() {
            self.decode_read(&data, result, 2) as u16
        } else {
            0
        };
        (model_number, result, error)
    }

    /// Executes writes previously queued with `reg_write_*`.
    pub fn action(&mut self, sts_id: u8) -> CommResult {
        let (_, result, _) = self.tx_rx_packet(sts_id, &Instruction::Action);
        result
    }

    /// Scans ids 0..=253 and returns those answering with a model number and
    /// no fault.
    pub fn list_servos(&mut self) -> Vec<u8> {
        let mut servos = Vec::new();
        for sts_id in 0..BROADCAST_ID {
            let (model_number, result, error) = self.ping(sts_id);
            if result.is_success() && model_number != 0 && error.is_empty() {
                debug!("found servo {} (model {})", sts_id, model_number);
                servos.push(sts_id);
            }
        }
        servos
    }

    pub fn read_tx(&mut self, sts_id: u8, address: u8, length: u8) -> CommResult {
        if sts_id >= BROADCAST_ID {
            return CommResult::NotAvailable;
        }

        let result = self.tx_instruction(sts_id, &Instruction::Read { address, length });
        if result.is_success() {
            self.arm_timeout(length as usize + MIN_PACKET_LEN);
        }
        result
    }

    pub fn read_rx(&mut self, sts_id: u8, length: u8) -> (Vec<u8>, CommResult, ErrorByte) {
        let (status, result) = self.rx_status(sts_id);
        Self::read_payload(status, result, length)
    }

    pub fn read_tx_rx(
        &mut self,
        sts_id: u8,
        address: u8,
        length: u8,
    ) -> (Vec<u8>, CommResult, ErrorByte) {
        if sts_id >= BROADCAST_ID {
            return (Vec::new(), CommResult::NotAvailable, ErrorByte::NONE);
        }

        let (status, result, _) = self.tx_rx_packet(sts_id, &Instruction::Read { address, length });
        Self::read_payload(status, result, length)
    }

    fn read_payload(
        status: Option<StatusPacket>,
        result: CommResult,
        length: u8,
    ) -> (Vec<u8>, CommResult, ErrorByte) {
        let Some(mut status) = status else {
            return (Vec::new(), result, ErrorByte::NONE);
        };
        if status.params.len() < length as usize {
            warn!(
                "status packet from {} carries {} of {} bytes",
                status.id,
                status.params.len(),
                length
            );
            return (Vec::new(), CommResult::RxCorrupt, status.error);
        }
        status.params.truncate(length as usize);
        (status.params, result, status.error)
    }

    fn decode_read(&self, data: &[u8], result: CommResult, width: usize) -> u32 {
        if !result.is_success() {
            return 0;
        }
        self.endianness.decode(data, width).unwrap_or(0)
    }

    pub fn read_1byte_tx(&mut self, sts_id: u8, address: u8) -> CommResult {
        self.read_tx(sts_id, address, 1)
    }

    pub fn read_1byte_rx(&mut self, sts_id: u8) -> (u8, CommResult, ErrorByte) {
        let (data, result, error) = self.read_rx(sts_id, 1);
        (self.decode_read(&data, result, 1) as u8, result, error)
    }

    pub fn read_1byte_tx_rx(&mut self, sts_id: u8, address: u8) -> (u8, CommResult, ErrorByte) {
        let (data, result, error) = self.read_tx_rx(sts_id, address, 1);
        (self.decode_read(&data, result, 1) as u8, result, error)
    }

    pub fn read_2byte_tx(&mut self, sts_id: u8, address: u8) -> CommResult {
        self.read_tx(sts_id, address, 2)
    }

    pub fn read_2byte_rx(&mut self, sts_id: u8) -> (u16, CommResult, ErrorByte) {
        let (data, result, error) = self.read_rx(sts_id, 2);
        (self.decode_read(&data, result, 2) as u16, result, error)
    }

    pub fn read_2byte_tx_rx(&mut self, sts_id: u8, address: u8) -> (u16, CommResult, ErrorByte) {
        let (data, result, error) = self.read_tx_rx(sts_id, address, 2);
        (self.decode_read(&data, result, 2) as u16, result, error)
    }

    pub fn read_4byte_tx(&mut self, sts_id: u8, address: u8) -> CommResult {
        self.read_tx(sts_id, address, 4)
    }

    pub fn read_4byte_rx(&mut self, sts_id: u8) -> (u32, CommResult, ErrorByte) {
        let (data, result, error) = self.read_rx(sts_id, 4);
        (self.decode_read(&data, result, 4), result, error)
    }

    pub fn read_4byte_tx_rx(&mut self, sts_id: u8, address: u8) -> (u32, CommResult, ErrorByte) {
        let (data, result, error) = self.read_tx_rx(sts_id, address, 4);
        (self.decode_read(&data, result, 4), result, error)
    }

    /// Sends an instruction without waiting for any reply. Only a
    /// successful transmit holds the port, so only that releases it.
    fn tx_only(&mut self, sts_id: u8, instruction: &Instruction) -> CommResult {
        let result = self.tx_instruction(sts_id, instruction);
        if result.is_success() {
            self.is_using = false;
        }
        result
    }

    pub fn write_tx_only(&mut self, sts_id: u8, address: u8, data: &[u8]) -> CommResult {
        let instruction = Instruction::Write {
            address,
            data: data.to_vec(),
        };
        self.tx_only(sts_id, &instruction)
    }

    pub fn write_tx_rx(&mut self, sts_id: u8, address: u8, data: &[u8]) -> (CommResult, ErrorByte) {
        let instruction = Instruction::Write {
            address,
            data: data.to_vec(),
        };
        let (_, result, error) = self.tx_rx_packet(sts_id, &instruction);
        (result, error)
    }

    pub fn write_1byte_tx_only(&mut self, sts_id: u8, address: u8, data: u8) -> CommResult {
        self.write_tx_only(sts_id, address, &[data])
    }

    pub fn write_1byte_tx_rx(&mut self, sts_id: u8, address: u8, data: u8) -> (CommResult, ErrorByte) {
        self.write_tx_rx(sts_id, address, &[data])
    }

    pub fn write_2byte_tx_only(&mut self, sts_id: u8, address: u8, data: u16) -> CommResult {
        let data_write = self.endianness.encode_u16(data);
        self.write_tx_only(sts_id, address, &data_write)
    }

    pub fn write_2byte_tx_rx(&mut self, sts_id: u8, address: u8, data: u16) -> (CommResult, ErrorByte) {
        let data_write = self.endianness.encode_u16(data);
        self.write_tx_rx(sts_id, address, &data_write)
    }

    pub fn write_4byte_tx_only(&mut self, sts_id: u8, address: u8, data: u32) -> CommResult {
        let data_write = self.endianness.encode_u32(data);
        self.write_tx_only(sts_id, address, &data_write)
    }

    pub fn write_4byte_tx_rx(&mut self, sts_id: u8, address: u8, data: u32) -> (CommResult, ErrorByte) {
        let data_write = self.endianness.encode_u32(data);
        self.write_tx_rx(sts_id, address, &data_write)
    }

    pub fn reg_write_tx_only(&mut self, sts_id: u8, address: u8, data: &[u8]) -> CommResult {
        let instruction = Instruction::RegWrite {
            address,
            data: data.to_vec(),
        };
        self.tx_only(sts_id, &instruction)
    }

    pub fn reg_write_tx_rx(&mut self, sts_id: u8, address: u8, data: &[u8]) -> (CommResult, ErrorByte) {
        let instruction = Instruction::RegWrite {
            address,
            data: data.to_vec(),
        };
        let (_, result, error) = self.tx_rx_packet(sts_id, &instruction);
        (result, error)
    }

    /// Sends a sync read for `ids`. The port stays busy until
    /// [`Self::sync_read_rx`] collects the replies.
    pub fn sync_read_tx(&mut self, start_address: u8, data_length: u8, ids: &[u8]) -> CommResult {
        let instruction = Instruction::SyncRead {
            address: start_address,
            length: data_length,
            ids: ids.to_vec(),
        };
        self.tx_instruction(BROADCAST_ID, &instruction)
    }

    /// Collects `count` concatenated status packets of `data_length` payload
    /// bytes each. Succeeds only once the full length has arrived.
    pub fn sync_read_rx(&mut self, data_length: u8, count: usize) -> (CommResult, Vec<u8>) {
        let wait_length = (MIN_PACKET_LEN + data_length as usize) * count;
        self.arm_timeout(wait_length);

        let mut rxpacket: Vec<u8> = Vec::with_capacity(wait_length);
        let result = loop {
            if rxpacket.len() < wait_length {
                let mut chunk = self.port.read_port(wait_length - rxpacket.len());
                rxpacket.append(&mut chunk);
            }

            if rxpacket.len() >= wait_length {
                break CommResult::Success;
            }

            let now = self.port.get_current_time();
            if self.timer.is_packet_timeout(now) {
                break if rxpacket.is_empty() {
                    CommResult::RxTimeout
                } else {
                    CommResult::RxCorrupt
                };
            }
        };

        self.is_using = false;
        trace!("sync rx {:02X?} ({})", rxpacket, result);
        (result, rxpacket)
    }

    /// `params` is the flattened `(id, payload)` block; no reply is expected.
    pub fn sync_write_tx_only(&mut self, start_address: u8, data_length: u8, params: &[u8]) -> CommResult {
        let instruction = Instruction::SyncWrite {
            address: start_address,
            length: data_length,
            params: params.to_vec(),
        };
        self.tx_only(BROADCAST_ID, &instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::protocol::port_handler::SimPort;
    use crate::servo::sim::FeetechBusSim;

    fn handler_with(ids: &[u8]) -> ProtocolPacketHandler<SimPort> {
        let mut sim = FeetechBusSim::new();
        for id in ids {
            sim.add_servo(*id);
        }
        ProtocolPacketHandler::new(SimPort::new(sim), Endianness::Little)
    }

    #[test]
    fn read_model_number_goes_out_as_expected_bytes() {
        let mut handler = handler_with(&[1]);
        let (model, result, error) = handler.read_2byte_tx_rx(1, STS_MODEL_L);
        assert_eq!(result, CommResult::Success);
        assert_eq!(error, ErrorByte::NONE);
        assert_eq!(model, crate::servo::sim::DEFAULT_MODEL_NUMBER);

        let written = handler.port_mut().take_written();
        assert_eq!(written, vec![vec![0xFF, 0xFF, 0x01, 0x04, 0x02, 0x03, 0x02, 0xF3]]);
    }

    #[test]
    fn split_read_keeps_the_port_busy() {
        let mut handler = handler_with(&[1]);
        assert_eq!(handler.read_1byte_tx(1, STS_MODEL_L), CommResult::Success);
        assert!(handler.is_using());

        let (result, _) = handler.write_1byte_tx_rx(1, 0x30, 9);
        assert_eq!(result, CommResult::PortBusy);
        assert_eq!(handler.write_1byte_tx_only(1, 0x30, 9), CommResult::PortBusy);

        let (value, result, _) = handler.read_1byte_rx(1);
        assert_eq!(result, CommResult::Success);
        assert_eq!(value, (crate::servo::sim::DEFAULT_MODEL_NUMBER & 0xFF) as u8);
        assert!(!handler.is_using());

        let (result, _) = handler.write_1byte_tx_rx(1, 0x30, 9);
        assert_eq!(result, CommResult::Success);
    }

    #[test]
    fn reserved_and_broadcast_ids_are_rejected_before_transmission() {
        let mut handler = handler_with(&[1]);
        assert_eq!(handler.ping(BROADCAST_ID).1, CommResult::NotAvailable);
        assert_eq!(handler.ping(RESERVED_ID).1, CommResult::NotAvailable);
        assert_eq!(handler.read_tx_rx(BROADCAST_ID, 0, 1).1, CommResult::NotAvailable);
        assert_eq!(handler.write_tx_rx(RESERVED_ID, 0x30, &[1]).0, CommResult::NotAvailable);
        assert!(handler.port_mut().take_written().is_empty());
    }

    #[test]
    fn oversized_write_is_rejected_before_any_byte() {
        let mut handler = handler_with(&[1]);
        let data = vec![0u8; 244];
        let (result, _) = handler.write_tx_rx(1, 0, &data);
        assert_eq!(result, CommResult::TxError);
        assert!(!handler.is_using());
        assert!(handler.port_mut().take_written().is_empty());
    }

    #[test]
    fn closed_port_reports_tx_fail() {
        let mut handler = handler_with(&[1]);
        handler.port_mut().close_port();
        let (result, _) = handler.write_1byte_tx_rx(1, 0x30, 1);
        assert_eq!(result, CommResult::TxFail);
        assert!(!handler.is_using());
    }

    #[test]
    fn big_endian_handler_swaps_register_bytes() {
        let mut handler = handler_with(&[1]);
        handler.set_endianness(Endianness::Big);
        let (result, _) = handler.write_2byte_tx_rx(1, 0x50, 0x1234);
        assert_eq!(result, CommResult::Success);
        assert_eq!(handler.port().sim().register(1, 0x50), Some(0x12));
        assert_eq!(handler.port().sim().register(1, 0x51), Some(0x34));

        let (value, _, _) = handler.read_2byte_tx_rx(1, 0x50);
        assert_eq!(value, 0x1234);
    }
}
