use std::collections::BTreeMap;

use log::debug;

use crate::servo::protocol::byte_order::Endianness;
use crate::servo::protocol::comm::{CommResult, ErrorByte};
use crate::servo::protocol::packet::checksum;
use crate::servo::protocol::port_handler::PortHandler;
use crate::servo::protocol::protocol_packet_handler::ProtocolPacketHandler;
use crate::servo::protocol::stservo_def::{HEADER_BYTE, MIN_PACKET_LEN};

/// Batched read of one register range from many servos.
///
/// After a receive, each member slot holds the status error byte followed by
/// `data_length` payload bytes, or nothing if that member's reply was
/// missing or damaged.
#[derive(Debug)]
pub struct GroupSyncRead {
    start_address: u8,
    data_length: u8,
    last_result: bool,
    is_param_changed: bool,
    param: Vec<u8>,
    data_dict: BTreeMap<u8, Vec<u8>>,
}

impl GroupSyncRead {
    pub fn new(start_address: u8, data_length: u8) -> Self {
        Self {
            start_address,
            data_length,
            last_result: false,
            is_param_changed: false,
            param: Vec::new(),
            data_dict: BTreeMap::new(),
        }
    }

    fn make_param(&mut self) {
        self.param.clear();
        self.param.extend(self.data_dict.keys().copied());
        self.is_param_changed = false;
    }

    pub fn add_param(&mut self, sts_id: u8) -> bool {
        if self.data_dict.contains_key(&sts_id) {
            return false;
        }
        self.data_dict.insert(sts_id, Vec::new());
        self.is_param_changed = true;
        true
    }

    pub fn remove_param(&mut self, sts_id: u8) {
        if self.data_dict.remove(&sts_id).is_some() {
            self.is_param_changed = true;
        }
    }

    pub fn clear_param(&mut self) {
        self.data_dict.clear();
        self.param.clear();
        self.is_param_changed = false;
    }

    pub fn tx_packet<P: PortHandler>(&mut self, handler: &mut ProtocolPacketHandler<P>) -> CommResult {
        if self.data_dict.is_empty() {
            return CommResult::NotAvailable;
        }

        if self.is_param_changed || self.param.is_empty() {
            self.make_param();
        }

        handler.sync_read_tx(self.start_address, self.data_length, &self.param)
    }

    pub fn rx_packet<P: PortHandler>(&mut self, handler: &mut ProtocolPacketHandler<P>) -> CommResult {
        self.last_result = true;
        if self.data_dict.is_empty() {
            return CommResult::NotAvailable;
        }

        let (result, rxpacket) = handler.sync_read_rx(self.data_length, self.data_dict.len());
        if rxpacket.len() >= self.data_length as usize + MIN_PACKET_LEN {
            let ids: Vec<u8> = self.data_dict.keys().copied().collect();
            for sts_id in ids {
                let data = Self::read_rx(&rxpacket, sts_id, self.data_length);
                if data.is_none() {
                    debug!("no valid reply from {} in sync read", sts_id);
                    self.last_result = false;
                }
                self.data_dict.insert(sts_id, data.unwrap_or_default());
            }
        } else {
            for slot in self.data_dict.values_mut() {
                slot.clear();
            }
            self.last_result = false;
        }

        result
    }

    pub fn tx_rx_packet<P: PortHandler>(&mut self, handler: &mut ProtocolPacketHandler<P>) -> CommResult {
        let result = self.tx_packet(handler);
        if !result.is_success() {
            return result;
        }
        self.rx_packet(handler)
    }

    /// Scans the whole buffer for `FF FF id` and validates the frame that
    /// follows. Returns the error byte followed by the payload.
    fn read_rx(rxpacket: &[u8], sts_id: u8, data_length: u8) -> Option<Vec<u8>> {
        let length_field = data_length.checked_add(2)?;
        let data_length = data_length as usize;
        let rx_length = rxpacket.len();
        let mut rx_index = 0usize;

        while rx_index + MIN_PACKET_LEN + data_length <= rx_length {
            let mut headpacket = [0u8; 3];
            while rx_index < rx_length {
                headpacket[2] = headpacket[1];
                headpacket[1] = headpacket[0];
                headpacket[0] = rxpacket[rx_index];
                rx_index += 1;
                if headpacket[2] == HEADER_BYTE && headpacket[1] == HEADER_BYTE && headpacket[0] == sts_id {
                    break;
                }
            }

            // length, error, payload, checksum
            if rx_index + 3 + data_length > rx_length {
                break;
            }

            if rxpacket[rx_index] != length_field {
                continue;
            }
            let error = rxpacket[rx_index + 1];
            let payload = &rxpacket[rx_index + 2..rx_index + 2 + data_length];
            let expected = checksum(sts_id, length_field, error, payload);
            if rxpacket[rx_index + 2 + data_length] != expected {
                return None;
            }

            let mut data = Vec::with_capacity(1 + data_length);
            data.push(error);
            data.extend_from_slice(payload);
            return Some(data);
        }

        None
    }

    /// Whether `[address, address + data_length)` lies inside the group's
    /// range and a valid reply was stored for `sts_id`. Also returns the
    /// reply's error byte.
    pub fn is_available(&self, sts_id: u8, address: u8, data_length: u8) -> (bool, ErrorByte) {
        let Some(data) = self.data_dict.get(&sts_id) else {
            return (false, ErrorByte::NONE);
        };
        let range_start = self.start_address as usize;
        let range_end = range_start + self.data_length as usize;
        let address = address as usize;
        if address < range_start || address + data_length as usize > range_end {
            return (false, ErrorByte::NONE);
        }
        if data.len() < self.data_length as usize + 1 {
            return (false, ErrorByte::NONE);
        }
        (true, ErrorByte(data[0]))
    }

    /// Decodes 1, 2 or 4 bytes at `address` from the stored reply. Returns 0
    /// when the value is not available.
    pub fn get_data(&self, sts_id: u8, address: u8, data_length: u8, endianness: Endianness) -> u32 {
        if !self.is_available(sts_id, address, data_length).0 {
            return 0;
        }
        let Some(data) = self.data_dict.get(&sts_id) else {
            return 0;
        };
        let offset = (address - self.start_address) as usize + 1;
        endianness
            .decode(&data[offset..], data_length as usize)
            .unwrap_or(0)
    }

    pub fn last_result(&self) -> bool {
        self.last_result
    }

    pub fn data_length(&self) -> u8 {
        self.data_length
    }

    pub fn start_address(&self) -> u8 {
        self.start_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::protocol::packet::encode_status;

    #[test]
    fn read_rx_finds_member_anywhere_in_buffer() {
        let mut buffer = vec![0x00, 0xFF];
        buffer.extend(encode_status(4, ErrorByte::NONE, &[0x10, 0x20]).expect("frame"));
        buffer.extend(encode_status(9, ErrorByte(0x20), &[0x30, 0x40]).expect("frame"));

        assert_eq!(GroupSyncRead::read_rx(&buffer, 9, 2), Some(vec![0x20, 0x30, 0x40]));
        assert_eq!(GroupSyncRead::read_rx(&buffer, 4, 2), Some(vec![0x00, 0x10, 0x20]));
        assert_eq!(GroupSyncRead::read_rx(&buffer, 5, 2), None);
    }

    #[test]
    fn read_rx_rejects_bad_checksum() {
        let mut buffer = encode_status(4, ErrorByte::NONE, &[0x10, 0x20]).expect("frame");
        let last = buffer.len() - 1;
        buffer[last] ^= 0x01;
        assert_eq!(GroupSyncRead::read_rx(&buffer, 4, 2), None);
    }

    #[test]
    fn availability_respects_group_range() {
        let mut group = GroupSyncRead::new(56, 4);
        group.add_param(1);
        group.data_dict.insert(1, vec![0x20, 0x01, 0x02, 0x03, 0x04]);

        assert_eq!(group.is_available(1, 56, 4), (true, ErrorByte(0x20)));
        assert_eq!(group.is_available(1, 58, 2), (true, ErrorByte(0x20)));
        assert!(!group.is_available(1, 55, 2).0);
        assert!(!group.is_available(1, 59, 2).0);
        assert!(!group.is_available(2, 56, 2).0);

        assert_eq!(group.get_data(1, 58, 2, Endianness::Little), 0x0403);
        assert_eq!(group.get_data(1, 58, 2, Endianness::Big), 0x0304);
        assert_eq!(group.get_data(1, 59, 2, Endianness::Little), 0);
    }

    #[test]
    fn empty_member_slot_is_unavailable() {
        let mut group = GroupSyncRead::new(56, 2);
        group.add_param(3);
        assert!(!group.is_available(3, 56, 2).0);
        assert_eq!(group.get_data(3, 56, 2, Endianness::Little), 0);
    }

    #[test]
    fn duplicate_member_is_rejected() {
        let mut group = GroupSyncRead::new(56, 2);
        assert!(group.add_param(3));
        assert!(!group.add_param(3));
        group.remove_param(3);
        assert!(group.add_param(3));
    }
}
