use std::collections::BTreeMap;

use crate::servo::protocol::comm::CommResult;
use crate::servo::protocol::port_handler::PortHandler;
use crate::servo::protocol::protocol_packet_handler::ProtocolPacketHandler;

/// Batched write of one register range on many servos.
///
/// Members go out in ascending id order, each carrying exactly
/// `data_length` bytes.
#[derive(Debug)]
pub struct GroupSyncWrite {
    start_address: u8,
    data_length: u8,
    is_param_changed: bool,
    param: Vec<u8>,
    data_dict: BTreeMap<u8, Vec<u8>>,
}

impl GroupSyncWrite {
    pub fn new(start_address: u8, data_length: u8) -> Self {
        Self {
            start_address,
            data_length,
            is_param_changed: false,
            param: Vec::new(),
            data_dict: BTreeMap::new(),
        }
    }

    fn make_param(&mut self) {
        let stride = 1 + self.data_length as usize;
        self.param.clear();
        self.param.reserve(self.data_dict.len() * stride);
        for (sts_id, data) in &self.data_dict {
            self.param.push(*sts_id);
            self.param.extend_from_slice(data);
            self.param
                .resize(self.param.len() + self.data_length as usize - data.len(), 0);
        }
        self.is_param_changed = false;
    }

    pub fn add_param(&mut self, sts_id: u8, data: &[u8]) -> bool {
        if self.data_dict.contains_key(&sts_id) {
            return false;
        }
        if data.len() > self.data_length as usize {
            return false;
        }
        self.data_dict.insert(sts_id, data.to_vec());
        self.is_param_changed = true;
        true
    }

    pub fn remove_param(&mut self, sts_id: u8) {
        if self.data_dict.remove(&sts_id).is_some() {
            self.is_param_changed = true;
        }
    }

    pub fn change_param(&mut self, sts_id: u8, data: &[u8]) -> bool {
        if data.len() > self.data_length as usize {
            return false;
        }
        let Some(slot) = self.data_dict.get_mut(&sts_id) else {
            return false;
        };
        *slot = data.to_vec();
        self.is_param_changed = true;
        true
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
        handler.sync_write_tx_only(self.start_address, self.data_length, &self.param)
    }

    pub fn is_available(&self) -> bool {
        !self.data_dict.is_empty()
    }

    pub fn data_length(&self) -> u8 {
        self.data_length
    }

    pub fn start_address(&self) -> u8 {
        self.start_address
    }

    /// Member ids in transmission order.
    pub fn ids(&self) -> Vec<u8> {
        self.data_dict.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::protocol::byte_order::Endianness;
    use crate::servo::protocol::packet::decode_instruction;
    use crate::servo::protocol::packet::Instruction;
    use crate::servo::protocol::port_handler::SimPort;

    #[test]
    fn add_and_change_reject_without_mutation() {
        let mut group = GroupSyncWrite::new(42, 2);
        assert!(group.add_param(1, &[1, 2]));
        assert!(!group.add_param(1, &[3, 4]));
        assert!(!group.add_param(2, &[1, 2, 3]));
        assert!(!group.change_param(9, &[1, 2]));
        assert!(!group.change_param(1, &[1, 2, 3]));
        assert_eq!(group.ids(), vec![1]);
        assert_eq!(group.data_dict.get(&1), Some(&vec![1, 2]));
    }

    #[test]
    fn param_block_is_sorted_and_padded() {
        let mut group = GroupSyncWrite::new(42, 2);
        group.add_param(7, &[0x70, 0x71]);
        group.add_param(3, &[0x30]);
        group.make_param();
        assert_eq!(group.param, vec![3, 0x30, 0x00, 7, 0x70, 0x71]);

        group.change_param(3, &[0x31, 0x32]);
        group.remove_param(7);
        group.make_param();
        assert_eq!(group.param, vec![3, 0x31, 0x32]);
    }

    #[test]
    fn empty_group_is_not_sent() {
        let mut handler = ProtocolPacketHandler::new(SimPort::default(), Endianness::Little);
        let mut group = GroupSyncWrite::new(42, 2);
        assert_eq!(group.tx_packet(&mut handler), CommResult::NotAvailable);
        assert!(handler.port_mut().take_written().is_empty());
    }

    #[test]
    fn tx_packet_rebuilds_after_membership_change() {
        let mut handler = ProtocolPacketHandler::new(SimPort::default(), Endianness::Little);
        let mut group = GroupSyncWrite::new(42, 1);
        group.add_param(2, &[5]);
        assert_eq!(group.tx_packet(&mut handler), CommResult::Success);
        group.add_param(1, &[6]);
        assert_eq!(group.tx_packet(&mut handler), CommResult::Success);

        let written = handler.port_mut().take_written();
        assert_eq!(written.len(), 2);
        let decoded = decode_instruction(&written[1]).expect("sync write frame");
        assert_eq!(
            decoded.instruction,
            Instruction::SyncWrite {
                address: 42,
                length: 1,
                params: vec![1, 6, 2, 5],
            }
        );
    }
}
