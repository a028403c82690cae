use thiserror::Error;

use crate::servo::protocol::comm::{CommResult, ErrorByte};
use crate::servo::protocol::stservo_def::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("packet shorter than the minimum frame")]
    TooShort,
    #[error("missing 0xFF 0xFF header")]
    BadHeader,
    #[error("length field does not match the frame size")]
    LengthMismatch,
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("status packet from id {actual}, expected {expected}")]
    IdMismatch { expected: u8, actual: u8 },
    #[error("packet of {0} bytes exceeds the 250 byte limit")]
    PacketTooLong(usize),
    #[error("malformed instruction parameters")]
    Malformed,
    #[error("unsupported instruction 0x{0:02X}")]
    UnsupportedInstruction(u8),
}

impl From<ProtocolError> for CommResult {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::PacketTooLong(_) => CommResult::TxError,
            _ => CommResult::RxCorrupt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Ping,
    Read { address: u8, length: u8 },
    Write { address: u8, data: Vec<u8> },
    RegWrite { address: u8, data: Vec<u8> },
    Action,
    SyncRead { address: u8, length: u8, ids: Vec<u8> },
    /// `params` is the already flattened `(id, payload)` block.
    SyncWrite { address: u8, length: u8, params: Vec<u8> },
}

impl Instruction {
    pub fn code(&self) -> u8 {
        match self {
            Instruction::Ping => INST_PING,
            Instruction::Read { .. } => INST_READ,
            Instruction::Write { .. } => INST_WRITE,
            Instruction::RegWrite { .. } => INST_REG_WRITE,
            Instruction::Action => INST_ACTION,
            Instruction::SyncRead { .. } => INST_SYNC_READ,
            Instruction::SyncWrite { .. } => INST_SYNC_WRITE,
        }
    }

    pub fn params(&self) -> Vec<u8> {
        match self {
            Instruction::Ping | Instruction::Action => Vec::new(),
            Instruction::Read { address, length } => vec![*address, *length],
            Instruction::Write { address, data } | Instruction::RegWrite { address, data } => {
                let mut params = Vec::with_capacity(1 + data.len());
                params.push(*address);
                params.extend_from_slice(data);
                params
            }
            Instruction::SyncRead { address, length, ids } => {
                let mut params = Vec::with_capacity(2 + ids.len());
                params.push(*address);
                params.push(*length);
                params.extend_from_slice(ids);
                params
            }
            Instruction::SyncWrite {
                address,
                length,
                params: block,
            } => {
                let mut params = Vec::with_capacity(2 + block.len());
                params.push(*address);
                params.push(*length);
                params.extend_from_slice(block);
                params
            }
        }
    }
}

/// A validated status packet returned by a servo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    pub id: u8,
    pub error: ErrorByte,
    pub params: Vec<u8>,
}

/// Instruction packet as seen by a servo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub id: u8,
    pub instruction: Instruction,
}

/// `~(sum of bytes[2..len-1]) & 0xFF` over a complete frame.
pub fn frame_checksum(frame: &[u8]) -> u8 {
    let end = frame.len().saturating_sub(1);
    let sum = frame[PKT_ID.min(end)..end]
        .iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte));
    !sum
}

pub fn checksum(id: u8, length: u8, instruction_or_error: u8, params: &[u8]) -> u8 {
    let mut sum = id.wrapping_add(length).wrapping_add(instruction_or_error);
    for byte in params {
        sum = sum.wrapping_add(*byte);
    }
    !sum
}

fn frame(id: u8, code: u8, params: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let total = params.len() + MIN_PACKET_LEN;
    if total > TXPACKET_MAX_LEN {
        return Err(ProtocolError::PacketTooLong(total));
    }

    let length = (params.len() + 2) as u8;
    let mut packet = Vec::with_capacity(total);
    packet.push(HEADER_BYTE);
    packet.push(HEADER_BYTE);
    packet.push(id);
    packet.push(length);
    packet.push(code);
    packet.extend_from_slice(params);
    packet.push(checksum(id, length, code, params));
    Ok(packet)
}

/// Serializes an instruction for `id`. Oversized packets are rejected, never
/// truncated.
pub fn build_packet(id: u8, instruction: &Instruction) -> Result<Vec<u8>, ProtocolError> {
    frame(id, instruction.code(), &instruction.params())
}

/// Serializes a status packet, as a servo would answer.
pub fn encode_status(id: u8, error: ErrorByte, params: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    frame(id, error.bits(), params)
}

fn split_frame(bytes: &[u8]) -> Result<(u8, u8, &[u8]), ProtocolError> {
    if bytes.len() < MIN_PACKET_LEN {
        return Err(ProtocolError::TooShort);
    }
    if bytes[PKT_HEADER0] != HEADER_BYTE || bytes[PKT_HEADER1] != HEADER_BYTE {
        return Err(ProtocolError::BadHeader);
    }

    let length = bytes[PKT_LENGTH] as usize;
    if length < 2 || length + 4 != bytes.len() {
        return Err(ProtocolError::LengthMismatch);
    }
    if frame_checksum(bytes) != bytes[bytes.len() - 1] {
        return Err(ProtocolError::ChecksumMismatch);
    }

    Ok((
        bytes[PKT_ID],
        bytes[PKT_INSTRUCTION],
        &bytes[PKT_PARAMETER0..bytes.len() - 1],
    ))
}

/// Validates a status packet addressed from `expected_id`.
pub fn parse_status(bytes: &[u8], expected_id: u8) -> Result<StatusPacket, ProtocolError> {
    let (id, error, params) = split_frame(bytes)?;
    if id != expected_id {
        return Err(ProtocolError::IdMismatch {
            expected: expected_id,
            actual: id,
        });
    }
    Ok(StatusPacket {
        id,
        error: ErrorByte(error),
        params: params.to_vec(),
    })
}

/// Decodes an instruction packet, as a servo would receive it.
pub fn decode_instruction(bytes: &[u8]) -> Result<Decoded, ProtocolError> {
    let (id, code, params) = split_frame(bytes)?;

    let instruction = match code {
        INST_PING => Instruction::Ping,
        INST_READ => {
            if params.len() != 2 {
                return Err(ProtocolError::Malformed);
            }
            Instruction::Read {
                address: params[0],
                length: params[1],
            }
        }
        INST_WRITE | INST_REG_WRITE => {
            let Some((&address, data)) = params.split_first() else {
                return Err(ProtocolError::Malformed);
            };
            let data = data.to_vec();
            if code == INST_WRITE {
                Instruction::Write { address, data }
            } else {
                Instruction::RegWrite { address, data }
            }
        }
        INST_ACTION => {
            if !params.is_empty() {
                return Err(ProtocolError::Malformed);
            }
            Instruction::Action
        }
        INST_SYNC_READ => {
            if params.len() < 2 {
                return Err(ProtocolError::Malformed);
            }
            Instruction::SyncRead {
                address: params[0],
                length: params[1],
                ids: params[2..].to_vec(),
            }
        }
        INST_SYNC_WRITE => {
            if params.len() < 2 {
                return Err(ProtocolError::Malformed);
            }
            let chunk_len = params[1] as usize + 1;
            if (params.len() - 2) % chunk_len != 0 {
                return Err(ProtocolError::Malformed);
            }
            Instruction::SyncWrite {
                address: params[0],
                length: params[1],
                params: params[2..].to_vec(),
            }
        }
        other => return Err(ProtocolError::UnsupportedInstruction(other)),
    };

    Ok(Decoded { id, instruction })
}

/// Splits a sync-write parameter block into `(id, payload)` pairs.
pub fn sync_write_entries(block: &[u8], length: u8) -> impl Iterator<Item = (u8, &[u8])> {
    block
        .chunks_exact(length as usize + 1)
        .map(|chunk| (chunk[0], &chunk[1..]))
}
