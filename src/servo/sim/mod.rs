//! Register-level simulation of an STS servo bus.
//!
//! Servos keep a 256-byte control table and answer instruction packets the
//! way real hardware does: point-to-point instructions get a status packet,
//! broadcast ones are applied silently, sync read answers with one status
//! packet per listed servo. Faults can be injected to exercise the receive
//! path.

use std::collections::BTreeMap;

use log::trace;

use crate::servo::protocol::comm::ErrorByte;
use crate::servo::protocol::packet::{
    decode_instruction, encode_status, sync_write_entries, Instruction, ProtocolError,
};
use crate::servo::protocol::stservo_def::BROADCAST_ID;
use crate::servo::sts::*;

const REGISTER_COUNT: usize = 256;
/// Status bit the simulator raises for out-of-table accesses.
const ERROR_RANGE: u8 = 0x10;

pub const DEFAULT_MODEL_NUMBER: u16 = 777;

#[derive(Debug, Clone)]
pub struct FeetechServo {
    registers: [u8; REGISTER_COUNT],
    pending_writes: Vec<(u8, Vec<u8>)>,
    forced_error: u8,
    silent: bool,
}

impl FeetechServo {
    fn new(id: u8) -> Self {
        let mut servo = Self {
            registers: [0u8; REGISTER_COUNT],
            pending_writes: Vec::new(),
            forced_error: 0,
            silent: false,
        };
        servo.init_defaults(id);
        servo
    }

    fn init_defaults(&mut self, id: u8) {
        write_u16_le(&mut self.registers, STS_MODEL_L, DEFAULT_MODEL_NUMBER);
        self.registers[STS_ID as usize] = id;
        self.registers[STS_BAUD_RATE as usize] = STS_1M;
        write_u16_le(&mut self.registers, STS_MIN_ANGLE_LIMIT_L, 0);
        write_u16_le(&mut self.registers, STS_MAX_ANGLE_LIMIT_L, 4095);
        self.registers[STS_MODE as usize] = 0;
        self.registers[STS_TORQUE_ENABLE as usize] = 1;
        self.registers[STS_LOCK as usize] = 1;
        self.registers[STS_PRESENT_VOLTAGE as usize] = 74;
        self.registers[STS_PRESENT_TEMPERATURE as usize] = 30;
    }

    fn read(&self, address: u8, length: u8) -> Option<Vec<u8>> {
        let start = address as usize;
        let end = start + length as usize;
        self.registers.get(start..end).map(|slice| slice.to_vec())
    }

    fn write(&mut self, address: u8, data: &[u8]) -> bool {
        let start = address as usize;
        let end = start + data.len();
        let Some(target) = self.registers.get_mut(start..end) else {
            return false;
        };
        target.copy_from_slice(data);
        true
    }

    fn queue_write(&mut self, address: u8, data: &[u8]) {
        self.pending_writes.push((address, data.to_vec()));
    }

    fn apply_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending_writes);
        for (address, data) in pending {
            let _ = self.write(address, &data);
        }
    }

    fn read_status(&self, address: u8, length: u8) -> (u8, Vec<u8>) {
        match self.read(address, length) {
            Some(params) => (self.forced_error, params),
            None => (self.forced_error | ERROR_RANGE, vec![0u8; length as usize]),
        }
    }

    fn apply(&mut self, instruction: &Instruction) -> Option<(u8, Vec<u8>)> {
        match instruction {
            Instruction::Ping => Some((self.forced_error, Vec::new())),
            Instruction::Read { address, length } => Some(self.read_status(*address, *length)),
            Instruction::Write { address, data } => {
                let ok = self.write(*address, data);
                let error = if ok { 0 } else { ERROR_RANGE };
                Some((self.forced_error | error, Vec::new()))
            }
            Instruction::RegWrite { address, data } => {
                self.queue_write(*address, data);
                Some((self.forced_error, Vec::new()))
            }
            Instruction::Action => {
                self.apply_pending();
                Some((self.forced_error, Vec::new()))
            }
            Instruction::SyncRead { .. } | Instruction::SyncWrite { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FeetechBusSim {
    servos: BTreeMap<u8, FeetechServo>,
    noise: Vec<u8>,
    corrupt_next: bool,
    swallow_all: bool,
}

impl FeetechBusSim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_servo(&mut self, id: u8) {
        self.servos
            .entry(id)
            .or_insert_with(|| FeetechServo::new(id));
    }

    pub fn remove_servo(&mut self, id: u8) -> bool {
        self.servos.remove(&id).is_some()
    }

    pub fn servo_ids(&self) -> Vec<u8> {
        self.servos.keys().copied().collect()
    }

    /// Direct register access, bypassing the bus.
    pub fn register(&self, id: u8, address: u8) -> Option<u8> {
        self.servos
            .get(&id)
            .map(|servo| servo.registers[address as usize])
    }

    pub fn set_registers(&mut self, id: u8, address: u8, data: &[u8]) -> bool {
        self.servos
            .get_mut(&id)
            .is_some_and(|servo| servo.write(address, data))
    }

    /// Error bits OR-ed into every status packet from `id`.
    pub fn set_error(&mut self, id: u8, error: u8) -> bool {
        let Some(servo) = self.servos.get_mut(&id) else {
            return false;
        };
        servo.forced_error = error;
        true
    }

    /// A silent servo still executes instructions but never answers.
    pub fn set_silent(&mut self, id: u8, silent: bool) -> bool {
        let Some(servo) = self.servos.get_mut(&id) else {
            return false;
        };
        servo.silent = silent;
        true
    }

    /// Bytes emitted ahead of the next reply.
    pub fn inject_noise(&mut self, noise: &[u8]) {
        self.noise.extend_from_slice(noise);
    }

    /// Flips the checksum of the next reply.
    pub fn corrupt_next_reply(&mut self) {
        self.corrupt_next = true;
    }

    /// Drops every instruction on the floor, as a disconnected bus would.
    pub fn set_swallow_all(&mut self, swallow: bool) {
        self.swallow_all = swallow;
    }

    pub fn handle_frame(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.swallow_all {
            return Ok(None);
        }
        let decoded = decode_instruction(frame)?;
        trace!("sim <- id {} {:?}", decoded.id, decoded.instruction);

        let reply = match &decoded.instruction {
            Instruction::SyncRead {
                address,
                length,
                ids,
            } => {
                if decoded.id != BROADCAST_ID {
                    return Ok(None);
                }
                let mut frames = Vec::new();
                for id in ids {
                    let Some(servo) = self.servos.get(id) else {
                        continue;
                    };
                    if servo.silent {
                        continue;
                    }
                    let (error, params) = servo.read_status(*address, *length);
                    frames.extend_from_slice(&encode_status(*id, ErrorByte(error), &params)?);
                }
                frames
            }
            Instruction::SyncWrite {
                address,
                length,
                params,
            } => {
                if decoded.id == BROADCAST_ID {
                    for (id, data) in sync_write_entries(params, *length) {
                        if let Some(servo) = self.servos.get_mut(&id) {
                            let _ = servo.write(*address, data);
                        }
                    }
                }
                return Ok(None);
            }
            instruction if decoded.id == BROADCAST_ID => {
                for servo in self.servos.values_mut() {
                    let _ = servo.apply(instruction);
                }
                return Ok(None);
            }
            instruction => {
                let Some(servo) = self.servos.get_mut(&decoded.id) else {
                    return Ok(None);
                };
                let Some((error, params)) = servo.apply(instruction) else {
                    return Ok(None);
                };
                if servo.silent {
                    return Ok(None);
                }
                encode_status(decoded.id, ErrorByte(error), &params)?
            }
        };

        Ok(Some(self.with_faults(reply)))
    }

    fn with_faults(&mut self, mut reply: Vec<u8>) -> Vec<u8> {
        if std::mem::take(&mut self.corrupt_next) {
            if let Some(last) = reply.last_mut() {
                *last = last.wrapping_add(1);
            }
        }
        if self.noise.is_empty() {
            return reply;
        }
        let mut out = std::mem::take(&mut self.noise);
        out.append(&mut reply);
        out
    }
}

fn write_u16_le(registers: &mut [u8; REGISTER_COUNT], address: u8, value: u16) {
    let address = address as usize;
    registers[address] = (value & 0xFF) as u8;
    registers[address + 1] = (value >> 8) as u8;
}
