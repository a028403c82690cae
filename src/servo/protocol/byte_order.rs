/// Order in which the two bytes of a 16-bit register are sent on the wire.
///
/// STS servos are little-endian, SCSCL servos big-endian. Every multi-byte
/// register access goes through one value of this type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    pub fn make_word(self, a: u8, b: u8) -> u16 {
        match self {
            Endianness::Little => (a as u16) | ((b as u16) << 8),
            Endianness::Big => (b as u16) | ((a as u16) << 8),
        }
    }

    pub fn make_dword(self, a: u16, b: u16) -> u32 {
        (a as u32) | ((b as u32) << 16)
    }

    pub fn lo_word(self, value: u32) -> u16 {
        (value & 0xFFFF) as u16
    }

    pub fn hi_word(self, value: u32) -> u16 {
        ((value >> 16) & 0xFFFF) as u16
    }

    /// First byte on the wire for `value`.
    pub fn lo_byte(self, value: u16) -> u8 {
        match self {
            Endianness::Little => (value & 0xFF) as u8,
            Endianness::Big => ((value >> 8) & 0xFF) as u8,
        }
    }

    /// Second byte on the wire for `value`.
    pub fn hi_byte(self, value: u16) -> u8 {
        match self {
            Endianness::Little => ((value >> 8) & 0xFF) as u8,
            Endianness::Big => (value & 0xFF) as u8,
        }
    }

    pub fn encode_u16(self, value: u16) -> [u8; 2] {
        [self.lo_byte(value), self.hi_byte(value)]
    }

    pub fn encode_u32(self, value: u32) -> [u8; 4] {
        let lo = self.lo_word(value);
        let hi = self.hi_word(value);
        [
            self.lo_byte(lo),
            self.hi_byte(lo),
            self.lo_byte(hi),
            self.hi_byte(hi),
        ]
    }

    /// Decodes up to four wire bytes. Returns `None` for any other width or
    /// when `data` is shorter than `width`.
    pub fn decode(self, data: &[u8], width: usize) -> Option<u32> {
        if data.len() < width {
            return None;
        }
        match width {
            1 => Some(data[0] as u32),
            2 => Some(self.make_word(data[0], data[1]) as u32),
            4 => Some(self.make_dword(
                self.make_word(data[0], data[1]),
                self.make_word(data[2], data[3]),
            )),
            _ => None,
        }
    }
}

fn sign_mask(sign_bit: u8) -> u16 {
    1u16.checked_shl(sign_bit as u32).unwrap_or(0)
}

/// Decodes a sign-magnitude register: `sign_bit` flags the sign, the other
/// bits are the magnitude. Sign set with zero magnitude decodes to 0. A
/// `sign_bit` past bit 15 means the register has no sign.
pub fn to_host(value: u16, sign_bit: u8) -> i32 {
    let mask = sign_mask(sign_bit);
    if value & mask != 0 {
        -((value & !mask) as i32)
    } else {
        value as i32
    }
}

/// Inverse of [`to_host`]. Magnitudes wider than the field are not clipped.
pub fn to_servo(value: i32, sign_bit: u8) -> u16 {
    if value < 0 {
        (value.unsigned_abs() as u16) | sign_mask(sign_bit)
    } else {
        value as u16
    }
}
