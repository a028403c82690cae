//! STS/ST3215 control table and baud-rate codes.

pub const STS_1M: u8 = 0;
pub const STS_0_5M: u8 = 1;
pub const STS_250K: u8 = 2;
pub const STS_128K: u8 = 3;
pub const STS_115200: u8 = 4;
pub const STS_76800: u8 = 5;
pub const STS_57600: u8 = 6;
pub const STS_38400: u8 = 7;

// EPROM, read only
pub const STS_MODEL_L: u8 = 3;
pub const STS_MODEL_H: u8 = 4;

// EPROM, read/write
pub const STS_ID: u8 = 5;
pub const STS_BAUD_RATE: u8 = 6;
pub const STS_MIN_ANGLE_LIMIT_L: u8 = 9;
pub const STS_MIN_ANGLE_LIMIT_H: u8 = 10;
pub const STS_MAX_ANGLE_LIMIT_L: u8 = 11;
pub const STS_MAX_ANGLE_LIMIT_H: u8 = 12;
pub const STS_CW_DEAD: u8 = 26;
pub const STS_CCW_DEAD: u8 = 27;
pub const STS_OFS_L: u8 = 31;
pub const STS_OFS_H: u8 = 32;
pub const STS_MODE: u8 = 33;

// SRAM, read/write
pub const STS_TORQUE_ENABLE: u8 = 40;
pub const STS_ACC: u8 = 41;
pub const STS_GOAL_POSITION_L: u8 = 42;
pub const STS_GOAL_POSITION_H: u8 = 43;
pub const STS_GOAL_TIME_L: u8 = 44;
pub const STS_GOAL_TIME_H: u8 = 45;
pub const STS_GOAL_SPEED_L: u8 = 46;
pub const STS_GOAL_SPEED_H: u8 = 47;
pub const STS_LOCK: u8 = 55;

// SRAM, read only
pub const STS_PRESENT_POSITION_L: u8 = 56;
pub const STS_PRESENT_POSITION_H: u8 = 57;
pub const STS_PRESENT_SPEED_L: u8 = 58;
pub const STS_PRESENT_SPEED_H: u8 = 59;
pub const STS_PRESENT_LOAD_L: u8 = 60;
pub const STS_PRESENT_LOAD_H: u8 = 61;
pub const STS_PRESENT_VOLTAGE: u8 = 62;
pub const STS_PRESENT_TEMPERATURE: u8 = 63;
pub const STS_STATUS: u8 = 65;
pub const STS_MOVING: u8 = 66;
pub const STS_PRESENT_CURRENT_L: u8 = 69;
pub const STS_PRESENT_CURRENT_H: u8 = 70;

/// Sign bit of the present speed and goal speed registers.
pub const SPEED_SIGN_BIT: u8 = 15;
/// Sign bit of the 11-bit position offset register.
pub const CORRECTION_SIGN_BIT: u8 = 11;

const BAUD_RATES: [u32; 8] = [
    1_000_000, 500_000, 250_000, 128_000, 115_200, 76_800, 57_600, 38_400,
];

/// Line speed selected by a value of the `STS_BAUD_RATE` register.
pub fn baud_rate_from_code(code: u8) -> Option<u32> {
    BAUD_RATES.get(code as usize).copied()
}

pub fn code_from_baud_rate(baudrate: u32) -> Option<u8> {
    BAUD_RATES
        .iter()
        .position(|rate| *rate == baudrate)
        .map(|idx| idx as u8)
}
