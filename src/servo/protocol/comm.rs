use std::fmt;

use thiserror::Error;

use crate::servo::protocol::stservo_def::{
    ERRBIT_ANGLE, ERRBIT_OVERELE, ERRBIT_OVERHEAT, ERRBIT_OVERLOAD, ERRBIT_VOLTAGE,
};

/// Outcome of one bus exchange at the transport/framing level.
///
/// A transaction produces exactly one of these. It says nothing about the
/// health of the servo itself; that travels separately as an [`ErrorByte`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommResult {
    Success,
    PortBusy,
    TxFail,
    TxError,
    RxWaiting,
    RxTimeout,
    RxCorrupt,
    NotAvailable,
}

impl CommResult {
    pub fn is_success(self) -> bool {
        self == CommResult::Success
    }

    pub fn description(self) -> &'static str {
        match self {
            CommResult::Success => "[TxRxResult] Communication success!",
            CommResult::PortBusy => "[TxRxResult] Port is in use!",
            CommResult::TxFail => "[TxRxResult] Failed transmit instruction packet!",
            CommResult::TxError => "[TxRxResult] Incorrect instruction packet!",
            CommResult::RxWaiting => "[TxRxResult] Now receiving status packet!",
            CommResult::RxTimeout => "[TxRxResult] There is no status packet!",
            CommResult::RxCorrupt => "[TxRxResult] Incorrect status packet!",
            CommResult::NotAvailable => "[TxRxResult] Protocol does not support this function!",
        }
    }
}

impl fmt::Display for CommResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Fault bitmask reported by a servo in its status packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ErrorByte(pub u8);

impl ErrorByte {
    pub const NONE: ErrorByte = ErrorByte(0);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn voltage(self) -> bool {
        self.0 & ERRBIT_VOLTAGE != 0
    }

    pub fn angle(self) -> bool {
        self.0 & ERRBIT_ANGLE != 0
    }

    pub fn overheat(self) -> bool {
        self.0 & ERRBIT_OVERHEAT != 0
    }

    pub fn over_current(self) -> bool {
        self.0 & ERRBIT_OVERELE != 0
    }

    pub fn overload(self) -> bool {
        self.0 & ERRBIT_OVERLOAD != 0
    }

    /// Message for the highest-priority fault, empty when no bit is set.
    pub fn description(self) -> &'static str {
        if self.voltage() {
            return "[ServoStatus] Input voltage error!";
        }
        if self.angle() {
            return "[ServoStatus] Angle sensor error!";
        }
        if self.overheat() {
            return "[ServoStatus] Overheat error!";
        }
        if self.over_current() {
            return "[ServoStatus] OverEle error!";
        }
        if self.overload() {
            return "[ServoStatus] Overload error!";
        }
        ""
    }
}

impl From<u8> for ErrorByte {
    fn from(value: u8) -> Self {
        ErrorByte(value)
    }
}

impl fmt::Display for ErrorByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no fault");
        }
        write!(f, "{} (0x{:02X})", self.description(), self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus exchange failed: {0}")]
    Comm(CommResult),
    #[error("servo reported a fault: {0}")]
    Servo(ErrorByte),
}

/// Collapses a `(value, result, error)` transaction triple into a `Result`.
///
/// Exchange failures win over device faults since a failed exchange carries
/// no trustworthy error byte.
pub fn into_result<T>(value: T, result: CommResult, error: ErrorByte) -> Result<T, BusError> {
    if !result.is_success() {
        return Err(BusError::Comm(result));
    }
    if !error.is_empty() {
        return Err(BusError::Servo(error));
    }
    Ok(value)
}
