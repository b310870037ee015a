// ===== Types and Structures =====

use core::fmt;

use bitflags::bitflags;

bitflags! {
    /// Error half of the interrupt register (bits 16..=31) as latched by the
    /// last command. An empty set on a failed command means nothing fired at
    /// all before the deadline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ErrorFlags: u32 {
        const CMD_TIMEOUT = 1 << 16;
        const CMD_CRC = 1 << 17;
        const CMD_END_BIT = 1 << 18;
        const CMD_INDEX = 1 << 19;
        const DATA_TIMEOUT = 1 << 20;
        const DATA_CRC = 1 << 21;
        const DATA_END_BIT = 1 << 22;
        const CURRENT_LIMIT = 1 << 23;
        const AUTO_CMD12 = 1 << 24;
        const ADMA = 1 << 25;
        const TUNING = 1 << 26;
    }
}

impl ErrorFlags {
    pub fn from_interrupt(irpts: u32) -> Self {
        Self::from_bits_retain(irpts & 0xffff_0000)
    }

    pub fn is_command_timeout(&self) -> bool {
        self.contains(Self::CMD_TIMEOUT)
    }

    pub fn is_command_crc(&self) -> bool {
        self.contains(Self::CMD_CRC)
    }

    pub fn is_data_timeout(&self) -> bool {
        self.contains(Self::DATA_TIMEOUT)
    }

    pub fn is_data_crc(&self) -> bool {
        self.contains(Self::DATA_CRC)
    }
}

/// Result of a single command issuance.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(ErrorFlags),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Failed without any interrupt being observed.
    pub fn is_bare_timeout(&self) -> bool {
        matches!(self, Outcome::Failure(flags) if flags.is_empty())
    }

    pub fn is_command_timeout(&self) -> bool {
        matches!(self, Outcome::Failure(flags) if flags.is_command_timeout())
    }

    pub fn error_flags(&self) -> ErrorFlags {
        match self {
            Outcome::Success => ErrorFlags::empty(),
            Outcome::Failure(flags) => *flags,
        }
    }

    pub fn into_result(self) -> Result<(), SdError> {
        match self {
            Outcome::Success => Ok(()),
            Outcome::Failure(flags) => Err(SdError::from(flags)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    Timeout,
    CommandTimeout,
    Crc,
    EndBit,
    Index,
    DataTimeout,
    DataCrc,
    DataEndBit,
    CurrentLimit,
    Acmd12Error,
    AdmaError,
    TuningError,
    CommandError,
    InvalidCommand,
    InvalidResponse,
    InvalidArgument,
    Misaligned,
    NoCard,
    CardRemoved,
    UnsupportedCard,
    UnsupportedHost,
    ResetFailed,
    ClockUnstable,
    VoltageSwitchFailed,
    TransferError,
    CardError(u32, &'static str), // 包含错误状态和描述
}

impl From<ErrorFlags> for SdError {
    fn from(flags: ErrorFlags) -> Self {
        if flags.is_empty() {
            SdError::Timeout
        } else if flags.contains(ErrorFlags::CMD_TIMEOUT) {
            SdError::CommandTimeout
        } else if flags.contains(ErrorFlags::CMD_CRC) {
            SdError::Crc
        } else if flags.contains(ErrorFlags::CMD_END_BIT) {
            SdError::EndBit
        } else if flags.contains(ErrorFlags::CMD_INDEX) {
            SdError::Index
        } else if flags.contains(ErrorFlags::DATA_TIMEOUT) {
            SdError::DataTimeout
        } else if flags.contains(ErrorFlags::DATA_CRC) {
            SdError::DataCrc
        } else if flags.contains(ErrorFlags::DATA_END_BIT) {
            SdError::DataEndBit
        } else if flags.contains(ErrorFlags::CURRENT_LIMIT) {
            SdError::CurrentLimit
        } else if flags.contains(ErrorFlags::AUTO_CMD12) {
            SdError::Acmd12Error
        } else if flags.contains(ErrorFlags::ADMA) {
            SdError::AdmaError
        } else if flags.contains(ErrorFlags::TUNING) {
            SdError::TuningError
        } else {
            SdError::CommandError
        }
    }
}

impl fmt::Display for SdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdError::Timeout => write!(f, "Timeout, no interrupt observed"),
            SdError::CommandTimeout => write!(f, "Command timeout error"),
            SdError::Crc => write!(f, "Command CRC error"),
            SdError::EndBit => write!(f, "Command end bit error"),
            SdError::Index => write!(f, "Command index error"),
            SdError::DataTimeout => write!(f, "Data timeout error"),
            SdError::DataCrc => write!(f, "Data CRC error"),
            SdError::DataEndBit => write!(f, "Data end bit error"),
            SdError::CurrentLimit => write!(f, "Current limit error"),
            SdError::Acmd12Error => write!(f, "Auto CMD12 error"),
            SdError::AdmaError => write!(f, "ADMA error"),
            SdError::TuningError => write!(f, "Tuning error"),
            SdError::CommandError => write!(f, "Command error"),
            SdError::InvalidCommand => write!(f, "Reserved command index"),
            SdError::InvalidResponse => write!(f, "Invalid response"),
            SdError::InvalidArgument => write!(f, "Invalid argument"),
            SdError::Misaligned => write!(f, "Offset not block aligned"),
            SdError::NoCard => write!(f, "No card detected"),
            SdError::CardRemoved => write!(f, "Card removed"),
            SdError::UnsupportedCard => write!(f, "Unsupported card"),
            SdError::UnsupportedHost => write!(f, "Unsupported host controller version"),
            SdError::ResetFailed => write!(f, "Controller reset did not complete"),
            SdError::ClockUnstable => write!(f, "Clock did not stabilise"),
            SdError::VoltageSwitchFailed => write!(f, "1.8V signal switch failed"),
            SdError::TransferError => write!(f, "Transfer error"),
            SdError::CardError(status, desc) => write!(f, "Card error: 0x{:X} ({})", status, desc),
        }
    }
}
