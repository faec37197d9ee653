use std::fmt;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, J2534Error>;

/// J2534 error codes as returned by Pass-Thru API functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum J2534Error {
    NoError = 0x00,
    NotSupported = 0x01,
    InvalidChannelId = 0x02,
    InvalidProtocolId = 0x03,
    NullParameter = 0x04,
    InvalidIoctlValue = 0x05,
    InvalidFlags = 0x06,
    Failed = 0x07,
    DeviceNotConnected = 0x08,
    Timeout = 0x09,
    InvalidMsg = 0x0A,
    InvalidTimeInterval = 0x0B,
    ExceededLimit = 0x0C,
    InvalidMsgId = 0x0D,
    DeviceInUse = 0x0E,
    InvalidIoctlId = 0x0F,
    BufferEmpty = 0x10,
    BufferFull = 0x11,
    BufferOverflow = 0x12,
    PinInvalid = 0x13,
    ChannelInUse = 0x14,
    MsgProtocolId = 0x15,
    InvalidFilterId = 0x16,
    NoFlowControl = 0x17,
    NotUnique = 0x18,
    InvalidBaudrate = 0x19,
    InvalidDeviceId = 0x1A,
}

impl J2534Error {
    pub fn from_code(code: u32) -> Self {
        match code {
            0x00 => Self::NoError,
            0x01 => Self::NotSupported,
            0x02 => Self::InvalidChannelId,
            0x03 => Self::InvalidProtocolId,
            0x04 => Self::NullParameter,
            0x05 => Self::InvalidIoctlValue,
            0x06 => Self::InvalidFlags,
            0x07 => Self::Failed,
            0x08 => Self::DeviceNotConnected,
            0x09 => Self::Timeout,
            0x0A => Self::InvalidMsg,
            0x0B => Self::InvalidTimeInterval,
            0x0C => Self::ExceededLimit,
            0x0D => Self::InvalidMsgId,
            0x0E => Self::DeviceInUse,
            0x0F => Self::InvalidIoctlId,
            0x10 => Self::BufferEmpty,
            0x11 => Self::BufferFull,
            0x12 => Self::BufferOverflow,
            0x13 => Self::PinInvalid,
            0x14 => Self::ChannelInUse,
            0x15 => Self::MsgProtocolId,
            0x16 => Self::InvalidFilterId,
            0x17 => Self::NoFlowControl,
            0x18 => Self::NotUnique,
            0x19 => Self::InvalidBaudrate,
            0x1A => Self::InvalidDeviceId,
            _ => Self::Failed,
        }
    }

    /// Numeric code as defined by the J2534 spec
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for J2534Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => write!(f, "No error"),
            Self::NotSupported => write!(f, "Not supported"),
            Self::InvalidChannelId => write!(f, "Invalid channel ID"),
            Self::InvalidProtocolId => write!(f, "Invalid protocol ID"),
            Self::NullParameter => write!(f, "Null parameter"),
            Self::InvalidIoctlValue => write!(f, "Invalid IOCTL value"),
            Self::InvalidFlags => write!(f, "Invalid flags"),
            Self::Failed => write!(f, "Failed"),
            Self::DeviceNotConnected => write!(f, "Device not connected"),
            Self::Timeout => write!(f, "Timeout"),
            Self::InvalidMsg => write!(f, "Invalid message"),
            Self::InvalidTimeInterval => write!(f, "Invalid time interval"),
            Self::ExceededLimit => write!(f, "Exceeded limit"),
            Self::InvalidMsgId => write!(f, "Invalid message ID"),
            Self::DeviceInUse => write!(f, "Device in use"),
            Self::InvalidIoctlId => write!(f, "Invalid IOCTL ID"),
            Self::BufferEmpty => write!(f, "Buffer empty"),
            Self::BufferFull => write!(f, "Buffer full"),
            Self::BufferOverflow => write!(f, "Buffer overflow"),
            Self::PinInvalid => write!(f, "Pin invalid"),
            Self::ChannelInUse => write!(f, "Channel in use"),
            Self::MsgProtocolId => write!(f, "Message protocol ID mismatch"),
            Self::InvalidFilterId => write!(f, "Invalid filter ID"),
            Self::NoFlowControl => write!(f, "No flow control"),
            Self::NotUnique => write!(f, "Not unique"),
            Self::InvalidBaudrate => write!(f, "Invalid baudrate"),
            Self::InvalidDeviceId => write!(f, "Invalid device ID"),
        }
    }
}

impl std::error::Error for J2534Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(J2534Error::NoError.to_string(), "No error");
        assert_eq!(J2534Error::Timeout.to_string(), "Timeout");
        assert_eq!(J2534Error::InvalidMsg.to_string(), "Invalid message");
        assert_eq!(J2534Error::NullParameter.to_string(), "Null parameter");
        assert_eq!(J2534Error::NotSupported.to_string(), "Not supported");
    }

    #[test]
    fn test_error_code_from_code() {
        assert_eq!(J2534Error::from_code(0x00), J2534Error::NoError);
        assert_eq!(J2534Error::from_code(0x04), J2534Error::NullParameter);
        assert_eq!(J2534Error::from_code(0x09), J2534Error::Timeout);
        assert_eq!(J2534Error::from_code(0x0A), J2534Error::InvalidMsg);
        // Unknown code falls back to Failed
        assert_eq!(J2534Error::from_code(0xFF), J2534Error::Failed);
    }

    #[test]
    fn test_error_code_roundtrip() {
        for code in 0x00..=0x1A {
            assert_eq!(
                J2534Error::from_code(code).code(),
                code,
                "Roundtrip failed for 0x{:02X}",
                code
            );
        }
    }
}
