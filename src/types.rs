use std::fmt;

use crate::frame;

// J2534 Protocol IDs
pub const PROTOCOL_CAN: u32 = 5;
pub const PROTOCOL_ISO15765: u32 = 6;
/// Low 13 bits of a connect protocol id select the protocol; high bits are flags
pub const PROTOCOL_ID_MASK: u32 = 0x1FFF;

// J2534 Filter Types
pub const FILTER_PASS: u32 = 1;
pub const FILTER_BLOCK: u32 = 2;
pub const FILTER_FLOW_CONTROL: u32 = 3;

// J2534 Connect Flags
pub const CAN_29BIT_ID: u32 = 0x0100;

// J2534 TxFlags
pub const ISO15765_FRAME_PAD: u32 = 0x0040;
/// Addressing-mode bit in TxFlags/RxStatus; also the local config parameter id
pub const ISO15765_ADDR_TYPE: u32 = 0x0080;

// J2534 RxStatus
pub const ISO15765_PADDING_ERROR: u32 = 0x0010;

// J2534 IOCTL IDs
pub const GET_CONFIG: u32 = 0x01;
pub const SET_CONFIG: u32 = 0x02;
pub const READ_VBATT: u32 = 0x03;
pub const FIVE_BAUD_INIT: u32 = 0x04;
pub const FAST_INIT: u32 = 0x05;
pub const CLEAR_TX_BUFFER: u32 = 0x07;
pub const CLEAR_RX_BUFFER: u32 = 0x08;
pub const CLEAR_PERIODIC_MSGS: u32 = 0x09;
pub const CLEAR_MSG_FILTERS: u32 = 0x0A;

// Config Parameter IDs
pub const DATA_RATE: u32 = 0x01;
pub const LOOPBACK: u32 = 0x03;
pub const NODE_ADDRESS: u32 = 0x04;
pub const NETWORK_LINE: u32 = 0x05;
pub const ISO15765_BS: u32 = 0x1E;
pub const ISO15765_STMIN: u32 = 0x1F;
pub const ISO15765_WFT_MAX: u32 = 0x24;

pub const MAX_DATA_SIZE: usize = 4128;
/// Largest ISO-TP payload a FirstFrame length field can describe
pub const MAX_ISOTP_PAYLOAD: usize = 0x0FFF;

/// PASSTHRU_MSG structure matching the J2534 API spec
#[repr(C)]
#[derive(Clone)]
pub struct PassThruMsg {
    pub protocol_id: u32,
    pub rx_status: u32,
    pub tx_flags: u32,
    pub timestamp: u32,
    pub data_size: u32,
    pub extra_data_index: u32,
    pub data: [u8; MAX_DATA_SIZE],
}

impl Default for PassThruMsg {
    fn default() -> Self {
        Self {
            protocol_id: 0,
            rx_status: 0,
            tx_flags: 0,
            timestamp: 0,
            data_size: 0,
            extra_data_index: 0,
            data: [0u8; MAX_DATA_SIZE],
        }
    }
}

impl PassThruMsg {
    /// Build an ISO15765 message carrying `payload` addressed to `tx_id`
    pub fn new_iso15765(tx_id: u32, payload: &[u8]) -> Self {
        Self::new(PROTOCOL_ISO15765, tx_id, payload)
    }

    /// Build a raw CAN frame message (payload is at most 8 bytes)
    pub fn new_can(can_id: u32, payload: &[u8]) -> Self {
        Self::new(PROTOCOL_CAN, can_id, payload)
    }

    fn new(protocol_id: u32, can_id: u32, payload: &[u8]) -> Self {
        let mut msg = Self {
            protocol_id,
            data_size: (frame::ID_PREFIX + payload.len()) as u32,
            ..Default::default()
        };
        frame::encode_id(can_id, &mut msg.data[..frame::ID_PREFIX]);
        msg.data[frame::ID_PREFIX..frame::ID_PREFIX + payload.len()].copy_from_slice(payload);
        msg
    }

    /// Payload bytes after the 4-byte CAN identifier prefix
    pub fn payload(&self) -> &[u8] {
        if self.data_size as usize > frame::ID_PREFIX {
            &self.data[frame::ID_PREFIX..self.data_size as usize]
        } else {
            &[]
        }
    }

    /// CAN identifier encoded in the leading 4 data bytes
    pub fn can_id(&self) -> u32 {
        frame::decode_id(&self.data[..frame::ID_PREFIX])
    }
}

impl fmt::Debug for PassThruMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassThruMsg")
            .field("protocol_id", &self.protocol_id)
            .field("data_size", &self.data_size)
            .field(
                "data",
                &format_args!(
                    "[{}]",
                    self.data[..self.data_size as usize]
                        .iter()
                        .map(|b| format!("{:02X}", b))
                        .collect::<Vec<_>>()
                        .join(" ")
                ),
            )
            .finish()
    }
}

/// SCONFIG structure for GET_CONFIG / SET_CONFIG
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SConfig {
    pub parameter: u32,
    pub value: u32,
}
