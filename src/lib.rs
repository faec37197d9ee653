//! # passthru-isotp
//!
//! An ISO 15765-2 (ISO-TP) segmentation and reassembly layer over a J2534
//! Pass-Thru CAN transport. The shim presents an ISO15765 channel to callers
//! while speaking raw CAN underneath: outbound diagnostic payloads (up to
//! 4095 bytes) are fragmented into Single/First/Consecutive frames with the
//! flow-control handshake driven per filter, and inbound CAN frames are
//! reassembled into whole messages before they reach the caller.
//!
//! The layering mirrors the J2534 object model:
//!
//! - [`Iso15765Library`] wraps a Pass-Thru library; opening a device yields
//!   an [`Iso15765Device`].
//! - [`Iso15765Device::connect`](passthru::PassThruDevice::connect) maps the
//!   ISO15765 protocol onto CAN and wraps the channel in
//!   [`Iso15765Channel`]; other protocols pass through untouched.
//! - [`Iso15765Channel`] routes writes by flow-control id and demultiplexes
//!   reads by filter pattern, one ISO-TP transfer per flow-control filter.
//!
//! The wrapped transport is anything implementing the [`passthru`] traits:
//! a vendor J2534 DLL through [`dll::DllLibrary`], or a test double.
//!
//! ```no_run
//! use passthru_isotp::dll::DllLibrary;
//! use passthru_isotp::types::{FILTER_FLOW_CONTROL, PROTOCOL_ISO15765};
//! use passthru_isotp::{Iso15765Library, PassThruChannel, PassThruDevice, PassThruLibrary, PassThruMsg};
//!
//! # fn main() -> passthru_isotp::Result<()> {
//! let mut library = Iso15765Library::new(DllLibrary::load("j2534.dll")?);
//! let mut device = library.open(None)?;
//! let mut channel = device.connect(PROTOCOL_ISO15765, 0, 500_000)?;
//!
//! let filter = |id: u32| PassThruMsg::new_iso15765(id, &[]);
//! channel.start_msg_filter(
//!     FILTER_FLOW_CONTROL,
//!     Some(&filter(0x7FF)),
//!     Some(&filter(0x7E8)),
//!     Some(&filter(0x7E0)),
//! )?;
//!
//! // Request the VIN; segmentation and flow control happen underneath
//! let request = PassThruMsg::new_iso15765(0x7E0, &[0x22, 0xF1, 0x90]);
//! let mut num = 1;
//! channel.write_msgs(std::slice::from_ref(&request), &mut num, 1000)?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod device;
pub mod dll;
pub mod error;
pub mod frame;
#[cfg(test)]
pub mod mock;
pub mod passthru;
pub mod transfer;
pub mod types;

pub use channel::Iso15765Channel;
pub use device::{Iso15765Device, Iso15765Library, ProxyChannel};
pub use error::{J2534Error, Result};
pub use passthru::{DeviceVersion, PassThruChannel, PassThruDevice, PassThruLibrary};
pub use transfer::Transfer;
pub use types::PassThruMsg;
